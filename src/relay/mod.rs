//! Relay drivers.
//!
//! A [`Relay`] energizes one output for a bounded duration. The leaf drivers
//! are [`Dumb`] (simulated) and [`Wired`] (a real output pin); [`PoolProxy`]
//! and [`PairedRelay`] wrap another relay to limit how many outputs, or which
//! outputs, may be energized at the same time.

use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::Result;

mod dumb;
mod pair;
mod pool;
mod wired;

pub use dumb::Dumb;
pub use pair::{pair, PairedRelay};
pub use pool::{PoolProxy, RelayPool};
pub use wired::{SetPin, Wired};

/// How an activation ended when no output write failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Activation {
    /// The full duration elapsed.
    Completed,
    /// The caller's scope was canceled first.
    Canceled,
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// Energize the output for `duration`, or until `scope` is canceled.
    ///
    /// The output is released on every exit path. Cancellation is reported as
    /// [`Activation::Canceled`], never as an error.
    async fn enable_for(&self, scope: &CancellationToken, duration: Duration) -> Result<Activation>;
}

/// Wait out `duration` unless `scope` is canceled first.
pub(crate) async fn hold(scope: &CancellationToken, duration: Duration) -> Activation {
    select! {
        biased;
        _ = scope.cancelled() => Activation::Canceled,
        _ = tokio::time::sleep(duration) => Activation::Completed,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{hold, Activation, Relay};
    use crate::{Error, Result};

    /// Counts how many probes sharing one tracker are energized at once.
    #[derive(Default)]
    pub struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
        activations: AtomicUsize,
    }

    impl Tracker {
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn active(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        pub fn activations(&self) -> usize {
            self.activations.load(Ordering::SeqCst)
        }
    }

    pub struct Probe {
        tracker: Arc<Tracker>,
    }

    impl Probe {
        pub fn new(tracker: &Arc<Tracker>) -> Arc<dyn Relay> {
            Arc::new(Probe {
                tracker: tracker.clone(),
            })
        }
    }

    #[async_trait]
    impl Relay for Probe {
        async fn enable_for(
            &self,
            scope: &CancellationToken,
            duration: Duration,
        ) -> Result<Activation> {
            let now = self.tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.peak.fetch_max(now, Ordering::SeqCst);
            self.tracker.activations.fetch_add(1, Ordering::SeqCst);

            let outcome = hold(scope, duration).await;

            self.tracker.active.fetch_sub(1, Ordering::SeqCst);
            Ok(outcome)
        }
    }

    /// Fails after energizing for `after`, like a device dropping off the bus.
    pub struct Failing {
        pub after: Duration,
    }

    #[async_trait]
    impl Relay for Failing {
        async fn enable_for(
            &self,
            scope: &CancellationToken,
            _duration: Duration,
        ) -> Result<Activation> {
            match hold(scope, self.after).await {
                Activation::Canceled => Ok(Activation::Canceled),
                Activation::Completed => Err(Error::DeviceNotPresent(0x20)),
            }
        }
    }
}
