use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{Activation, Relay};
use crate::Result;

/// Put two relays behind one lock so they are never energized together, e.g.
/// the up and down windings of one motor.
pub fn pair(first: Arc<dyn Relay>, second: Arc<dyn Relay>) -> (PairedRelay, PairedRelay) {
    let lock = Arc::new(Mutex::new(()));

    (
        PairedRelay {
            lock: lock.clone(),
            relay: first,
        },
        PairedRelay { lock, relay: second },
    )
}

/// One side of a [`pair`]. Clones share the same lock, so any number of
/// shutters may drive the same pair.
#[derive(Clone)]
pub struct PairedRelay {
    lock: Arc<Mutex<()>>,
    relay: Arc<dyn Relay>,
}

#[async_trait]
impl Relay for PairedRelay {
    async fn enable_for(&self, scope: &CancellationToken, duration: Duration) -> Result<Activation> {
        let _guard = select! {
            biased;
            _ = scope.cancelled() => return Ok(Activation::Canceled),
            guard = self.lock.lock() => guard,
        };

        self.relay.enable_for(scope, duration).await
    }
}
