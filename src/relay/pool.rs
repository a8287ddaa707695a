use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Activation, Relay};
use crate::Result;

/// Admission pool shared by relays that draw on one constrained resource,
/// e.g. a supply that can't carry every motor at once.
#[derive(Clone, Debug)]
pub struct RelayPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RelayPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held by an energized relay.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wrap `relay` so that its activations count against this pool.
    pub fn proxy(&self, relay: Arc<dyn Relay>) -> PoolProxy {
        PoolProxy {
            relay,
            permits: self.permits.clone(),
        }
    }
}

pub struct PoolProxy {
    relay: Arc<dyn Relay>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl Relay for PoolProxy {
    async fn enable_for(&self, scope: &CancellationToken, duration: Duration) -> Result<Activation> {
        let _permit = select! {
            biased;
            _ = scope.cancelled() => return Ok(Activation::Canceled),
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                // the pool never closes its semaphore
                Err(_) => return Ok(Activation::Canceled),
            },
        };
        trace!(available = self.permits.available_permits(), "pool slot acquired");

        self.relay.enable_for(scope, duration).await
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use tokio::time::Instant;

    use super::*;
    use crate::relay::testing::{Failing, Probe, Tracker};
    use crate::relay::Dumb;

    const TICK: Duration = Duration::from_millis(5);

    async fn enable_proxied_relays_for(pool: &RelayPool, num: usize, duration: Duration) {
        let scope = CancellationToken::new();
        let relays: Vec<_> = (0..num)
            .map(|i| pool.proxy(Arc::new(Dumb::new(format!("dumb-{}", i)))))
            .collect();

        join_all(relays.iter().map(|r| r.enable_for(&scope, duration))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn relays_within_capacity_run_at_once() {
        let pool = RelayPool::new(4);

        for num in [2, 4] {
            let start = Instant::now();
            enable_proxied_relays_for(&pool, num, TICK).await;
            let elapsed = start.elapsed();
            assert!(elapsed >= TICK);
            assert!(elapsed < TICK * 2, "{} relays took {:?}", num, elapsed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn six_relays_run_in_two_batches_on_a_pool_of_four() {
        let pool = RelayPool::new(4);

        let start = Instant::now();
        enable_proxied_relays_for(&pool, 6, TICK).await;

        assert!(start.elapsed() >= TICK * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn nine_relays_run_in_three_batches_on_a_pool_of_four() {
        let pool = RelayPool::new(4);

        let start = Instant::now();
        enable_proxied_relays_for(&pool, 9, TICK).await;

        assert!(start.elapsed() >= TICK * 3);
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        let pool = RelayPool::new(3);
        let tracker = Arc::new(Tracker::default());
        let scope = CancellationToken::new();
        let relays: Vec<_> = (0..10).map(|_| pool.proxy(Probe::new(&tracker))).collect();

        join_all(relays.iter().map(|r| r.enable_for(&scope, TICK))).await;

        assert_eq!(tracker.activations(), 10);
        assert_eq!(tracker.peak(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_a_slot_is_abandoned_on_cancel() {
        let pool = RelayPool::new(1);
        let busy = pool.proxy(Arc::new(Dumb::new("busy")));
        let waiting = pool.proxy(Arc::new(Dumb::new("waiting")));

        let long = CancellationToken::new();
        let holder = tokio::spawn(async move { busy.enable_for(&long, Duration::from_secs(60)).await });
        tokio::time::sleep(TICK).await;

        let scope = CancellationToken::new();
        scope.cancel();
        let outcome = waiting.enable_for(&scope, TICK).await.unwrap();

        assert_eq!(outcome, Activation::Canceled);
        holder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn slot_is_released_after_failure() {
        let pool = RelayPool::new(1);
        let failing = pool.proxy(Arc::new(Failing { after: TICK }));
        let scope = CancellationToken::new();

        assert!(failing.enable_for(&scope, TICK * 2).await.is_err());
        assert_eq!(pool.available(), 1);
    }
}
