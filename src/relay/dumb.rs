use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{hold, Activation, Relay};
use crate::Result;

/// A relay with no output behind it. It only waits, which is enough to run a
/// shutter without hardware.
#[derive(Debug, Default, Clone)]
pub struct Dumb {
    pub name: String,
}

impl Dumb {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Relay for Dumb {
    async fn enable_for(&self, scope: &CancellationToken, duration: Duration) -> Result<Activation> {
        debug!(relay = %self.name, ?duration, "dumb relay start");

        let outcome = hold(scope, duration).await;
        match outcome {
            Activation::Completed => debug!(relay = %self.name, "dumb relay done"),
            Activation::Canceled => debug!(relay = %self.name, "dumb relay exit"),
        }

        Ok(outcome)
    }
}
