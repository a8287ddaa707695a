use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{hold, Activation, Relay};
use crate::Result;

/// A single electrical output. Fails when the device behind it can't be
/// written.
pub trait SetPin: Send + Sync {
    fn set_high(&self) -> Result<()>;
    fn set_low(&self) -> Result<()>;
}

/// A relay switched by one output pin.
///
/// `normal_closed` relays are energized by pulling the pin low. The pin is
/// driven to the released level as soon as the relay is built.
pub struct Wired {
    name: String,
    pin: Box<dyn SetPin>,
    normal_closed: bool,
    enabled: AtomicBool,
}

impl Wired {
    pub fn new(name: impl Into<String>, pin: Box<dyn SetPin>, normal_closed: bool) -> Result<Self> {
        let relay = Self {
            name: name.into(),
            pin,
            normal_closed,
            enabled: AtomicBool::new(false),
        };
        relay.write(false)?;
        Ok(relay)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn energize(&self) -> Result<Energized<'_>> {
        if let Err(e) = self.write(true) {
            if let Err(release) = self.write(false) {
                warn!(relay = %self.name, "release after failed enable: {}", release);
            }
            return Err(e);
        }

        Ok(Energized {
            relay: self,
            released: false,
        })
    }

    fn write(&self, enable: bool) -> Result<()> {
        self.enabled.store(enable, Ordering::SeqCst);
        if enable != self.normal_closed {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }
}

/// Releases the output when dropped, so a dropped activation future can't
/// leave it energized.
struct Energized<'a> {
    relay: &'a Wired,
    released: bool,
}

impl Energized<'_> {
    fn release(mut self) -> Result<()> {
        self.released = true;
        self.relay.write(false)
    }
}

impl Drop for Energized<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.relay.write(false) {
                error!(relay = %self.relay.name, "release on drop: {}", e);
            }
        }
    }
}

#[async_trait]
impl Relay for Wired {
    async fn enable_for(&self, scope: &CancellationToken, duration: Duration) -> Result<Activation> {
        let energized = self.energize()?;
        debug!(relay = %self.name, ?duration, "wired relay enabled");

        let outcome = hold(scope, duration).await;
        if outcome == Activation::Canceled {
            debug!(relay = %self.name, "wired relay scope exit");
        }

        energized.release()?;
        Ok(outcome)
    }
}
