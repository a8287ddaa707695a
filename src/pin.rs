use std::sync::{Arc, Mutex};

use rppal::gpio::{Gpio, OutputPin};
use tracing::trace;

use crate::mcp23017::Mcp23017;
use crate::relay::SetPin;
use crate::Result;

/// A Raspberry Pi header pin.
pub struct GpioPin {
    pin: Mutex<OutputPin>,
}

impl GpioPin {
    pub fn new(pin: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(pin)?.into_output_low();
        Ok(Self {
            pin: Mutex::new(pin),
        })
    }

    fn output(&self) -> std::sync::MutexGuard<'_, OutputPin> {
        self.pin.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SetPin for GpioPin {
    fn set_high(&self) -> Result<()> {
        self.output().set_high();
        Ok(())
    }

    fn set_low(&self) -> Result<()> {
        self.output().set_low();
        Ok(())
    }
}

/// One pin of an MCP23017 expander.
pub struct Mcp23017Pin {
    device: Arc<Mcp23017>,
    pin: u8,
}

impl Mcp23017Pin {
    pub fn new(device: Arc<Mcp23017>, pin: u8) -> Result<Self> {
        device.set_output(pin)?;
        Ok(Self { device, pin })
    }
}

impl SetPin for Mcp23017Pin {
    fn set_high(&self) -> Result<()> {
        trace!(pin = self.pin, "mcp23017 high");
        self.device.write(self.pin, true)
    }

    fn set_low(&self) -> Result<()> {
        trace!(pin = self.pin, "mcp23017 low");
        self.device.write(self.pin, false)
    }
}
