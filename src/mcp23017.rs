//! MCP23017 16-bit I²C port expander, and the registry of opened expanders.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use rppal::i2c::I2c;
use tracing::{error, info};

use crate::config::Mcp23017Config;
use crate::{Error, Result};

const BASE_ADDRESS: u16 = 0x20;

const IODIRA: u8 = 0x00;
const IODIRB: u8 = 0x01;
const OLATA: u8 = 0x14;
const OLATB: u8 = 0x15;

pub const PINS: u8 = 16;

pub struct Mcp23017 {
    address: u16,
    bus: Mutex<Bus>,
}

struct Bus {
    i2c: I2c,
    iodir: u16,
    olat: u16,
}

impl Mcp23017 {
    pub fn open(bus: u8, device_number: u8) -> Result<Self> {
        let address = BASE_ADDRESS + u16::from(device_number & 0x07);
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(address)?;

        Ok(Self {
            address,
            bus: Mutex::new(Bus {
                i2c,
                iodir: 0xffff,
                olat: 0,
            }),
        })
    }

    /// Return every pin to a high-impedance input with a cleared latch.
    pub fn reset(&self) -> Result<()> {
        let mut bus = self.lock();
        bus.iodir = 0xffff;
        bus.olat = 0;
        write_word(&bus.i2c, IODIRA, IODIRB, bus.iodir)?;
        write_word(&bus.i2c, OLATA, OLATB, bus.olat)
    }

    pub fn is_present(&self) -> bool {
        self.lock().i2c.smbus_read_byte(IODIRA).is_ok()
    }

    pub fn set_output(&self, pin: u8) -> Result<()> {
        let mut bus = self.lock();
        let iodir = with_bit(bus.iodir, pin, false);
        write_word(&bus.i2c, IODIRA, IODIRB, iodir)?;
        bus.iodir = iodir;
        Ok(())
    }

    pub fn write(&self, pin: u8, high: bool) -> Result<()> {
        if !self.is_present() {
            return Err(Error::DeviceNotPresent(self.address));
        }

        let mut bus = self.lock();
        let olat = with_bit(bus.olat, pin, high);
        write_word(&bus.i2c, OLATA, OLATB, olat)?;
        bus.olat = olat;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Bus> {
        // a panic mid-write leaves nothing the next write can't overwrite
        self.bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn with_bit(word: u16, pin: u8, on: bool) -> u16 {
    let mask = 1u16 << (pin % PINS);
    if on {
        word | mask
    } else {
        word & !mask
    }
}

fn write_word(i2c: &I2c, a: u8, b: u8, word: u16) -> Result<()> {
    let [low, high] = word.to_le_bytes();
    i2c.smbus_write_byte(a, low)?;
    i2c.smbus_write_byte(b, high)?;
    Ok(())
}

/// Expanders opened on demand, keyed by their configured id. Owned by the
/// composition root and closed with [`Devices::shutdown`].
pub struct Devices {
    config: BTreeMap<String, Mcp23017Config>,
    opened: Mutex<HashMap<String, Arc<Mcp23017>>>,
}

impl Devices {
    pub fn new(config: BTreeMap<String, Mcp23017Config>) -> Self {
        Self {
            config,
            opened: Mutex::new(HashMap::new()),
        }
    }

    /// The expander with `id`, opened and reset on first use.
    pub fn get(&self, id: &str) -> Result<Arc<Mcp23017>> {
        let cfg = self
            .config
            .get(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;

        let mut opened = self.opened.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(device) = opened.get(id) {
            return Ok(device.clone());
        }

        let device = Mcp23017::open(cfg.bus, cfg.device_number)?;
        device.reset()?;
        info!(id, bus = cfg.bus, address = device.address, "mcp23017 opened");

        let device = Arc::new(device);
        opened.insert(id.to_string(), device.clone());
        Ok(device)
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Release every opened expander.
    pub fn shutdown(&self) {
        let mut opened = self.opened.lock().unwrap_or_else(|p| p.into_inner());
        for (id, device) in opened.drain() {
            match device.reset() {
                Ok(()) => info!(%id, "mcp23017 closed"),
                Err(e) => error!(%id, "mcp23017 close failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_bit_sets_and_clears_one_pin() {
        assert_eq!(with_bit(0, 0, true), 0x0001);
        assert_eq!(with_bit(0, 15, true), 0x8000);
        assert_eq!(with_bit(0xffff, 8, false), 0xfeff);
        assert_eq!(with_bit(0x00f0, 3, false), 0x00f0);
    }

    #[test]
    fn unknown_device_is_rejected_without_touching_the_bus() {
        let devices = Devices::new(BTreeMap::new());

        assert!(matches!(devices.get("spare"), Err(Error::UnknownDevice(id)) if id == "spare"));
        assert_eq!(devices.opened(), 0);
    }
}
