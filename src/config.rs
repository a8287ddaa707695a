//! TOML configuration.
//!
//! ```toml
//! log_level = "info"
//!
//! [bridge]
//! address = "0.0.0.0"
//! port = 9000
//!
//! [drivers.relay]
//! pool = 4
//!
//! [drivers.relay.mcp23017.main]
//! bus = 1
//! device_number = 0
//!
//! [[shutters]]
//! name = "living_room"
//! time_to_close_ms = 30000
//! up = { kind = "wired", normal_closed = true, pin = { kind = "mcp23017", device = "main", pin = 0 } }
//! down = { kind = "wired", normal_closed = true, pin = { kind = "mcp23017", device = "main", pin = 1 } }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::mcp23017;
use crate::{Error, Result};

/// One day.
const MAX_TIME_TO_CLOSE_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub drivers: DriversConfig,

    #[serde(default)]
    pub shutters: Vec<ShutterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriversConfig {
    #[serde(default)]
    pub relay: RelayDriversConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayDriversConfig {
    /// Most relays energized at once across all shutters. Unlimited if unset.
    pub pool: Option<usize>,

    #[serde(default)]
    pub mcp23017: BTreeMap<String, Mcp23017Config>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mcp23017Config {
    #[serde(default = "default_bus")]
    pub bus: u8,

    #[serde(default)]
    pub device_number: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutterConfig {
    pub name: String,

    pub up: RelayConfig,
    pub down: RelayConfig,

    #[serde(default = "default_full_open")]
    pub full_open_position: i32,

    #[serde(default)]
    pub full_close_position: i32,

    #[serde(default = "default_time_to_close_ms")]
    pub time_to_close_ms: u64,

    /// Lock the up and down relays against each other.
    #[serde(default = "default_paired")]
    pub paired: bool,

    /// Position to assume at startup instead of the closed bound.
    pub restore_position: Option<i32>,
}

impl ShutterConfig {
    pub fn time_to_close(&self) -> Duration {
        Duration::from_millis(self.time_to_close_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum RelayConfig {
    Dumb,
    Wired {
        pin: PinConfig,
        #[serde(default)]
        normal_closed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum PinConfig {
    Gpio { pin: u8 },
    Mcp23017 { device: String, pin: u8 },
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_bus() -> u8 {
    1
}

fn default_full_open() -> i32 {
    100
}

fn default_time_to_close_ms() -> u64 {
    60_000
}

fn default_paired() -> bool {
    true
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Every problem in the config, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.drivers.relay.pool == Some(0) {
            errors.push("drivers.relay.pool must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for shutter in &self.shutters {
            if shutter.name.is_empty() {
                errors.push("shutter name must not be empty".to_string());
            } else if !names.insert(shutter.name.as_str()) {
                errors.push(format!("duplicate shutter name '{}'", shutter.name));
            }
            errors.extend(self.validate_shutter(shutter));
        }

        errors
    }

    fn validate_shutter(&self, shutter: &ShutterConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let name = &shutter.name;
        let (open, close) = (shutter.full_open_position, shutter.full_close_position);

        if open == close {
            errors.push(format!("{}: full open and full close positions must differ", name));
        }
        if shutter.time_to_close_ms == 0 {
            errors.push(format!("{}: time_to_close_ms must be positive", name));
        } else if shutter.time_to_close_ms > MAX_TIME_TO_CLOSE_MS {
            errors.push(format!(
                "{}: time_to_close_ms must not exceed {}",
                name, MAX_TIME_TO_CLOSE_MS
            ));
        }
        if let Some(restore) = shutter.restore_position {
            if restore < open.min(close) || restore > open.max(close) {
                errors.push(format!(
                    "{}: restore_position {} is outside {}..={}",
                    name,
                    restore,
                    open.min(close),
                    open.max(close)
                ));
            }
        }

        for (side, relay) in [("up", &shutter.up), ("down", &shutter.down)] {
            if let RelayConfig::Wired {
                pin: PinConfig::Mcp23017 { device, pin },
                ..
            } = relay
            {
                if !self.drivers.relay.mcp23017.contains_key(device) {
                    errors.push(format!(
                        "{}: {} relay uses undefined mcp23017 device '{}'",
                        name, side, device
                    ));
                }
                if *pin >= mcp23017::PINS {
                    errors.push(format!("{}: {} relay pin {} is out of range", name, side, pin));
                }
            }
        }

        if shutter.up == shutter.down && shutter.up != RelayConfig::Dumb {
            errors.push(format!("{}: up and down relays share one output", name));
        }

        errors
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(Error::InvalidConfig(errors));
        }

        Ok(config)
    }
}
