use core::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

/// An Error that can occur in this crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    GpioError(#[from] rppal::gpio::Error),

    #[error("{0}")]
    I2cError(#[from] rppal::i2c::Error),

    #[error("mcp23017 at {0:#04x} is not present")]
    DeviceNotPresent(u16),

    #[error("{name}: {target} is out of range open/close position for ({open}/{close})")]
    OutOfRange {
        name: String,
        target: i32,
        open: i32,
        close: i32,
    },

    #[error("{0}: full open and full close positions must differ")]
    InvalidRange(String),

    #[error("mcp23017 device '{0}' is not defined")]
    UnknownDevice(String),

    #[error("Config read error: {0}")]
    ConfigReadError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("Invalid config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}
