//! Open-loop control of relay driven shutters.
//!
//! [`shutter::ShutterController`] estimates a shutter's position from how long
//! its relays run. Relays are composed from [`relay`]: leaf drivers, an
//! admission [`relay::RelayPool`] and mutually exclusive [`relay::pair`]s.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod mcp23017;
pub mod pin;
pub mod relay;
pub mod shutter;
pub mod wiring;

pub use error::{Error, Result};
