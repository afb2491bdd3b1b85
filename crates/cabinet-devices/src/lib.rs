#![forbid(unsafe_code)]

//! Virtual devices an arcade application talks to, and the composition root that wires them
//! into an operation chain.

mod cabinet;
pub mod config;
mod jvs_port;
pub mod uart;

pub use cabinet::Cabinet;
pub use config::{CabinetConfig, ConfigError, JvsConfig};
pub use jvs_port::JvsPort;
pub use uart::{Purge, Uart};
