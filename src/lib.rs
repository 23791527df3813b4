//! gum - Host-side driver for a serial-attached control unit
//!
//! The control unit only exposes its memory over a serial line. This crate
//! turns that into something usable:
//!
//! - symbolic access to firmware variables, by name, in RAM or flash
//! - remote calls into firmware functions with word arguments and results
//! - firmware updates through the resident bootloader
//! - draining the firmware's console ring buffer
//! - a handful of plant operations (temperatures, valves, relays, clock)
//!
//! Addresses and sizes come from the metadata of the running firmware
//! build, resolved at connect time from update packages or a cache.
//!
//! # Example
//!
//! ```ignore
//! use gum::{ConnectRequest, ConnectionManager, Settings};
//!
//! let manager = ConnectionManager::new(Box::new(my_transport), Settings::from_toml_file("gum.toml")?);
//! let gum = manager.acquire(ConnectRequest::new())?;
//!
//! println!("uptime: {}", gum.read_symbol("uptime")?);
//! print!("{}", gum.read_console(1.0)?);
//!
//! manager.release(gum)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod bootloader;
pub mod cache;
pub mod connection;
pub mod console;
pub mod device;
pub mod error;
pub mod exec;
pub mod flash;
mod memory;
pub mod resolver;
pub mod settings;

#[cfg(test)]
mod testing;

pub use bootloader::{FlashProgress, FlasherState, NoProgress};
pub use connection::{ConnectRequest, ConnectionInfo, ConnectionManager, Gum};
pub use device::{SensorCatalog, SensorReading, TemperatureQuery, ValveState};
pub use error::{Error, Result};
pub use exec::{Arg, Function};
pub use settings::{Settings, SymbolNames};

pub use gum_core::codec::TimeFormat;
pub use gum_core::{BuildDescriptor, Metadata, Region, Symbol, Transport};
