//! gum-core - Building blocks for the gum control-unit driver
//!
//! This crate holds everything the driver needs that does not depend on a
//! live connection:
//!
//! - [`metadata`] - symbol tables and build macros for one firmware build
//! - [`build`] - the 8-byte firmware build descriptor and its ordering
//! - [`transport`] - the contract a serial transport has to fulfil
//! - [`codec`] - little-endian integer and timestamp encoding
//! - [`archive`] - pulling metadata out of firmware update packages
//!
//! # Example
//!
//! ```ignore
//! use gum_core::metadata::Metadata;
//!
//! let meta = Metadata::from_ron_str(&std::fs::read_to_string("meta")?)?;
//! let rx = meta.symbol("rx_buf")?;
//! println!("rx_buf at 0x{:04X}, {} bytes", rx.address, rx.size);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod build;
pub mod codec;
pub mod error;
pub mod metadata;
pub mod transport;

pub use build::BuildDescriptor;
pub use error::{MetadataError, TransportError};
pub use metadata::{MacroValue, Metadata, Region, Symbol};
pub use transport::{Direction, Notification, Transport};
