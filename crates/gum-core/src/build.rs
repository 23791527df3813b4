//! Firmware build descriptor
//!
//! Every firmware image carries its build timestamp as eight bytes
//! `{sec, min, hour, weekday, day, month, year_lo, year_hi}`. The running
//! firmware exposes the same bytes at a fixed diagnostic address, which is
//! how the host tells which metadata belongs to the device.

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::metadata::Metadata;

/// Length of the encoded descriptor
pub const BUILD_DESCRIPTOR_LEN: usize = 8;

/// Build timestamp in device byte order
///
/// Ordering compares the bytes back to front, so the year is the most
/// significant field and the second the least.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildDescriptor([u8; BUILD_DESCRIPTOR_LEN]);

impl BuildDescriptor {
    /// Parse a descriptor read from the device
    ///
    /// Returns `None` if the slice is not exactly eight bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; BUILD_DESCRIPTOR_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Assemble a descriptor from individual fields
    pub fn new(year: u16, month: u8, day: u8, weekday: u8, hour: u8, min: u8, sec: u8) -> Self {
        let [year_lo, year_hi] = year.to_le_bytes();
        Self([sec, min, hour, weekday, day, month, year_lo, year_hi])
    }

    /// Derive the descriptor from the `BUILD_*` macros of a firmware build
    pub fn from_macros(meta: &Metadata) -> Result<Self, MetadataError> {
        fn byte(meta: &Metadata, name: &'static str) -> Result<u8, MetadataError> {
            let value = meta.macro_int(name)?;
            u8::try_from(value).map_err(|_| MetadataError::BuildFieldOutOfRange { name, value })
        }

        let year = meta.macro_int("BUILD_YEAR")?;
        let year = u16::try_from(year).map_err(|_| MetadataError::BuildFieldOutOfRange {
            name: "BUILD_YEAR",
            value: year,
        })?;

        Ok(Self::new(
            year,
            byte(meta, "BUILD_MONTH")?,
            byte(meta, "BUILD_DAY")?,
            byte(meta, "BUILD_WEEKDAY")?,
            byte(meta, "BUILD_HOUR")?,
            byte(meta, "BUILD_MIN")?,
            byte(meta, "BUILD_SEC")?,
        ))
    }

    /// Raw bytes in device order
    pub fn as_bytes(&self) -> &[u8; BUILD_DESCRIPTOR_LEN] {
        &self.0
    }

    /// Build year
    pub fn year(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }

    /// Build month
    pub fn month(&self) -> u8 {
        self.0[5]
    }

    /// Build day of month
    pub fn day(&self) -> u8 {
        self.0[4]
    }

    /// Build hour
    pub fn hour(&self) -> u8 {
        self.0[2]
    }

    /// Build minute
    pub fn min(&self) -> u8 {
        self.0[1]
    }

    /// Build second
    pub fn sec(&self) -> u8 {
        self.0[0]
    }
}

impl Ord for BuildDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for BuildDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.min(),
            self.sec()
        )
    }
}
