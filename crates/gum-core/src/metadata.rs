//! Firmware metadata: build macros plus the symbol table
//!
//! Metadata is produced by the firmware build and shipped inside update
//! packages as RON text:
//!
//! ```text
//! (
//!     macros: {
//!         "SPM_PAGESIZE": Int(128),
//!         "BUILD_YEAR": Int(2013),
//!         "F_CPU": Str("9216000"),
//!     },
//!     symbols: {
//!         "rx_buf": (address: 0x0100, size: 16, region: ram),
//!         "config": (address: 0x7000, size: 64, region: flash),
//!     },
//! )
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::build::BuildDescriptor;
use crate::error::MetadataError;

/// Memory a symbol lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Data memory, including I/O registers
    Ram,
    /// Program memory, only reachable through the flash bridge
    Flash,
}

/// A named firmware variable or function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Byte address
    pub address: u32,
    /// Size in bytes
    pub size: usize,
    /// Memory region
    pub region: Region,
}

impl Symbol {
    /// Create a RAM symbol
    pub const fn ram(address: u32, size: usize) -> Self {
        Self {
            address,
            size,
            region: Region::Ram,
        }
    }

    /// Create a flash symbol
    pub const fn flash(address: u32, size: usize) -> Self {
        Self {
            address,
            size,
            region: Region::Flash,
        }
    }
}

/// Value of a compile-time macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroValue {
    /// Integer define
    Int(i64),
    /// Anything else, kept verbatim
    Str(String),
}

impl MacroValue {
    /// Integer value, if the macro is numeric
    ///
    /// String macros holding a plain decimal number are accepted as well.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for MacroValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for MacroValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<&str> for MacroValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// Macros and symbols describing one firmware build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Compile-time defines
    pub macros: BTreeMap<String, MacroValue>,
    /// Symbol table keyed by name
    pub symbols: BTreeMap<String, Symbol>,
}

impl Metadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse metadata from RON text
    pub fn from_ron_str(content: &str) -> Result<Self, MetadataError> {
        Ok(ron::from_str(content)?)
    }

    /// Parse metadata from RON bytes
    pub fn from_ron_bytes(content: &[u8]) -> Result<Self, MetadataError> {
        Ok(ron::de::from_bytes(content)?)
    }

    /// Serialize to pretty RON text
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Look up a symbol by name
    pub fn symbol(&self, name: &str) -> Result<&Symbol, MetadataError> {
        self.symbols
            .get(name)
            .ok_or_else(|| MetadataError::UnknownSymbol(name.to_string()))
    }

    /// Look up an integer macro by name
    pub fn macro_int(&self, name: &str) -> Result<i64, MetadataError> {
        self.macros
            .get(name)
            .and_then(MacroValue::as_int)
            .ok_or_else(|| MetadataError::UnknownMacro(name.to_string()))
    }

    /// Build descriptor derived from the `BUILD_*` macros
    pub fn build(&self) -> Result<BuildDescriptor, MetadataError> {
        BuildDescriptor::from_macros(self)
    }

    /// Add or replace a symbol
    pub fn insert_symbol(&mut self, name: impl Into<String>, symbol: Symbol) -> &mut Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    /// Add or replace a macro
    pub fn insert_macro(&mut self, name: impl Into<String>, value: impl Into<MacroValue>) -> &mut Self {
        self.macros.insert(name.into(), value.into());
        self
    }
}
