//! Symbolic access to firmware variables
//!
//! RAM symbols are read and written directly on the bus; flash symbols go
//! through the flash bridge. Integers are little-endian throughout.

use gum_core::{codec, Region, Symbol, Transport};

use crate::connection::Gum;
use crate::error::{Error, Result};

impl Gum {
    /// Look up a symbol in the active metadata
    pub fn symbol(&self, name: &str) -> Result<Symbol> {
        Ok(*self.link.metadata()?.symbol(name)?)
    }

    /// Read `len` bytes of data memory at `address`
    pub fn read_ram(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        Ok(self.link.transport().read(address, len)?)
    }

    /// Write `data` to data memory at `address`
    pub fn write_ram(&self, address: u32, data: &[u8]) -> Result<()> {
        Ok(self.link.transport().write(address, data)?)
    }

    fn read_at(&self, symbol: &Symbol) -> Result<Vec<u8>> {
        match symbol.region {
            Region::Ram => self.read_ram(symbol.address, symbol.size),
            Region::Flash => self.read_flash(symbol.address, symbol.size),
        }
    }

    /// Raw contents of a symbol
    pub fn read_symbol_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let symbol = self.symbol(name)?;
        self.read_at(&symbol)
    }

    /// Value of a symbol as an unsigned integer
    pub fn read_symbol(&self, name: &str) -> Result<u64> {
        let bytes = self.read_symbol_bytes(name)?;
        to_int(name, &bytes)
    }

    fn debug_copy(&self, name: &str) -> Result<Symbol> {
        let meta = self.link.metadata()?;
        let names = &self.link.settings.symbols;
        let symbol = *meta.symbol(name)?;

        let start = meta.symbol(&names.debug_copy_start)?.address;
        let end = meta.symbol(&names.debug_copy_end)?.address;
        if symbol.region != Region::Ram || !(start..end).contains(&symbol.address) {
            return Err(Error::NotADebugSymbol(name.to_string()));
        }

        let shadow = meta.symbol(&names.debug_shadow_start)?.address;
        Ok(Symbol::ram(symbol.address - start + shadow, symbol.size))
    }

    /// Raw contents of a symbol's shadow copy in the debug window
    pub fn read_debug_copy_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let copy = self.debug_copy(name)?;
        self.read_ram(copy.address, copy.size)
    }

    /// Value of a symbol's shadow copy in the debug window
    pub fn read_debug_copy(&self, name: &str) -> Result<u64> {
        let bytes = self.read_debug_copy_bytes(name)?;
        to_int(name, &bytes)
    }

    /// Write raw bytes to a symbol
    ///
    /// A payload shorter than the symbol writes a prefix. A longer one is
    /// rejected before anything is sent.
    pub fn write_symbol(&self, name: &str, data: &[u8]) -> Result<()> {
        let symbol = self.symbol(name)?;
        if data.len() > symbol.size {
            return Err(Error::SymbolWriteOverflow {
                name: name.to_string(),
                size: symbol.size,
                len: data.len(),
            });
        }

        match symbol.region {
            Region::Ram => self.write_ram(symbol.address, data),
            Region::Flash => self.write_flash(symbol.address, data),
        }
    }

    /// Write an integer to a symbol, truncated to its width
    pub fn write_symbol_int(&self, name: &str, value: u64) -> Result<()> {
        let symbol = self.symbol(name)?;
        self.write_symbol(name, &codec::to_bytes(value, symbol.size))
    }
}

fn to_int(name: &str, bytes: &[u8]) -> Result<u64> {
    codec::to_int(bytes).ok_or_else(|| Error::SymbolTooWide {
        name: name.to_string(),
        size: bytes.len(),
    })
}
