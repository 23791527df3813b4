//! Flash bridge
//!
//! Program memory is not on the bus. Reads and writes are staged through the
//! firmware's RAM flash buffer one chunk at a time, with a remote
//! `flash_read`/`flash_write` call moving each chunk.

use std::ops::Range;

use crate::connection::Gum;
use crate::error::Result;
use crate::exec::Arg;

/// Split `len` bytes starting at `address` into chunks of at most `chunk` bytes
///
/// Yields the flash address of each chunk and its range within the caller's
/// buffer.
pub fn chunks(address: u32, len: usize, chunk: usize) -> Vec<(u32, Range<usize>)> {
    let chunk = chunk.max(1);
    (0..len)
        .step_by(chunk)
        .map(|start| {
            let end = (start + chunk).min(len);
            (address + start as u32, start..end)
        })
        .collect()
}

impl Gum {
    /// Staging buffer address and chunk size
    fn flash_staging(&self) -> Result<(u32, usize)> {
        let buf = self.symbol(&self.link.settings.symbols.flash_buffer)?;
        Ok((buf.address, self.link.settings.page_limit.min(buf.size)))
    }

    /// Read `len` bytes of program memory at `address`
    pub fn read_flash(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        let (staging, chunk) = self.flash_staging()?;
        let function = self.link.settings.symbols.flash_read.as_str();
        let _staging = self.link.lock_staging();

        let mut data = vec![0u8; len];
        for (at, range) in chunks(address, len, chunk) {
            let n = range.len();
            self.call(
                function,
                &[Arg::from(staging), Arg::from(at), Arg::from(n)],
            )?;
            data[range].copy_from_slice(&self.read_ram(staging, n)?);
        }

        log::debug!("Read {} bytes of flash at 0x{:04X}", len, address);
        Ok(data)
    }

    /// Write `data` to program memory at `address`
    pub fn write_flash(&self, address: u32, data: &[u8]) -> Result<()> {
        let (staging, chunk) = self.flash_staging()?;
        let function = self.link.settings.symbols.flash_write.as_str();
        let _staging = self.link.lock_staging();

        for (at, range) in chunks(address, data.len(), chunk) {
            let n = range.len();
            self.write_ram(staging, &data[range])?;
            self.call(
                function,
                &[Arg::from(staging), Arg::from(at), Arg::from(n)],
            )?;
        }

        log::debug!("Wrote {} bytes of flash at 0x{:04X}", data.len(), address);
        Ok(())
    }
}
