//! Device console
//!
//! The firmware prints into a ring buffer (`print_buf`) with a write pointer
//! it advances and a read pointer the host advances. Characters that do not
//! fit are counted in `print_buf_ovf`.

use std::ops::Range;

use crate::connection::Gum;
use crate::error::Result;

/// Parts of the ring buffer to read next
///
/// `bottom` is empty unless the unread data wraps around the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingRead {
    /// From the read pointer towards the end of the buffer
    pub top: Range<usize>,
    /// From the start of the buffer, after wrapping
    pub bottom: Range<usize>,
}

impl RingRead {
    /// Plan a read of at most `cap` bytes from a ring of `size` bytes
    pub fn plan(size: usize, wp: usize, rp: usize, cap: usize) -> Self {
        if wp > rp {
            let n = cap.min(wp - rp);
            Self {
                top: rp..rp + n,
                bottom: 0..0,
            }
        } else if wp < rp {
            let top = cap.min(size.saturating_sub(rp));
            let bottom = (cap - top).min(wp);
            Self {
                top: rp..rp + top,
                bottom: 0..bottom,
            }
        } else {
            Self {
                top: rp..rp,
                bottom: 0..0,
            }
        }
    }

    /// Total bytes to read
    pub fn len(&self) -> usize {
        self.top.len() + self.bottom.len()
    }

    /// Nothing new in the buffer
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notice appended when the device dropped characters
pub fn lost_notice(count: u64) -> String {
    format!("\n\n### LOST >={} CHARACTERS ###\n\n", count)
}

/// Decode console bytes, dropping anything that is not valid UTF-8
fn decode(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

impl Gum {
    /// Drain new console output
    ///
    /// Reads at most `max_fraction` of the ring buffer per call. When the
    /// buffer has been drained and the device reported dropped characters,
    /// a notice is appended and the overflow counter cleared.
    pub fn read_console(&self, max_fraction: f64) -> Result<String> {
        let names = &self.link.settings.symbols;
        let buf = self.symbol(&names.print_buffer)?;
        let size = buf.size;
        let cap = ((max_fraction * size as f64).floor().max(0.0) as usize).min(size);

        let wp = self.read_symbol(&names.print_write_pointer)? as usize;
        let rp = self.read_symbol(&names.print_read_pointer)? as usize;

        let plan = RingRead::plan(size, wp, rp, cap);
        let mut bytes = Vec::with_capacity(plan.len());
        if !plan.top.is_empty() {
            bytes.extend(self.read_ram(buf.address + plan.top.start as u32, plan.top.len())?);
        }
        if !plan.bottom.is_empty() {
            bytes.extend(self.read_ram(buf.address, plan.bottom.len())?);
        }

        let mut rp = rp;
        if !plan.is_empty() {
            rp = (rp + plan.len()) % size;
            self.write_symbol_int(&names.print_read_pointer, rp as u64)?;
        }

        let overflow = self.read_symbol(&names.print_overflow)?;
        let wp = self.read_symbol(&names.print_write_pointer)? as usize;

        let mut text = decode(&bytes);
        if wp == rp && overflow != 0 {
            self.write_symbol_int(&names.print_overflow, 0)?;
            text.push_str(&lost_notice(overflow));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connected;

    const BUF: u32 = 0x0300;
    const WP: u32 = 0x0310;
    const RP: u32 = 0x0311;
    const OVF: u32 = 0x0312;

    #[test]
    fn test_plan_wraps() {
        let plan = RingRead::plan(16, 4, 12, 16);
        assert_eq!(plan.top, 12..16);
        assert_eq!(plan.bottom, 0..4);
        assert_eq!(plan.len(), 8);
    }

    #[test]
    fn test_plan_capped() {
        assert_eq!(RingRead::plan(16, 10, 2, 4).top, 2..6);

        let plan = RingRead::plan(16, 4, 12, 6);
        assert_eq!(plan.top, 12..16);
        assert_eq!(plan.bottom, 0..2);

        assert!(RingRead::plan(16, 7, 7, 16).is_empty());
    }

    #[test]
    fn test_wrapped_read() {
        let (fx, gum) = connected();
        fx.device.poke_ram(BUF, b"o wo--------hell");
        fx.device.poke_ram(WP, &[4, 12]);

        assert_eq!(gum.read_console(1.0).unwrap(), "hello wo");
        assert_eq!(fx.device.ram()[RP as usize], 4);

        // nothing new
        assert_eq!(gum.read_console(1.0).unwrap(), "");
    }

    #[test]
    fn test_partial_read() {
        let (fx, gum) = connected();
        fx.device.poke_ram(BUF, b"0123456789abcdef");
        fx.device.poke_ram(WP, &[10, 0]);

        assert_eq!(gum.read_console(0.25).unwrap(), "0123");
        assert_eq!(gum.read_console(0.25).unwrap(), "4567");
        assert_eq!(gum.read_console(0.25).unwrap(), "89");
        assert_eq!(fx.device.ram()[RP as usize], 10);
    }

    #[test]
    fn test_overflow_notice() {
        let (fx, gum) = connected();
        fx.device.poke_ram(BUF, b"abc");
        fx.device.poke_ram(WP, &[3, 0, 42]);

        assert_eq!(
            gum.read_console(1.0).unwrap(),
            "abc\n\n### LOST >=42 CHARACTERS ###\n\n"
        );
        assert_eq!(fx.device.ram()[OVF as usize], 0);
    }

    #[test]
    fn test_overflow_waits_until_drained() {
        let (fx, gum) = connected();
        fx.device.poke_ram(BUF, b"0123456789");
        fx.device.poke_ram(WP, &[10, 0, 7]);

        assert_eq!(gum.read_console(0.25).unwrap(), "0123");
        assert_eq!(fx.device.ram()[OVF as usize], 7);
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let (fx, gum) = connected();
        fx.device.poke_ram(BUF, &[b'o', 0xFF, b'k']);
        fx.device.poke_ram(WP, &[3]);
        assert_eq!(gum.read_console(1.0).unwrap(), "ok");
    }
}
