//! Integer and timestamp encoding used on the wire
//!
//! The control unit is little-endian throughout. Timestamps are either the
//! calendar layout shared with [`BuildDescriptor`](crate::BuildDescriptor)
//! or a plain 32-bit seconds counter.

use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// Decode a little-endian integer of up to eight bytes
///
/// Returns `None` for wider inputs. An empty slice decodes to zero.
pub fn to_int(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(
        bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
    )
}

/// Encode `value` as exactly `width` little-endian bytes
///
/// High bytes that do not fit are dropped; widths beyond eight bytes are
/// zero-padded.
pub fn to_bytes(value: u64, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let le = value.to_le_bytes();
    let n = width.min(le.len());
    out[..n].copy_from_slice(&le[..n]);
    out
}

/// Decode a little-endian signed 16-bit fixed-point value with 8 fractional bits
pub fn fixed_8_8(bytes: [u8; 2]) -> f64 {
    f64::from(i16::from_le_bytes(bytes)) / 256.0
}

/// Parse a number with an optional radix prefix (`0x`, `0o`, `0b`)
///
/// Returns `None` for anything that is not a number.
pub fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (s, 10)
    };
    let digits = digits.replace('_', "");
    u64::from_str_radix(&digits, radix).ok()
}

/// Wire layout of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    /// `{sec, min, hour, weekday, day, month, year_lo, year_hi}`, weekday Monday = 0
    #[default]
    Calendar,
    /// Seconds since the Unix epoch as a little-endian `u32`
    Epoch,
}

/// Encode a timestamp in the given layout
pub fn encode_time<Tz: TimeZone>(t: &DateTime<Tz>, format: TimeFormat) -> Vec<u8> {
    match format {
        TimeFormat::Calendar => {
            let year = u16::try_from(t.year()).unwrap_or(0);
            let [year_lo, year_hi] = year.to_le_bytes();
            vec![
                t.second() as u8,
                t.minute() as u8,
                t.hour() as u8,
                t.weekday().num_days_from_monday() as u8,
                t.day() as u8,
                t.month() as u8,
                year_lo,
                year_hi,
            ]
        }
        TimeFormat::Epoch => {
            let secs = u32::try_from(t.timestamp()).unwrap_or(0);
            secs.to_le_bytes().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(&[]), Some(0));
        assert_eq!(to_int(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(to_int(&[1, 0, 0, 0, 0, 0, 0, 0x80]), Some(0x8000_0000_0000_0001));
        assert_eq!(to_int(&[0; 9]), None);
    }

    #[test]
    fn test_to_bytes_truncates_and_pads() {
        assert_eq!(to_bytes(0x1234, 2), vec![0x34, 0x12]);
        assert_eq!(to_bytes(0x123456, 2), vec![0x56, 0x34]);
        assert_eq!(to_bytes(7, 1), vec![7]);
        assert_eq!(to_bytes(1, 10), vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_fixed_8_8() {
        assert_eq!(fixed_8_8([0x80, 0x15]), 21.5);
        assert_eq!(fixed_8_8([0x00, 0xFF]), -1.0);
        assert_eq!(fixed_8_8([0x00, 0x00]), 0.0);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x2A"), Some(42));
        assert_eq!(parse_number("0o52"), Some(42));
        assert_eq!(parse_number("0b101010"), Some(42));
        assert_eq!(parse_number(" 1_000 "), Some(1000));
        assert_eq!(parse_number("valve"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_calendar_time() {
        // 2014-03-15 was a Saturday
        let t = Utc.with_ymd_and_hms(2014, 3, 15, 18, 30, 5).unwrap();
        let bytes = encode_time(&t, TimeFormat::Calendar);
        assert_eq!(bytes, vec![5, 30, 18, 5, 15, 3, 0xDE, 0x07]);
    }

    #[test]
    fn test_epoch_time() {
        let t = Utc.with_ymd_and_hms(2014, 3, 15, 18, 30, 5).unwrap();
        let bytes = encode_time(&t, TimeFormat::Epoch);
        assert_eq!(bytes, vec![0x2D, 0x9C, 0x24, 0x53]);
    }
}
