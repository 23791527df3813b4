//! Driver settings
//!
//! Settings are loaded from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration:
//!
//! ```toml
//! ports = ["/dev/ttyUSB0", "/dev/ttyACM0"]
//! preferred_bauds = [230400, 115200]
//! probe_address = "0x60"
//! cache_path = "/var/cache/gum/gum.cache"
//! sensors = ["28-0000055a1b2c", "28-0000055a3d4e"]
//!
//! [symbols]
//! rx_buffer = "rx_buf"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Names of the firmware symbols and functions the driver relies on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolNames {
    pub rx_buffer: String,
    pub exec_trigger: String,
    pub exec_buffer: String,
    pub flash_buffer: String,
    pub flash_read: String,
    pub flash_write: String,
    pub flash_write_block: String,
    pub debug_copy_start: String,
    pub debug_copy_end: String,
    pub debug_shadow_start: String,
    pub bootloader_entry: String,
    pub debug_init: String,
    pub page_size_macro: String,
    pub print_buffer: String,
    pub print_write_pointer: String,
    pub print_read_pointer: String,
    pub print_overflow: String,
    pub scratch: String,
    pub date: String,
    pub temperature_table: String,
    pub valve_opened: String,
    pub valve_closed: String,
    pub valve_get: String,
    pub relay_get: String,
}

impl Default for SymbolNames {
    fn default() -> Self {
        Self {
            rx_buffer: "rx_buf".into(),
            exec_trigger: "exexec_func".into(),
            exec_buffer: "exexec_buf".into(),
            flash_buffer: "flash_buf".into(),
            flash_read: "flash_read".into(),
            flash_write: "flash_write".into(),
            flash_write_block: "flash_write_block".into(),
            debug_copy_start: "__dbg2cp_start".into(),
            debug_copy_end: "__dbg2cp_end".into(),
            debug_shadow_start: "__dbgcp_start".into(),
            bootloader_entry: "__bootloader_adr".into(),
            debug_init: "debug_init".into(),
            page_size_macro: "SPM_PAGESIZE".into(),
            print_buffer: "print_buf".into(),
            print_write_pointer: "print_buf_wp".into(),
            print_read_pointer: "print_buf_rp".into(),
            print_overflow: "print_buf_ovf".into(),
            scratch: "_end".into(),
            date: "date".into(),
            temperature_table: "ds18b20_get_temp_tab".into(),
            valve_opened: "valve_opened".into(),
            valve_closed: "valve_closed".into(),
            valve_get: "valve_get".into(),
            relay_get: "relay_get".into(),
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Device paths tried during autodetection, in order
    pub ports: Vec<String>,
    /// Baud rates tried before the rest of the transport's rates
    pub preferred_bauds: Vec<u32>,
    /// Address of the 8-byte build descriptor used as liveness probe
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub probe_address: u32,
    /// Length of the liveness probe read
    pub probe_len: usize,
    /// Connection cache location
    pub cache_path: PathBuf,
    /// Directory searched for update packages
    pub workdir: PathBuf,
    /// Update package file name prefix
    pub archive_prefix: String,
    /// Update package file name suffix
    pub archive_suffix: String,
    /// Wait for a remote-call completion notification, in milliseconds
    pub completion_timeout_ms: u64,
    /// Wait for the bootloader handshake byte, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Wait for the bootloader confirmation byte, in milliseconds
    pub byte_timeout_ms: u64,
    /// Pause between polls of a busy execution slot, in milliseconds
    pub busy_backoff_ms: u64,
    /// Pause after flashing before reconnecting, in milliseconds
    pub settle_ms: u64,
    /// Largest payload of a single transport frame
    pub page_limit: usize,
    /// Largest firmware image the bootloader accepts
    pub max_image_size: usize,
    /// Default temperature sensors, in table order
    pub sensors: Vec<String>,
    /// Firmware symbol names
    pub symbols: SymbolNames,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ports: (0..4).map(|i| format!("/dev/ttyUSB{}", i)).collect(),
            preferred_bauds: vec![230_400, 115_200, 9600],
            probe_address: 0x60,
            probe_len: 8,
            cache_path: PathBuf::from("gum.cache"),
            workdir: PathBuf::from("."),
            archive_prefix: "update".into(),
            archive_suffix: ".tar.bz2".into(),
            completion_timeout_ms: 30_000,
            handshake_timeout_ms: 30_000,
            byte_timeout_ms: 30_000,
            busy_backoff_ms: 1000,
            settle_ms: 2000,
            page_limit: 0xff,
            max_image_size: 32 * 1024,
            sensors: Vec::new(),
            symbols: SymbolNames::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Settings(e.to_string()))
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> core::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => gum_core::codec::parse_number(&s)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid address: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.ports[0], "/dev/ttyUSB0");
        assert_eq!(s.ports[3], "/dev/ttyUSB3");
        assert_eq!(s.preferred_bauds, vec![230_400, 115_200, 9600]);
        assert_eq!(s.probe_address, 0x60);
        assert_eq!(s.busy_backoff(), Duration::from_secs(1));
        assert_eq!(s.symbols.exec_trigger, "exexec_func");
    }

    #[test]
    fn test_partial_override() {
        let s = Settings::from_toml_str(
            r#"
            ports = ["/dev/ttyACM0"]
            probe_address = "0x80"
            sensors = ["a", "b"]

            [symbols]
            rx_buffer = "uart_rx"
            "#,
        )
        .unwrap();
        assert_eq!(s.ports, vec!["/dev/ttyACM0".to_string()]);
        assert_eq!(s.probe_address, 0x80);
        assert_eq!(s.sensors, vec!["a", "b"]);
        assert_eq!(s.symbols.rx_buffer, "uart_rx");
        assert_eq!(s.symbols.flash_buffer, "flash_buf");
        assert_eq!(s.preferred_bauds, vec![230_400, 115_200, 9600]);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Settings::from_toml_str("ports = 3"),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gum.toml");
        fs::write(&path, "probe_address = 96\n").unwrap();
        assert_eq!(Settings::from_toml_file(&path).unwrap().probe_address, 96);
        assert!(Settings::from_toml_file(dir.path().join("missing.toml")).is_err());
    }
}
