//! Persisted connection state
//!
//! The last working port/baud pair and the resolved metadata are written on
//! teardown so the next connect can skip autodetection and archive scanning.

use std::fs;
use std::io;
use std::path::Path;

use gum_core::Metadata;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What the connection cache holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedConnection {
    /// Port the device last answered on
    pub port: String,
    /// Baud rate the device last answered at
    pub baud: u32,
    /// Metadata that was active
    pub metadata: Metadata,
}

impl CachedConnection {
    /// Load the cache at `path`
    ///
    /// A missing or unreadable cache is not an error; it just means there is
    /// nothing to start from.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No connection cache at {}", path.display());
                return None;
            }
            Err(e) => {
                log::warn!("Cannot read connection cache {}: {}", path.display(), e);
                return None;
            }
        };

        match postcard::from_bytes(&bytes) {
            Ok(cached) => Some(cached),
            Err(e) => {
                log::warn!("Ignoring corrupt connection cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the cache to `path`
    pub fn store(&self, path: &Path) -> Result<()> {
        let bytes = postcard::to_stdvec(self).map_err(|e| Error::Cache(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| Error::Cache(format!("{}: {}", path.display(), e)))?;
        log::debug!("Stored connection cache at {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gum_core::Symbol;

    fn sample() -> CachedConnection {
        let mut metadata = Metadata::new();
        metadata
            .insert_macro("BUILD_YEAR", 2014)
            .insert_macro("F_CPU", "9216000")
            .insert_symbol("rx_buf", Symbol::ram(0x100, 16));
        CachedConnection {
            port: "/dev/ttyUSB1".into(),
            baud: 115_200,
            metadata,
        }
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gum.cache");
        sample().store(&path).unwrap();
        assert_eq!(CachedConnection::load(&path), Some(sample()));
    }

    #[test]
    fn test_missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CachedConnection::load(&dir.path().join("gum.cache")), None);
    }

    #[test]
    fn test_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gum.cache");
        fs::write(&path, [0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(CachedConnection::load(&path), None);
    }

    #[test]
    fn test_store_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/gum.cache");
        assert!(matches!(sample().store(&path), Err(Error::Cache(_))));
    }
}
