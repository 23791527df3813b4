//! Firmware update packages
//!
//! Update packages are bzip2-compressed tarballs. Besides the firmware
//! binary they carry a `meta` member with the RON-encoded [`Metadata`] of
//! the build.
//!
//! [`Metadata`]: crate::Metadata

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

/// Name of the metadata member inside an update package
pub const META_MEMBER: &str = "meta";

/// Extracts single members from archive files
pub trait ArchiveReader: Send + Sync {
    /// Return the contents of `member`, or `None` if the archive has no such member
    fn extract_member(&self, archive: &Path, member: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Reader for `.tar.bz2` update packages
#[derive(Debug, Clone, Copy, Default)]
pub struct TarBz2Reader;

impl ArchiveReader for TarBz2Reader {
    fn extract_member(&self, archive: &Path, member: &str) -> io::Result<Option<Vec<u8>>> {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(BzDecoder::new(file));

        for entry in tar.entries()? {
            let mut entry = entry?;
            let matches = {
                let path = entry.path()?;
                path.strip_prefix("./").unwrap_or(&path) == Path::new(member)
            };
            if matches {
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut data)?;
                log::debug!(
                    "Extracted {} ({} bytes) from {}",
                    member,
                    data.len(),
                    archive.display()
                );
                return Ok(Some(data));
            }
        }

        Ok(None)
    }
}
