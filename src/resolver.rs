//! Metadata resolution
//!
//! Picks the metadata describing the firmware that is actually running.
//! Candidates are an explicitly supplied [`Metadata`] and the update
//! packages found in the working directory. The first candidate whose build
//! matches the device wins; otherwise the newest build is used.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use gum_core::archive::{ArchiveReader, META_MEMBER};
use gum_core::{BuildDescriptor, Metadata};

use crate::error::{Error, Result};

/// One place metadata may come from
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Metadata handed in by the caller
    Supplied(Metadata),
    /// An update package on disk
    Archive(PathBuf),
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Chosen metadata
    pub metadata: Metadata,
    /// Build the chosen metadata describes
    pub build: BuildDescriptor,
    /// Whether `build` is the device's own build
    pub exact: bool,
}

/// Selects metadata for a target build
pub struct MetadataResolver<'a> {
    reader: &'a dyn ArchiveReader,
    workdir: &'a Path,
    prefix: &'a str,
    suffix: &'a str,
}

impl<'a> MetadataResolver<'a> {
    /// Look for update packages named `<prefix>*<suffix>` in `workdir`
    pub fn new(reader: &'a dyn ArchiveReader, workdir: &'a Path, prefix: &'a str, suffix: &'a str) -> Self {
        Self {
            reader,
            workdir,
            prefix,
            suffix,
        }
    }

    /// Update packages in the working directory, oldest first
    pub fn find_archives(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(self.workdir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list {}: {}", self.workdir.display(), e);
                return Vec::new();
            }
        };

        let mut found: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(self.prefix) && name.ends_with(self.suffix)
            })
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        found.sort();
        found.into_iter().map(|(_, path)| path).collect()
    }

    /// Candidates in the order they are tried
    ///
    /// Supplied metadata comes first, then the named archive (if any), then
    /// the remaining archives oldest first.
    pub fn candidates(&self, supplied: Option<Metadata>, hint: Option<&Path>) -> Vec<Candidate> {
        let hint = hint.map(|h| {
            if h.is_relative() {
                self.workdir.join(h)
            } else {
                h.to_path_buf()
            }
        });

        let mut candidates: Vec<Candidate> = supplied.into_iter().map(Candidate::Supplied).collect();
        if let Some(hint) = &hint {
            candidates.push(Candidate::Archive(hint.clone()));
        }
        candidates.extend(
            self.find_archives()
                .into_iter()
                .filter(|path| Some(path) != hint.as_ref())
                .map(Candidate::Archive),
        );
        candidates
    }

    fn load(&self, candidate: Candidate) -> Option<Metadata> {
        let path = match candidate {
            Candidate::Supplied(meta) => return Some(meta),
            Candidate::Archive(path) => path,
        };

        match self.reader.extract_member(&path, META_MEMBER) {
            Ok(Some(bytes)) => match Metadata::from_ron_bytes(&bytes) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            },
            Ok(None) => {
                log::warn!("Skipping {}: no {} member", path.display(), META_MEMBER);
                None
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Pick the candidate matching `target`, or the newest one
    pub fn resolve(&self, candidates: Vec<Candidate>, target: Option<BuildDescriptor>) -> Result<Resolved> {
        let mut latest: Option<(BuildDescriptor, Metadata)> = None;

        for candidate in candidates {
            let Some(meta) = self.load(candidate) else {
                continue;
            };
            let build = match meta.build() {
                Ok(build) => build,
                Err(e) => {
                    log::warn!("Skipping metadata without build stamp: {}", e);
                    continue;
                }
            };

            if Some(build) == target {
                log::debug!("Found metadata for build {}", build);
                return Ok(Resolved {
                    metadata: meta,
                    build,
                    exact: true,
                });
            }

            if latest.as_ref().map_or(true, |(best, _)| build > *best) {
                latest = Some((build, meta));
            }
        }

        let (build, metadata) = latest.ok_or(Error::MetadataNotFound)?;
        match target {
            Some(target) => log::warn!(
                "No metadata for build {}, falling back to latest {}",
                target,
                build
            ),
            None => log::warn!("Device build unknown, using latest metadata {}", build),
        }
        Ok(Resolved {
            metadata,
            build,
            exact: false,
        })
    }
}
