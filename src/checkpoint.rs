//! Resumable progress for the enrichment batch.
//!
//! The checkpoint is rewritten wholesale at every save. Only one process may
//! use a given checkpoint file at a time; there is no locking.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CheckpointError;
use crate::model::{MergedRecord, RawListing, RejectedListing};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Identity keys (see `RawListing::key`) of every listing already handled.
    pub processed: BTreeSet<String>,
    #[serde(default)]
    pub accepted: Vec<MergedRecord>,
    #[serde(default)]
    pub rejected: Vec<RejectedListing>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CheckpointState {
    /// Load from `path`, or start empty when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let state: Self = serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            processed = state.processed.len(),
            accepted = state.accepted.len(),
            rejected = state.rejected.len(),
            "Loaded checkpoint {:?}",
            path
        );
        Ok(state)
    }

    /// Write to a sibling temp file and rename it over `path`.
    pub fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.updated_at = Some(Utc::now());
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn is_processed(&self, listing: &RawListing) -> bool {
        self.processed.contains(&listing.key())
    }

    pub fn accept(&mut self, record: MergedRecord) {
        self.processed.insert(record.listing.key());
        self.accepted.push(record);
    }

    pub fn reject(&mut self, rejected: RejectedListing) {
        self.processed.insert(rejected.listing.key());
        self.rejected.push(rejected);
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Delete a checkpoint so the next run starts from scratch.
pub fn clear(path: &Path) -> Result<bool, CheckpointError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
