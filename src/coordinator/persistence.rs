// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! On-disk artifacts and atomic file replacement.
//!
//! A persist produces two files that are only valid together: the binary
//! index artifact and a JSON metadata artifact that records the blake3
//! checksum and size of the index it was written with.

use crate::core::metadata_store::MetadataStore;
use crate::core::types::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const METADATA_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    pub fn new(index: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            index: index.into(),
            metadata: metadata.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataArtifact {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub snapshot_id: Uuid,
    pub index_size: usize,
    pub index_checksum: String,
    pub store: MetadataStore,
}

impl MetadataArtifact {
    pub fn new(store: MetadataStore, index_bytes: &[u8], index_size: Position) -> Self {
        Self {
            version: METADATA_FORMAT_VERSION,
            saved_at: Utc::now(),
            snapshot_id: Uuid::new_v4(),
            index_size,
            index_checksum: checksum(index_bytes),
            store,
        }
    }

    /// Confirms `index_bytes` is the index artifact this metadata was
    /// written with.
    pub fn check_pairing(&self, index_bytes: &[u8]) -> Result<(), String> {
        if self.version != METADATA_FORMAT_VERSION {
            return Err(format!(
                "unsupported metadata format version {} (expected {})",
                self.version, METADATA_FORMAT_VERSION
            ));
        }
        let actual = checksum(index_bytes);
        if actual != self.index_checksum {
            return Err(format!(
                "index artifact checksum {} does not match {} recorded by snapshot {}",
                actual, self.index_checksum, self.snapshot_id
            ));
        }
        Ok(())
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// A file written next to its destination, not yet visible at the
/// canonical path.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Writes and syncs `bytes` to `<dir>/.<name>.<uuid>.tmp`.
    pub async fn write(target: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        let dir = parent_dir(target);
        fs::create_dir_all(&dir).await?;

        let staged = Self {
            temp: sibling(target, "tmp"),
            target: target.to_path_buf(),
        };
        if let Err(e) = staged.fill(bytes).await {
            staged.discard().await;
            return Err(e);
        }
        Ok(staged)
    }

    async fn fill(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(&self.temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Renames the staged file over its target.
    pub async fn commit(self) -> std::io::Result<()> {
        if let Err(e) = fs::rename(&self.temp, &self.target).await {
            self.discard().await;
            return Err(e);
        }
        debug!(path = %self.target.display(), "Committed artifact");
        Ok(())
    }

    pub async fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.temp.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// A synced copy of the file at `target`, kept while the artifact pair is
/// swapped so the old pair can be put back.
#[derive(Debug)]
pub struct Backup {
    saved: PathBuf,
    target: PathBuf,
}

impl Backup {
    /// Copies `target` to `<dir>/.<name>.<uuid>.bak`. `None` when nothing
    /// exists at `target`.
    pub async fn take(target: &Path) -> std::io::Result<Option<Self>> {
        if !fs::try_exists(target).await? {
            return Ok(None);
        }
        let saved = sibling(target, "bak");
        fs::copy(target, &saved).await?;
        fs::File::open(&saved).await?.sync_all().await?;
        Ok(Some(Self {
            saved,
            target: target.to_path_buf(),
        }))
    }

    /// Renames the copy back over `target`.
    pub async fn restore(self) -> std::io::Result<()> {
        fs::rename(&self.saved, &self.target).await?;
        debug!(path = %self.target.display(), "Restored previous artifact");
        Ok(())
    }

    pub async fn release(self) {
        if let Err(e) = fs::remove_file(&self.saved).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.saved.display(), error = %e, "Failed to remove backup file");
            }
        }
    }
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Hidden, uniquely named file beside `target`.
fn sibling(target: &Path, extension: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    parent_dir(target).join(format!(".{}.{}.{}", name, Uuid::new_v4(), extension))
}

/// Replaces `target` with `bytes` atomically.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    StagedFile::write(target, bytes).await?.commit().await
}
