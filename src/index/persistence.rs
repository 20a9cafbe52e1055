// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Binary index artifact.
//!
//! The artifact is a CBOR document carrying a magic tag, a format version,
//! the index kind and dimension, and the engine's own state. The probe count
//! of a quantized index is query-time tuning and is not kept: snapshots
//! record a probe count of 1 and loaders reapply their configured value.

use super::{FlatIndex, IndexError, IndexKind, VectorIndex};
use crate::hnsw::{HNSWIndex, HNSWState};
use crate::ivf::{IVFIndex, IVFState};
use serde::{Deserialize, Serialize};

pub const INDEX_MAGIC: &str = "clinical-vector-index";
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineSnapshot {
    Exact(FlatIndex),
    Quantized(IVFState),
    Graph(HNSWState),
}

impl EngineSnapshot {
    pub fn kind(&self) -> IndexKind {
        match self {
            EngineSnapshot::Exact(_) => IndexKind::Exact,
            EngineSnapshot::Quantized(_) => IndexKind::Quantized,
            EngineSnapshot::Graph(_) => IndexKind::Graph,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            EngineSnapshot::Exact(index) => index.dimension(),
            EngineSnapshot::Quantized(state) => state.dimension,
            EngineSnapshot::Graph(state) => state.dimension,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub magic: String,
    pub version: u32,
    pub kind: IndexKind,
    pub dimension: usize,
    pub size: usize,
    pub snapshot: EngineSnapshot,
}

impl IndexArtifact {
    pub fn from_index(index: &VectorIndex) -> Self {
        let snapshot = match index {
            VectorIndex::Exact(flat) => EngineSnapshot::Exact(flat.clone()),
            VectorIndex::Quantized(ivf) => {
                let mut state = ivf.to_state();
                state.config.n_probe = 1;
                EngineSnapshot::Quantized(state)
            }
            VectorIndex::Graph(hnsw) => EngineSnapshot::Graph(hnsw.to_state()),
        };

        Self {
            magic: INDEX_MAGIC.to_string(),
            version: INDEX_FORMAT_VERSION,
            kind: index.kind(),
            dimension: index.dimension(),
            size: index.len(),
            snapshot,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, IndexError> {
        serde_cbor::to_vec(self).map_err(|e| IndexError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        let artifact: IndexArtifact = serde_cbor::from_slice(bytes)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        if artifact.magic != INDEX_MAGIC {
            return Err(IndexError::Serialization(format!(
                "Not an index artifact (magic '{}')",
                artifact.magic
            )));
        }
        if artifact.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Serialization(format!(
                "Unsupported index format version {} (expected {})",
                artifact.version, INDEX_FORMAT_VERSION
            )));
        }
        if artifact.kind != artifact.snapshot.kind()
            || artifact.dimension != artifact.snapshot.dimension()
        {
            return Err(IndexError::Serialization(format!(
                "Header ({}, dim {}) disagrees with snapshot ({}, dim {})",
                artifact.kind,
                artifact.dimension,
                artifact.snapshot.kind(),
                artifact.snapshot.dimension()
            )));
        }

        Ok(artifact)
    }

    pub fn into_index(self) -> Result<VectorIndex, IndexError> {
        let size = self.size;
        let index = match self.snapshot {
            EngineSnapshot::Exact(flat) => VectorIndex::Exact(flat),
            EngineSnapshot::Quantized(state) => VectorIndex::Quantized(IVFIndex::from_state(state)?),
            EngineSnapshot::Graph(state) => VectorIndex::Graph(HNSWIndex::from_state(state)?),
        };

        if index.len() != size {
            return Err(IndexError::Serialization(format!(
                "Header records {} vectors but the snapshot holds {}",
                size,
                index.len()
            )));
        }
        Ok(index)
    }
}
