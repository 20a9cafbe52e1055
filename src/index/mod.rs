// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Capability wrapper over the ANN engines.
//!
//! [`VectorIndex`] is append-only: positions are handed out contiguously and
//! never reused, and no engine exposes removal. Vectors must already be unit
//! length; the metric is inner product.

pub mod flat;
pub mod persistence;

use crate::core::types::Position;
use crate::hnsw::{HNSWConfig, HNSWError, HNSWIndex};
use crate::ivf::{IVFConfig, IVFError, IVFIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use flat::FlatIndex;
pub use persistence::{IndexArtifact, EngineSnapshot};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IVF engine error: {0}")]
    Ivf(#[from] IVFError),

    #[error("HNSW engine error: {0}")]
    Hnsw(#[from] HNSWError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Exact,
    Quantized,
    Graph,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Exact => "exact",
            IndexKind::Quantized => "quantized",
            IndexKind::Graph => "graph",
        }
    }

    pub fn requires_training(&self) -> bool {
        matches!(self, IndexKind::Quantized)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" | "exact" => Ok(IndexKind::Exact),
            "ivf_flat" | "ivf" | "quantized" => Ok(IndexKind::Quantized),
            "hnsw" | "graph" => Ok(IndexKind::Graph),
            other => Err(IndexError::Configuration(format!(
                "Unsupported index kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub kind: IndexKind,
    pub dimension: usize,
    pub ivf: IVFConfig,
    pub hnsw: HNSWConfig,
}

impl IndexConfig {
    pub fn new(kind: IndexKind, dimension: usize) -> Self {
        Self {
            kind,
            dimension,
            ivf: IVFConfig::default(),
            hnsw: HNSWConfig::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ivf.seed = Some(seed);
        self.hnsw.seed = Some(seed);
        self
    }
}

pub enum VectorIndex {
    Exact(FlatIndex),
    Quantized(IVFIndex),
    Graph(HNSWIndex),
}

impl VectorIndex {
    pub fn create(config: &IndexConfig) -> Result<Self, IndexError> {
        if config.dimension == 0 {
            return Err(IndexError::Configuration(
                "Dimension must be positive".to_string(),
            ));
        }

        let index = match config.kind {
            IndexKind::Exact => VectorIndex::Exact(FlatIndex::new(config.dimension)),
            IndexKind::Quantized => {
                VectorIndex::Quantized(IVFIndex::new(config.ivf.clone(), config.dimension)?)
            }
            IndexKind::Graph => {
                VectorIndex::Graph(HNSWIndex::new(config.hnsw.clone(), config.dimension)?)
            }
        };

        info!(kind = %config.kind, dimension = config.dimension, "Created vector index");
        Ok(index)
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            VectorIndex::Exact(_) => IndexKind::Exact,
            VectorIndex::Quantized(_) => IndexKind::Quantized,
            VectorIndex::Graph(_) => IndexKind::Graph,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            VectorIndex::Exact(index) => index.dimension(),
            VectorIndex::Quantized(index) => index.dimension(),
            VectorIndex::Graph(index) => index.dimension(),
        }
    }

    /// Number of vectors ever appended. Never decreases.
    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Exact(index) => index.len(),
            VectorIndex::Quantized(index) => index.total_vectors(),
            VectorIndex::Graph(index) => index.node_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_trained(&self) -> bool {
        match self {
            VectorIndex::Quantized(index) => index.is_trained(),
            _ => true,
        }
    }

    /// Trains an untrained quantized index on `vectors`. No-op for the other
    /// kinds and for an index that is already trained.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if self.is_trained() {
            return Ok(());
        }
        self.check_dimensions(vectors)?;

        let result = match self {
            VectorIndex::Quantized(index) => index.train(vectors)?,
            _ => return Ok(()),
        };
        info!(
            samples = vectors.len(),
            lists = result.n_clusters,
            iterations = result.iterations,
            converged = result.converged,
            "Trained quantized index"
        );
        warn!("Quantized index trained on its first batch only; later batches reuse these centroids");
        Ok(())
    }

    /// Appends `vectors` and returns the positions assigned to them,
    /// `[len, len + vectors.len())`.
    ///
    /// Every vector is checked before anything is stored, so a dimension
    /// error leaves the index unchanged. An untrained quantized index is
    /// trained on this batch first.
    pub fn append(&mut self, vectors: Vec<Vec<f32>>) -> Result<Range<Position>, IndexError> {
        self.check_dimensions(&vectors)?;
        if !self.is_trained() && !vectors.is_empty() {
            self.train(&vectors)?;
        }

        let start = self.len();
        let count = vectors.len();
        match self {
            VectorIndex::Exact(index) => {
                for vector in vectors {
                    index.push(vector);
                }
            }
            VectorIndex::Quantized(index) => {
                for (offset, vector) in vectors.into_iter().enumerate() {
                    index.insert(start + offset, vector)?;
                }
            }
            VectorIndex::Graph(index) => {
                for (offset, vector) in vectors.into_iter().enumerate() {
                    index.insert(start + offset, vector)?;
                }
            }
        }

        debug!(start, count, "Appended vectors");
        Ok(start..start + count)
    }

    /// Up to `top_n` `(position, score)` pairs by descending score. Empty on
    /// an empty index.
    pub fn search(&self, query: &[f32], top_n: usize) -> Result<Vec<(Position, f32)>, IndexError> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if top_n == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let results = match self {
            VectorIndex::Exact(index) => index.search(query, top_n),
            VectorIndex::Quantized(index) => index.search(query, top_n)?,
            VectorIndex::Graph(index) => index.search(query, top_n)?,
        };
        Ok(results)
    }

    /// Applies the query-time probe count of a quantized index. Ignored by
    /// the other kinds.
    pub fn set_n_probe(&mut self, n_probe: usize) -> Result<(), IndexError> {
        if let VectorIndex::Quantized(index) = self {
            index.set_n_probe(n_probe)?;
        }
        Ok(())
    }

    pub fn n_probe(&self) -> Option<usize> {
        match self {
            VectorIndex::Quantized(index) => Some(index.n_probe()),
            _ => None,
        }
    }

    /// Applies the query breadth of a graph index. Ignored by the other
    /// kinds.
    pub fn set_ef_search(&mut self, ef_search: usize) {
        if let VectorIndex::Graph(index) = self {
            index.set_ef_search(ef_search);
        }
    }

    pub fn ef_search(&self) -> Option<usize> {
        match self {
            VectorIndex::Graph(index) => Some(index.ef_search()),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        IndexArtifact::from_index(self).encode()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        IndexArtifact::decode(bytes)?.into_index()
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        let expected = self.dimension();
        match vectors.iter().find(|v| v.len() != expected) {
            Some(v) => Err(IndexError::DimensionMismatch {
                expected,
                actual: v.len(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("kind", &self.kind())
            .field("dimension", &self.dimension())
            .field("len", &self.len())
            .field("trained", &self.is_trained())
            .finish()
    }
}
