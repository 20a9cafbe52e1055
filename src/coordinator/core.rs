// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! The index coordinator owns the (VectorIndex, MetadataStore) pair and
//! runs the add/search/delete/persist protocol over it.
//!
//! Mutations (`add`, `delete`, `persist`, `load`) hold the write lock for
//! their whole duration; reads share the read lock. The index is
//! append-only, so deletion only tombstones positions in the metadata store.

use super::persistence::{ArtifactPaths, Backup, MetadataArtifact, StagedFile};
use crate::core::metadata_filter::{FilterError, FilterSpec};
use crate::core::metadata_store::{MetadataError, MetadataStore};
use crate::core::types::{
    ChunkInput, DocumentPage, DocumentSummary, DocumentView, Position, SearchHit,
};
use crate::core::vector_ops::normalized;
use crate::index::{IndexConfig, IndexError, IndexKind, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const DEFAULT_OVER_FETCH_MULTIPLIER: usize = 10;
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Chunk with ID {0} already exists")]
    DuplicateChunk(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

impl From<IndexError> for CoordinatorError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Configuration(msg) => CoordinatorError::Configuration(msg),
            IndexError::DimensionMismatch { expected, actual } => {
                CoordinatorError::DimensionMismatch { expected, actual }
            }
            other => CoordinatorError::Index(other),
        }
    }
}

impl From<MetadataError> for CoordinatorError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::DuplicateChunk(id) => CoordinatorError::DuplicateChunk(id),
            other => CoordinatorError::Inconsistent(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub index: IndexConfig,
    pub over_fetch_multiplier: usize,
}

impl CoordinatorConfig {
    pub fn new(index: IndexConfig) -> Self {
        Self {
            index,
            over_fetch_multiplier: DEFAULT_OVER_FETCH_MULTIPLIER,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.over_fetch_multiplier == 0 {
            return Err(CoordinatorError::Configuration(
                "over_fetch_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub kind: IndexKind,
    pub dimension: usize,
    pub trained: bool,
    pub n_probe: Option<usize>,
    pub ef_search: Option<usize>,
    /// Positions ever assigned, including tombstoned ones.
    pub index_size: usize,
    pub live_vectors: usize,
    pub tombstoned: usize,
    pub documents: usize,
    pub chunks: usize,
}

struct CoordinatorState {
    index: VectorIndex,
    store: MetadataStore,
}

pub struct IndexCoordinator {
    config: CoordinatorConfig,
    paths: Option<ArtifactPaths>,
    state: RwLock<CoordinatorState>,
}

impl IndexCoordinator {
    /// Creates a coordinator over a fresh, empty index.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let index = VectorIndex::create(&config.index)?;
        Ok(Self {
            config,
            paths: None,
            state: RwLock::new(CoordinatorState {
                index,
                store: MetadataStore::new(),
            }),
        })
    }

    /// Loads the artifact pair at `paths` when both files exist, starts
    /// empty when neither does, and fails when only one is present.
    /// [`checkpoint`](Self::checkpoint) writes back to the same paths.
    pub async fn open(config: CoordinatorConfig, paths: ArtifactPaths) -> Result<Self> {
        let index_exists = exists(&paths.index).await?;
        let metadata_exists = exists(&paths.metadata).await?;

        let mut coordinator = match (index_exists, metadata_exists) {
            (true, true) => {
                let coordinator = Self::new(config)?;
                coordinator.load(&paths.index, &paths.metadata).await?;
                coordinator
            }
            (false, false) => {
                info!(
                    index = %paths.index.display(),
                    metadata = %paths.metadata.display(),
                    "No persisted artifacts, starting with an empty index"
                );
                Self::new(config)?
            }
            (true, false) | (false, true) => {
                return Err(CoordinatorError::Persistence(format!(
                    "Artifact pair incomplete: index {} ({}), metadata {} ({})",
                    paths.index.display(),
                    presence(index_exists),
                    paths.metadata.display(),
                    presence(metadata_exists)
                )))
            }
        };

        coordinator.paths = Some(paths);
        Ok(coordinator)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn artifact_paths(&self) -> Option<&ArtifactPaths> {
        self.paths.as_ref()
    }

    /// Stores a batch of chunks and returns the positions assigned to them,
    /// in input order.
    ///
    /// The whole batch is validated first: vector dimension, vector norm and
    /// chunk-id uniqueness (against the store and within the batch). A
    /// rejected batch changes nothing. Metadata is recorded only after the
    /// vectors are appended.
    pub async fn add(&self, chunks: Vec<ChunkInput>) -> Result<Vec<Position>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = chunks
            .iter()
            .map(|chunk| self.prepare_vector(&chunk.vector, &chunk.chunk_id()))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.write().await;

        let mut batch_ids = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            let id = chunk.chunk_id();
            if state.store.contains_chunk(&id) || !batch_ids.insert(id.clone()) {
                return Err(CoordinatorError::DuplicateChunk(id));
            }
        }

        if !state.index.is_trained() {
            warn!(
                samples = vectors.len(),
                "Training quantized index on the first batch; later batches will not retrain"
            );
            state.index.train(&vectors)?;
        } else if state.index.kind().requires_training() {
            debug!(
                samples = vectors.len(),
                "Appending to quantized index trained on the first batch only"
            );
        }

        let range = state.index.append(vectors)?;
        for (chunk, position) in chunks.iter().zip(range.clone()) {
            state.store.record_chunk(chunk, position)?;
        }

        debug!(
            count = chunks.len(),
            first = range.start,
            index_size = state.index.len(),
            "Added chunks"
        );
        Ok(range.collect())
    }

    /// Top-`k` live chunks by descending similarity to `query` that pass
    /// `filters`.
    ///
    /// When filters are given or deletions exist, `k * over_fetch_multiplier`
    /// candidates are requested from the index and then screened; the result
    /// may hold fewer than `k` hits even when more matching chunks exist.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        filters: Option<&FilterSpec>,
    ) -> Result<Vec<SearchHit>> {
        let query = self.prepare_vector(query, "query")?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let filters = filters.filter(|f| !f.is_empty());

        let state = self.state.read().await;
        if state.store.live_count() == 0 {
            return Ok(Vec::new());
        }

        let index_size = state.index.len();
        let window = if filters.is_some() || state.store.tombstone_count() > 0 {
            k.saturating_mul(self.config.over_fetch_multiplier).min(index_size)
        } else {
            k.min(index_size)
        };

        let candidates = state.index.search(&query, window)?;
        let scanned = candidates.len();

        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|(position, score)| {
                state
                    .store
                    .resolve(position)
                    .map(|chunk| (chunk, score))
            })
            .filter(|(chunk, _)| filters.map_or(true, |f| f.matches(&chunk.metadata)))
            .take(k)
            .map(|(chunk, score)| SearchHit::from_chunk(chunk, score))
            .collect();

        debug!(k, window, scanned, returned = hits.len(), "Vector search");
        Ok(hits)
    }

    /// Tombstones every chunk of `doc_id`. Returns `false` if the document
    /// is unknown.
    pub async fn delete(&self, doc_id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.store.tombstone_document(doc_id);
        if removed {
            info!(
                doc_id,
                tombstoned = state.store.tombstone_count(),
                "Deleted document"
            );
        }
        removed
    }

    pub async fn get_document(&self, doc_id: &str) -> Option<DocumentView> {
        self.state.read().await.store.lookup_document(doc_id)
    }

    /// Case-insensitive substring search over live chunk text. Each hit
    /// scores `min(0.99, 0.1 * occurrences)`. Returns at most `limit` hits
    /// and the total number of matches.
    pub async fn keyword_search(
        &self,
        keywords: &str,
        limit: usize,
        filters: Option<&FilterSpec>,
    ) -> Result<(Vec<SearchHit>, usize)> {
        let needle = keywords.trim().to_lowercase();
        if needle.is_empty() {
            return Err(CoordinatorError::Configuration(
                "Keywords must not be empty".to_string(),
            ));
        }

        let state = self.state.read().await;
        let mut hits: Vec<SearchHit> = state
            .store
            .live_chunks()
            .filter(|chunk| filters.map_or(true, |f| f.matches(&chunk.metadata)))
            .filter_map(|chunk| {
                let occurrences = chunk.text.to_lowercase().matches(needle.as_str()).count();
                if occurrences == 0 {
                    return None;
                }
                let score = (occurrences as f32 * 0.1).min(0.99);
                Some(SearchHit::from_chunk(chunk, score))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        let total = hits.len();
        hits.truncate(limit);
        Ok((hits, total))
    }

    /// One page of documents ordered by id. `page` is 1-based. When
    /// `text_filter` is given, only documents whose metadata or chunk text
    /// contains it (case-insensitively) are listed.
    pub async fn list_documents(
        &self,
        page: usize,
        limit: usize,
        text_filter: Option<&str>,
    ) -> Result<DocumentPage> {
        if page == 0 || limit == 0 {
            return Err(CoordinatorError::Configuration(format!(
                "page and limit must be positive (page={}, limit={})",
                page, limit
            )));
        }
        let needle = text_filter
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());

        let state = self.state.read().await;
        let store = &state.store;
        let matching: Vec<_> = store
            .documents()
            .filter(|doc| match &needle {
                None => true,
                Some(needle) => {
                    serde_json::to_string(&doc.metadata)
                        .map(|m| m.to_lowercase().contains(needle.as_str()))
                        .unwrap_or(false)
                        || doc
                            .chunk_ids
                            .iter()
                            .filter_map(|id| store.get_chunk(id))
                            .any(|chunk| chunk.text.to_lowercase().contains(needle.as_str()))
                }
            })
            .collect();

        let total = matching.len();
        let documents = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(|doc| DocumentSummary {
                id: doc.id.clone(),
                metadata: doc.metadata.clone(),
                chunk_count: doc.chunk_ids.len(),
                preview: doc
                    .chunk_ids
                    .first()
                    .and_then(|id| store.get_chunk(id))
                    .map(|chunk| preview(&chunk.text))
                    .unwrap_or_default(),
            })
            .collect();

        Ok(DocumentPage {
            documents,
            total,
            page,
            limit,
            pages: total.div_ceil(limit),
        })
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let state = self.state.read().await;
        CoordinatorStats {
            kind: state.index.kind(),
            dimension: state.index.dimension(),
            trained: state.index.is_trained(),
            n_probe: state.index.n_probe(),
            ef_search: state.index.ef_search(),
            index_size: state.index.len(),
            live_vectors: state.store.live_count(),
            tombstoned: state.store.tombstone_count(),
            documents: state.store.document_count(),
            chunks: state.store.chunk_count(),
        }
    }

    /// Writes the index and metadata artifacts.
    ///
    /// Both files are staged and synced beside their targets before either
    /// is renamed into place. The previous index is copied aside first and
    /// put back if the metadata rename fails, so a failure leaves the
    /// previous pair (or no pair) on disk.
    pub async fn persist(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        let state = self.state.write().await;

        let index_bytes = state.index.to_bytes()?;
        let artifact = MetadataArtifact::new(state.store.clone(), &index_bytes, state.index.len());
        let metadata_bytes = serde_json::to_vec(&artifact)
            .map_err(|e| CoordinatorError::Persistence(format!("Encoding metadata: {}", e)))?;

        let staged_index = StagedFile::write(index_path, &index_bytes)
            .await
            .map_err(|e| io_error("Writing", index_path, e))?;
        let staged_metadata = match StagedFile::write(metadata_path, &metadata_bytes).await {
            Ok(staged) => staged,
            Err(e) => {
                staged_index.discard().await;
                return Err(io_error("Writing", metadata_path, e));
            }
        };

        let backup = match Backup::take(index_path).await {
            Ok(backup) => backup,
            Err(e) => {
                staged_index.discard().await;
                staged_metadata.discard().await;
                return Err(io_error("Backing up", index_path, e));
            }
        };

        if let Err(e) = staged_index.commit().await {
            staged_metadata.discard().await;
            if let Some(backup) = backup {
                backup.release().await;
            }
            return Err(io_error("Replacing", index_path, e));
        }
        if let Err(e) = staged_metadata.commit().await {
            roll_back_index(index_path, backup).await;
            return Err(io_error("Replacing", metadata_path, e));
        }
        if let Some(backup) = backup {
            backup.release().await;
        }

        info!(
            index = %index_path.display(),
            metadata = %metadata_path.display(),
            snapshot_id = %artifact.snapshot_id,
            vectors = artifact.index_size,
            documents = state.store.document_count(),
            "Persisted index"
        );
        Ok(())
    }

    /// Persists to the paths given to [`open`](Self::open).
    pub async fn checkpoint(&self) -> Result<()> {
        match &self.paths {
            Some(paths) => self.persist(&paths.index, &paths.metadata).await,
            None => Err(CoordinatorError::Configuration(
                "No artifact paths configured for checkpoint".to_string(),
            )),
        }
    }

    /// Replaces the in-memory state with the artifact pair on disk.
    ///
    /// The pair must match (checksum and size), the index kind and dimension
    /// must match the configuration, and the metadata must be structurally
    /// consistent with the index. The configured probe count is reapplied.
    /// On any failure the current state is kept.
    pub async fn load(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        let mut state = self.state.write().await;

        let index_bytes = fs_read(index_path).await?;
        let metadata_bytes = fs_read(metadata_path).await?;

        let artifact: MetadataArtifact = serde_json::from_slice(&metadata_bytes).map_err(|e| {
            CoordinatorError::Persistence(format!(
                "Decoding metadata {}: {}",
                metadata_path.display(),
                e
            ))
        })?;
        artifact.check_pairing(&index_bytes).map_err(|msg| {
            CoordinatorError::Persistence(format!(
                "{} and {} are not a pair: {}",
                index_path.display(),
                metadata_path.display(),
                msg
            ))
        })?;

        let mut index = VectorIndex::from_bytes(&index_bytes)
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;

        let expected = &self.config.index;
        if index.kind() != expected.kind {
            return Err(CoordinatorError::Configuration(format!(
                "Persisted index is {} but {} is configured",
                index.kind(),
                expected.kind
            )));
        }
        if index.dimension() != expected.dimension {
            return Err(CoordinatorError::Configuration(format!(
                "Persisted index has dimension {} but {} is configured",
                index.dimension(),
                expected.dimension
            )));
        }
        if index.len() != artifact.index_size {
            return Err(CoordinatorError::Persistence(format!(
                "Metadata records {} vectors but the index holds {}",
                artifact.index_size,
                index.len()
            )));
        }
        artifact
            .store
            .validate(index.len())
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;

        index.set_n_probe(expected.ivf.n_probe)?;
        index.set_ef_search(expected.hnsw.ef_search);

        info!(
            index = %index_path.display(),
            snapshot_id = %artifact.snapshot_id,
            saved_at = %artifact.saved_at,
            vectors = index.len(),
            documents = artifact.store.document_count(),
            tombstoned = artifact.store.tombstone_count(),
            "Loaded index"
        );

        state.index = index;
        state.store = artifact.store;
        Ok(())
    }

    fn prepare_vector(&self, vector: &[f32], label: &str) -> Result<Vec<f32>> {
        let expected = self.config.index.dimension;
        if vector.len() != expected {
            return Err(CoordinatorError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        normalized(vector).ok_or_else(|| {
            CoordinatorError::InvalidVector(format!(
                "{} has zero norm or non-finite components",
                label
            ))
        })
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn presence(exists: bool) -> &'static str {
    if exists {
        "present"
    } else {
        "missing"
    }
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_error("Checking", path, e))
}

async fn fs_read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| io_error("Reading", path, e))
}

/// Undoes an index rename whose metadata partner never landed.
async fn roll_back_index(index_path: &Path, backup: Option<Backup>) {
    let result = match backup {
        Some(backup) => backup.restore().await,
        None => tokio::fs::remove_file(index_path).await,
    };
    if let Err(e) = result {
        error!(
            path = %index_path.display(),
            error = %e,
            "Failed to roll back index artifact; it no longer pairs with the metadata"
        );
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoordinatorError {
    CoordinatorError::Persistence(format!("{} {}: {}", action, path.display(), err))
}
