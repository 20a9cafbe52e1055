// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Document/chunk bookkeeping that correlates ANN positions with chunks.
//!
//! The position mapping is append-only: entry `i` names the chunk whose
//! vector sits at index position `i`. Deleting a document tombstones its
//! positions; the mapping is never shortened or reordered, since the index
//! engines cannot compact and every later position would shift.

use crate::core::types::{fields, Chunk, ChunkInput, Document, DocumentView, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetadataError {
    #[error("Chunk with ID {0} already exists")]
    DuplicateChunk(String),

    #[error("Non-sequential position: expected {expected}, got {actual}")]
    NonSequentialPosition { expected: Position, actual: Position },

    #[error("Inconsistent metadata: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataStore {
    documents: BTreeMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    position_mapping: Vec<String>,
    tombstones: BTreeSet<Position>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `input` as the chunk stored at `position`.
    ///
    /// `position` must be the next unassigned position, i.e. the current
    /// length of the position mapping.
    pub fn record_chunk(
        &mut self,
        input: &ChunkInput,
        position: Position,
    ) -> Result<&Chunk, MetadataError> {
        let id = input.chunk_id();
        if self.chunks.contains_key(&id) {
            return Err(MetadataError::DuplicateChunk(id));
        }
        if position != self.position_mapping.len() {
            return Err(MetadataError::NonSequentialPosition {
                expected: self.position_mapping.len(),
                actual: position,
            });
        }

        let document = self
            .documents
            .entry(input.doc_id.clone())
            .or_insert_with(|| {
                let mut metadata = input.metadata.clone();
                metadata.insert(
                    fields::DOC_ID.to_string(),
                    JsonValue::String(input.doc_id.clone()),
                );
                Document {
                    id: input.doc_id.clone(),
                    metadata,
                    chunk_ids: Vec::new(),
                }
            });
        document.chunk_ids.push(id.clone());

        self.position_mapping.push(id.clone());

        let chunk = Chunk {
            id: id.clone(),
            doc_id: input.doc_id.clone(),
            text: input.text.clone(),
            metadata: input.stored_metadata(),
            vector_position: position,
        };
        Ok(&*self.chunks.entry(id).or_insert(chunk))
    }

    /// Removes a document and its chunks, tombstoning their positions.
    /// Returns `false` when the document is unknown.
    pub fn tombstone_document(&mut self, doc_id: &str) -> bool {
        let document = match self.documents.remove(doc_id) {
            Some(document) => document,
            None => return false,
        };

        for chunk_id in &document.chunk_ids {
            if let Some(chunk) = self.chunks.remove(chunk_id) {
                self.tombstones.insert(chunk.vector_position);
            }
        }
        true
    }

    /// Chunk stored at `position`, or `None` if tombstoned or unassigned.
    pub fn resolve(&self, position: Position) -> Option<&Chunk> {
        if self.tombstones.contains(&position) {
            return None;
        }
        let chunk_id = self.position_mapping.get(position)?;
        self.chunks.get(chunk_id)
    }

    pub fn lookup_document(&self, doc_id: &str) -> Option<DocumentView> {
        let document = self.documents.get(doc_id)?;
        let chunks = document
            .chunk_ids
            .iter()
            .filter_map(|id| self.chunks.get(id))
            .cloned()
            .collect();

        Some(DocumentView {
            id: document.id.clone(),
            metadata: document.metadata.clone(),
            chunks,
        })
    }

    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.chunks.contains_key(chunk_id)
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    /// Documents ordered by id.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Live chunks in position order.
    pub fn live_chunks(&self) -> impl Iterator<Item = &Chunk> {
        (0..self.position_mapping.len()).filter_map(move |p| self.resolve(p))
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of positions ever assigned, live or tombstoned.
    pub fn position_count(&self) -> usize {
        self.position_mapping.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn live_count(&self) -> usize {
        self.position_mapping.len() - self.tombstones.len()
    }

    /// Checks the structural invariants against an index holding
    /// `index_size` vectors.
    pub fn validate(&self, index_size: usize) -> Result<(), MetadataError> {
        if self.position_mapping.len() != index_size {
            return Err(MetadataError::Inconsistent(format!(
                "position mapping has {} entries but the index holds {} vectors",
                self.position_mapping.len(),
                index_size
            )));
        }

        if let Some(&last) = self.tombstones.iter().next_back() {
            if last >= index_size {
                return Err(MetadataError::Inconsistent(format!(
                    "tombstone {} is beyond index size {}",
                    last, index_size
                )));
            }
        }

        for (id, chunk) in &self.chunks {
            let mapped = self.position_mapping.get(chunk.vector_position);
            if mapped.map(String::as_str) != Some(id.as_str()) {
                return Err(MetadataError::Inconsistent(format!(
                    "chunk {} claims position {} which maps to {:?}",
                    id, chunk.vector_position, mapped
                )));
            }
            if self.tombstones.contains(&chunk.vector_position) {
                return Err(MetadataError::Inconsistent(format!(
                    "live chunk {} sits at tombstoned position {}",
                    id, chunk.vector_position
                )));
            }
            if !self.documents.contains_key(&chunk.doc_id) {
                return Err(MetadataError::Inconsistent(format!(
                    "chunk {} belongs to unknown document {}",
                    id, chunk.doc_id
                )));
            }
        }

        if self.chunks.len() != self.live_count() {
            return Err(MetadataError::Inconsistent(format!(
                "{} live chunks but {} live positions",
                self.chunks.len(),
                self.live_count()
            )));
        }

        Ok(())
    }
}
