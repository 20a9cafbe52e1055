// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Offset of a vector inside the ANN index. Assigned once at append time and
/// never reused.
pub type Position = usize;

/// Open key/value record attached to documents and chunks.
pub type Metadata = serde_json::Map<String, JsonValue>;

/// Metadata keys with dedicated meaning.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const DATE: &str = "date";
    pub const NOTE_TYPE: &str = "note_type";
}

/// Builds the canonical chunk id `<doc_id>_<chunk_index>`.
pub fn chunk_id(doc_id: &str, chunk_index: u64) -> String {
    format!("{}_{}", doc_id, chunk_index)
}

/// A pre-segmented, pre-embedded fragment submitted for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub doc_id: String,
    pub chunk_index: u64,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

impl ChunkInput {
    pub fn new(
        doc_id: impl Into<String>,
        chunk_index: u64,
        text: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_index,
            text: text.into(),
            metadata: Metadata::new(),
            vector,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn chunk_id(&self) -> String {
        chunk_id(&self.doc_id, self.chunk_index)
    }

    /// Metadata as stored on the chunk: the submitted record plus the
    /// identity fields.
    pub fn stored_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            fields::DOC_ID.to_string(),
            JsonValue::String(self.doc_id.clone()),
        );
        metadata.insert(
            fields::CHUNK_INDEX.to_string(),
            JsonValue::from(self.chunk_index),
        );
        metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub vector_position: Position,
}

impl Chunk {
    pub fn date(&self) -> Option<&str> {
        self.metadata.get(fields::DATE).and_then(JsonValue::as_str)
    }

    pub fn note_type(&self) -> Option<&str> {
        self.metadata.get(fields::NOTE_TYPE).and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub metadata: Metadata,
    pub chunk_ids: Vec<String>,
}

/// A document together with its resolved chunks, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: String,
    pub metadata: Metadata,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl SearchHit {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            score,
            metadata: chunk.metadata.clone(),
        }
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.metadata.get(fields::DOC_ID).and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub metadata: Metadata,
    pub chunk_count: usize,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}
