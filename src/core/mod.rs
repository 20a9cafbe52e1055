// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod metadata_filter;
pub mod metadata_store;
pub mod types;
pub mod vector_ops;

pub use metadata_filter::{FieldFilter, FilterError, FilterSpec};
pub use metadata_store::{MetadataError, MetadataStore};
pub use types::{
    Chunk, ChunkInput, Document, DocumentPage, DocumentSummary, DocumentView, Metadata,
    Position, SearchHit,
};
