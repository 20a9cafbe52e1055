// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Read-only query façade over [`IndexCoordinator`].

use crate::coordinator::{CoordinatorError, IndexCoordinator};
use crate::core::metadata_filter::FilterSpec;
use crate::core::types::{DocumentView, SearchHit};
use crate::embedding::{Embedder, EmbeddingError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("No embedding service configured for text search")]
    EmbedderNotConfigured,
}

#[derive(Clone)]
pub struct Retriever {
    coordinator: Arc<IndexCoordinator>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Retriever {
    pub fn new(coordinator: Arc<IndexCoordinator>) -> Self {
        Self {
            coordinator,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn coordinator(&self) -> &Arc<IndexCoordinator> {
        &self.coordinator
    }

    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filters: Option<&FilterSpec>,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        Ok(self.coordinator.search(vector, k, filters).await?)
    }

    pub async fn search_by_text(
        &self,
        text: &str,
        k: usize,
        filters: Option<&FilterSpec>,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or(RetrievalError::EmbedderNotConfigured)?;
        let vector = embedder.embed(text).await?;
        self.search_by_vector(&vector, k, filters).await
    }

    pub async fn get_document(&self, doc_id: &str) -> Option<DocumentView> {
        self.coordinator.get_document(doc_id).await
    }
}
