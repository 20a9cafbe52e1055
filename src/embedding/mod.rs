// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Text-to-vector producers used for text queries.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpEmbedder;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding service rejected the text: {0}")]
    Rejected(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Converts text into a vector of the index's dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}
