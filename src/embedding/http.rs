// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use super::{Embedder, EmbeddingError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbedTextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedTextResponse {
    embedding: Vec<f32>,
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

/// Client for an embedding service exposing `POST /embed/text`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    base_url: String,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embed/text", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedTextRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    EmbeddingError::Unavailable(e.to_string())
                } else {
                    EmbeddingError::Request(e.to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::SERVICE_UNAVAILABLE => {
                return Err(EmbeddingError::Unavailable(format!("{} returned 503", url)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Request(format!("{} returned {}: {}", url, status, body)));
            }
        }

        let body: EmbedTextResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if !body.success {
            return Err(EmbeddingError::Rejected(format!("{} reported failure", url)));
        }
        if body.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty embedding".to_string()));
        }

        debug!(dimension = body.embedding.len(), "Embedded query text");
        Ok(body.embedding)
    }
}
