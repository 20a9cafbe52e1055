// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use clinical_vector_store::embedding::{Embedder, EmbeddingError, HttpEmbedder};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn embedder(url: &str) -> HttpEmbedder {
    HttpEmbedder::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_embed_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/embed/text")
        .match_body(Matcher::Json(json!({"text": "shortness of breath"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"embedding": [0.1, 0.2, 0.3], "success": true}).to_string())
        .create_async()
        .await;

    let vector = embedder(&server.url()).embed("shortness of breath").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_reported_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/embed/text")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"embedding": [], "success": false}).to_string())
        .create_async()
        .await;

    let err = embedder(&server.url()).embed("anything").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Rejected(_)));
}

#[tokio::test]
async fn test_http_errors() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/embed/text")
        .with_status(503)
        .create_async()
        .await;
    let err = embedder(&server.url()).embed("anything").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Unavailable(_)));

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/embed/text")
        .with_status(500)
        .with_body("model crashed")
        .create_async()
        .await;
    let err = embedder(&server.url()).embed("anything").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Request(msg) if msg.contains("model crashed")));
}

#[tokio::test]
async fn test_malformed_response() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/embed/text")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;
    let err = embedder(&server.url()).embed("anything").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
}
