// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use super::{coordinator, five_chunks, near_axis, note, DIM};
use clinical_vector_store::core::metadata_filter::FilterSpec;
use clinical_vector_store::core::types::ChunkInput;
use clinical_vector_store::{CoordinatorError, IndexKind};
use serde_json::json;

const KINDS: [IndexKind; 3] = [IndexKind::Exact, IndexKind::Quantized, IndexKind::Graph];

#[tokio::test]
async fn test_add_counts_documents_and_positions() {
    let coordinator = coordinator(IndexKind::Exact);
    let positions = coordinator.add(five_chunks()).await.unwrap();

    assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    let stats = coordinator.stats().await;
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.index_size, 5);
    assert_eq!(stats.chunks, 5);

    let doc = coordinator.get_document("A").await.unwrap();
    assert_eq!(doc.chunks.len(), 2);
    assert_eq!(doc.chunks[1].id, "A_1");
    assert_eq!(doc.chunks[1].vector_position, 1);
}

#[tokio::test]
async fn test_query_returns_nearest_cluster() {
    for kind in KINDS {
        let coordinator = coordinator(kind);
        coordinator
            .add(vec![
                note("x", 0, near_axis(0, 0.02), "2023-01-01", "a"),
                note("x", 1, near_axis(0, 0.04), "2023-01-01", "a"),
                note("x", 2, near_axis(0, 0.06), "2023-01-01", "a"),
                note("y", 0, near_axis(1, 0.02), "2023-01-01", "a"),
                note("y", 1, near_axis(1, 0.04), "2023-01-01", "a"),
            ])
            .await
            .unwrap();

        let hits = coordinator.search(&near_axis(0, 0.01), 2, None).await.unwrap();
        assert_eq!(hits.len(), 2, "kind {}", kind);
        assert!(hits.iter().all(|h| h.doc_id() == Some("x")), "kind {}", kind);
    }
}

#[tokio::test]
async fn test_every_live_position_is_its_own_top_match() {
    for kind in KINDS {
        let coordinator = coordinator(kind);
        let chunks: Vec<ChunkInput> = (0..DIM)
            .map(|i| ChunkInput::new(format!("doc{}", i), 0, "text", near_axis(i, 0.3)))
            .collect();
        coordinator.add(chunks.clone()).await.unwrap();

        for chunk in &chunks {
            let hits = coordinator.search(&chunk.vector, 1, None).await.unwrap();
            assert_eq!(hits[0].chunk_id, chunk.chunk_id(), "kind {}", kind);
            assert!((hits[0].score - 1.0).abs() < 1e-4);
        }
    }
}

#[tokio::test]
async fn test_delete_excludes_document() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    assert!(coordinator.delete("A").await);
    assert!(!coordinator.delete("A").await);

    let stats = coordinator.stats().await;
    assert_eq!(stats.index_size, 5);
    assert_eq!(stats.live_vectors, 3);
    assert_eq!(stats.tombstoned, 2);
    assert!(coordinator.get_document("A").await.is_none());

    let everything = FilterSpec::from_json(&json!({})).unwrap();
    let by_type = FilterSpec::from_json(&json!({"note_type": "progress_note"})).unwrap();
    for filters in [None, Some(&everything), Some(&by_type)] {
        let hits = coordinator.search(&near_axis(0, 0.05), 5, filters).await.unwrap();
        assert!(hits.iter().all(|h| h.doc_id() != Some("A")));
    }

    let hits = coordinator.search(&near_axis(0, 0.05), 5, None).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk_id, "C_0");
}

#[tokio::test]
async fn test_delete_unknown_document_is_not_an_error() {
    let coordinator = coordinator(IndexKind::Exact);
    assert!(!coordinator.delete("missing").await);
    assert!(coordinator.get_document("missing").await.is_none());
}

#[tokio::test]
async fn test_date_range_filter() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    let filter =
        FilterSpec::from_json(&json!({"date_range": {"start": "2023-01-01", "end": "2023-12-31"}}))
            .unwrap();
    let hits = coordinator
        .search(&near_axis(0, 0.15), 5, Some(&filter))
        .await
        .unwrap();

    let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(hits.len(), 4);
    assert!(!ids.contains(&"C_0"));
    assert!(hits.iter().all(|h| h.metadata["date"].as_str().unwrap() < "2024"));
}

#[tokio::test]
async fn test_list_filter_keeps_or_semantics() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    let filter =
        FilterSpec::from_json(&json!({"note_type": ["radiology", "discharge_summary"]})).unwrap();
    let hits = coordinator.search(&near_axis(0, 0.0), 5, Some(&filter)).await.unwrap();

    let mut docs: Vec<_> = hits.iter().filter_map(|h| h.doc_id()).collect();
    docs.sort();
    docs.dedup();
    assert_eq!(docs, vec!["B", "C"]);
}

#[tokio::test]
async fn test_result_bound_and_order() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    for k in [1, 3, 5, 10] {
        let hits = coordinator.search(&near_axis(0, 0.5), k, None).await.unwrap();
        assert!(hits.len() <= k);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
    assert!(coordinator.search(&near_axis(0, 0.5), 0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_index_search_is_empty() {
    for kind in KINDS {
        let coordinator = coordinator(kind);
        assert!(coordinator.search(&near_axis(0, 0.0), 5, None).await.unwrap().is_empty());
    }

    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();
    for doc in ["A", "B", "C"] {
        coordinator.delete(doc).await;
    }
    assert!(coordinator.search(&near_axis(0, 0.0), 5, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let coordinator = coordinator(IndexKind::Exact);

    let err = coordinator
        .add(vec![ChunkInput::new("A", 0, "short", vec![1.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::DimensionMismatch { expected: DIM, actual: 2 }
    ));

    let err = coordinator.search(&[1.0, 0.0], 3, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::DimensionMismatch { .. }));
    assert_eq!(coordinator.stats().await.index_size, 0);
}

#[tokio::test]
async fn test_duplicate_batch_leaves_state_untouched() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    let err = coordinator
        .add(vec![
            note("D", 0, near_axis(2, 0.0), "2023-03-03", "consult"),
            note("B", 1, near_axis(3, 0.0), "2023-03-03", "consult"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DuplicateChunk(ref id) if id == "B_1"));

    let stats = coordinator.stats().await;
    assert_eq!(stats.index_size, 5);
    assert_eq!(stats.documents, 3);
    assert!(coordinator.get_document("D").await.is_none());

    let positions = coordinator
        .add(vec![note("D", 0, near_axis(2, 0.0), "2023-03-03", "consult")])
        .await
        .unwrap();
    assert_eq!(positions, vec![5]);
}

#[tokio::test]
async fn test_quantized_index_trains_on_first_batch() {
    let coordinator = coordinator(IndexKind::Quantized);
    assert!(!coordinator.stats().await.trained);

    coordinator.add(five_chunks()).await.unwrap();
    let stats = coordinator.stats().await;
    assert!(stats.trained);
    assert_eq!(stats.n_probe, Some(4));

    coordinator
        .add(vec![note("D", 0, near_axis(5, 0.0), "2023-03-03", "consult")])
        .await
        .unwrap();
    let stats = coordinator.stats().await;
    assert!(stats.trained);
    assert_eq!((stats.index_size, stats.n_probe), (6, Some(4)));
    let hits = coordinator.search(&near_axis(5, 0.0), 1, None).await.unwrap();
    assert_eq!(hits[0].chunk_id, "D_0");
}

#[tokio::test]
async fn test_invalid_filter_fails_only_the_request() {
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();

    let parsed = FilterSpec::from_json(&json!({"date_range": "2023"}));
    let err: CoordinatorError = parsed.unwrap_err().into();
    assert!(matches!(err, CoordinatorError::InvalidFilter(_)));

    assert_eq!(coordinator.search(&near_axis(0, 0.0), 2, None).await.unwrap().len(), 2);
}
