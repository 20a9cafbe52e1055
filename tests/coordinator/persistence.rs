// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use super::{config, coordinator, five_chunks, near_axis, note};
use clinical_vector_store::coordinator::ArtifactPaths;
use clinical_vector_store::{CoordinatorError, IndexCoordinator, IndexKind};
use tempfile::TempDir;

fn paths(dir: &TempDir) -> ArtifactPaths {
    ArtifactPaths::new(
        dir.path().join("data").join("faiss_index"),
        dir.path().join("data").join("metadata.json"),
    )
}

#[tokio::test]
async fn test_round_trip_preserves_counts_and_results() {
    for kind in [IndexKind::Exact, IndexKind::Quantized, IndexKind::Graph] {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);

        let original = coordinator(kind);
        original.add(five_chunks()).await.unwrap();
        original.persist(&paths.index, &paths.metadata).await.unwrap();

        let reloaded = IndexCoordinator::open(config(kind), paths.clone()).await.unwrap();
        let (before, after) = (original.stats().await, reloaded.stats().await);
        assert_eq!(before, after, "kind {}", kind);

        let query = near_axis(1, 0.07);
        let expected = original.search(&query, 3, None).await.unwrap();
        let actual = reloaded.search(&query, 3, None).await.unwrap();
        assert_eq!(expected[0].chunk_id, actual[0].chunk_id, "kind {}", kind);
        assert_eq!(expected, actual, "kind {}", kind);
    }
}

#[tokio::test]
async fn test_tombstones_survive_reload() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);

    let original = IndexCoordinator::open(config(IndexKind::Exact), paths.clone())
        .await
        .unwrap();
    original.add(five_chunks()).await.unwrap();
    original.delete("C").await;
    original.checkpoint().await.unwrap();

    let reloaded = IndexCoordinator::open(config(IndexKind::Exact), paths).await.unwrap();
    let stats = reloaded.stats().await;
    assert_eq!((stats.index_size, stats.live_vectors, stats.documents), (5, 4, 2));

    let hits = reloaded.search(&near_axis(0, 0.15), 5, None).await.unwrap();
    assert!(hits.iter().all(|h| h.doc_id() != Some("C")));

    let positions = reloaded
        .add(vec![note("E", 0, near_axis(4, 0.0), "2023-07-07", "consult")])
        .await
        .unwrap();
    assert_eq!(positions, vec![5]);
}

#[tokio::test]
async fn test_open_without_artifacts_starts_empty() {
    let dir = TempDir::new().unwrap();
    let coordinator = IndexCoordinator::open(config(IndexKind::Graph), paths(&dir))
        .await
        .unwrap();
    assert_eq!(coordinator.stats().await.index_size, 0);
    assert!(!paths(&dir).index.exists());
}

#[tokio::test]
async fn test_open_with_one_artifact_fails() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let original = coordinator(IndexKind::Exact);
    original.add(five_chunks()).await.unwrap();
    original.persist(&paths.index, &paths.metadata).await.unwrap();

    std::fs::remove_file(&paths.metadata).unwrap();
    let err = IndexCoordinator::open(config(IndexKind::Exact), paths)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordinatorError::Persistence(_)));
}

#[tokio::test]
async fn test_mismatched_pair_fails_fast() {
    let dir = TempDir::new().unwrap();
    let first = paths(&dir);
    let second = ArtifactPaths::new(
        dir.path().join("other").join("faiss_index"),
        dir.path().join("other").join("metadata.json"),
    );

    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();
    coordinator.persist(&first.index, &first.metadata).await.unwrap();
    coordinator
        .add(vec![note("D", 0, near_axis(3, 0.0), "2023-03-03", "consult")])
        .await
        .unwrap();
    coordinator.persist(&second.index, &second.metadata).await.unwrap();

    let fresh = super::coordinator(IndexKind::Exact);
    let err = fresh.load(&second.index, &first.metadata).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Persistence(_)));
    assert_eq!(fresh.stats().await.index_size, 0);
}

#[tokio::test]
async fn test_load_rejects_other_kind_or_dimension() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let original = coordinator(IndexKind::Graph);
    original.add(five_chunks()).await.unwrap();
    original.persist(&paths.index, &paths.metadata).await.unwrap();

    let err = IndexCoordinator::open(config(IndexKind::Exact), paths.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordinatorError::Configuration(_)));

    let mut wider = config(IndexKind::Graph);
    wider.index.dimension = 16;
    let err = IndexCoordinator::open(wider, paths).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::Configuration(_)));
}

#[tokio::test]
async fn test_probe_count_reapplied_from_config() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let original = coordinator(IndexKind::Quantized);
    original.add(five_chunks()).await.unwrap();
    original.persist(&paths.index, &paths.metadata).await.unwrap();

    let mut narrow = config(IndexKind::Quantized);
    narrow.index.ivf.n_probe = 2;
    let reloaded = IndexCoordinator::open(narrow, paths).await.unwrap();
    assert_eq!(reloaded.stats().await.n_probe, Some(2));
}

#[tokio::test]
async fn test_failed_persist_keeps_previous_artifacts() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();
    coordinator.persist(&paths.index, &paths.metadata).await.unwrap();
    let saved = std::fs::read(&paths.index).unwrap();

    coordinator
        .add(vec![note("D", 0, near_axis(3, 0.0), "2023-03-03", "consult")])
        .await
        .unwrap();

    // A regular file where the metadata directory should be.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let err = coordinator
        .persist(&paths.index, &blocker.join("metadata.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Persistence(_)));

    assert_eq!(std::fs::read(&paths.index).unwrap(), saved);
    let reloaded = IndexCoordinator::open(config(IndexKind::Exact), paths).await.unwrap();
    assert_eq!(reloaded.stats().await.index_size, 5);
}

#[tokio::test]
async fn test_search_breadth_reapplied_from_config() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let original = coordinator(IndexKind::Graph);
    original.add(five_chunks()).await.unwrap();
    original.persist(&paths.index, &paths.metadata).await.unwrap();
    let persisted = original.stats().await.ef_search;

    let mut wider = config(IndexKind::Graph);
    wider.index.hnsw.ef_search = 48;
    let reloaded = IndexCoordinator::open(wider, paths).await.unwrap();
    assert_ne!(persisted, Some(48));
    assert_eq!(reloaded.stats().await.ef_search, Some(48));
}

fn hidden_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect()
}

#[tokio::test]
async fn test_failed_metadata_rename_restores_previous_index() {
    let dir = TempDir::new().unwrap();
    let paths = paths(&dir);
    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();
    coordinator.persist(&paths.index, &paths.metadata).await.unwrap();
    let saved = std::fs::read(&paths.index).unwrap();

    coordinator
        .add(vec![note("D", 0, near_axis(3, 0.0), "2023-03-03", "consult")])
        .await
        .unwrap();

    // Staging succeeds but nothing can be renamed over a non-empty directory.
    let occupied = dir.path().join("data").join("occupied");
    std::fs::create_dir_all(occupied.join("inner")).unwrap();
    let err = coordinator
        .persist(&paths.index, &occupied)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Persistence(_)));

    assert_eq!(std::fs::read(&paths.index).unwrap(), saved);
    assert!(hidden_files(&dir.path().join("data")).is_empty());
    let reloaded = IndexCoordinator::open(config(IndexKind::Exact), paths).await.unwrap();
    assert_eq!(reloaded.stats().await.index_size, 5);
}

#[tokio::test]
async fn test_failed_first_persist_leaves_no_index() {
    let dir = TempDir::new().unwrap();
    let index_path = dir.path().join("faiss_index");
    let occupied = dir.path().join("occupied");
    std::fs::create_dir_all(occupied.join("inner")).unwrap();

    let coordinator = coordinator(IndexKind::Exact);
    coordinator.add(five_chunks()).await.unwrap();
    assert!(coordinator.persist(&index_path, &occupied).await.is_err());

    assert!(!index_path.exists());
    assert!(hidden_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_checkpoint_requires_paths() {
    let coordinator = coordinator(IndexKind::Exact);
    assert!(matches!(
        coordinator.checkpoint().await,
        Err(CoordinatorError::Configuration(_))
    ));
}
