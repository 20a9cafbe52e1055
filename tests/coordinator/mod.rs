// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

mod persistence;
mod scenarios;

use clinical_vector_store::core::types::{ChunkInput, Metadata};
use clinical_vector_store::{CoordinatorConfig, IndexConfig, IndexCoordinator, IndexKind};
use serde_json::json;

pub const DIM: usize = 8;

/// Unit axis `i` with a small deterministic tilt toward the next axis.
pub fn near_axis(i: usize, tilt: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v[(i + 1) % DIM] = tilt;
    v
}

pub fn config(kind: IndexKind) -> CoordinatorConfig {
    let mut index = IndexConfig::new(kind, DIM).with_seed(42);
    index.ivf.n_clusters = 4;
    index.ivf.n_probe = 4;
    CoordinatorConfig::new(index)
}

pub fn coordinator(kind: IndexKind) -> IndexCoordinator {
    IndexCoordinator::new(config(kind)).unwrap()
}

pub fn metadata(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

pub fn note(doc: &str, index: u64, vector: Vec<f32>, date: &str, note_type: &str) -> ChunkInput {
    ChunkInput::new(doc, index, format!("{} fragment {}", doc, index), vector)
        .with_metadata(metadata(json!({"date": date, "note_type": note_type})))
}

/// Documents A (2 chunks), B (2 chunks) and C (1 chunk). A and C lie near
/// axis 0, B near axis 1.
pub fn five_chunks() -> Vec<ChunkInput> {
    vec![
        note("A", 0, near_axis(0, 0.05), "2023-02-01", "progress_note"),
        note("A", 1, near_axis(0, 0.10), "2023-02-01", "progress_note"),
        note("B", 0, near_axis(1, 0.05), "2023-05-15", "discharge_summary"),
        note("B", 1, near_axis(1, 0.10), "2023-05-15", "discharge_summary"),
        note("C", 0, near_axis(0, 0.15), "2024-01-01", "radiology"),
    ]
}
