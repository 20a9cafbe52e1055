// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Vector arithmetic shared by the index engines and the coordinator.
//!
//! Every vector that reaches an engine is unit length, so the inner product
//! doubles as cosine similarity.

/// Tolerance used when checking that a vector is unit length.
pub const NORM_TOLERANCE: f32 = 1e-4;

pub fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn euclidean_distance_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns a unit-length copy of `v`, or `None` when `v` has no direction
/// (zero norm) or carries non-finite components.
pub fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

pub fn is_unit(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= NORM_TOLERANCE
}

/// Sorts `(position, score)` pairs by descending score; ties keep the lower
/// position first so results are deterministic.
pub fn sort_by_score_desc(results: &mut [(usize, f32)]) {
    results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
}
