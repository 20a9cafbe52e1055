// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::Position;
use crate::core::vector_ops::dot_product_scalar;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Brute-force inner-product index. Exact, no training, O(n) per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Stores `vector` at the next position and returns that position.
    /// Callers check the dimension.
    pub fn push(&mut self, vector: Vec<f32>) -> Position {
        self.vectors.push(vector);
        self.vectors.len() - 1
    }

    pub fn get(&self, position: Position) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    pub fn search(&self, query: &[f32], top_n: usize) -> Vec<(Position, f32)> {
        if top_n == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(Position, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot_product_scalar(query, vector)))
            .collect();

        if scored.len() > top_n {
            scored.select_nth_unstable_by(top_n - 1, by_score_desc);
            scored.truncate(top_n);
        }
        scored.sort_by(by_score_desc);
        scored
    }
}

fn by_score_desc(a: &(Position, f32), b: &(Position, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}
