// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::Position;
use crate::core::vector_ops::dot_product_scalar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HNSWError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Non-sequential insert: expected position {expected}, got {actual}")]
    NonSequentialPosition { expected: Position, actual: Position },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt graph: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HNSWConfig {
    pub max_connections: usize,
    pub max_connections_layer_0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: Option<u64>,
}

impl Default for HNSWConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_connections_layer_0: 64,
            ef_construction: 40,
            ef_search: 16,
            seed: None,
        }
    }
}

impl HNSWConfig {
    pub fn with_connectivity(m: usize) -> Self {
        Self {
            max_connections: m,
            max_connections_layer_0: m * 2,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max_connections > 1
            && self.max_connections_layer_0 >= self.max_connections
            && self.ef_construction > 0
            && self.ef_search > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HNSWNode {
    vector: Vec<f32>,
    level: usize,
    neighbors: Vec<Vec<Position>>, // neighbors[i] = neighbors at layer i
}

impl HNSWNode {
    pub fn new(vector: Vec<f32>, level: usize) -> Self {
        Self {
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
        }
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn neighbors(&self, layer: usize) -> &[Position] {
        self.neighbors.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone, Copy, PartialEq)]
struct SearchCandidate {
    position: Position,
    score: f32,
}

impl Eq for SearchCandidate {}

impl PartialOrd for SearchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchCandidate {
    // Higher score first; lower position wins ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Serializable form of an [`HNSWIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HNSWState {
    pub config: HNSWConfig,
    pub dimension: usize,
    pub entry_point: Option<Position>,
    pub nodes: Vec<HNSWNode>,
}

/// Navigable small-world graph over unit vectors, scored by inner product.
///
/// Nodes are stored in append order, so a node's slot is its position.
pub struct HNSWIndex {
    config: HNSWConfig,
    dimension: usize,
    nodes: Vec<HNSWNode>,
    entry_point: Option<Position>,
    rng: StdRng,
}

impl HNSWIndex {
    pub fn new(config: HNSWConfig, dimension: usize) -> Result<Self, HNSWError> {
        if !config.is_valid() {
            return Err(HNSWError::InvalidConfig(format!("{:?}", config)));
        }
        if dimension == 0 {
            return Err(HNSWError::InvalidConfig("dimension must be positive".to_string()));
        }

        let rng = seeded_rng(config.seed);
        Ok(Self {
            config,
            dimension,
            nodes: Vec::new(),
            entry_point: None,
            rng,
        })
    }

    pub fn config(&self) -> &HNSWConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn entry_point(&self) -> Option<Position> {
        self.entry_point
    }

    pub fn get_node(&self, position: Position) -> Option<&HNSWNode> {
        self.nodes.get(position)
    }

    pub fn ef_search(&self) -> usize {
        self.config.ef_search
    }

    /// Query breadth is session state like the IVF probe count.
    pub fn set_ef_search(&mut self, ef: usize) {
        self.config.ef_search = ef.max(1);
    }

    pub fn assign_level(&mut self) -> usize {
        // Geometric level distribution with ratio 1/M between layers.
        let p = 1.0 / self.config.max_connections as f64;
        let mut level = 0;
        while self.rng.gen::<f64>() < p && level < 16 {
            level += 1;
        }
        level
    }

    pub fn insert(&mut self, position: Position, vector: Vec<f32>) -> Result<(), HNSWError> {
        if position != self.nodes.len() {
            return Err(HNSWError::NonSequentialPosition {
                expected: self.nodes.len(),
                actual: position,
            });
        }
        if vector.len() != self.dimension {
            return Err(HNSWError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let level = self.assign_level();
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => {
                self.nodes.push(HNSWNode::new(vector, level));
                self.entry_point = Some(position);
                return Ok(());
            }
        };

        let top_level = self.nodes[entry_point].level;
        let mut entry_points = vec![entry_point];

        // Greedy descent through the layers above the new node.
        for lc in (level + 1..=top_level).rev() {
            let nearest = self.search_layer(&vector, &entry_points, 1, lc);
            if !nearest.is_empty() {
                entry_points = vec![nearest[0].position];
            }
        }

        let mut node = HNSWNode::new(vector, level);
        for lc in (0..=level.min(top_level)).rev() {
            let candidates =
                self.search_layer(&node.vector, &entry_points, self.config.ef_construction, lc);
            let m = self.max_connections(lc);
            node.neighbors[lc] = candidates.iter().take(m).map(|c| c.position).collect();
            entry_points = candidates.iter().map(|c| c.position).collect();
        }

        self.nodes.push(node);

        for lc in 0..=level.min(top_level) {
            let neighbors = self.nodes[position].neighbors[lc].clone();
            for neighbor in neighbors {
                self.link(neighbor, position, lc);
            }
        }

        if level > top_level {
            self.entry_point = Some(position);
        }

        Ok(())
    }

    /// Adds `target` to `from`'s neighbor list at `layer`, pruning to the
    /// closest `M` when the list overflows.
    fn link(&mut self, from: Position, target: Position, layer: usize) {
        let max_conn = self.max_connections(layer);
        let base = &self.nodes[from];
        if base.level < layer {
            return;
        }

        let mut list = base.neighbors[layer].clone();
        if list.contains(&target) {
            return;
        }
        list.push(target);

        if list.len() > max_conn {
            let mut scored: Vec<SearchCandidate> = list
                .iter()
                .map(|&p| SearchCandidate {
                    position: p,
                    score: dot_product_scalar(base.vector(), self.nodes[p].vector()),
                })
                .collect();
            scored.sort_by(|a, b| b.cmp(a));
            scored.truncate(max_conn);
            list = scored.into_iter().map(|c| c.position).collect();
        }

        self.nodes[from].neighbors[layer] = list;
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.max_connections_layer_0
        } else {
            self.config.max_connections
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Position, f32)>, HNSWError> {
        self.search_with_ef(query, k, self.config.ef_search)
    }

    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(Position, f32)>, HNSWError> {
        if query.len() != self.dimension {
            return Err(HNSWError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let entry_point = match self.entry_point {
            Some(ep) if k > 0 => ep,
            _ => return Ok(Vec::new()),
        };

        let mut entry_points = vec![entry_point];
        for lc in (1..=self.nodes[entry_point].level).rev() {
            let nearest = self.search_layer(query, &entry_points, 1, lc);
            if !nearest.is_empty() {
                entry_points = vec![nearest[0].position];
            }
        }

        let mut results = self.search_layer(query, &entry_points, ef.max(k), 0);
        results.truncate(k);
        Ok(results.into_iter().map(|c| (c.position, c.score)).collect())
    }

    /// Best-first search restricted to `layer`. Returns up to `ef`
    /// candidates ordered by descending score.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[Position],
        ef: usize,
        layer: usize,
    ) -> Vec<SearchCandidate> {
        let mut visited = vec![false; self.nodes.len()];
        let mut candidates = BinaryHeap::new();
        let mut nearest: BinaryHeap<Reverse<SearchCandidate>> = BinaryHeap::new();

        for &ep in entry_points {
            if ep >= self.nodes.len() || visited[ep] {
                continue;
            }
            visited[ep] = true;
            let candidate = SearchCandidate {
                position: ep,
                score: dot_product_scalar(query, self.nodes[ep].vector()),
            };
            candidates.push(candidate);
            nearest.push(Reverse(candidate));
            if nearest.len() > ef {
                nearest.pop();
            }
        }

        while let Some(current) = candidates.pop() {
            let worst = match nearest.peek() {
                Some(Reverse(worst)) => worst.score,
                None => break,
            };
            if current.score < worst && nearest.len() >= ef {
                break;
            }

            for &neighbor in self.nodes[current.position].neighbors(layer) {
                if visited[neighbor] {
                    continue;
                }
                visited[neighbor] = true;

                let score = dot_product_scalar(query, self.nodes[neighbor].vector());
                let worst = nearest.peek().map(|Reverse(c)| c.score).unwrap_or(f32::NEG_INFINITY);
                if nearest.len() < ef || score > worst {
                    let candidate = SearchCandidate {
                        position: neighbor,
                        score,
                    };
                    candidates.push(candidate);
                    nearest.push(Reverse(candidate));
                    if nearest.len() > ef {
                        nearest.pop();
                    }
                }
            }
        }

        let mut result: Vec<SearchCandidate> = nearest.into_iter().map(|Reverse(c)| c).collect();
        result.sort_by(|a, b| b.cmp(a));
        result
    }

    /// Number of nodes present at each layer.
    pub fn get_level_distribution(&self) -> Vec<usize> {
        let max_level = self.nodes.iter().map(HNSWNode::level).max().unwrap_or(0);
        let mut distribution = vec![0; max_level + 1];
        for node in &self.nodes {
            for count in distribution.iter_mut().take(node.level + 1) {
                *count += 1;
            }
        }
        distribution
    }

    pub fn to_state(&self) -> HNSWState {
        HNSWState {
            config: self.config.clone(),
            dimension: self.dimension,
            entry_point: self.entry_point,
            nodes: self.nodes.clone(),
        }
    }

    pub fn from_state(state: HNSWState) -> Result<Self, HNSWError> {
        let count = state.nodes.len();
        match state.entry_point {
            Some(ep) if ep >= count => {
                return Err(HNSWError::Corrupt(format!(
                    "entry point {} outside {} nodes",
                    ep, count
                )))
            }
            None if count > 0 => {
                return Err(HNSWError::Corrupt("missing entry point".to_string()));
            }
            _ => {}
        }

        for (position, node) in state.nodes.iter().enumerate() {
            if node.vector.len() != state.dimension {
                return Err(HNSWError::DimensionMismatch {
                    expected: state.dimension,
                    actual: node.vector.len(),
                });
            }
            if node.neighbors.len() != node.level + 1
                || node.neighbors.iter().flatten().any(|&n| n >= count)
            {
                return Err(HNSWError::Corrupt(format!(
                    "node {} has invalid adjacency",
                    position
                )));
            }
        }

        Ok(Self {
            rng: seeded_rng(state.config.seed),
            config: state.config,
            dimension: state.dimension,
            nodes: state.nodes,
            entry_point: state.entry_point,
        })
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
