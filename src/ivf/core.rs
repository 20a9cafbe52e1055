// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::Position;
use crate::core::vector_ops::{
    dot_product_scalar, euclidean_distance_scalar, normalized, sort_by_score_desc,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IVFError {
    #[error("Index not trained. Call train() before inserting or searching.")]
    NotTrained,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Insufficient training data: got {got}, need at least {need}")]
    InsufficientTrainingData { got: usize, need: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IVFConfig {
    pub n_clusters: usize,
    pub n_probe: usize,
    pub max_iterations: usize,
    pub seed: Option<u64>,
}

impl Default for IVFConfig {
    fn default() -> Self {
        Self {
            n_clusters: 100,
            n_probe: 10,
            max_iterations: 25,
            seed: None,
        }
    }
}

impl IVFConfig {
    pub fn is_valid(&self) -> bool {
        self.n_clusters > 0
            && self.n_probe > 0
            && self.n_probe <= self.n_clusters
            && self.max_iterations > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    id: ClusterId,
    vector: Vec<f32>,
}

impl Centroid {
    pub fn new(id: ClusterId, vector: Vec<f32>) -> Self {
        Self { id, vector }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn update(&mut self, new_vector: Vec<f32>) {
        self.vector = new_vector;
    }
}

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub iterations: usize,
    pub converged: bool,
    pub n_clusters: usize,
    pub initial_error: f32,
    pub final_error: f32,
}

/// Vectors assigned to one centroid, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedList {
    pub positions: Vec<Position>,
    pub vectors: Vec<Vec<f32>>,
}

impl InvertedList {
    pub fn push(&mut self, position: Position, vector: Vec<f32>) {
        self.positions.push(position);
        self.vectors.push(vector);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Position, &[f32])> {
        self.positions
            .iter()
            .copied()
            .zip(self.vectors.iter().map(Vec::as_slice))
    }
}

/// Serializable form of an [`IVFIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IVFState {
    pub config: IVFConfig,
    pub dimension: usize,
    pub trained: bool,
    pub centroids: Vec<Centroid>,
    pub inverted_lists: Vec<InvertedList>,
}

/// Inverted-file index over unit vectors, scored by inner product.
///
/// Training runs spherical k-means over a sample; each appended vector joins
/// the list of its highest-scoring centroid and queries scan the `n_probe`
/// best lists.
pub struct IVFIndex {
    pub(crate) config: IVFConfig,
    pub(crate) dimension: usize,
    pub(crate) centroids: Vec<Centroid>,
    pub(crate) inverted_lists: Vec<InvertedList>,
    pub(crate) trained: bool,
    pub(crate) rng: StdRng,
    pub(crate) total_vectors: usize,
}

impl IVFIndex {
    pub fn new(config: IVFConfig, dimension: usize) -> Result<Self, IVFError> {
        if !config.is_valid() {
            return Err(IVFError::InvalidConfig(format!(
                "n_clusters={} n_probe={} max_iterations={}",
                config.n_clusters, config.n_probe, config.max_iterations
            )));
        }
        if dimension == 0 {
            return Err(IVFError::InvalidConfig("dimension must be positive".to_string()));
        }

        let rng = seeded_rng(config.seed);
        Ok(Self {
            config,
            dimension,
            centroids: Vec::new(),
            inverted_lists: Vec::new(),
            trained: false,
            rng,
            total_vectors: 0,
        })
    }

    pub fn config(&self) -> &IVFConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn total_vectors(&self) -> usize {
        self.total_vectors
    }

    pub fn n_probe(&self) -> usize {
        self.config.n_probe
    }

    /// Probe count is query-time state: it is not part of the trained
    /// structure and is clamped to the number of lists.
    pub fn set_n_probe(&mut self, n_probe: usize) -> Result<(), IVFError> {
        if n_probe == 0 {
            return Err(IVFError::InvalidConfig("n_probe must be positive".to_string()));
        }
        self.config.n_probe = n_probe.min(self.config.n_clusters);
        Ok(())
    }

    pub fn train(&mut self, training_data: &[Vec<f32>]) -> Result<TrainResult, IVFError> {
        if training_data.is_empty() {
            return Err(IVFError::InsufficientTrainingData {
                got: 0,
                need: self.config.n_clusters,
            });
        }

        for vector in training_data {
            if vector.len() != self.dimension {
                return Err(IVFError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        if training_data.len() < self.config.n_clusters {
            warn!(
                requested = self.config.n_clusters,
                samples = training_data.len(),
                "Fewer training samples than inverted lists; reducing list count"
            );
            self.config.n_clusters = training_data.len();
            self.config.n_probe = self.config.n_probe.min(self.config.n_clusters);
        }

        self.centroids = self.initialize_centroids(training_data);

        let mut assignments = vec![ClusterId(0); training_data.len()];
        let initial_error = self.compute_error(training_data);
        let mut prev_error = initial_error;
        let mut converged = false;
        let mut iterations = 0;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let mut changed = false;
            for (i, vector) in training_data.iter().enumerate() {
                let nearest = self.find_nearest_centroid(vector);
                if nearest != assignments[i] {
                    changed = true;
                    assignments[i] = nearest;
                }
            }

            self.update_centroids(training_data, &assignments);

            let current_error = self.compute_error(training_data);
            let error_change = if prev_error > 0.0 {
                (prev_error - current_error).abs() / prev_error
            } else {
                0.0
            };

            if (!changed && iter > 0) || error_change < 1e-4 {
                converged = true;
                break;
            }
            prev_error = current_error;
        }

        let final_error = self.compute_error(training_data);

        self.inverted_lists = vec![InvertedList::default(); self.centroids.len()];
        self.trained = true;

        debug!(
            iterations,
            converged,
            n_clusters = self.centroids.len(),
            "IVF training complete"
        );

        Ok(TrainResult {
            iterations,
            converged,
            n_clusters: self.centroids.len(),
            initial_error,
            final_error,
        })
    }

    fn initialize_centroids(&mut self, data: &[Vec<f32>]) -> Vec<Centroid> {
        let mut centroids = Vec::with_capacity(self.config.n_clusters);

        // k-means++: first centroid uniformly, the rest proportional to
        // squared distance from the nearest chosen centroid.
        let first_idx = self.rng.gen_range(0..data.len());
        centroids.push(Centroid::new(ClusterId(0), data[first_idx].clone()));

        for i in 1..self.config.n_clusters {
            let distances: Vec<f32> = data
                .iter()
                .map(|point| {
                    centroids
                        .iter()
                        .map(|c| euclidean_distance_scalar(point, c.vector()))
                        .fold(f32::INFINITY, f32::min)
                })
                .collect();

            let total: f32 = distances.iter().map(|d| d * d).sum();
            let chosen = if total > 0.0 {
                let threshold = self.rng.gen::<f32>() * total;
                let mut cumulative = 0.0;
                distances
                    .iter()
                    .position(|d| {
                        cumulative += d * d;
                        cumulative >= threshold
                    })
                    .unwrap_or(data.len() - 1)
            } else {
                // All samples coincide with chosen centroids.
                i % data.len()
            };

            centroids.push(Centroid::new(ClusterId(i), data[chosen].clone()));
        }

        centroids
    }

    pub(crate) fn find_nearest_centroid(&self, vector: &[f32]) -> ClusterId {
        let mut best_id = ClusterId(0);
        let mut best_score = f32::NEG_INFINITY;

        for centroid in &self.centroids {
            let score = dot_product_scalar(vector, centroid.vector());
            if score > best_score {
                best_score = score;
                best_id = centroid.id();
            }
        }

        best_id
    }

    fn update_centroids(&mut self, data: &[Vec<f32>], assignments: &[ClusterId]) {
        let mut sums = vec![vec![0.0f32; self.dimension]; self.centroids.len()];
        let mut counts = vec![0usize; self.centroids.len()];

        for (vector, cluster_id) in data.iter().zip(assignments) {
            for (s, v) in sums[cluster_id.0].iter_mut().zip(vector) {
                *s += v;
            }
            counts[cluster_id.0] += 1;
        }

        for centroid in &mut self.centroids {
            let idx = centroid.id().0;
            if counts[idx] == 0 {
                continue;
            }
            // Spherical k-means: keep centroids on the unit sphere.
            if let Some(unit) = normalized(&sums[idx]) {
                centroid.update(unit);
            }
        }
    }

    fn compute_error(&self, data: &[Vec<f32>]) -> f32 {
        let total: f32 = data
            .iter()
            .map(|vector| {
                let nearest = self.find_nearest_centroid(vector);
                1.0 - dot_product_scalar(vector, self.centroids[nearest.0].vector())
            })
            .sum();
        total / data.len() as f32
    }

    pub fn insert(&mut self, position: Position, vector: Vec<f32>) -> Result<(), IVFError> {
        if !self.trained {
            return Err(IVFError::NotTrained);
        }
        if vector.len() != self.dimension {
            return Err(IVFError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let cluster_id = self.find_nearest_centroid(&vector);
        self.inverted_lists[cluster_id.0].push(position, vector);
        self.total_vectors += 1;

        Ok(())
    }


    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Position, f32)>, IVFError> {
        self.search_with_probe(query, k, self.config.n_probe)
    }

    pub fn search_with_probe(
        &self,
        query: &[f32],
        k: usize,
        n_probe: usize,
    ) -> Result<Vec<(Position, f32)>, IVFError> {
        if query.len() != self.dimension {
            return Err(IVFError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if !self.trained || self.total_vectors == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut cluster_scores: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .map(|centroid| (centroid.id().0, dot_product_scalar(query, centroid.vector())))
            .collect();
        sort_by_score_desc(&mut cluster_scores);
        cluster_scores.truncate(n_probe.max(1));

        let mut results: Vec<(Position, f32)> = cluster_scores
            .iter()
            .flat_map(|(cluster, _)| self.inverted_lists[*cluster].iter())
            .map(|(position, vector)| (position, dot_product_scalar(query, vector)))
            .collect();

        sort_by_score_desc(&mut results);
        results.truncate(k);

        Ok(results)
    }

    pub fn to_state(&self) -> IVFState {
        IVFState {
            config: self.config.clone(),
            dimension: self.dimension,
            trained: self.trained,
            centroids: self.centroids.clone(),
            inverted_lists: self.inverted_lists.clone(),
        }
    }

    pub fn from_state(state: IVFState) -> Result<Self, IVFError> {
        if state.trained && state.centroids.len() != state.inverted_lists.len() {
            return Err(IVFError::InvalidConfig(format!(
                "{} centroids but {} inverted lists",
                state.centroids.len(),
                state.inverted_lists.len()
            )));
        }

        let total_vectors = state.inverted_lists.iter().map(InvertedList::len).sum();
        Ok(Self {
            rng: seeded_rng(state.config.seed),
            config: state.config,
            dimension: state.dimension,
            centroids: state.centroids,
            inverted_lists: state.inverted_lists,
            trained: state.trained,
            total_vectors,
        })
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
