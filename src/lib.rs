// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod api;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod embedding;
pub mod hnsw;
pub mod index;
pub mod ivf;
pub mod retriever;

pub use coordinator::{CoordinatorConfig, CoordinatorError, IndexCoordinator};
pub use index::{IndexConfig, IndexKind, VectorIndex};
pub use retriever::{RetrievalError, Retriever};
