// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod core;
pub mod persistence;

pub use self::core::{
    CoordinatorConfig, CoordinatorError, CoordinatorStats, IndexCoordinator,
    DEFAULT_OVER_FETCH_MULTIPLIER,
};
pub use self::persistence::{write_atomic, ArtifactPaths, MetadataArtifact};
