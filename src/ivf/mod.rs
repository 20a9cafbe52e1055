// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod core;

pub use self::core::{
    Centroid, ClusterId, IVFConfig, IVFError, IVFIndex, IVFState, InvertedList, TrainResult,
};
