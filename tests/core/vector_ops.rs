// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use approx::assert_relative_eq;
use clinical_vector_store::core::vector_ops::{dot_product_scalar, is_unit, l2_norm, normalized};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_normalized_vectors_are_unit(
        v in prop::collection::vec(-1000.0f32..1000.0, 1..64)
    ) {
        prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
        let unit = normalized(&v).unwrap();
        prop_assert!(is_unit(&unit));
    }

    #[test]
    fn prop_self_similarity_is_one(
        v in prop::collection::vec(-10.0f32..10.0, 2..32),
        scale in 0.01f32..100.0
    ) {
        prop_assume!(v.iter().any(|x| x.abs() > 1e-2));
        let scaled: Vec<f32> = v.iter().map(|x| x * scale).collect();
        let a = normalized(&v).unwrap();
        let b = normalized(&scaled).unwrap();
        prop_assert!((dot_product_scalar(&a, &b) - 1.0).abs() < 1e-3);
    }
}

#[test]
fn test_degenerate_vectors_have_no_direction() {
    assert!(normalized(&[0.0, 0.0, 0.0]).is_none());
    assert!(normalized(&[1.0, f32::NAN]).is_none());
    assert!(normalized(&[f32::INFINITY, 0.0]).is_none());
}

#[test]
fn test_l2_norm() {
    assert_relative_eq!(l2_norm(&[3.0, 4.0]), 5.0);
}
