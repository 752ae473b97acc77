// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Vector arithmetic used by every index kind.
//!
//! Scores and distances follow two conventions:
//!
//! | Function | Range | Better |
//! |----------|-------|--------|
//! | [`inner_product`] | (-∞, ∞) | higher |
//! | [`l2_squared`] | [0, ∞) | lower |
//!
//! Inner product is the similarity exposed to callers. Squared L2 is only
//! used internally for coarse quantizer assignment and k-means.
//!
//! # Examples
//!
//! ```rust
//! use vecbridge::distance::{inner_product, l2_squared};
//!
//! let a = [1.0f32, 0.0, 0.0];
//! let b = [0.0f32, 1.0, 0.0];
//!
//! assert_eq!(inner_product(&a, &b), 0.0);
//! assert!((l2_squared(&a, &b) - 2.0).abs() < 1e-6);
//! ```

/// Dot product `Σ(a_i * b_i)`.
///
/// Debug builds panic if the slices have different lengths.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    let mut dot = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
    }
    dot
}

/// Squared Euclidean distance `Σ(a_i - b_i)²`.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x - y;
        sum += diff * diff;
    }
    sum
}

/// Scales `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = inner_product(v, v).sqrt();
    if norm < 1e-10 {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Normalizes every `dim`-sized row of a flat buffer.
pub fn normalize_rows(data: &mut [f32], dim: usize) {
    if dim == 0 {
        return;
    }
    for row in data.chunks_exact_mut(dim) {
        normalize(row);
    }
}

/// Index of the row in `rows` closest to `v` by squared L2.
///
/// Returns 0 for an empty buffer.
pub fn nearest_row(v: &[f32], rows: &[f32], dim: usize) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, row) in rows.chunks_exact(dim).enumerate() {
        let d = l2_squared(v, row);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}
