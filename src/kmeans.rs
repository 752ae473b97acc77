// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Deterministic Lloyd k-means over flat row-major buffers.
//!
//! Used for the IVF coarse quantizer and for every PQ sub-quantizer.
//! Seeding is strided (rows `0, step, 2*step, ...`) so training the same
//! data always yields the same centroids.

use crate::distance::nearest_row;

/// Lloyd iterations run after seeding.
pub const KMEANS_ITERATIONS: usize = 10;

/// Clusters `rows` (`n * dim` values) into `k` centroids.
///
/// Returns `k * dim` values. With `n <= k` the rows themselves become the
/// centroids and the remainder repeats the first row. Empty clusters keep
/// their previous centroid. An empty input yields zero centroids.
pub fn kmeans(rows: &[f32], dim: usize, k: usize) -> Vec<f32> {
    if dim == 0 || k == 0 {
        return Vec::new();
    }
    let n = rows.len() / dim;
    if n == 0 {
        return vec![0.0; k * dim];
    }

    if n <= k {
        let mut centroids = rows[..n * dim].to_vec();
        while centroids.len() < k * dim {
            centroids.extend_from_slice(&rows[..dim]);
        }
        return centroids;
    }

    let step = n / k;
    let mut centroids: Vec<f32> = Vec::with_capacity(k * dim);
    for i in 0..k {
        let start = i * step * dim;
        centroids.extend_from_slice(&rows[start..start + dim]);
    }

    let mut sums = vec![0.0f32; k * dim];
    let mut counts = vec![0usize; k];
    for _ in 0..KMEANS_ITERATIONS {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        for row in rows.chunks_exact(dim) {
            let a = nearest_row(row, &centroids, dim);
            counts[a] += 1;
            for (s, v) in sums[a * dim..(a + 1) * dim].iter_mut().zip(row) {
                *s += v;
            }
        }

        for (c, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue; // empty cluster keeps its centroid
            }
            let inv = 1.0 / count as f32;
            for (dst, s) in centroids[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&sums[c * dim..(c + 1) * dim])
            {
                *dst = s * inv;
            }
        }
    }

    centroids
}
