// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Product quantizer.
//!
//! A `dim`-length vector is split into `m` contiguous sub-vectors of
//! `dsub = dim / m` values. Each sub-vector is replaced by the index of its
//! nearest codeword in a per-subspace codebook of `ksub = 2^nbits` entries,
//! so a vector compresses to `m` bytes.
//!
//! Inner products against encoded vectors are computed asymmetrically: the
//! query stays exact and one lookup table of `m * ksub` partial products is
//! built per query.

use serde::{Deserialize, Serialize};

use crate::distance::{inner_product, nearest_row};
use crate::kmeans::kmeans;

/// Codebooks for `m` subspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dim: usize,
    m: usize,
    nbits: usize,
    /// `m * ksub * dsub` values; empty until trained.
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Creates an untrained quantizer. `m` must divide `dim`.
    pub fn new(dim: usize, m: usize, nbits: usize) -> Self {
        Self {
            dim,
            m,
            nbits,
            codebooks: Vec::new(),
        }
    }

    /// Number of sub-quantizers (bytes per code).
    pub fn m(&self) -> usize {
        self.m
    }

    /// Bits per sub-quantizer code.
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Sub-vector length.
    pub fn dsub(&self) -> usize {
        self.dim / self.m
    }

    /// Codewords per subspace.
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Returns true once codebooks exist.
    pub fn is_trained(&self) -> bool {
        !self.codebooks.is_empty()
    }

    fn codeword(&self, j: usize, c: usize) -> &[f32] {
        let dsub = self.dsub();
        let start = (j * self.ksub() + c) * dsub;
        &self.codebooks[start..start + dsub]
    }

    fn codebook(&self, j: usize) -> &[f32] {
        let len = self.ksub() * self.dsub();
        &self.codebooks[j * len..(j + 1) * len]
    }

    /// Learns one codebook per subspace from `rows` (`n * dim` values).
    pub fn train(&mut self, rows: &[f32]) {
        let dsub = self.dsub();
        let ksub = self.ksub();
        let n = rows.len() / self.dim;

        let mut codebooks = Vec::with_capacity(self.m * ksub * dsub);
        let mut sub_rows = Vec::with_capacity(n * dsub);
        for j in 0..self.m {
            sub_rows.clear();
            for row in rows.chunks_exact(self.dim) {
                sub_rows.extend_from_slice(&row[j * dsub..(j + 1) * dsub]);
            }
            codebooks.extend(kmeans(&sub_rows, dsub, ksub));
        }
        self.codebooks = codebooks;
    }

    /// Encodes one vector into `m` codes.
    pub fn encode(&self, v: &[f32]) -> Vec<u8> {
        let dsub = self.dsub();
        (0..self.m)
            .map(|j| nearest_row(&v[j * dsub..(j + 1) * dsub], self.codebook(j), dsub) as u8)
            .collect()
    }

    /// Reconstructs the approximation of an encoded vector.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        for (j, &c) in codes.iter().enumerate() {
            out.extend_from_slice(self.codeword(j, c as usize));
        }
        out
    }

    /// Partial inner products `table[j * ksub + c] = <query_j, codeword_jc>`.
    pub fn inner_product_table(&self, query: &[f32]) -> Vec<f32> {
        let dsub = self.dsub();
        let ksub = self.ksub();
        let mut table = Vec::with_capacity(self.m * ksub);
        for j in 0..self.m {
            let q = &query[j * dsub..(j + 1) * dsub];
            for c in 0..ksub {
                table.push(inner_product(q, self.codeword(j, c)));
            }
        }
        table
    }

    /// Approximate `<query, decode(codes)>` from a precomputed table.
    #[inline]
    pub fn table_score(&self, table: &[f32], codes: &[u8]) -> f32 {
        let ksub = self.ksub();
        codes
            .iter()
            .enumerate()
            .map(|(j, &c)| table[j * ksub + c as usize])
            .sum()
    }

    /// Checks that the stored codebooks have the declared shape.
    pub fn check_shape(&self) -> Result<(), String> {
        if self.m == 0 || self.dim % self.m != 0 || self.nbits == 0 || self.nbits > 8 {
            return Err(format!(
                "invalid quantizer shape dim={} m={} nbits={}",
                self.dim, self.m, self.nbits
            ));
        }
        let expected = self.m * self.ksub() * self.dsub();
        if !self.codebooks.is_empty() && self.codebooks.len() != expected {
            return Err(format!(
                "codebooks hold {} values, expected {}",
                self.codebooks.len(),
                expected
            ));
        }
        Ok(())
    }
}
