// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Inverted-file index with product-quantized residuals.
//!
//! # Lifecycle
//!
//! ```text
//! Untrained --train--> Trained --add--> Populated
//!     ^                   |
//!     +---- (re-train) ---+        re-train once populated: AlreadyPopulated
//! ```
//!
//! Training runs k-means to place `nlist` coarse centroids, then trains the
//! product quantizer on the residuals `x - centroid(x)`. Each added vector
//! lands in the inverted list of its nearest centroid (squared L2) and is
//! stored as `m` PQ codes of its residual.
//!
//! A query probes the `nprobe` centroids nearest to it and scores every
//! candidate as `<q, centroid> + <q, decoded residual>`, using one lookup
//! table per query.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_NPROBE;
use crate::distance::{inner_product, l2_squared, nearest_row};
use crate::error::{BridgeError, Result};
use crate::index::pq::ProductQuantizer;
use crate::kmeans::kmeans;
use crate::search::{Hit, TopK};
use crate::store::VectorStore;

/// IVF-PQ index state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfPqIndex {
    nlist: usize,
    nprobe: usize,
    /// `nlist * dim` coarse centroids; empty until trained.
    centroids: Vec<f32>,
    pq: ProductQuantizer,
    /// Slots per inverted list.
    lists: Vec<Vec<usize>>,
    /// `m` codes per slot, slot-major.
    codes: Vec<u8>,
    store: VectorStore,
}

impl IvfPqIndex {
    /// Creates an untrained index. Parameters must already be validated.
    pub fn new(dim: usize, nlist: usize, m: usize, nbits: usize) -> Self {
        Self {
            nlist,
            nprobe: DEFAULT_NPROBE,
            centroids: Vec::new(),
            pq: ProductQuantizer::new(dim, m, nbits),
            lists: Vec::new(),
            codes: Vec::new(),
            store: VectorStore::new(dim),
        }
    }

    /// Underlying vectors and ids.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Number of inverted lists.
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Lists probed per query.
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Sets the lists probed per query. Values above `nlist` are clamped at
    /// search time.
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe;
    }

    /// PQ sub-quantizer count.
    pub fn m(&self) -> usize {
        self.pq.m()
    }

    /// PQ bits per code.
    pub fn nbits(&self) -> usize {
        self.pq.nbits()
    }

    /// Returns true once centroids and codebooks exist.
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty() && self.pq.is_trained()
    }

    /// Sizes of every inverted list.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(Vec::len).collect()
    }

    fn centroid(&self, c: usize) -> &[f32] {
        let dim = self.store.dimension();
        &self.centroids[c * dim..(c + 1) * dim]
    }

    /// Trains the coarse quantizer and the product quantizer.
    ///
    /// Nothing is modified unless training succeeds.
    ///
    /// # Errors
    ///
    /// * `BridgeError::AlreadyPopulated` - If vectors have been added
    /// * `BridgeError::DimensionMismatch` - If `vectors` is not a whole number of rows
    /// * `BridgeError::InsufficientTrainingData` - If there are fewer rows than `nlist`
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        if !self.store.is_empty() {
            return Err(BridgeError::AlreadyPopulated(self.store.len()));
        }
        let n = self.store.rows_in(vectors)?;
        if n < self.nlist {
            return Err(BridgeError::InsufficientTrainingData {
                required: self.nlist,
                got: n,
            });
        }

        let dim = self.store.dimension();
        let centroids = kmeans(vectors, dim, self.nlist);

        let mut residuals = Vec::with_capacity(vectors.len());
        for row in vectors.chunks_exact(dim) {
            let c = nearest_row(row, &centroids, dim);
            let centroid = &centroids[c * dim..(c + 1) * dim];
            residuals.extend(row.iter().zip(centroid).map(|(x, y)| x - y));
        }

        let mut pq = self.pq.clone();
        pq.train(&residuals);

        self.centroids = centroids;
        self.pq = pq;
        self.lists = vec![Vec::new(); self.nlist];
        self.codes.clear();
        Ok(())
    }

    /// Assigns, encodes and stores a batch.
    ///
    /// # Errors
    ///
    /// * `BridgeError::NotTrained` - If [`IvfPqIndex::train`] has not succeeded
    /// * `BridgeError::DimensionMismatch` - If `vectors.len() != ids.len() * dim`
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        if !self.is_trained() {
            return Err(BridgeError::NotTrained);
        }
        self.store.check_batch(vectors, ids)?;

        let dim = self.store.dimension();
        let mut assigned = Vec::with_capacity(ids.len());
        let mut codes = Vec::with_capacity(ids.len() * self.pq.m());
        let mut residual = vec![0.0f32; dim];
        for row in vectors.chunks_exact(dim) {
            let c = nearest_row(row, &self.centroids, dim);
            for ((r, x), y) in residual.iter_mut().zip(row).zip(self.centroid(c)) {
                *r = x - y;
            }
            codes.extend(self.pq.encode(&residual));
            assigned.push(c);
        }

        let slots = self.store.append(vectors, ids)?;
        for (slot, c) in slots.zip(assigned) {
            self.lists[c].push(slot);
        }
        self.codes.extend(codes);
        Ok(())
    }

    /// Lists nearest to `query`, best first.
    fn probe(&self, query: &[f32]) -> Vec<usize> {
        let dim = self.store.dimension();
        let mut ranked: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(dim)
            .enumerate()
            .map(|(c, centroid)| (l2_squared(query, centroid), c))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.truncate(self.nprobe.min(self.nlist));
        ranked.into_iter().map(|(_, c)| c).collect()
    }

    /// Approximate top-k for one query. The index must be trained.
    pub fn search_one(&self, query: &[f32], k: usize) -> Vec<Hit> {
        let m = self.pq.m();
        let table = self.pq.inner_product_table(query);
        let mut top = TopK::new(k);

        for c in self.probe(query) {
            let base = inner_product(query, self.centroid(c));
            for &slot in &self.lists[c] {
                let score = base + self.pq.table_score(&table, &self.codes[slot * m..(slot + 1) * m]);
                top.push(score, slot, self.store.id(slot));
            }
        }
        top.into_hits()
    }

    /// Validates the derived structure after deserialization.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        self.pq.check_shape()?;
        let dim = self.store.dimension();
        let n = self.store.len();

        if self.nlist == 0 || self.nprobe == 0 {
            return Err("nlist and nprobe must be positive".to_string());
        }
        if !self.is_trained() {
            if !self.centroids.is_empty() || n > 0 || !self.codes.is_empty() {
                return Err("untrained index carries data".to_string());
            }
            return Ok(());
        }
        if self.centroids.len() != self.nlist * dim {
            return Err(format!(
                "{} centroid values for nlist={} dim={}",
                self.centroids.len(),
                self.nlist,
                dim
            ));
        }
        if self.lists.len() != self.nlist {
            return Err(format!("{} inverted lists, expected {}", self.lists.len(), self.nlist));
        }
        if self.codes.len() != n * self.pq.m() {
            return Err(format!("{} code bytes for {} vectors", self.codes.len(), n));
        }
        let ksub = self.pq.ksub();
        if self.codes.iter().any(|&c| c as usize >= ksub) {
            return Err("code out of codebook range".to_string());
        }

        let mut seen = vec![false; n];
        for slot in self.lists.iter().flatten() {
            match seen.get_mut(*slot) {
                Some(flag) if !*flag => *flag = true,
                _ => return Err(format!("slot {} listed twice or out of range", slot)),
            }
        }
        if seen.iter().any(|s| !s) {
            return Err("vector missing from every inverted list".to_string());
        }
        Ok(())
    }
}
