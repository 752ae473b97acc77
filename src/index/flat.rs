// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Exact inner-product index.

use serde::{Deserialize, Serialize};

use crate::distance::inner_product;
use crate::error::Result;
use crate::search::{Hit, TopK};
use crate::store::VectorStore;

/// Brute-force index: every query is scored against every stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    store: VectorStore,
}

impl FlatIndex {
    /// Creates an empty index.
    pub fn new(dim: usize) -> Self {
        Self {
            store: VectorStore::new(dim),
        }
    }

    /// Builds an index over an existing store.
    pub fn from_store(store: VectorStore) -> Self {
        Self { store }
    }

    /// Underlying vectors and ids.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Appends vectors.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        self.store.append(vectors, ids)?;
        Ok(())
    }

    /// Exact top-k for one query.
    pub fn search_one(&self, query: &[f32], k: usize) -> Vec<Hit> {
        let mut top = TopK::new(k);
        for (slot, id, v) in self.store.iter() {
            top.push(inner_product(query, v), slot, id);
        }
        top.into_hits()
    }
}
