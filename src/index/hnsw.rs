// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Hierarchical Navigable Small World graph over inner-product similarity.
//!
//! # Algorithm Overview
//!
//! - Every node lives on layer 0; each higher layer holds an exponentially
//!   smaller subset, levels drawn as `floor(-ln(U) * ml)` with `ml = 1/ln(M)`
//! - Layer 0 keeps at most `2*M` links per node, upper layers at most `M`
//! - Search greedily descends from the entry point on the top layer, then
//!   runs a best-first search with `max(efSearch, k)` candidates on layer 0
//!
//! Internally the graph works on distances `-<a, b>` so that smaller is
//! closer; results are reported as inner-product scores.
//!
//! The level generator is a xorshift with a fixed seed whose state is
//! persisted, so building the same data in the same order always produces
//! the same graph.
//!
//! # References
//!
//! - Malkov, Y. A., & Yashunin, D. A. (2018). Efficient and robust approximate
//!   nearest neighbor search using Hierarchical Navigable Small World graphs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH};
use crate::distance::inner_product;
use crate::error::Result;
use crate::search::{Hit, TopK};
use crate::store::VectorStore;

/// Highest level a node can be assigned.
const MAX_LEVEL: usize = 32;

/// Initial xorshift state.
const RNG_SEED: u64 = 0x2545_F491_4F6C_DD1D;

// =============================================================================
// Graph Node
// =============================================================================

/// Adjacency of one stored vector. Node id equals the vector's store slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HnswNode {
    /// Neighbors per level: `level -> [(node_id, distance)]`.
    pub neighbors: Vec<Vec<(usize, f32)>>,
}

impl HnswNode {
    fn new(level: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); level + 1],
        }
    }

    /// Top level this node exists on.
    pub fn level(&self) -> usize {
        self.neighbors.len().saturating_sub(1)
    }
}

// =============================================================================
// Heap Entries
// =============================================================================

/// Closest-first ordering for the candidate queue.
struct MinHeapEntry(f32, usize);

impl PartialEq for MinHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MinHeapEntry {}

impl PartialOrd for MinHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.total_cmp(&self.0).then_with(|| other.1.cmp(&self.1))
    }
}

/// Farthest-first ordering for the bounded result set.
struct MaxHeapEntry(f32, usize);

impl PartialEq for MaxHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MaxHeapEntry {}

impl PartialOrd for MaxHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

// =============================================================================
// HNSW Index
// =============================================================================

/// HNSW index state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    nodes: Vec<HnswNode>,
    entry_point: Option<usize>,
    max_level: usize,
    rng_state: u64,
    store: VectorStore,
}

impl HnswIndex {
    /// Creates an empty graph with degree `m`.
    pub fn new(dim: usize, m: usize) -> Self {
        Self {
            m,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng_state: RNG_SEED,
            store: VectorStore::new(dim),
        }
    }

    /// Underlying vectors and ids.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Graph degree.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Build-time candidate list size.
    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    /// Query-time candidate list size.
    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    /// Sets the build-time candidate list size.
    pub fn set_ef_construction(&mut self, ef: usize) {
        self.ef_construction = ef;
    }

    /// Sets the query-time candidate list size.
    pub fn set_ef_search(&mut self, ef: usize) {
        self.ef_search = ef;
    }

    /// Current entry point.
    pub fn entry_point(&self) -> Option<usize> {
        self.entry_point
    }

    /// Top level of the graph.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Node adjacency by id.
    pub fn node(&self, id: usize) -> Option<&HnswNode> {
        self.nodes.get(id)
    }

    fn max_links(&self, level: usize) -> usize {
        if level == 0 {
            self.m.saturating_mul(2)
        } else {
            self.m
        }
    }

    /// Draws a level using `floor(-ln(uniform(0,1)) * ml)`.
    fn random_level(&mut self) -> usize {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;

        let uniform = ((self.rng_state as f64) / (u64::MAX as f64)).max(f64::MIN_POSITIVE);
        let ml = 1.0 / (self.m.max(2) as f64).ln();
        let level = (-uniform.ln() * ml).floor() as usize;
        level.min(MAX_LEVEL)
    }

    #[inline]
    fn distance(&self, query: &[f32], node_id: usize) -> f32 {
        -inner_product(query, self.store.vector(node_id))
    }

    /// Best-first search within one layer, returning `(node_id, distance)`
    /// closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_point: usize,
        ef: usize,
        level: usize,
    ) -> Vec<(usize, f32)> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut results = BinaryHeap::new();

        let ep_dist = self.distance(query, entry_point);
        visited.insert(entry_point);
        candidates.push(MinHeapEntry(ep_dist, entry_point));
        results.push(MaxHeapEntry(ep_dist, entry_point));

        while let Some(MinHeapEntry(c_dist, c_id)) = candidates.pop() {
            let worst_dist = results.peek().map(|e| e.0).unwrap_or(f32::MAX);
            if c_dist > worst_dist {
                break;
            }

            let Some(links) = self.nodes[c_id].neighbors.get(level) else {
                continue;
            };
            for &(neighbor_id, _) in links {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let dist = self.distance(query, neighbor_id);
                let worst_dist = results.peek().map(|e| e.0).unwrap_or(f32::MAX);
                if results.len() < ef || dist < worst_dist {
                    candidates.push(MinHeapEntry(dist, neighbor_id));
                    results.push(MaxHeapEntry(dist, neighbor_id));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<(usize, f32)> = results
            .into_iter()
            .map(|MaxHeapEntry(d, id)| (id, d))
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }

    /// Greedy descent through the layers above `target_level`.
    fn descend(&self, query: &[f32], mut ep: usize, target_level: usize) -> usize {
        for lc in ((target_level + 1)..=self.max_level).rev() {
            if let Some(&(closest, _)) = self.search_layer(query, ep, 1, lc).first() {
                ep = closest;
            }
        }
        ep
    }

    /// Inserts the node stored at `node_id`.
    fn insert_node(&mut self, node_id: usize) {
        let level = self.random_level();
        self.nodes.push(HnswNode::new(level));

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node_id);
            self.max_level = level;
            return;
        };

        let vector = self.store.vector(node_id).to_vec();
        let current_max_level = self.max_level;
        let mut ep = self.descend(&vector, entry, level);

        for l in (0..=level.min(current_max_level)).rev() {
            let candidates = self.search_layer(&vector, ep, self.ef_construction.max(self.m), l);
            let neighbors: Vec<(usize, f32)> = candidates.into_iter().take(self.m).collect();

            if let Some(&(closest, _)) = neighbors.first() {
                ep = closest;
            }

            self.nodes[node_id].neighbors[l] = neighbors.clone();

            let cap = self.max_links(l);
            for (neighbor_id, dist) in neighbors {
                let Some(links) = self.nodes[neighbor_id].neighbors.get_mut(l) else {
                    continue;
                };
                links.push((node_id, dist));
                if links.len() > cap {
                    links.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                    links.truncate(cap);
                }
            }
        }

        if level > current_max_level {
            self.max_level = level;
            self.entry_point = Some(node_id);
        }
    }

    /// Stores a batch and links every new node into the graph.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        let slots = self.store.append(vectors, ids)?;
        for slot in slots {
            self.insert_node(slot);
        }
        Ok(())
    }

    /// Approximate top-k for one query.
    pub fn search_one(&self, query: &[f32], k: usize) -> Vec<Hit> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };

        let ep = self.descend(query, entry, 0);
        let ef = self.ef_search.max(k);

        let mut top = TopK::new(k);
        for (node_id, dist) in self.search_layer(query, ep, ef, 0) {
            top.push(-dist, node_id, self.store.id(node_id));
        }
        top.into_hits()
    }

    /// Validates the graph after deserialization.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let n = self.store.len();
        if self.m == 0 || self.ef_construction == 0 || self.ef_search == 0 {
            return Err("graph parameters must be positive".to_string());
        }
        if self.nodes.len() != n {
            return Err(format!("{} graph nodes for {} vectors", self.nodes.len(), n));
        }
        match self.entry_point {
            None if n > 0 => return Err("populated graph without entry point".to_string()),
            Some(ep) if ep >= n => return Err(format!("entry point {} out of range", ep)),
            Some(ep) if self.nodes[ep].level() != self.max_level => {
                return Err("entry point is not on the top level".to_string())
            }
            _ => {}
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if node.neighbors.is_empty() || node.level() > self.max_level {
                return Err(format!("node {} has an invalid level", id));
            }
            for (l, links) in node.neighbors.iter().enumerate() {
                if links.len() > self.max_links(l) {
                    return Err(format!("node {} exceeds the degree cap on level {}", id, l));
                }
                if links.iter().any(|&(nb, _)| nb >= n) {
                    return Err(format!("node {} links outside the graph", id));
                }
            }
        }
        if self.rng_state == 0 {
            return Err("level generator state is zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, dim: usize) -> Vec<f32> {
        (0..n * dim)
            .map(|i| (((i * 2654435761) % 1000) as f32 / 1000.0) - 0.5)
            .collect()
    }

    #[test]
    fn test_min_heap_entry_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(MinHeapEntry(0.5, 0));
        heap.push(MinHeapEntry(0.1, 1));
        heap.push(MinHeapEntry(0.9, 2));
        assert_eq!(heap.pop().map(|e| e.1), Some(1));
    }

    #[test]
    fn test_max_heap_entry_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(MaxHeapEntry(0.5, 0));
        heap.push(MaxHeapEntry(0.1, 1));
        heap.push(MaxHeapEntry(0.9, 2));
        assert_eq!(heap.pop().map(|e| e.1), Some(2));
    }

    #[test]
    fn test_random_level_distribution() {
        let mut index = HnswIndex::new(4, 16);
        let levels: Vec<usize> = (0..1000).map(|_| index.random_level()).collect();
        let level0 = levels.iter().filter(|&&l| l == 0).count();
        assert!(level0 > 800, "most nodes belong on level 0, got {}", level0);
        assert!(levels.iter().all(|&l| l <= MAX_LEVEL));
    }

    #[test]
    fn test_single_node() {
        let mut index = HnswIndex::new(2, 4);
        index.add(&[0.6, 0.8], &[42]).unwrap();
        let hits = index.search_one(&[0.6, 0.8], 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 42);
    }

    #[test]
    fn test_graph_invariants_after_build() {
        let dim = 8;
        let n = 300;
        let mut index = HnswIndex::new(dim, 4);
        let ids: Vec<i64> = (0..n as i64).collect();
        index.add(&grid(n, dim), &ids).unwrap();

        assert!(index.check_consistency().is_ok());
        let ep = index.entry_point().unwrap();
        assert_eq!(index.node(ep).unwrap().level(), index.max_level());
    }

    #[test]
    fn test_deterministic_build() {
        let data = grid(100, 4);
        let ids: Vec<i64> = (0..100).collect();
        let mut a = HnswIndex::new(4, 6);
        let mut b = HnswIndex::new(4, 6);
        a.add(&data, &ids).unwrap();
        b.add(&data, &ids).unwrap();

        let q = &data[40..44];
        assert_eq!(a.search_one(q, 10), b.search_one(q, 10));
    }
}
