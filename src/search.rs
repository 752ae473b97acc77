// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Search results and bounded top-k collection.
//!
//! Every index kind produces its answers through a [`TopK`] collector.
//! [`fill_slots`] writes them into `k` caller slots per query, either a
//! [`SearchResults`] grid or buffers handed over the C-ABI. Slots that no
//! stored vector fills carry the sentinel pair ([`NO_MATCH_SCORE`],
//! [`NO_MATCH_ID`]).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Id reported in result slots that no stored vector fills.
pub const NO_MATCH_ID: i64 = -1;

/// Score reported in result slots that no stored vector fills.
pub const NO_MATCH_SCORE: f32 = f32::NEG_INFINITY;

/// A single match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// External id of the stored vector
    pub id: i64,
    /// Inner-product score (higher is better)
    pub score: f32,
}

impl Hit {
    /// Returns true for the sentinel entry.
    pub fn is_sentinel(&self) -> bool {
        self.id == NO_MATCH_ID && self.score == NO_MATCH_SCORE
    }
}

// =============================================================================
// Top-k collector
// =============================================================================

/// Heap entry ordered so the *worst* candidate sits on top of the max-heap.
#[derive(Debug, Clone, Copy)]
struct Ranked {
    score: f32,
    slot: usize,
    id: i64,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower score is worse; on equal scores the later slot is worse.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Keeps the `k` best `(score, slot)` candidates.
///
/// Ties are broken by slot, so among equal scores the earlier insertion wins.
/// NaN scores are ignored.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    /// Creates a collector for `k` results.
    ///
    /// Callers clamp `k` to the number of candidates they can offer; the
    /// heap reserves `k + 1` entries up front.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    /// Offers a candidate.
    pub fn push(&mut self, score: f32, slot: usize, id: i64) {
        if self.k == 0 || score.is_nan() {
            return;
        }
        let candidate = Ranked { score, slot, id };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Number of candidates held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Best-first hits.
    pub fn into_hits(self) -> Vec<Hit> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|r| Hit {
                id: r.id,
                score: r.score,
            })
            .collect()
    }
}

// =============================================================================
// Result slots
// =============================================================================

/// Writes `hits` into one query's slots, best first, and the sentinel into
/// every slot left over. Hits beyond the slot count are dropped.
pub fn fill_slots(scores: &mut [f32], ids: &mut [i64], hits: &[Hit]) {
    for (i, (score, id)) in scores.iter_mut().zip(ids.iter_mut()).enumerate() {
        match hits.get(i) {
            Some(hit) => {
                *score = hit.score;
                *id = hit.id;
            }
            None => {
                *score = NO_MATCH_SCORE;
                *id = NO_MATCH_ID;
            }
        }
    }
}

/// `num_queries * k` result slots, best match first within each query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    k: usize,
    scores: Vec<f32>,
    ids: Vec<i64>,
}

impl SearchResults {
    /// Creates a grid with every slot set to the sentinel.
    pub fn new(num_queries: usize, k: usize) -> Self {
        Self {
            k,
            scores: vec![NO_MATCH_SCORE; num_queries * k],
            ids: vec![NO_MATCH_ID; num_queries * k],
        }
    }

    /// Results requested per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of queries.
    pub fn num_queries(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.ids.len() / self.k
        }
    }

    /// Stores the hits of query `q`. Extra hits beyond `k` are dropped.
    pub fn set_query(&mut self, q: usize, hits: &[Hit]) {
        let range = q * self.k..(q + 1) * self.k;
        fill_slots(&mut self.scores[range.clone()], &mut self.ids[range], hits);
    }

    /// Mutable `(scores, ids)` buffers, query-major.
    pub(crate) fn slots_mut(&mut self) -> (&mut [f32], &mut [i64]) {
        (&mut self.scores, &mut self.ids)
    }

    /// The `k` slots of query `q`, sentinels included.
    pub fn query(&self, q: usize) -> Vec<Hit> {
        let base = q * self.k;
        (base..base + self.k)
            .map(|i| Hit {
                id: self.ids[i],
                score: self.scores[i],
            })
            .collect()
    }

    /// All scores, query-major.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// All ids, query-major.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }
}
