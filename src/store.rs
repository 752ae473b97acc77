// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Raw vector storage shared by every index kind.
//!
//! A [`VectorStore`] is the add-order ledger of an index: one contiguous
//! `f32` buffer holding `len * dim` values and a parallel array of external
//! ids. Slots are assigned in insertion order and never move, so a slot
//! number doubles as the tie-break key for equal scores.
//!
//! The store owns no search structure. Index kinds keep their derived data
//! (inverted lists, graph nodes) keyed by slot.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Contiguous vectors plus external ids, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoreRecord")]
pub struct VectorStore {
    dimension: usize,
    data: Vec<f32>,
    ids: Vec<i64>,
    /// External id to the slots carrying it. Ids are not required unique.
    #[serde(skip)]
    slot_by_id: HashMap<i64, Vec<usize>>,
}

/// On-disk shape of a [`VectorStore`]; the id map is rebuilt on load.
#[derive(Deserialize)]
struct StoreRecord {
    dimension: usize,
    data: Vec<f32>,
    ids: Vec<i64>,
}

impl TryFrom<StoreRecord> for VectorStore {
    type Error = String;

    fn try_from(record: StoreRecord) -> std::result::Result<Self, Self::Error> {
        if record.dimension == 0 {
            return Err("vector store dimension is zero".to_string());
        }
        if record.ids.len().checked_mul(record.dimension) != Some(record.data.len()) {
            return Err(format!(
                "vector store holds {} floats for {} ids of dimension {}",
                record.data.len(),
                record.ids.len(),
                record.dimension
            ));
        }

        let mut slot_by_id: HashMap<i64, Vec<usize>> = HashMap::new();
        for (slot, id) in record.ids.iter().enumerate() {
            slot_by_id.entry(*id).or_default().push(slot);
        }

        Ok(Self {
            dimension: record.dimension,
            data: record.data,
            ids: record.ids,
            slot_by_id,
        })
    }
}

impl VectorStore {
    /// Creates an empty store for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            ids: Vec::new(),
            slot_by_id: HashMap::new(),
        }
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks that `vectors` holds exactly one `dimension`-sized row per id.
    ///
    /// # Errors
    ///
    /// * `BridgeError::DimensionMismatch` - If `vectors.len() != ids.len() * dimension`
    pub fn check_batch(&self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        match ids.len().checked_mul(self.dimension) {
            Some(expected) if expected == vectors.len() => Ok(()),
            expected => Err(BridgeError::DimensionMismatch {
                expected: expected.unwrap_or(usize::MAX),
                got: vectors.len(),
            }),
        }
    }

    /// Number of rows in a flat buffer, failing if it is not a whole multiple
    /// of the dimension.
    pub fn rows_in(&self, vectors: &[f32]) -> Result<usize> {
        if vectors.len() % self.dimension != 0 {
            return Err(BridgeError::DimensionMismatch {
                expected: (vectors.len() / self.dimension + 1) * self.dimension,
                got: vectors.len(),
            });
        }
        Ok(vectors.len() / self.dimension)
    }

    /// Appends a validated batch and returns the slots it occupies.
    ///
    /// Either the whole batch is stored or nothing is.
    pub fn append(&mut self, vectors: &[f32], ids: &[i64]) -> Result<Range<usize>> {
        self.check_batch(vectors, ids)?;

        let start = self.ids.len();
        self.data.extend_from_slice(vectors);
        self.ids.extend_from_slice(ids);
        for (offset, id) in ids.iter().enumerate() {
            self.slot_by_id.entry(*id).or_default().push(start + offset);
        }
        Ok(start..self.ids.len())
    }

    /// The vector stored at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= len()`.
    #[inline]
    pub fn vector(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// The external id stored at `slot`.
    #[inline]
    pub fn id(&self, slot: usize) -> i64 {
        self.ids[slot]
    }

    /// All ids in slot order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// All vector values, row-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Slots carrying `id`, oldest first.
    pub fn slots_of(&self, id: i64) -> &[usize] {
        self.slot_by_id.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates `(slot, id, vector)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, i64, &[f32])> + '_ {
        self.ids
            .iter()
            .zip(self.data.chunks_exact(self.dimension))
            .enumerate()
            .map(|(slot, (id, v))| (slot, *id, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_lookup() {
        let mut store = VectorStore::new(2);
        let slots = store.append(&[1.0, 2.0, 3.0, 4.0], &[10, 20]).unwrap();
        assert_eq!(slots, 0..2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.vector(1), &[3.0, 4.0]);
        assert_eq!(store.id(0), 10);
        assert_eq!(store.slots_of(20), &[1]);
        assert!(store.slots_of(99).is_empty());
    }

    #[test]
    fn test_duplicate_ids_keep_every_slot() {
        let mut store = VectorStore::new(1);
        store.append(&[1.0, 2.0], &[5, 5]).unwrap();
        assert_eq!(store.slots_of(5), &[0, 1]);
    }

    #[test]
    fn test_mismatch_leaves_store_unchanged() {
        let mut store = VectorStore::new(3);
        store.append(&[1.0, 2.0, 3.0], &[1]).unwrap();

        let err = store.append(&[1.0, 2.0, 3.0, 4.0], &[2]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DimensionMismatch {
                expected: 3,
                got: 4
            }
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.data().len(), 3);
    }

    #[test]
    fn test_oversized_batch_length_does_not_overflow() {
        let store = VectorStore::new(usize::MAX / 2);
        assert!(matches!(
            store.check_batch(&[0.0; 4], &[1, 2, 3]),
            Err(BridgeError::DimensionMismatch {
                expected: usize::MAX,
                got: 4
            })
        ));
    }

    #[test]
    fn test_bincode_rebuilds_id_map() {
        let mut store = VectorStore::new(2);
        store.append(&[1.0, 0.0, 0.0, 1.0], &[7, 8]).unwrap();

        let bytes = bincode::serialize(&store).unwrap();
        let restored: VectorStore = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.ids(), store.ids());
        assert_eq!(restored.data(), store.data());
        assert_eq!(restored.slots_of(8), &[1]);
    }

    #[test]
    fn test_inconsistent_record_rejected() {
        let record = (2usize, vec![1.0f32, 2.0, 3.0], vec![1i64, 2]);
        let bytes = bincode::serialize(&record).unwrap();
        assert!(bincode::deserialize::<VectorStore>(&bytes).is_err());

        let huge = (usize::MAX, Vec::<f32>::new(), vec![1i64, 2]);
        let bytes = bincode::serialize(&huge).unwrap();
        assert!(bincode::deserialize::<VectorStore>(&bytes).is_err());
    }
}
