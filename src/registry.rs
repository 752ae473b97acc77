// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Handle registry: opaque integer handles to live indexes.
//!
//! The registry is a generational arena. A [`Handle`] packs a slot number
//! and the slot's generation; freeing a handle bumps the generation, so a
//! stale or double-freed handle is reported as `UnknownHandle` instead of
//! reaching another index.
//!
//! # Locking
//!
//! - The arena itself sits behind one short-held mutex, taken only to look
//!   up, insert or remove an entry.
//! - Each index has its own reader-writer lock: any number of concurrent
//!   searches, or one mutation (train, add, set parameter).
//!
//! A training run on one handle therefore never blocks searches on another.
//! Freeing a handle removes it from the arena at once; an operation already
//! holding the index finishes first and the memory is released when it
//! returns.
//!
//! # Examples
//!
//! ```rust
//! use vecbridge::config::IndexSpec;
//! use vecbridge::registry::HandleRegistry;
//!
//! let registry = HandleRegistry::new();
//! let handle = registry.create(&IndexSpec::Flat { dim: 2 }).unwrap();
//! registry.add_with_ids(handle, &[1.0, 0.0], &[7]).unwrap();
//!
//! let results = registry.search(handle, &[1.0, 0.0], 1).unwrap();
//! assert_eq!(results.ids(), &[7]);
//!
//! registry.free(handle).unwrap();
//! assert!(registry.free(handle).is_err());
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::{IndexSpec, Parameter};
use crate::error::{BridgeError, Result};
use crate::index::IndexVariant;
use crate::persist;
use crate::search::SearchResults;

/// An index shared between the registry and in-flight operations.
pub type SharedIndex = Arc<RwLock<IndexVariant>>;

/// Largest generation value; keeps every handle positive as an `i64`.
const MAX_GENERATION: u32 = 0x7FFF_FFFF;

// =============================================================================
// Handle
// =============================================================================

/// Opaque non-zero reference to a registered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    fn new(slot: usize, generation: u32) -> Self {
        Handle(((generation as u64) << 32) | (slot as u64 + 1))
    }

    /// Raw value passed across the C-ABI.
    pub fn raw(self) -> i64 {
        self.0 as i64
    }

    /// Wraps a raw value. Non-positive values never name a live index.
    pub fn from_raw(raw: i64) -> Self {
        Handle(raw as u64)
    }

    fn slot(self) -> Option<usize> {
        let low = (self.0 & 0xFFFF_FFFF) as usize;
        low.checked_sub(1)
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<SharedIndex>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

/// Maps handles to live indexes.
#[derive(Default)]
pub struct HandleRegistry {
    arena: Mutex<Arena>,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.arena.lock().live
    }

    /// Returns true if no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers an index under a fresh handle.
    pub fn insert(&self, index: IndexVariant) -> Result<Handle> {
        let kind = index.kind();
        let mut arena = self.arena.lock();

        let slot = match arena.free.pop() {
            Some(slot) => slot,
            None => {
                if arena.slots.len() >= u32::MAX as usize - 1 {
                    return Err(BridgeError::InvalidParameter(
                        "handle registry is full".to_string(),
                    ));
                }
                arena.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                arena.slots.len() - 1
            }
        };

        let entry = &mut arena.slots[slot];
        entry.entry = Some(Arc::new(RwLock::new(index)));
        let handle = Handle::new(slot, entry.generation);
        arena.live += 1;
        drop(arena);

        info!(handle = %handle, kind = %kind, "registered index");
        Ok(handle)
    }

    /// Looks up a live index.
    ///
    /// # Errors
    ///
    /// * `BridgeError::UnknownHandle` - If the handle is stale, freed or foreign
    pub fn get(&self, handle: Handle) -> Result<SharedIndex> {
        let arena = self.arena.lock();
        let found = handle
            .slot()
            .and_then(|slot| arena.slots.get(slot))
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.entry.clone());
        found.ok_or(BridgeError::UnknownHandle(handle.0))
    }

    /// Runs `f` under the index's read lock.
    pub fn with_read<R>(&self, handle: Handle, f: impl FnOnce(&IndexVariant) -> R) -> Result<R> {
        let shared = self.get(handle)?;
        let guard = shared.read();
        Ok(f(&*guard))
    }

    /// Runs `f` under the index's write lock.
    pub fn with_write<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut IndexVariant) -> R,
    ) -> Result<R> {
        let shared = self.get(handle)?;
        let mut guard = shared.write();
        Ok(f(&mut *guard))
    }

    /// Unregisters a handle.
    ///
    /// # Errors
    ///
    /// * `BridgeError::UnknownHandle` - If the handle is not live, including a second free
    pub fn free(&self, handle: Handle) -> Result<()> {
        let mut arena = self.arena.lock();
        let slot = handle
            .slot()
            .filter(|&slot| {
                arena
                    .slots
                    .get(slot)
                    .map(|s| s.generation == handle.generation() && s.entry.is_some())
                    .unwrap_or(false)
            })
            .ok_or(BridgeError::UnknownHandle(handle.0))?;

        let entry = &mut arena.slots[slot];
        let released = entry.entry.take();
        entry.generation = if entry.generation >= MAX_GENERATION {
            1
        } else {
            entry.generation + 1
        };
        arena.free.push(slot);
        arena.live -= 1;
        drop(arena);
        drop(released);

        info!(handle = %handle, "freed index");
        Ok(())
    }

    /// Frees every live handle and returns how many were released.
    pub fn clear(&self) -> usize {
        let mut arena = self.arena.lock();
        let mut released = Vec::new();
        let Arena { slots, free, live } = &mut *arena;
        for (i, slot) in slots.iter_mut().enumerate() {
            if let Some(index) = slot.entry.take() {
                released.push(index);
                slot.generation = if slot.generation >= MAX_GENERATION {
                    1
                } else {
                    slot.generation + 1
                };
                free.push(i);
            }
        }
        *live = 0;
        drop(arena);

        let count = released.len();
        drop(released);
        info!(count, "released all indexes");
        count
    }

    // =========================================================================
    // Bridge operations
    // =========================================================================

    /// Validates `spec`, creates an empty index and registers it.
    pub fn create(&self, spec: &IndexSpec) -> Result<Handle> {
        let index = IndexVariant::new(spec)?;
        self.insert(index)
    }

    /// Sets a runtime parameter by wire name.
    pub fn set_parameter(&self, handle: Handle, name: &str, value: usize) -> Result<()> {
        self.with_write(handle, |index| index.set_parameter_by_name(name, value))?
    }

    /// Sets a runtime parameter.
    pub fn set(&self, handle: Handle, param: Parameter, value: usize) -> Result<()> {
        self.with_write(handle, |index| index.set_parameter(param, value))?
    }

    /// Trains the referenced index.
    pub fn train(&self, handle: Handle, vectors: &[f32]) -> Result<()> {
        self.with_write(handle, |index| index.train(vectors))?
    }

    /// Adds vectors with ids to the referenced index.
    pub fn add_with_ids(&self, handle: Handle, vectors: &[f32], ids: &[i64]) -> Result<()> {
        self.with_write(handle, |index| index.add_with_ids(vectors, ids))?
    }

    /// Searches the referenced index.
    pub fn search(&self, handle: Handle, queries: &[f32], k: usize) -> Result<SearchResults> {
        self.with_read(handle, |index| index.search(queries, k))?
    }

    /// Searches the referenced index into caller-owned buffers, returning
    /// the number of queries. See [`IndexVariant::search_into`].
    pub fn search_into(
        &self,
        handle: Handle,
        queries: &[f32],
        k: usize,
        out_scores: &mut [f32],
        out_ids: &mut [i64],
    ) -> Result<usize> {
        self.with_read(handle, |index| index.search_into(queries, k, out_scores, out_ids))?
    }

    /// Writes the referenced index to `path`.
    pub fn write_index<P: AsRef<Path>>(&self, handle: Handle, path: P) -> Result<()> {
        self.with_read(handle, |index| persist::write(index, path))?
    }

    /// Reads an index file and registers it under a fresh handle.
    pub fn read_index<P: AsRef<Path>>(&self, path: P) -> Result<Handle> {
        let index = persist::read(path)?;
        self.insert(index)
    }
}

// =============================================================================
// Process-wide registry
// =============================================================================

/// Registry used by the C-ABI functions.
static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::new);

/// The process-wide registry.
pub fn global() -> &'static HandleRegistry {
    &REGISTRY
}
