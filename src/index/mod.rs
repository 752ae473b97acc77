// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! The three index kinds behind one tagged type.
//!
//! [`IndexVariant`] exposes the shared capability set (train, add, search,
//! runtime parameters) and performs the argument checks common to every
//! kind before dispatching:
//!
//! | Kind | Training | Runtime parameters |
//! |------|----------|--------------------|
//! | Flat | none (always trained) | none |
//! | IVF-PQ | required before add/search | `nprobe` |
//! | HNSW | none (always trained) | `efSearch`, `efConstruction` |
//!
//! # Examples
//!
//! ```rust
//! use vecbridge::config::IndexSpec;
//! use vecbridge::index::IndexVariant;
//!
//! let mut index = IndexVariant::new(&IndexSpec::Flat { dim: 4 }).unwrap();
//! index
//!     .add_with_ids(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], &[1, 2])
//!     .unwrap();
//!
//! let results = index.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
//! assert_eq!(results.ids(), &[1, 2, -1]);
//! ```

pub mod flat;
pub mod hnsw;
pub mod ivfpq;
pub mod pq;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{IndexKind, IndexSpec, Parameter};
use crate::error::{BridgeError, Result};
use crate::search::{fill_slots, SearchResults};
use crate::store::VectorStore;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivfpq::IvfPqIndex;

/// A live index of one of the three kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexVariant {
    /// Exact inner-product index
    Flat(FlatIndex),
    /// Inverted file with product quantization
    IvfPq(IvfPqIndex),
    /// HNSW graph
    Hnsw(HnswIndex),
}

impl IndexVariant {
    /// Validates `spec` and creates an empty index.
    ///
    /// # Errors
    ///
    /// * `BridgeError::InvalidParameter` - If the spec fails [`IndexSpec::validate`]
    pub fn new(spec: &IndexSpec) -> Result<Self> {
        spec.validate()?;
        let index = match *spec {
            IndexSpec::Flat { dim } => IndexVariant::Flat(FlatIndex::new(dim)),
            IndexSpec::IvfPq { dim, nlist, m, nbits } => {
                IndexVariant::IvfPq(IvfPqIndex::new(dim, nlist, m, nbits))
            }
            IndexSpec::Hnsw { dim, m } => IndexVariant::Hnsw(HnswIndex::new(dim, m)),
        };
        debug!(kind = %index.kind(), dim = spec.dim(), "created index");
        Ok(index)
    }

    /// Kind of this index.
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexVariant::Flat(_) => IndexKind::Flat,
            IndexVariant::IvfPq(_) => IndexKind::IvfPq,
            IndexVariant::Hnsw(_) => IndexKind::Hnsw,
        }
    }

    /// Creation parameters this index was built with.
    pub fn spec(&self) -> IndexSpec {
        let dim = self.dimension();
        match self {
            IndexVariant::Flat(_) => IndexSpec::Flat { dim },
            IndexVariant::IvfPq(ivf) => IndexSpec::IvfPq {
                dim,
                nlist: ivf.nlist(),
                m: ivf.m(),
                nbits: ivf.nbits(),
            },
            IndexVariant::Hnsw(h) => IndexSpec::Hnsw { dim, m: h.m() },
        }
    }

    /// Stored vectors and ids.
    pub fn store(&self) -> &VectorStore {
        match self {
            IndexVariant::Flat(f) => f.store(),
            IndexVariant::IvfPq(ivf) => ivf.store(),
            IndexVariant::Hnsw(h) => h.store(),
        }
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.store().dimension()
    }

    /// Number of stored vectors.
    pub fn ntotal(&self) -> usize {
        self.store().len()
    }

    /// Whether add and search are allowed. Only IVF-PQ can be untrained.
    pub fn is_trained(&self) -> bool {
        match self {
            IndexVariant::IvfPq(ivf) => ivf.is_trained(),
            other => !other.kind().requires_training(),
        }
    }

    /// Current value of a runtime parameter, or `None` if the kind does not
    /// have it.
    pub fn parameter(&self, param: Parameter) -> Option<usize> {
        match (self, param) {
            (IndexVariant::IvfPq(ivf), Parameter::NProbe) => Some(ivf.nprobe()),
            (IndexVariant::Hnsw(h), Parameter::EfSearch) => Some(h.ef_search()),
            (IndexVariant::Hnsw(h), Parameter::EfConstruction) => Some(h.ef_construction()),
            _ => None,
        }
    }

    /// Sets a runtime parameter.
    ///
    /// # Errors
    ///
    /// * `BridgeError::UnsupportedParameter` - If the kind does not have `param`
    /// * `BridgeError::InvalidParameter` - If `value` is zero
    pub fn set_parameter(&mut self, param: Parameter, value: usize) -> Result<()> {
        if self.parameter(param).is_none() {
            return Err(BridgeError::UnsupportedParameter {
                kind: self.kind(),
                name: param.name().to_string(),
            });
        }
        if value == 0 {
            return Err(BridgeError::InvalidParameter(format!(
                "{} must be positive",
                param
            )));
        }

        match (self, param) {
            (IndexVariant::IvfPq(ivf), Parameter::NProbe) => ivf.set_nprobe(value),
            (IndexVariant::Hnsw(h), Parameter::EfSearch) => h.set_ef_search(value),
            (IndexVariant::Hnsw(h), Parameter::EfConstruction) => h.set_ef_construction(value),
            _ => {}
        }
        debug!(param = param.name(), value, "set parameter");
        Ok(())
    }

    /// Sets a runtime parameter by wire name.
    ///
    /// Unknown names fail with `UnsupportedParameter`, like names the kind
    /// does not have.
    pub fn set_parameter_by_name(&mut self, name: &str, value: usize) -> Result<()> {
        match Parameter::from_name(name) {
            Some(param) => self.set_parameter(param, value),
            None => Err(BridgeError::UnsupportedParameter {
                kind: self.kind(),
                name: name.to_string(),
            }),
        }
    }

    /// Trains the index. Flat and HNSW only validate the buffer shape.
    ///
    /// # Errors
    ///
    /// * `BridgeError::DimensionMismatch` - If `vectors.len()` is not a multiple of the dimension
    /// * `BridgeError::AlreadyPopulated` - IVF-PQ with vectors already added
    /// * `BridgeError::InsufficientTrainingData` - IVF-PQ with fewer rows than `nlist`
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        debug!(kind = %self.kind(), values = vectors.len(), "train");
        match self {
            IndexVariant::IvfPq(ivf) => ivf.train(vectors),
            other => other.store().rows_in(vectors).map(|_| ()),
        }
    }

    /// Adds vectors with explicit external ids.
    ///
    /// The batch is applied entirely or not at all.
    ///
    /// # Errors
    ///
    /// * `BridgeError::DimensionMismatch` - If `vectors.len() != ids.len() * dimension`
    /// * `BridgeError::NotTrained` - IVF-PQ before training
    pub fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        debug!(kind = %self.kind(), count = ids.len(), "add_with_ids");
        match self {
            IndexVariant::Flat(f) => f.add(vectors, ids),
            IndexVariant::IvfPq(ivf) => ivf.add(vectors, ids),
            IndexVariant::Hnsw(h) => h.add(vectors, ids),
        }
    }

    /// Searches a batch of queries, returning `k` slots per query.
    ///
    /// An empty query buffer yields an empty result.
    ///
    /// # Errors
    ///
    /// * `BridgeError::InvalidParameter` - If `k` is zero
    /// * `BridgeError::DimensionMismatch` - If `queries.len()` is not a multiple of the dimension
    /// * `BridgeError::NotTrained` - IVF-PQ before training
    pub fn search(&self, queries: &[f32], k: usize) -> Result<SearchResults> {
        let (nq, _) = self.check_queries(queries, k)?;
        let mut results = SearchResults::new(nq, k);
        let (scores, ids) = results.slots_mut();
        self.search_into(queries, k, scores, ids)?;
        Ok(results)
    }

    /// Searches a batch of queries, writing `k` slots per query into
    /// caller-owned buffers.
    ///
    /// Both buffers are checked before any search runs, and nothing beyond
    /// the caller's buffers is allocated in proportion to `k`. Returns the
    /// number of queries.
    ///
    /// # Errors
    ///
    /// * `BridgeError::InvalidParameter` - If `k` is zero or `num_queries * k` overflows
    /// * `BridgeError::DimensionMismatch` - If `queries.len()` is not a multiple of the
    ///   dimension, or a buffer is shorter than `num_queries * k`
    /// * `BridgeError::NotTrained` - IVF-PQ before training
    pub fn search_into(
        &self,
        queries: &[f32],
        k: usize,
        out_scores: &mut [f32],
        out_ids: &mut [i64],
    ) -> Result<usize> {
        let (nq, needed) = self.check_queries(queries, k)?;
        for got in [out_scores.len(), out_ids.len()] {
            if got < needed {
                return Err(BridgeError::DimensionMismatch {
                    expected: needed,
                    got,
                });
            }
        }
        if !self.is_trained() {
            return Err(BridgeError::NotTrained);
        }
        debug!(kind = %self.kind(), nq, k, "search");

        // No query can have more hits than stored vectors.
        let k_hits = k.min(self.ntotal());
        let dim = self.dimension();
        for (q, query) in queries.chunks_exact(dim).enumerate() {
            let hits = match self {
                IndexVariant::Flat(f) => f.search_one(query, k_hits),
                IndexVariant::IvfPq(ivf) => ivf.search_one(query, k_hits),
                IndexVariant::Hnsw(h) => h.search_one(query, k_hits),
            };
            let range = q * k..(q + 1) * k;
            fill_slots(&mut out_scores[range.clone()], &mut out_ids[range], &hits);
        }
        Ok(nq)
    }

    /// `(num_queries, num_queries * k)` for a query batch.
    fn check_queries(&self, queries: &[f32], k: usize) -> Result<(usize, usize)> {
        if k == 0 {
            return Err(BridgeError::InvalidParameter("k must be positive".to_string()));
        }
        let nq = self.store().rows_in(queries)?;
        let slots = nq.checked_mul(k).ok_or_else(|| {
            BridgeError::InvalidParameter(format!("{} queries with k={} overflow", nq, k))
        })?;
        Ok((nq, slots))
    }

    /// Checks internal structure, used after loading from disk.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        match self {
            IndexVariant::Flat(_) => Ok(()),
            IndexVariant::IvfPq(ivf) => ivf.check_consistency(),
            IndexVariant::Hnsw(h) => h.check_consistency(),
        }
    }
}
