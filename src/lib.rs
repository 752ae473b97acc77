// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! # vecbridge
//!
//! A vector similarity index bridge: create, train, populate, persist and
//! query nearest-neighbor indexes over fixed-dimension `f32` vectors, from
//! Rust or from a host application through opaque integer handles.
//!
//! ## Features
//!
//! ### Index kinds (inner-product similarity)
//! - **[`index::FlatIndex`]** - Exact brute-force search
//! - **[`index::IvfPqIndex`]** - Inverted file + product quantization, trained before use
//! - **[`index::HnswIndex`]** - Hierarchical navigable small-world graph
//!
//! ### Bridge
//! - **[`registry::HandleRegistry`]** - Generational arena of live indexes with per-index reader-writer locks
//! - **[`persist`]** - Checksummed binary index files, written atomically
//! - **[`ffi`]** - C-ABI surface (`VB_*` functions)
//!
//! ### Pipeline
//! - **[`segment`]** - Immutable segments per embedding batch, manifest, compaction
//! - **[`shard::ShardedSearch`]** - Global top-k across every segment and shard
//!
//! ## Architecture
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`store::VectorStore`] | Raw vectors and ids in insertion order |
//! | [`index::IndexVariant`] | Tagged union over the three index kinds |
//! | [`registry::HandleRegistry`] | Handle to index mapping and lifecycle |
//! | [`persist`] | On-disk codec |
//! | [`config::IndexConfig`] | Explicit pipeline configuration |
//!
//! ## Quick Start
//!
//! ```rust
//! use vecbridge::config::IndexSpec;
//! use vecbridge::registry::HandleRegistry;
//!
//! fn main() -> vecbridge::Result<()> {
//!     let registry = HandleRegistry::new();
//!     let handle = registry.create(&IndexSpec::Flat { dim: 4 })?;
//!
//!     registry.add_with_ids(
//!         handle,
//!         &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
//!         &[1, 2],
//!     )?;
//!
//!     let results = registry.search(handle, &[1.0, 0.0, 0.0, 0.0], 2)?;
//!     assert_eq!(results.ids(), &[1, 2]);
//!     assert_eq!(results.scores(), &[1.0, 0.0]);
//!
//!     registry.free(handle)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber; the
//! host decides where they go.

pub mod config;
pub mod distance;
pub mod error;
pub mod ffi;
pub mod index;
pub mod kmeans;
pub mod persist;
pub mod registry;
pub mod search;
pub mod segment;
pub mod shard;
pub mod store;

// Re-export commonly used types
pub use config::{IndexConfig, IndexKind, IndexSpec, Parameter};
pub use error::{BridgeError, Result};
pub use index::IndexVariant;
pub use registry::{Handle, HandleRegistry};
pub use search::{Hit, SearchResults, NO_MATCH_ID, NO_MATCH_SCORE};
pub use segment::{build_segment, compact, Manifest, SegmentLayout, SegmentMeta};
pub use shard::ShardedSearch;
