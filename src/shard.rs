// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Search across every segment and shard of a variant.
//!
//! [`ShardedSearch`] opens each file listed in the manifest through a
//! [`HandleRegistry`], queries all of them and merges the per-file top-k
//! lists into one global ranking. Handles are freed when the searcher is
//! dropped.
//!
//! # Examples
//!
//! ```rust,no_run
//! use vecbridge::config::IndexConfig;
//! use vecbridge::segment::SegmentLayout;
//! use vecbridge::shard::ShardedSearch;
//!
//! let config = IndexConfig::from_json_file("index.json")?;
//! let layout = SegmentLayout::from_config(&config);
//! let search = ShardedSearch::open(&config, &layout)?;
//! for hit in search.search_top_k(&vec![0.1; config.dim], 10)? {
//!     println!("{} {:.4}", hit.id, hit.score);
//! }
//! # Ok::<(), vecbridge::BridgeError>(())
//! ```

use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::{IndexConfig, Parameter};
use crate::distance::normalize;
use crate::error::{BridgeError, Result};
use crate::registry::{global, Handle, HandleRegistry};
use crate::search::{Hit, TopK};
use crate::segment::{Manifest, SegmentLayout};

/// Open handles over every published segment and shard.
pub struct ShardedSearch<'r> {
    registry: &'r HandleRegistry,
    config: IndexConfig,
    dim: usize,
    handles: Vec<(Handle, PathBuf)>,
}

impl ShardedSearch<'static> {
    /// Opens every segment and shard through the process-wide registry.
    pub fn open(config: &IndexConfig, layout: &SegmentLayout) -> Result<Self> {
        Self::open_in(global(), config, layout)
    }
}

impl<'r> ShardedSearch<'r> {
    /// Opens every segment and shard through `registry`.
    ///
    /// Files that cannot be read are skipped with a warning.
    ///
    /// # Errors
    ///
    /// * `BridgeError::Io` - If the manifest does not exist or cannot be read
    /// * `BridgeError::Json` - If the manifest is malformed
    pub fn open_in(
        registry: &'r HandleRegistry,
        config: &IndexConfig,
        layout: &SegmentLayout,
    ) -> Result<Self> {
        let manifest = Manifest::load(layout.manifest_path())?.ok_or_else(|| {
            BridgeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no manifest for variant {}", layout.variant()),
            ))
        })?;

        let files = manifest
            .segments
            .iter()
            .map(|s| layout.segments().join(&s.file))
            .chain(manifest.shards.iter().map(|s| layout.shards().join(&s.file)));

        let mut search = Self {
            registry,
            config: config.clone(),
            dim: manifest.dim,
            handles: Vec::new(),
        };
        for path in files {
            match registry.read_index(&path) {
                Ok(handle) => {
                    search.handles.push((handle, path));
                    search.apply_runtime_params(handle)?;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable segment"),
            }
        }
        debug!(
            variant = layout.variant(),
            opened = search.handles.len(),
            "opened sharded search"
        );
        Ok(search)
    }

    fn apply_runtime_params(&self, handle: Handle) -> Result<()> {
        let wanted = [
            (Parameter::NProbe, self.config.nprobe),
            (Parameter::EfSearch, self.config.ef_search),
        ];
        self.registry.with_write(handle, |index| {
            for (param, value) in wanted {
                if index.parameter(param).is_some() {
                    index.set_parameter(param, value)?;
                }
            }
            Ok(())
        })?
    }

    /// Number of open segment and shard files.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if nothing could be opened.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Paths of the open files.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.handles.iter().map(|(_, p)| p)
    }

    /// Global top-k over every open file, best first. Sentinel slots are
    /// dropped, so fewer than `k` hits may be returned.
    ///
    /// # Errors
    ///
    /// * `BridgeError::DimensionMismatch` - If `query` does not have the manifest dimension
    /// * `BridgeError::InvalidParameter` - If `k` is zero
    pub fn search_top_k(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if query.len() != self.dim {
            return Err(BridgeError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        if k == 0 {
            return Err(BridgeError::InvalidParameter("k must be positive".to_string()));
        }

        let mut q = query.to_vec();
        if self.config.normalize {
            normalize(&mut q);
        }

        let mut available = 0usize;
        for (handle, _) in &self.handles {
            available += self.registry.with_read(*handle, |index| index.ntotal())?;
        }
        let k = k.min(available);
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut top = TopK::new(k);
        let mut order = 0usize;
        for (handle, _) in &self.handles {
            let results = self.registry.search(*handle, &q, k)?;
            for hit in results.query(0).into_iter().filter(|h| !h.is_sentinel()) {
                top.push(hit.score, order, hit.id);
                order += 1;
            }
        }
        Ok(top.into_hits())
    }
}

impl Drop for ShardedSearch<'_> {
    fn drop(&mut self) {
        for (handle, path) in self.handles.drain(..) {
            if let Err(e) = self.registry.free(handle) {
                warn!(path = %path.display(), error = %e, "failed to free segment handle");
            }
        }
    }
}
