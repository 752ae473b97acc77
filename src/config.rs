// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Index kinds, creation parameters and pipeline configuration.
//!
//! Three layers of configuration exist:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`IndexSpec`] | Validated creation parameters for a single index |
//! | [`Parameter`] | Runtime-tunable effort knobs (`nprobe`, `efSearch`, `efConstruction`) |
//! | [`IndexConfig`] | Design configuration for the segment pipeline, loaded from JSON |
//!
//! [`IndexConfig`] is always passed explicitly; there is no process-wide
//! configuration.
//!
//! # Examples
//!
//! ```rust
//! use vecbridge::config::{IndexConfig, IndexKind};
//!
//! let config: IndexConfig = serde_json::from_str(r#"{"index_type": "hnsw", "dim": 64}"#).unwrap();
//! assert_eq!(config.index_type, IndexKind::Hnsw);
//! assert_eq!(config.hnsw_m, 32); // unspecified fields keep their defaults
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default `nprobe` of a freshly created IVF-PQ index.
pub const DEFAULT_NPROBE: usize = 1;

/// Default `efConstruction` of a freshly created HNSW index.
pub const DEFAULT_EF_CONSTRUCTION: usize = 40;

/// Default `efSearch` of a freshly created HNSW index.
pub const DEFAULT_EF_SEARCH: usize = 16;

/// Largest supported bits per PQ code (one byte per sub-quantizer).
pub const MAX_PQ_BITS: usize = 8;

/// Largest vector dimension; the index file header stores it as a `u32`.
pub const MAX_DIMENSION: usize = u32::MAX as usize;

/// Largest HNSW graph degree.
pub const MAX_HNSW_M: usize = 1 << 16;

// =============================================================================
// Index Kind
// =============================================================================

/// The three index algorithms. All use inner-product similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact brute-force search.
    Flat,
    /// Inverted file with product quantization; requires training.
    IvfPq,
    /// Hierarchical navigable small-world graph.
    Hnsw,
}

impl IndexKind {
    /// Tag byte used in the index file header.
    pub fn tag(self) -> u8 {
        match self {
            IndexKind::Flat => 0,
            IndexKind::IvfPq => 1,
            IndexKind::Hnsw => 2,
        }
    }

    /// Inverse of [`IndexKind::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexKind::Flat),
            1 => Some(IndexKind::IvfPq),
            2 => Some(IndexKind::Hnsw),
            _ => None,
        }
    }

    /// Whether `train` must run before vectors can be added.
    pub fn requires_training(self) -> bool {
        matches!(self, IndexKind::IvfPq)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Flat => "FLAT_IP",
            IndexKind::IvfPq => "IVF_PQ",
            IndexKind::Hnsw => "HNSW_IP",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Creation Parameters
// =============================================================================

/// Validated creation parameters for one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexSpec {
    /// Exact inner-product index.
    Flat {
        /// Vector dimension
        dim: usize,
    },
    /// IVF-PQ index.
    IvfPq {
        /// Vector dimension
        dim: usize,
        /// Number of inverted lists
        nlist: usize,
        /// Number of PQ sub-quantizers (must divide `dim`)
        m: usize,
        /// Bits per sub-quantizer code (1-8)
        nbits: usize,
    },
    /// HNSW graph index.
    Hnsw {
        /// Vector dimension
        dim: usize,
        /// Graph degree
        m: usize,
    },
}

impl IndexSpec {
    /// Kind of index this spec creates.
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexSpec::Flat { .. } => IndexKind::Flat,
            IndexSpec::IvfPq { .. } => IndexKind::IvfPq,
            IndexSpec::Hnsw { .. } => IndexKind::Hnsw,
        }
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        match *self {
            IndexSpec::Flat { dim } | IndexSpec::IvfPq { dim, .. } | IndexSpec::Hnsw { dim, .. } => {
                dim
            }
        }
    }

    /// Checks the dimension and variant-specific constraints.
    ///
    /// # Errors
    ///
    /// * `BridgeError::InvalidParameter` - describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        if self.dim() == 0 || self.dim() > MAX_DIMENSION {
            return Err(BridgeError::InvalidParameter(format!(
                "dimension {} must be in 1..={}",
                self.dim(),
                MAX_DIMENSION
            )));
        }

        match *self {
            IndexSpec::Flat { .. } => Ok(()),
            IndexSpec::IvfPq { dim, nlist, m, nbits } => {
                if nlist == 0 {
                    return Err(BridgeError::InvalidParameter(
                        "nlist must be positive".to_string(),
                    ));
                }
                if m == 0 || dim % m != 0 {
                    return Err(BridgeError::InvalidParameter(format!(
                        "m={} must be positive and divide dimension {}",
                        m, dim
                    )));
                }
                if nbits == 0 || nbits > MAX_PQ_BITS {
                    return Err(BridgeError::InvalidParameter(format!(
                        "nbits={} must be in 1..={}",
                        nbits, MAX_PQ_BITS
                    )));
                }
                Ok(())
            }
            IndexSpec::Hnsw { m, .. } => {
                if m == 0 || m > MAX_HNSW_M {
                    return Err(BridgeError::InvalidParameter(format!(
                        "HNSW M={} must be in 1..={}",
                        m, MAX_HNSW_M
                    )));
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Runtime Parameters
// =============================================================================

/// Runtime-tunable effort parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// Inverted lists visited per IVF-PQ query.
    NProbe,
    /// HNSW query-time candidate list size.
    EfSearch,
    /// HNSW build-time candidate list size.
    EfConstruction,
}

impl Parameter {
    /// Wire name of the parameter.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::NProbe => "nprobe",
            Parameter::EfSearch => "efSearch",
            Parameter::EfConstruction => "efConstruction",
        }
    }

    /// Parses a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "nprobe" => Some(Parameter::NProbe),
            "efSearch" => Some(Parameter::EfSearch),
            "efConstruction" => Some(Parameter::EfConstruction),
            _ => None,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Design configuration for segment building, sharded search and compaction.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Root directory holding one subdirectory per variant.
    pub index_root: PathBuf,
    /// L2-normalize rows and queries so inner product equals cosine.
    pub normalize: bool,
    /// Index kind built for each segment.
    pub index_type: IndexKind,
    /// Vector dimension.
    pub dim: usize,
    /// IVF-PQ inverted lists.
    pub nlist: usize,
    /// IVF-PQ lists probed per query.
    pub nprobe: usize,
    /// IVF-PQ sub-quantizers.
    pub pq_m: usize,
    /// IVF-PQ bits per code.
    pub pq_bits: usize,
    /// HNSW graph degree.
    pub hnsw_m: usize,
    /// HNSW build-time candidate list size.
    pub ef_construction: usize,
    /// HNSW query-time candidate list size.
    pub ef_search: usize,
    /// Merge segments into a Flat shard once enough accumulate.
    pub compaction_enabled: bool,
    /// Segment count that triggers compaction.
    pub compaction_min_segments: usize,
    /// Salt for [`crate::segment::stable_id`].
    pub id_hash_salt: i64,
    /// Publish segments by rename from the staging directory.
    pub atomic_publish: bool,
    /// Manifest schema version written by this configuration.
    pub schema_version: u32,
    /// Variant name (subdirectory under `index_root`).
    pub variant: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_root: PathBuf::from("vecbridge/out/index"),
            normalize: true,
            index_type: IndexKind::IvfPq,
            dim: 512,
            nlist: 4096,
            nprobe: 16,
            pq_m: 64,
            pq_bits: 8,
            hnsw_m: 32,
            ef_construction: 200,
            ef_search: 64,
            compaction_enabled: false,
            compaction_min_segments: 16,
            id_hash_salt: 0x7F4A_7C15,
            atomic_publish: true,
            schema_version: 1,
            variant: "base".to_string(),
        }
    }
}

impl IndexConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// * `BridgeError::Io` - If the file cannot be read
    /// * `BridgeError::Json` - If the document is malformed
    /// * `BridgeError::InvalidParameter` - If the values fail [`IndexConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Creation parameters for the configured index kind.
    pub fn index_spec(&self) -> IndexSpec {
        match self.index_type {
            IndexKind::Flat => IndexSpec::Flat { dim: self.dim },
            IndexKind::IvfPq => IndexSpec::IvfPq {
                dim: self.dim,
                nlist: self.nlist,
                m: self.pq_m,
                nbits: self.pq_bits,
            },
            IndexKind::Hnsw => IndexSpec::Hnsw {
                dim: self.dim,
                m: self.hnsw_m,
            },
        }
    }

    /// Runtime parameters applied after creating or loading an index of the
    /// configured kind.
    pub fn runtime_params(&self) -> Vec<(Parameter, usize)> {
        match self.index_type {
            IndexKind::Flat => Vec::new(),
            IndexKind::IvfPq => vec![(Parameter::NProbe, self.nprobe)],
            IndexKind::Hnsw => vec![
                (Parameter::EfConstruction, self.ef_construction),
                (Parameter::EfSearch, self.ef_search),
            ],
        }
    }

    /// Validates the index parameters and effort knobs.
    pub fn validate(&self) -> Result<()> {
        self.index_spec().validate()?;
        for (param, value) in self.runtime_params() {
            if value == 0 {
                return Err(BridgeError::InvalidParameter(format!(
                    "{} must be positive",
                    param
                )));
            }
        }
        if self.variant.is_empty() {
            return Err(BridgeError::InvalidParameter(
                "variant must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parameter map recorded in the manifest.
    pub fn manifest_params(&self) -> std::collections::BTreeMap<String, usize> {
        [
            ("nlist", self.nlist),
            ("nprobe", self.nprobe),
            ("pqM", self.pq_m),
            ("pqBits", self.pq_bits),
            ("hnswM", self.hnsw_m),
            ("efC", self.ef_construction),
            ("efS", self.ef_search),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}
