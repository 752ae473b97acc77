// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Segment build, manifest and compaction.
//!
//! # Directory Layout
//!
//! ```text
//! <index_root>/<variant>/
//! ├── .staging/                 # files being written
//! ├── segments/
//! │   ├── seg-<ts>-<count>.vbix
//! │   └── seg-<ts>-<count>.ids.json
//! ├── shards/
//! │   ├── shard-<ts>-<count>.vbix
//! │   └── shard-<ts>-<count>.ids.json
//! └── MANIFEST.json
//! ```
//!
//! Each batch of embeddings becomes one immutable segment. Compaction merges
//! every listed segment into a single Flat shard; the raw vectors kept in
//! each segment file make the merge exact.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{IndexConfig, IndexKind, IndexSpec};
use crate::distance::normalize_rows;
use crate::error::{BridgeError, Result};
use crate::index::IndexVariant;
use crate::persist::{self, atomic_replace, write_atomic};

/// Metric recorded in manifests. Only inner product is supported.
pub const METRIC_IP: &str = "ip";

// =============================================================================
// Paths
// =============================================================================

/// Resolves the files of one variant under an index root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    root: PathBuf,
    variant: String,
}

impl SegmentLayout {
    /// Layout for `variant` under `root`.
    pub fn new<P: AsRef<Path>>(root: P, variant: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            variant: variant.to_string(),
        }
    }

    /// Layout named by a configuration.
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(&config.index_root, &config.variant)
    }

    /// Variant name.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// `<root>/<variant>`
    pub fn variant_root(&self) -> PathBuf {
        self.root.join(&self.variant)
    }

    /// Directory for files being written.
    pub fn staging(&self) -> PathBuf {
        self.variant_root().join(".staging")
    }

    /// Directory of published segments.
    pub fn segments(&self) -> PathBuf {
        self.variant_root().join("segments")
    }

    /// Directory of compacted shards.
    pub fn shards(&self) -> PathBuf {
        self.variant_root().join("shards")
    }

    /// Manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.variant_root().join("MANIFEST.json")
    }

    /// Creates every directory of the layout.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.staging(), self.segments(), self.shards()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `(index, ids)` file names of a segment.
    pub fn segment_names(ts: u64, count: usize) -> (String, String) {
        (
            format!("seg-{}-{}.vbix", ts, count),
            format!("seg-{}-{}.ids.json", ts, count),
        )
    }

    /// `(index, ids)` file names of a shard.
    pub fn shard_names(ts: u64, count: usize) -> (String, String) {
        (
            format!("shard-{}-{}.vbix", ts, count),
            format!("shard-{}-{}.ids.json", ts, count),
        )
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// One published segment or shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Index file name, relative to its directory
    pub file: String,
    /// Ids file name, relative to its directory
    pub ids: String,
    /// Number of vectors
    pub count: usize,
    /// Build timestamp
    pub ts: u64,
}

/// Catalogue of a variant's segments and shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest schema version
    pub schema_version: u32,
    /// Vector dimension shared by every segment
    pub dim: usize,
    /// Similarity metric
    pub metric: String,
    /// Index kind of the segments (`FLAT_IP`, `IVF_PQ`, `HNSW_IP`)
    pub index_type: String,
    /// Variant name
    pub variant: String,
    /// Build parameters
    pub params: BTreeMap<String, usize>,
    /// Published segments, oldest first
    pub segments: Vec<SegmentMeta>,
    /// Compacted shards, oldest first
    #[serde(default)]
    pub shards: Vec<SegmentMeta>,
    /// Whether an IVF-PQ quantizer has been trained for this variant
    #[serde(default)]
    pub trained: bool,
    /// Free-form description of the last training run
    #[serde(default)]
    pub train_info: String,
}

impl Manifest {
    /// Empty manifest for a configuration.
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            schema_version: config.schema_version,
            dim: config.dim,
            metric: METRIC_IP.to_string(),
            index_type: config.index_type.to_string(),
            variant: config.variant.clone(),
            params: config.manifest_params(),
            segments: Vec::new(),
            shards: Vec::new(),
            trained: false,
            train_info: String::new(),
        }
    }

    /// Loads a manifest, returning `None` if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the manifest atomically, pretty printed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        write_atomic(path.as_ref(), text.as_bytes())
    }

    /// Total vectors across segments and shards.
    pub fn total_vectors(&self) -> usize {
        self.segments.iter().chain(&self.shards).map(|s| s.count).sum()
    }
}

// =============================================================================
// Ids and embeddings
// =============================================================================

/// Stable 64-bit id for row `row` of `source`.
///
/// FNV-style hash of `"<source>#<row>"` seeded with `salt`; bytes are
/// sign-extended before mixing.
pub fn stable_id(source: &str, row: usize, salt: i64) -> i64 {
    let key = format!("{}#{}", source, row);
    let mut h = salt;
    for b in key.bytes() {
        h = (h ^ (b as i8 as i64)).wrapping_mul(0x0000_0100_0000_01B3);
    }
    h
}

/// Memory-maps a little-endian `f32` file.
///
/// # Errors
///
/// * `BridgeError::Io` - If the file cannot be opened or mapped
/// * `BridgeError::InvalidParameter` - If the length is not a multiple of 4
pub fn read_f32_file<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let file = File::open(path.as_ref())?;
    let len = file.metadata()?.len() as usize;
    if len % 4 != 0 {
        return Err(BridgeError::InvalidParameter(format!(
            "{} is {} bytes, not a whole number of f32 values",
            path.as_ref().display(),
            len
        )));
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    // SAFETY: the map is read-only and dropped before returning.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Writes an ids file (JSON array).
pub fn write_ids<P: AsRef<Path>>(path: P, ids: &[i64]) -> Result<()> {
    let text = serde_json::to_string(ids)?;
    write_atomic(path.as_ref(), text.as_bytes())
}

/// Reads an ids file written by [`write_ids`].
pub fn read_ids<P: AsRef<Path>>(path: P) -> Result<Vec<i64>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

// =============================================================================
// Segment build
// =============================================================================

/// Refuses to publish under a name the manifest lists or that exists on disk.
fn ensure_unpublished(manifest: &Manifest, dir: &Path, index_name: &str, ids_name: &str) -> Result<()> {
    let listed = manifest
        .segments
        .iter()
        .chain(&manifest.shards)
        .any(|meta| meta.file == index_name || meta.ids == ids_name);
    if listed || dir.join(index_name).exists() || dir.join(ids_name).exists() {
        return Err(BridgeError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dir.join(index_name).display()),
        )));
    }
    Ok(())
}

fn check_manifest_dim(manifest: &Manifest, config: &IndexConfig) -> Result<()> {
    if manifest.dim != config.dim {
        return Err(BridgeError::DimensionMismatch {
            expected: manifest.dim,
            got: config.dim,
        });
    }
    Ok(())
}

/// Builds one segment from `embeddings` (`count * dim` values) and records
/// it in the manifest.
///
/// Rows are normalized when configured. IVF-PQ segments are trained on
/// their own batch. With `atomic_publish` the files are written to
/// `.staging/` and renamed into `segments/`; otherwise they are written in
/// place.
///
/// # Errors
///
/// * `BridgeError::DimensionMismatch` - If the buffer is not whole rows, or the manifest has another dimension
/// * `BridgeError::InsufficientTrainingData` - IVF-PQ batch smaller than `nlist`
/// * `BridgeError::Io` - A segment with the same `ts` and count already exists, or a file error
/// * `BridgeError::Json` - If the manifest is malformed
pub fn build_segment(
    config: &IndexConfig,
    layout: &SegmentLayout,
    source: &str,
    embeddings: &[f32],
    ts: u64,
) -> Result<SegmentMeta> {
    config.validate()?;
    let dim = config.dim;
    if embeddings.len() % dim != 0 {
        return Err(BridgeError::DimensionMismatch {
            expected: (embeddings.len() / dim + 1) * dim,
            got: embeddings.len(),
        });
    }
    let count = embeddings.len() / dim;

    let manifest_path = layout.manifest_path();
    let mut manifest = Manifest::load(&manifest_path)?.unwrap_or_else(|| Manifest::new(config));
    check_manifest_dim(&manifest, config)?;
    let (index_name, ids_name) = SegmentLayout::segment_names(ts, count);
    let segments = layout.segments();
    ensure_unpublished(&manifest, &segments, &index_name, &ids_name)?;

    let mut rows = embeddings.to_vec();
    if config.normalize {
        normalize_rows(&mut rows, dim);
    }

    let mut index = IndexVariant::new(&config.index_spec())?;
    if config.index_type == IndexKind::IvfPq {
        index.train(&rows)?;
        manifest.trained = true;
        manifest.train_info = format!("trained on {} ({} vectors)", source, count);
    }
    for (param, value) in config.runtime_params() {
        index.set_parameter(param, value)?;
    }

    let ids: Vec<i64> = (0..count)
        .map(|row| stable_id(source, row, config.id_hash_salt))
        .collect();
    index.add_with_ids(&rows, &ids)?;

    layout.ensure_dirs()?;
    if config.atomic_publish {
        let staging = layout.staging();
        persist::write(&index, staging.join(&index_name))?;
        write_ids(staging.join(&ids_name), &ids)?;
        atomic_replace(&staging.join(&index_name), &segments.join(&index_name))?;
        atomic_replace(&staging.join(&ids_name), &segments.join(&ids_name))?;
    } else {
        persist::write(&index, segments.join(&index_name))?;
        write_ids(segments.join(&ids_name), &ids)?;
    }

    let meta = SegmentMeta {
        file: index_name,
        ids: ids_name,
        count,
        ts,
    };
    manifest.segments.push(meta.clone());
    manifest.save(&manifest_path)?;

    info!(
        variant = layout.variant(),
        file = %meta.file,
        count,
        kind = %config.index_type,
        "published segment"
    );
    Ok(meta)
}

// =============================================================================
// Compaction
// =============================================================================

/// Merges every segment into one Flat shard once at least
/// `compaction_min_segments` exist.
///
/// Returns the new shard, or `None` when compaction is disabled, the
/// manifest is missing or there are too few segments. A shard with the
/// same `ts` and count that already exists is an `Io` error.
pub fn compact(config: &IndexConfig, layout: &SegmentLayout, ts: u64) -> Result<Option<SegmentMeta>> {
    if !config.compaction_enabled {
        debug!("compaction disabled");
        return Ok(None);
    }
    let manifest_path = layout.manifest_path();
    let Some(mut manifest) = Manifest::load(&manifest_path)? else {
        return Ok(None);
    };
    if manifest.segments.is_empty() || manifest.segments.len() < config.compaction_min_segments {
        debug!(
            segments = manifest.segments.len(),
            min = config.compaction_min_segments,
            "not enough segments to compact"
        );
        return Ok(None);
    }

    let mut shard = IndexVariant::new(&IndexSpec::Flat { dim: manifest.dim })?;
    let segments_dir = layout.segments();
    for seg in &manifest.segments {
        let index = persist::read(segments_dir.join(&seg.file))?;
        let store = index.store();
        shard.add_with_ids(store.data(), store.ids())?;
    }

    let count = shard.ntotal();
    let (index_name, ids_name) = SegmentLayout::shard_names(ts, count);
    let shards_dir = layout.shards();
    ensure_unpublished(&manifest, &shards_dir, &index_name, &ids_name)?;
    layout.ensure_dirs()?;
    persist::write(&shard, shards_dir.join(&index_name))?;
    write_ids(shards_dir.join(&ids_name), shard.store().ids())?;

    let merged = std::mem::take(&mut manifest.segments);
    let meta = SegmentMeta {
        file: index_name,
        ids: ids_name,
        count,
        ts,
    };
    manifest.shards.push(meta.clone());
    manifest.save(&manifest_path)?;

    for seg in &merged {
        for name in [&seg.file, &seg.ids] {
            if let Err(e) = fs::remove_file(segments_dir.join(name)) {
                warn!(file = %name, error = %e, "could not remove merged segment file");
            }
        }
    }

    info!(
        variant = layout.variant(),
        shard = %meta.file,
        merged = merged.len(),
        count,
        "compacted segments"
    );
    Ok(Some(meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stable_id_deterministic_and_salted() {
        let a = stable_id("video-1", 0, 0x7F4A_7C15);
        assert_eq!(a, stable_id("video-1", 0, 0x7F4A_7C15));
        assert_ne!(a, stable_id("video-1", 1, 0x7F4A_7C15));
        assert_ne!(a, stable_id("video-1", 0, 1));
    }

    #[test]
    fn test_stable_id_hashes_source_and_row() {
        let manual = "clip#2"
            .bytes()
            .fold(5i64, |h, b| (h ^ b as i64).wrapping_mul(0x0000_0100_0000_01B3));
        assert_eq!(stable_id("clip", 2, 5), manual);
    }

    #[test]
    fn test_non_ascii_bytes_sign_extended() {
        // 0xC3 as a signed byte is -61
        let h = stable_id("é", 0, 0);
        let manual = "é#0".bytes().fold(0i64, |h, b| {
            (h ^ (b as i8 as i64)).wrapping_mul(0x0000_0100_0000_01B3)
        });
        assert_eq!(h, manual);
    }

    #[test]
    fn test_manifest_load_missing() {
        let dir = tempdir().expect("failed to create temp dir");
        assert!(Manifest::load(dir.path().join("MANIFEST.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_manifest_ignores_unknown_fields() {
        let json = r#"{
            "schemaVersion": 1, "dim": 4, "metric": "ip", "indexType": "FLAT_IP",
            "variant": "base", "params": {"nlist": 8}, "segments": [],
            "futureField": true
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.dim, 4);
        assert!(manifest.shards.is_empty());
        assert!(!manifest.trained);
    }

    #[test]
    fn test_read_f32_file() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("emb.f32");
        let values = [1.5f32, -2.0, 0.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&path, bytes).unwrap();
        assert_eq!(read_f32_file(&path).unwrap(), values.to_vec());

        fs::write(&path, [0u8; 5]).unwrap();
        assert!(matches!(
            read_f32_file(&path),
            Err(BridgeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_layout_paths() {
        let layout = SegmentLayout::new("/tmp/idx", "base");
        assert_eq!(layout.manifest_path(), PathBuf::from("/tmp/idx/base/MANIFEST.json"));
        assert_eq!(
            SegmentLayout::segment_names(17, 3),
            ("seg-17-3.vbix".to_string(), "seg-17-3.ids.json".to_string())
        );
    }
}
