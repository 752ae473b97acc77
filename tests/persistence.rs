// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Integration tests for index persistence.
//!
//! Every index kind written to disk and read back must answer a fixed query
//! set with bit-identical scores and identical ids, because the file carries
//! all derived structure (centroids, codebooks, codes, graph edges).

use std::fs;

use tempfile::tempdir;
use vecbridge::config::{IndexKind, IndexSpec, Parameter};
use vecbridge::persist::{self, FORMAT_VERSION, HEADER_SIZE};
use vecbridge::{BridgeError, HandleRegistry, IndexVariant};

/// Deterministic pseudo-random rows.
fn generate_rows(count: usize, dim: usize, seed: usize) -> Vec<f32> {
    (0..count * dim)
        .map(|i| (((i + seed * 7919) as f32) * 0.618_034).sin())
        .collect()
}

fn assert_same_results(a: &IndexVariant, b: &IndexVariant, queries: &[f32], k: usize) {
    let ra = a.search(queries, k).expect("search original");
    let rb = b.search(queries, k).expect("search loaded");
    assert_eq!(ra.ids(), rb.ids());
    let bits_a: Vec<u32> = ra.scores().iter().map(|s| s.to_bits()).collect();
    let bits_b: Vec<u32> = rb.scores().iter().map(|s| s.to_bits()).collect();
    assert_eq!(bits_a, bits_b, "scores must be bit-identical");
}

fn roundtrip(index: &IndexVariant) -> IndexVariant {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");
    persist::write(index, &path).expect("write should succeed");
    persist::read(&path).expect("read should succeed")
}

#[test]
fn test_flat_roundtrip() {
    let dim = 16;
    let mut index = IndexVariant::new(&IndexSpec::Flat { dim }).unwrap();
    let ids: Vec<i64> = (100..300).collect();
    index
        .add_with_ids(&generate_rows(ids.len(), dim, 1), &ids)
        .unwrap();

    let loaded = roundtrip(&index);
    assert_eq!(loaded.kind(), IndexKind::Flat);
    assert_eq!(loaded.ntotal(), 200);
    assert_same_results(&index, &loaded, &generate_rows(5, dim, 2), 10);
}

#[test]
fn test_ivfpq_roundtrip() {
    let dim = 16;
    let spec = IndexSpec::IvfPq {
        dim,
        nlist: 8,
        m: 4,
        nbits: 6,
    };
    let mut index = IndexVariant::new(&spec).unwrap();
    let rows = generate_rows(300, dim, 3);
    index.train(&rows).unwrap();
    let ids: Vec<i64> = (0..300).collect();
    index.add_with_ids(&rows, &ids).unwrap();
    index.set_parameter(Parameter::NProbe, 3).unwrap();

    let loaded = roundtrip(&index);
    assert_eq!(loaded.spec(), spec);
    assert!(loaded.is_trained());
    assert_eq!(loaded.parameter(Parameter::NProbe), Some(3));
    assert_same_results(&index, &loaded, &generate_rows(6, dim, 4), 10);
}

#[test]
fn test_trained_but_empty_ivfpq_roundtrip() {
    let dim = 8;
    let mut index = IndexVariant::new(&IndexSpec::IvfPq {
        dim,
        nlist: 4,
        m: 2,
        nbits: 4,
    })
    .unwrap();
    index.train(&generate_rows(40, dim, 5)).unwrap();

    let mut loaded = roundtrip(&index);
    assert!(loaded.is_trained());
    assert_eq!(loaded.ntotal(), 0);

    // Still accepts data after loading.
    loaded
        .add_with_ids(&generate_rows(3, dim, 6), &[1, 2, 3])
        .unwrap();
    assert_eq!(loaded.ntotal(), 3);
}

#[test]
fn test_hnsw_roundtrip() {
    let dim = 12;
    let mut index = IndexVariant::new(&IndexSpec::Hnsw { dim, m: 8 }).unwrap();
    index.set_parameter(Parameter::EfConstruction, 50).unwrap();
    index.set_parameter(Parameter::EfSearch, 24).unwrap();
    let ids: Vec<i64> = (0..250).map(|i| i * 3).collect();
    index
        .add_with_ids(&generate_rows(ids.len(), dim, 7), &ids)
        .unwrap();

    let loaded = roundtrip(&index);
    assert_eq!(loaded.parameter(Parameter::EfSearch), Some(24));
    assert_eq!(loaded.parameter(Parameter::EfConstruction), Some(50));
    assert_same_results(&index, &loaded, &generate_rows(8, dim, 8), 10);
}

#[test]
fn test_registry_roundtrip_gets_fresh_handle() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("flat.vbix");
    let registry = HandleRegistry::new();

    let original = registry.create(&IndexSpec::Flat { dim: 4 }).unwrap();
    registry
        .add_with_ids(original, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], &[1, 2])
        .unwrap();
    registry.write_index(original, &path).unwrap();

    let loaded = registry.read_index(&path).unwrap();
    assert_ne!(loaded, original);
    assert_eq!(registry.len(), 2);

    let results = registry.search(loaded, &[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(results.ids(), &[1, 2]);
    assert_eq!(results.scores(), &[1.0, 0.0]);
}

#[test]
fn test_overwrite_leaves_no_temp_files() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");

    let mut index = IndexVariant::new(&IndexSpec::Flat { dim: 2 }).unwrap();
    persist::write(&index, &path).unwrap();
    index.add_with_ids(&[1.0, 0.0], &[9]).unwrap();
    persist::write(&index, &path).unwrap();

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1, "unexpected files: {:?}", names);
    assert_eq!(persist::read(&path).unwrap().ntotal(), 1);
}

#[test]
fn test_truncated_file_is_corrupt() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");
    let mut index = IndexVariant::new(&IndexSpec::Flat { dim: 4 }).unwrap();
    index.add_with_ids(&[0.5; 8], &[1, 2]).unwrap();
    persist::write(&index, &path).unwrap();

    let bytes = fs::read(&path).unwrap();
    for len in [0, 3, HEADER_SIZE - 1, HEADER_SIZE + 2, bytes.len() - 1] {
        fs::write(&path, &bytes[..len]).unwrap();
        assert!(
            matches!(persist::read(&path), Err(BridgeError::CorruptFile(_))),
            "truncation to {} bytes should be corrupt",
            len
        );
    }
}

#[test]
fn test_flipped_payload_byte_is_corrupt() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");
    let mut index = IndexVariant::new(&IndexSpec::Hnsw { dim: 4, m: 4 }).unwrap();
    index.add_with_ids(&generate_rows(10, 4, 9), &(0..10).collect::<Vec<_>>()).unwrap();
    persist::write(&index, &path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[HEADER_SIZE + 5] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        persist::read(&path),
        Err(BridgeError::CorruptFile(_))
    ));
}

#[test]
fn test_newer_version_is_unsupported() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");
    let index = IndexVariant::new(&IndexSpec::Flat { dim: 4 }).unwrap();
    persist::write(&index, &path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    match persist::read(&path) {
        Err(BridgeError::UnsupportedVersion { found, supported }) => {
            assert_eq!(found, FORMAT_VERSION + 1);
            assert_eq!(supported, FORMAT_VERSION);
        }
        other => panic!("expected UnsupportedVersion, got {:?}", other.map(|i| i.kind())),
    }
}

#[test]
fn test_header_describes_index() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = dir.path().join("index.vbix");
    let index = IndexVariant::new(&IndexSpec::Hnsw { dim: 24, m: 6 }).unwrap();
    persist::write(&index, &path).unwrap();

    let header = persist::read_header(&path).unwrap();
    assert_eq!(header.version, FORMAT_VERSION);
    assert_eq!(header.kind, IndexKind::Hnsw);
    assert_eq!(header.dimension, 24);
    assert_eq!(
        header.payload_len as usize + HEADER_SIZE + 4,
        fs::metadata(&path).unwrap().len() as usize
    );
}
