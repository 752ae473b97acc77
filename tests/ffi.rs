// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Integration tests for the C-ABI surface.
//!
//! Calls the exported `VB_*` functions directly, the way a host would,
//! against the process-wide registry.

use std::ffi::CString;
use std::ptr;

use tempfile::tempdir;
use vecbridge::error::*;
use vecbridge::ffi::*;

fn search(handle: i64, query: &[f32], k: usize) -> (i32, Vec<f32>, Vec<i64>) {
    let mut scores = vec![0.0f32; k];
    let mut ids = vec![0i64; k];
    let rc = VB_search(
        handle,
        query.as_ptr(),
        query.len(),
        k as i32,
        scores.as_mut_ptr(),
        scores.len(),
        ids.as_mut_ptr(),
        ids.len(),
    );
    (rc, scores, ids)
}

fn add(handle: i64, vectors: &[f32], ids: &[i64]) -> i32 {
    VB_add_with_ids(
        handle,
        vectors.as_ptr(),
        vectors.len(),
        ids.as_ptr(),
        ids.len(),
    )
}

#[test]
fn test_flat_two_vectors() {
    let handle = VB_create_flat_ip(4);
    assert!(handle > 0, "create failed with {}", handle);

    let vectors = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    assert_eq!(add(handle, &vectors, &[1, 2]), VB_SUCCESS);
    assert_eq!(VB_ntotal(handle), 2);
    assert_eq!(VB_dimension(handle), 4);
    assert_eq!(VB_is_trained(handle), 1);

    let (rc, scores, ids) = search(handle, &[1.0, 0.0, 0.0, 0.0], 2);
    assert_eq!(rc, VB_SUCCESS);
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(scores, vec![1.0, 0.0]);

    assert_eq!(VB_free_index(handle), VB_SUCCESS);
}

#[test]
fn test_search_pads_with_sentinel() {
    let handle = VB_create_flat_ip(2);
    assert_eq!(add(handle, &[0.6, 0.8], &[42]), VB_SUCCESS);

    let (rc, scores, ids) = search(handle, &[0.6, 0.8], 4);
    assert_eq!(rc, VB_SUCCESS);
    assert_eq!(ids, vec![42, -1, -1, -1]);
    assert!((scores[0] - 1.0).abs() < 1e-6);
    assert!(scores[1..].iter().all(|s| *s == f32::NEG_INFINITY));

    VB_free_index(handle);
}

#[test]
fn test_invalid_creation_parameters() {
    assert_eq!(VB_create_flat_ip(0) as i32, VB_ERR_INVALID_PARAMETER);
    assert_eq!(VB_create_flat_ip(-3) as i32, VB_ERR_INVALID_PARAMETER);
    // m must divide the dimension
    assert_eq!(VB_create_ivfpq(10, 4, 3, 8) as i32, VB_ERR_INVALID_PARAMETER);
    assert_eq!(VB_create_ivfpq(8, 4, 2, 9) as i32, VB_ERR_INVALID_PARAMETER);
    assert_eq!(VB_create_hnsw_ip(8, 0) as i32, VB_ERR_INVALID_PARAMETER);
}

#[test]
fn test_double_free_and_use_after_free() {
    let handle = VB_create_flat_ip(2);
    assert_eq!(VB_free_index(handle), VB_SUCCESS);
    assert_eq!(VB_free_index(handle), VB_ERR_UNKNOWN_HANDLE);
    assert_eq!(add(handle, &[1.0, 0.0], &[1]), VB_ERR_UNKNOWN_HANDLE);
    assert_eq!(search(handle, &[1.0, 0.0], 1).0, VB_ERR_UNKNOWN_HANDLE);
    assert_eq!(VB_ntotal(handle), VB_ERR_UNKNOWN_HANDLE as i64);
    assert_eq!(VB_set_nprobe(handle, 2), VB_ERR_UNKNOWN_HANDLE);
}

#[test]
fn test_foreign_handles() {
    for raw in [0, -1, 12345, i64::MAX] {
        assert_eq!(VB_free_index(raw), VB_ERR_UNKNOWN_HANDLE);
        assert_eq!(VB_is_trained(raw), VB_ERR_UNKNOWN_HANDLE);
    }
}

#[test]
fn test_null_pointers() {
    let handle = VB_create_flat_ip(2);

    assert_eq!(
        VB_add_with_ids(handle, ptr::null(), 2, [1i64].as_ptr(), 1),
        VB_ERR_NULL_POINTER
    );
    assert_eq!(VB_train(handle, ptr::null(), 4), VB_ERR_NULL_POINTER);
    assert_eq!(VB_write_index(handle, ptr::null()), VB_ERR_NULL_POINTER);
    assert_eq!(VB_read_index(ptr::null()), VB_ERR_NULL_POINTER as i64);
    assert_eq!(VB_set_parameter(handle, ptr::null(), 4), VB_ERR_NULL_POINTER);

    let query = [1.0f32, 0.0];
    let mut ids = [0i64; 1];
    let rc = VB_search(
        handle,
        query.as_ptr(),
        2,
        1,
        ptr::null_mut(),
        1,
        ids.as_mut_ptr(),
        1,
    );
    assert_eq!(rc, VB_ERR_NULL_POINTER);

    // Null is fine for an empty buffer.
    assert_eq!(VB_add_with_ids(handle, ptr::null(), 0, ptr::null(), 0), VB_SUCCESS);
    assert_eq!(VB_ntotal(handle), 0);

    VB_free_index(handle);
}

#[test]
fn test_unsupported_parameters() {
    let flat = VB_create_flat_ip(4);
    let hnsw = VB_create_hnsw_ip(4, 8);
    let ivf = VB_create_ivfpq(4, 2, 2, 4);

    assert_eq!(VB_set_nprobe(flat, 4), VB_ERR_UNSUPPORTED_PARAMETER);
    assert_eq!(VB_set_nprobe(hnsw, 4), VB_ERR_UNSUPPORTED_PARAMETER);
    assert_eq!(VB_set_ef_search(ivf, 4), VB_ERR_UNSUPPORTED_PARAMETER);

    assert_eq!(VB_set_nprobe(ivf, 2), VB_SUCCESS);
    assert_eq!(VB_set_ef_search(hnsw, 32), VB_SUCCESS);
    assert_eq!(VB_set_ef_construction(hnsw, 64), VB_SUCCESS);
    assert_eq!(VB_set_ef_search(hnsw, 0), VB_ERR_INVALID_PARAMETER);

    let name = CString::new("efSearch").unwrap();
    assert_eq!(VB_set_parameter(hnsw, name.as_ptr(), 20), VB_SUCCESS);
    let bogus = CString::new("bogus").unwrap();
    assert_eq!(
        VB_set_parameter(hnsw, bogus.as_ptr(), 20),
        VB_ERR_UNSUPPORTED_PARAMETER
    );

    for h in [flat, hnsw, ivf] {
        assert_eq!(VB_free_index(h), VB_SUCCESS);
    }
}

#[test]
fn test_dimension_mismatch_and_short_buffers() {
    let handle = VB_create_flat_ip(4);

    // 8 values but 3 ids
    assert_eq!(
        add(handle, &[0.0; 8], &[1, 2, 3]),
        VB_ERR_DIMENSION_MISMATCH
    );
    assert_eq!(VB_ntotal(handle), 0);

    assert_eq!(add(handle, &[1.0; 8], &[1, 2]), VB_SUCCESS);

    // Two queries need 2 * k output slots.
    let queries = [1.0f32; 8];
    let mut scores = [0.0f32; 2];
    let mut ids = [0i64; 2];
    let rc = VB_search(
        handle,
        queries.as_ptr(),
        queries.len(),
        2,
        scores.as_mut_ptr(),
        scores.len(),
        ids.as_mut_ptr(),
        ids.len(),
    );
    assert_eq!(rc, VB_ERR_DIMENSION_MISMATCH);

    assert_eq!(search(handle, &[1.0; 3], 1).0, VB_ERR_DIMENSION_MISMATCH);
    assert_eq!(search(handle, &[1.0; 4], 0).0, VB_ERR_INVALID_PARAMETER);

    VB_free_index(handle);
}

#[test]
fn test_huge_k_with_small_buffers_is_rejected() {
    let handle = VB_create_flat_ip(4);
    assert_eq!(add(handle, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], &[1, 2]), VB_SUCCESS);

    let query = [1.0f32, 0.0, 0.0, 0.0];
    let mut scores = [7.0f32; 2];
    let mut ids = [7i64; 2];
    let rc = VB_search(
        handle,
        query.as_ptr(),
        query.len(),
        i32::MAX,
        scores.as_mut_ptr(),
        scores.len(),
        ids.as_mut_ptr(),
        ids.len(),
    );
    assert_eq!(rc, VB_ERR_DIMENSION_MISMATCH);
    // Buffers are untouched on failure.
    assert_eq!(ids, [7, 7]);

    // A large k with matching buffers pads with the sentinel.
    let (rc, _, ids) = search(handle, &query, 1000);
    assert_eq!(rc, VB_SUCCESS);
    assert_eq!(&ids[..2], &[1, 2]);
    assert!(ids[2..].iter().all(|&id| id == -1));

    assert_eq!(VB_free_index(handle), VB_SUCCESS);
}

#[test]
fn test_ivfpq_lifecycle_codes() {
    let handle = VB_create_ivfpq(4, 2, 2, 4);
    assert_eq!(VB_is_trained(handle), 0);

    let rows: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
    assert_eq!(add(handle, &rows[..4], &[1]), VB_ERR_NOT_TRAINED);
    assert_eq!(search(handle, &rows[..4], 1).0, VB_ERR_NOT_TRAINED);

    // One row is fewer than nlist.
    assert_eq!(
        VB_train(handle, rows.as_ptr(), 4),
        VB_ERR_INSUFFICIENT_TRAINING_DATA
    );
    assert_eq!(VB_train(handle, rows.as_ptr(), rows.len()), VB_SUCCESS);
    assert_eq!(VB_is_trained(handle), 1);

    assert_eq!(add(handle, &rows, &[1, 2, 3, 4]), VB_SUCCESS);
    assert_eq!(
        VB_train(handle, rows.as_ptr(), rows.len()),
        VB_ERR_ALREADY_POPULATED
    );

    VB_free_index(handle);
}

#[test]
fn test_write_and_read_index() {
    let dir = tempdir().expect("failed to create temp dir");
    let path = CString::new(dir.path().join("flat.vbix").to_str().unwrap()).unwrap();

    let handle = VB_create_flat_ip(4);
    add(handle, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], &[1, 2]);
    assert_eq!(VB_write_index(handle, path.as_ptr()), VB_SUCCESS);

    let loaded = VB_read_index(path.as_ptr());
    assert!(loaded > 0);
    assert_ne!(loaded, handle);
    assert_eq!(VB_ntotal(loaded), 2);

    let (rc, scores, ids) = search(loaded, &[1.0, 0.0, 0.0, 0.0], 2);
    assert_eq!(rc, VB_SUCCESS);
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(scores, vec![1.0, 0.0]);

    assert_eq!(VB_free_index(handle), VB_SUCCESS);
    assert_eq!(VB_free_index(loaded), VB_SUCCESS);
}

#[test]
fn test_read_missing_and_corrupt_files() {
    let dir = tempdir().expect("failed to create temp dir");

    let missing = CString::new(dir.path().join("nope.vbix").to_str().unwrap()).unwrap();
    assert_eq!(VB_read_index(missing.as_ptr()), VB_ERR_IO as i64);

    let garbage_path = dir.path().join("garbage.vbix");
    std::fs::write(&garbage_path, b"definitely not an index").unwrap();
    let garbage = CString::new(garbage_path.to_str().unwrap()).unwrap();
    assert_eq!(VB_read_index(garbage.as_ptr()), VB_ERR_CORRUPT_FILE as i64);
}
