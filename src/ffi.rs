// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! C-ABI Foreign Function Interface for the index bridge.
//!
//! Every function runs inside `catch_unwind`, so a panic is reported as
//! [`VB_ERR_INTERNAL_PANIC`] and never unwinds into the host.
//!
//! # Conventions
//!
//! - Functions returning a status return [`VB_SUCCESS`] (1) or a negative
//!   `VB_ERR_*` code.
//! - Functions returning a handle return a positive `i64` on success or a
//!   negative `VB_ERR_*` code.
//! - Buffers are passed as pointer + element count. A null pointer is only
//!   accepted together with a count of zero.
//! - Paths are null-terminated UTF-8 C strings.

// FFI functions intentionally take raw pointers without being marked unsafe
// because they handle null checks and use catch_unwind for safety
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::CStr;
use std::os::raw::c_char;

use tracing::error;

use crate::config::{IndexSpec, Parameter};
use crate::error::{Result, VB_ERR_INTERNAL_PANIC, VB_ERR_NULL_POINTER, VB_SUCCESS};
use crate::registry::{global, Handle};

// =============================================================================
// Argument helpers
// =============================================================================

/// Null pointer or invalid UTF-8 argument.
struct NullArgument;

/// Borrows a caller buffer. Null is only valid for an empty buffer.
unsafe fn slice_arg<'a, T>(ptr: *const T, len: usize) -> std::result::Result<&'a [T], NullArgument> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(NullArgument);
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Mutable variant of [`slice_arg`].
unsafe fn slice_arg_mut<'a, T>(
    ptr: *mut T,
    len: usize,
) -> std::result::Result<&'a mut [T], NullArgument> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(NullArgument);
    }
    Ok(std::slice::from_raw_parts_mut(ptr, len))
}

/// Borrows a C string argument.
unsafe fn str_arg<'a>(ptr: *const c_char) -> std::result::Result<&'a str, NullArgument> {
    if ptr.is_null() {
        return Err(NullArgument);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| NullArgument)
}

/// C `int` to a count; negative values become 0 and fail validation downstream.
fn count(value: i32) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => VB_SUCCESS,
        Err(e) => e.code(),
    }
}

fn handle_or_code(result: Result<Handle>) -> i64 {
    match result {
        Ok(handle) => handle.raw(),
        Err(e) => e.code() as i64,
    }
}

fn panicked(function: &str) -> i32 {
    error!(function, "panic caught at FFI boundary");
    VB_ERR_INTERNAL_PANIC
}

// =============================================================================
// Creation
// =============================================================================

/// Creates an exact inner-product index.
///
/// # Arguments
/// * `dim` - Vector dimension (must be positive)
///
/// # Returns
/// * Positive handle on success
/// * `-1` (VB_ERR_INVALID_PARAMETER) - Non-positive dimension
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
#[no_mangle]
pub extern "C" fn VB_create_flat_ip(dim: i32) -> i64 {
    std::panic::catch_unwind(|| handle_or_code(global().create(&IndexSpec::Flat { dim: count(dim) })))
        .unwrap_or_else(|_| panicked("VB_create_flat_ip") as i64)
}

/// Creates an untrained IVF-PQ index.
///
/// # Arguments
/// * `dim` - Vector dimension (must be positive)
/// * `nlist` - Number of inverted lists (must be positive)
/// * `m` - Number of PQ sub-quantizers (must divide `dim`)
/// * `nbits` - Bits per sub-quantizer code (1 to 8)
///
/// # Returns
/// * Positive handle on success
/// * `-1` (VB_ERR_INVALID_PARAMETER) - A parameter violates the constraints above
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
#[no_mangle]
pub extern "C" fn VB_create_ivfpq(dim: i32, nlist: i32, m: i32, nbits: i32) -> i64 {
    std::panic::catch_unwind(|| {
        let spec = IndexSpec::IvfPq {
            dim: count(dim),
            nlist: count(nlist),
            m: count(m),
            nbits: count(nbits),
        };
        handle_or_code(global().create(&spec))
    })
    .unwrap_or_else(|_| panicked("VB_create_ivfpq") as i64)
}

/// Creates an HNSW inner-product index.
///
/// # Arguments
/// * `dim` - Vector dimension (must be positive)
/// * `m` - Graph degree (must be positive)
///
/// # Returns
/// * Positive handle on success
/// * `-1` (VB_ERR_INVALID_PARAMETER) - Non-positive dimension or degree
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
#[no_mangle]
pub extern "C" fn VB_create_hnsw_ip(dim: i32, m: i32) -> i64 {
    std::panic::catch_unwind(|| {
        handle_or_code(global().create(&IndexSpec::Hnsw {
            dim: count(dim),
            m: count(m),
        }))
    })
    .unwrap_or_else(|_| panicked("VB_create_hnsw_ip") as i64)
}

// =============================================================================
// Runtime parameters
// =============================================================================

fn set_param(handle: i64, param: Parameter, value: i32) -> i32 {
    status(global().set(Handle::from_raw(handle), param, count(value)))
}

/// Sets the number of inverted lists probed per IVF-PQ query.
///
/// # Returns
/// * `1` (VB_SUCCESS) - Parameter updated
/// * `-1` (VB_ERR_INVALID_PARAMETER) - Value is not positive
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-3` (VB_ERR_UNSUPPORTED_PARAMETER) - Index is not IVF-PQ
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
#[no_mangle]
pub extern "C" fn VB_set_nprobe(handle: i64, nprobe: i32) -> i32 {
    std::panic::catch_unwind(|| set_param(handle, Parameter::NProbe, nprobe))
        .unwrap_or_else(|_| panicked("VB_set_nprobe"))
}

/// Sets the HNSW query-time candidate list size.
///
/// Returns the same codes as [`VB_set_nprobe`]; non-HNSW indexes report
/// `VB_ERR_UNSUPPORTED_PARAMETER`.
#[no_mangle]
pub extern "C" fn VB_set_ef_search(handle: i64, ef: i32) -> i32 {
    std::panic::catch_unwind(|| set_param(handle, Parameter::EfSearch, ef))
        .unwrap_or_else(|_| panicked("VB_set_ef_search"))
}

/// Sets the HNSW build-time candidate list size.
///
/// Returns the same codes as [`VB_set_nprobe`]; non-HNSW indexes report
/// `VB_ERR_UNSUPPORTED_PARAMETER`.
#[no_mangle]
pub extern "C" fn VB_set_ef_construction(handle: i64, ef: i32) -> i32 {
    std::panic::catch_unwind(|| set_param(handle, Parameter::EfConstruction, ef))
        .unwrap_or_else(|_| panicked("VB_set_ef_construction"))
}

/// Sets a runtime parameter by name (`nprobe`, `efSearch`, `efConstruction`).
///
/// # Returns
/// * `1` (VB_SUCCESS) - Parameter updated
/// * `-3` (VB_ERR_UNSUPPORTED_PARAMETER) - Unknown name, or not applicable to the index kind
/// * `-11` (VB_ERR_NULL_POINTER) - `name` is null or invalid UTF-8
/// * Other codes as for [`VB_set_nprobe`]
///
/// # Safety
/// * `name` must be a valid null-terminated C string or null
#[no_mangle]
pub extern "C" fn VB_set_parameter(handle: i64, name: *const c_char, value: i32) -> i32 {
    std::panic::catch_unwind(|| {
        let name = match unsafe { str_arg(name) } {
            Ok(s) => s,
            Err(NullArgument) => return VB_ERR_NULL_POINTER,
        };
        status(global().set_parameter(Handle::from_raw(handle), name, count(value)))
    })
    .unwrap_or_else(|_| panicked("VB_set_parameter"))
}

// =============================================================================
// Train / Add
// =============================================================================

/// Trains an index on `n_values / dim` vectors.
///
/// Flat and HNSW indexes need no training; the call only validates the
/// buffer length.
///
/// # Arguments
/// * `handle` - Index handle
/// * `vectors` - Row-major training vectors
/// * `n_values` - Number of `f32` values in `vectors` (a multiple of the dimension)
///
/// # Returns
/// * `1` (VB_SUCCESS) - Training succeeded
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-5` (VB_ERR_ALREADY_POPULATED) - IVF-PQ index already holds vectors
/// * `-6` (VB_ERR_INSUFFICIENT_TRAINING_DATA) - Fewer vectors than `nlist`
/// * `-7` (VB_ERR_DIMENSION_MISMATCH) - `n_values` is not a multiple of the dimension
/// * `-11` (VB_ERR_NULL_POINTER) - `vectors` is null with `n_values > 0`
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
///
/// # Safety
/// * `vectors` must point to at least `n_values` readable `f32` values
#[no_mangle]
pub extern "C" fn VB_train(handle: i64, vectors: *const f32, n_values: usize) -> i32 {
    std::panic::catch_unwind(|| {
        let vectors = match unsafe { slice_arg(vectors, n_values) } {
            Ok(v) => v,
            Err(NullArgument) => return VB_ERR_NULL_POINTER,
        };
        status(global().train(Handle::from_raw(handle), vectors))
    })
    .unwrap_or_else(|_| panicked("VB_train"))
}

/// Adds vectors with explicit external ids.
///
/// # Arguments
/// * `handle` - Index handle
/// * `vectors` - Row-major vectors
/// * `n_values` - Number of `f32` values in `vectors`
/// * `ids` - One external id per vector
/// * `n_ids` - Number of ids; `n_values` must equal `n_ids * dim`
///
/// # Returns
/// * `1` (VB_SUCCESS) - All vectors added
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-4` (VB_ERR_NOT_TRAINED) - IVF-PQ index has not been trained
/// * `-7` (VB_ERR_DIMENSION_MISMATCH) - `n_values != n_ids * dim`
/// * `-11` (VB_ERR_NULL_POINTER) - A non-empty buffer is null
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
///
/// # Safety
/// * `vectors` must point to at least `n_values` readable `f32` values
/// * `ids` must point to at least `n_ids` readable `i64` values
#[no_mangle]
pub extern "C" fn VB_add_with_ids(
    handle: i64,
    vectors: *const f32,
    n_values: usize,
    ids: *const i64,
    n_ids: usize,
) -> i32 {
    std::panic::catch_unwind(|| {
        let (vectors, ids) = match unsafe { (slice_arg(vectors, n_values), slice_arg(ids, n_ids)) } {
            (Ok(v), Ok(i)) => (v, i),
            _ => return VB_ERR_NULL_POINTER,
        };
        status(global().add_with_ids(Handle::from_raw(handle), vectors, ids))
    })
    .unwrap_or_else(|_| panicked("VB_add_with_ids"))
}

// =============================================================================
// Search
// =============================================================================

/// Searches `n_values / dim` queries, writing `k` results per query.
///
/// Results for query `q` occupy `out_distances[q*k..(q+1)*k]` and
/// `out_ids[q*k..(q+1)*k]`, best match first. Slots with no match hold
/// distance `-inf` and id `-1`. Buffer lengths are checked before the
/// search runs, and results are written straight into the caller's buffers.
///
/// # Arguments
/// * `handle` - Index handle
/// * `queries` - Row-major query vectors
/// * `n_values` - Number of `f32` values in `queries`
/// * `k` - Results per query (must be positive)
/// * `out_distances` / `out_distances_len` - Caller buffer of at least `num_queries * k`
/// * `out_ids` / `out_ids_len` - Caller buffer of at least `num_queries * k`
///
/// # Returns
/// * `1` (VB_SUCCESS) - Buffers filled
/// * `-1` (VB_ERR_INVALID_PARAMETER) - `k` is not positive
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-4` (VB_ERR_NOT_TRAINED) - IVF-PQ index has not been trained
/// * `-7` (VB_ERR_DIMENSION_MISMATCH) - Query length not a multiple of the dimension, or an output buffer is too short
/// * `-11` (VB_ERR_NULL_POINTER) - A non-empty buffer is null
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
///
/// # Safety
/// * Every pointer must be valid for its stated length
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn VB_search(
    handle: i64,
    queries: *const f32,
    n_values: usize,
    k: i32,
    out_distances: *mut f32,
    out_distances_len: usize,
    out_ids: *mut i64,
    out_ids_len: usize,
) -> i32 {
    std::panic::catch_unwind(|| {
        let queries = match unsafe { slice_arg(queries, n_values) } {
            Ok(q) => q,
            Err(NullArgument) => return VB_ERR_NULL_POINTER,
        };
        let (out_distances, out_ids) = match unsafe {
            (
                slice_arg_mut(out_distances, out_distances_len),
                slice_arg_mut(out_ids, out_ids_len),
            )
        } {
            (Ok(d), Ok(i)) => (d, i),
            _ => return VB_ERR_NULL_POINTER,
        };

        let result =
            global().search_into(Handle::from_raw(handle), queries, count(k), out_distances, out_ids);
        status(result.map(|_| ()))
    })
    .unwrap_or_else(|_| panicked("VB_search"))
}

// =============================================================================
// Persistence
// =============================================================================

/// Writes an index to `path` (temporary file + rename).
///
/// # Returns
/// * `1` (VB_SUCCESS) - File written
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-8` (VB_ERR_IO) - File could not be written
/// * `-11` (VB_ERR_NULL_POINTER) - `path` is null or invalid UTF-8
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
///
/// # Safety
/// * `path` must be a valid null-terminated C string or null
#[no_mangle]
pub extern "C" fn VB_write_index(handle: i64, path: *const c_char) -> i32 {
    std::panic::catch_unwind(|| {
        let path = match unsafe { str_arg(path) } {
            Ok(p) => p,
            Err(NullArgument) => return VB_ERR_NULL_POINTER,
        };
        status(global().write_index(Handle::from_raw(handle), path))
    })
    .unwrap_or_else(|_| panicked("VB_write_index"))
}

/// Reads an index file and registers it under a fresh handle.
///
/// # Returns
/// * Positive handle on success
/// * `-8` (VB_ERR_IO) - File could not be opened or read
/// * `-9` (VB_ERR_CORRUPT_FILE) - File is truncated, corrupted or not an index
/// * `-10` (VB_ERR_UNSUPPORTED_VERSION) - File written by a newer format version
/// * `-11` (VB_ERR_NULL_POINTER) - `path` is null or invalid UTF-8
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
///
/// # Safety
/// * `path` must be a valid null-terminated C string or null
#[no_mangle]
pub extern "C" fn VB_read_index(path: *const c_char) -> i64 {
    std::panic::catch_unwind(|| {
        let path = match unsafe { str_arg(path) } {
            Ok(p) => p,
            Err(NullArgument) => return VB_ERR_NULL_POINTER as i64,
        };
        handle_or_code(global().read_index(path))
    })
    .unwrap_or_else(|_| panicked("VB_read_index") as i64)
}

// =============================================================================
// Lifecycle / Introspection
// =============================================================================

/// Frees an index. Freeing a handle twice reports `VB_ERR_UNKNOWN_HANDLE`.
///
/// # Returns
/// * `1` (VB_SUCCESS) - Index released
/// * `-2` (VB_ERR_UNKNOWN_HANDLE) - Handle is not live
/// * `-100` (VB_ERR_INTERNAL_PANIC) - Internal panic occurred
#[no_mangle]
pub extern "C" fn VB_free_index(handle: i64) -> i32 {
    std::panic::catch_unwind(|| status(global().free(Handle::from_raw(handle))))
        .unwrap_or_else(|_| panicked("VB_free_index"))
}

/// Number of vectors stored in an index, or a negative code.
#[no_mangle]
pub extern "C" fn VB_ntotal(handle: i64) -> i64 {
    std::panic::catch_unwind(|| {
        match global().with_read(Handle::from_raw(handle), |index| index.ntotal()) {
            Ok(n) => n as i64,
            Err(e) => e.code() as i64,
        }
    })
    .unwrap_or_else(|_| panicked("VB_ntotal") as i64)
}

/// Vector dimension of an index, or a negative code.
#[no_mangle]
pub extern "C" fn VB_dimension(handle: i64) -> i64 {
    std::panic::catch_unwind(|| {
        match global().with_read(Handle::from_raw(handle), |index| index.dimension()) {
            Ok(d) => d as i64,
            Err(e) => e.code() as i64,
        }
    })
    .unwrap_or_else(|_| panicked("VB_dimension") as i64)
}

/// `1` if the index accepts add and search, `0` if it still needs
/// training, or a negative code.
#[no_mangle]
pub extern "C" fn VB_is_trained(handle: i64) -> i32 {
    std::panic::catch_unwind(|| {
        match global().with_read(Handle::from_raw(handle), |index| index.is_trained()) {
            Ok(trained) => trained as i32,
            Err(e) => e.code(),
        }
    })
    .unwrap_or_else(|_| panicked("VB_is_trained"))
}

/// Number of live handles.
#[no_mangle]
pub extern "C" fn VB_live_count() -> i64 {
    std::panic::catch_unwind(|| global().len() as i64)
        .unwrap_or_else(|_| panicked("VB_live_count") as i64)
}

/// Frees every live index and returns how many were released.
///
/// Intended for process teardown; every outstanding handle becomes
/// unknown.
#[no_mangle]
pub extern "C" fn VB_shutdown() -> i64 {
    std::panic::catch_unwind(|| global().clear() as i64)
        .unwrap_or_else(|_| panicked("VB_shutdown") as i64)
}

