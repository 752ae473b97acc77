// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Error types for index bridge operations.
//!
//! This module provides:
//! - [`BridgeError`] - The error enum returned by every fallible operation
//! - [`Result<T>`] - A type alias for `std::result::Result<T, BridgeError>`
//! - Status code constants returned by the C-ABI functions in [`crate::ffi`]

use crate::config::IndexKind;

// =============================================================================
// FFI Status Codes
// =============================================================================

/// Operation completed successfully.
pub const VB_SUCCESS: i32 = 1;

/// Generic/unspecified error.
pub const VB_ERR_GENERIC: i32 = 0;

/// Bad dimension or variant parameters (creation, runtime parameter value, `k`).
pub const VB_ERR_INVALID_PARAMETER: i32 = -1;

/// Handle is stale, already freed, or was never issued.
pub const VB_ERR_UNKNOWN_HANDLE: i32 = -2;

/// Parameter is not applicable to the index kind.
pub const VB_ERR_UNSUPPORTED_PARAMETER: i32 = -3;

/// Add or search attempted before the required training.
pub const VB_ERR_NOT_TRAINED: i32 = -4;

/// Re-training attempted after vectors were added.
pub const VB_ERR_ALREADY_POPULATED: i32 = -5;

/// Fewer training vectors than inverted lists.
pub const VB_ERR_INSUFFICIENT_TRAINING_DATA: i32 = -6;

/// Vector length differs from the index dimension, or array lengths disagree.
pub const VB_ERR_DIMENSION_MISMATCH: i32 = -7;

/// I/O error during file operations.
pub const VB_ERR_IO: i32 = -8;

/// Index file is truncated, corrupted, or not an index file.
pub const VB_ERR_CORRUPT_FILE: i32 = -9;

/// Index file was written by a newer format version.
pub const VB_ERR_UNSUPPORTED_VERSION: i32 = -10;

/// Null pointer or invalid UTF-8 argument.
pub const VB_ERR_NULL_POINTER: i32 = -11;

/// Internal panic occurred (should not happen in normal operation).
pub const VB_ERR_INTERNAL_PANIC: i32 = -100;

// =============================================================================
// Rust Error Types
// =============================================================================

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Every error the index bridge can report.
///
/// All variants are recoverable: the registry and unrelated handles stay
/// usable after any of them is returned.
///
/// # Examples
///
/// ```rust
/// use vecbridge::config::IndexSpec;
/// use vecbridge::index::IndexVariant;
/// use vecbridge::BridgeError;
///
/// let mut index = IndexVariant::new(&IndexSpec::Flat { dim: 4 }).unwrap();
///
/// // Two ids but only one 4-d vector
/// match index.add_with_ids(&[1.0, 0.0, 0.0, 0.0], &[1, 2]) {
///     Err(BridgeError::DimensionMismatch { .. }) => {}
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Bad dimension or variant parameters.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Handle is not registered (stale, freed, or foreign).
    #[error("Unknown handle: {0:#x}")]
    UnknownHandle(u64),

    /// Parameter not recognized by this index kind.
    #[error("Unsupported parameter '{name}' for {kind} index")]
    UnsupportedParameter {
        /// Kind of the index the parameter was applied to
        kind: IndexKind,
        /// Parameter name as supplied by the caller
        name: String,
    },

    /// The index must be trained first.
    #[error("Index is not trained")]
    NotTrained,

    /// Training is refused once vectors have been added.
    #[error("Index already holds {0} vectors; re-training is not allowed")]
    AlreadyPopulated(usize),

    /// Not enough vectors to seed every inverted list.
    #[error("Insufficient training data: need at least {required} vectors, got {got}")]
    InsufficientTrainingData {
        /// Minimum number of training vectors
        required: usize,
        /// Number of training vectors supplied
        got: usize,
    },

    /// Vector or array length mismatch.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Length actually supplied
        got: usize,
    },

    /// I/O error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Index file failed validation.
    #[error("Corrupt index file: {0}")]
    CorruptFile(String),

    /// Index file format is newer than this build understands.
    #[error("Unsupported index format version {found} (max supported {supported})")]
    UnsupportedVersion {
        /// Version found in the file header
        found: u16,
        /// Highest version this build can read
        supported: u16,
    },

    /// Malformed manifest or configuration document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Status code reported for this error across the C-ABI.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::InvalidParameter(_) => VB_ERR_INVALID_PARAMETER,
            BridgeError::UnknownHandle(_) => VB_ERR_UNKNOWN_HANDLE,
            BridgeError::UnsupportedParameter { .. } => VB_ERR_UNSUPPORTED_PARAMETER,
            BridgeError::NotTrained => VB_ERR_NOT_TRAINED,
            BridgeError::AlreadyPopulated(_) => VB_ERR_ALREADY_POPULATED,
            BridgeError::InsufficientTrainingData { .. } => VB_ERR_INSUFFICIENT_TRAINING_DATA,
            BridgeError::DimensionMismatch { .. } => VB_ERR_DIMENSION_MISMATCH,
            BridgeError::Io(_) => VB_ERR_IO,
            BridgeError::CorruptFile(_) => VB_ERR_CORRUPT_FILE,
            BridgeError::UnsupportedVersion { .. } => VB_ERR_UNSUPPORTED_VERSION,
            BridgeError::Json(_) => VB_ERR_GENERIC,
        }
    }
}
