// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Binary index file format.
//!
//! # File Layout
//!
//! ```text
//! +--------+---------+------+-----------+-------------+-----------+----------+
//! | "VBIX" | version | kind | dimension | payload_len |  payload  |  crc32   |
//! | 4 B    | u16 LE  | u8   | u32 LE    | u64 LE      | bincode   | u32 LE   |
//! +--------+---------+------+-----------+-------------+-----------+----------+
//! ```
//!
//! The payload is the kind-specific index record: parameters, the vector
//! store (ids and raw vectors) and every derived structure (centroids,
//! codebooks, inverted lists, graph links, level generator state). Nothing
//! is recomputed on load, so a restored index answers queries exactly like
//! the one that was written.
//!
//! Files are written to a uniquely named temporary file next to `<path>`,
//! synced, then renamed onto `<path>`. Concurrent writers to one path each
//! publish a complete file; the last rename wins.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tracing::info;

use crate::config::IndexKind;
use crate::error::{BridgeError, Result};
use crate::index::{FlatIndex, HnswIndex, IndexVariant, IvfPqIndex};

/// File magic.
pub const MAGIC: &[u8; 4] = b"VBIX";

/// Format version written by this build, and the newest it reads.
pub const FORMAT_VERSION: u16 = 1;

/// Bytes before the payload.
pub const HEADER_SIZE: usize = 4 + 2 + 1 + 4 + 8;

/// Bytes after the payload.
const TRAILER_SIZE: usize = 4;

/// Decoded fixed-size header of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format version
    pub version: u16,
    /// Index kind
    pub kind: IndexKind,
    /// Vector dimension
    pub dimension: u32,
    /// Payload length in bytes
    pub payload_len: u64,
}

fn corrupt(msg: impl Into<String>) -> BridgeError {
    BridgeError::CorruptFile(msg.into())
}

// =============================================================================
// Atomic file replacement
// =============================================================================

/// Renames `src` onto `dst`, replacing any existing file.
#[cfg(unix)]
pub(crate) fn atomic_replace(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::rename(src, dst)
}

#[cfg(windows)]
pub(crate) fn atomic_replace(src: &Path, dst: &Path) -> std::io::Result<()> {
    // rename fails on Windows while the destination exists or is locked
    const MAX_RETRIES: u32 = 3;

    for attempt in 0..MAX_RETRIES {
        match fs::rename(src, dst) {
            Ok(()) => return Ok(()),
            Err(_) if attempt < MAX_RETRIES - 1 => {
                let _ = fs::remove_file(dst);
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => return Err(e),
        }
    }
    fs::rename(src, dst)
}

/// Writes `bytes` to a fresh temporary file in the directory of `path`,
/// syncs it and renames it onto `path`.
///
/// On failure the temporary file is removed and `path` is untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("vbix");

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| BridgeError::Io(e.error))?;
    Ok(())
}

// =============================================================================
// Encoding
// =============================================================================

fn encode_payload(index: &IndexVariant) -> Result<Vec<u8>> {
    let encoded = match index {
        IndexVariant::Flat(f) => bincode::serialize(f),
        IndexVariant::IvfPq(ivf) => bincode::serialize(ivf),
        IndexVariant::Hnsw(h) => bincode::serialize(h),
    };
    encoded.map_err(|e| BridgeError::InvalidParameter(format!("cannot encode index: {}", e)))
}

/// Serializes an index to the on-disk byte layout.
pub fn encode(index: &IndexVariant) -> Result<Vec<u8>> {
    let dimension = u32::try_from(index.dimension()).map_err(|_| {
        BridgeError::InvalidParameter(format!("dimension {} exceeds u32", index.dimension()))
    })?;
    let payload = encode_payload(index)?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.push(index.kind().tag());
    bytes.extend_from_slice(&dimension.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(bytes)
}

/// Writes an index to `path` atomically.
///
/// # Errors
///
/// * `BridgeError::Io` - If the file cannot be created, written or renamed
pub fn write<P: AsRef<Path>>(index: &IndexVariant, path: P) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(index)?;
    write_atomic(path, &bytes)?;
    info!(
        path = %path.display(),
        kind = %index.kind(),
        ntotal = index.ntotal(),
        bytes = bytes.len(),
        "wrote index"
    );
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Parses and checks the fixed-size header.
pub fn decode_header(bytes: &[u8]) -> Result<IndexHeader> {
    if bytes.len() < MAGIC.len() + 2 {
        return Err(corrupt("file too short for header"));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version == 0 {
        return Err(corrupt("format version 0"));
    }
    if version > FORMAT_VERSION {
        return Err(BridgeError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    if bytes.len() < HEADER_SIZE {
        return Err(corrupt("file too short for header"));
    }

    let kind = IndexKind::from_tag(bytes[6])
        .ok_or_else(|| corrupt(format!("unknown index kind tag {}", bytes[6])))?;
    let dimension = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[11..19]);

    Ok(IndexHeader {
        version,
        kind,
        dimension,
        payload_len: u64::from_le_bytes(len_bytes),
    })
}

/// Rebuilds an index from the on-disk byte layout.
///
/// # Errors
///
/// * `BridgeError::CorruptFile` - On any structural problem
/// * `BridgeError::UnsupportedVersion` - If the file is newer than [`FORMAT_VERSION`]
pub fn decode(bytes: &[u8]) -> Result<IndexVariant> {
    let header = decode_header(bytes)?;

    let available = (bytes.len() - HEADER_SIZE) as u64;
    if header.payload_len > available.saturating_sub(TRAILER_SIZE as u64) {
        return Err(corrupt(format!(
            "payload length {} exceeds file size",
            header.payload_len
        )));
    }
    let payload_end = HEADER_SIZE + header.payload_len as usize;
    if bytes.len() != payload_end + TRAILER_SIZE {
        return Err(corrupt("trailing bytes after checksum"));
    }

    let payload = &bytes[HEADER_SIZE..payload_end];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[payload_end..]);
    if crc32fast::hash(payload) != u32::from_le_bytes(crc_bytes) {
        return Err(corrupt("checksum mismatch"));
    }

    let index = match header.kind {
        IndexKind::Flat => bincode::deserialize::<FlatIndex>(payload).map(IndexVariant::Flat),
        IndexKind::IvfPq => bincode::deserialize::<IvfPqIndex>(payload).map(IndexVariant::IvfPq),
        IndexKind::Hnsw => bincode::deserialize::<HnswIndex>(payload).map(IndexVariant::Hnsw),
    }
    .map_err(|e| corrupt(format!("undecodable payload: {}", e)))?;

    if index.dimension() != header.dimension as usize {
        return Err(corrupt(format!(
            "header dimension {} disagrees with payload dimension {}",
            header.dimension,
            index.dimension()
        )));
    }
    index.spec().validate().map_err(|e| corrupt(e.to_string()))?;
    index.check_consistency().map_err(corrupt)?;
    Ok(index)
}

/// Reads only the header of an index file.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<IndexHeader> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE);
    File::open(path)?
        .take(HEADER_SIZE as u64)
        .read_to_end(&mut bytes)?;
    decode_header(&bytes)
}

/// Reads an index from `path`.
///
/// # Errors
///
/// * `BridgeError::Io` - If the file cannot be opened or read
/// * `BridgeError::CorruptFile` - On any structural problem
/// * `BridgeError::UnsupportedVersion` - If the file is newer than [`FORMAT_VERSION`]
pub fn read<P: AsRef<Path>>(path: P) -> Result<IndexVariant> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let index = decode(&bytes)?;
    info!(
        path = %path.display(),
        kind = %index.kind(),
        ntotal = index.ntotal(),
        "read index"
    );
    Ok(index)
}
