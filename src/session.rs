//! Session model — the metadata record that travels in SESSION_HEADER frames.
//!
//! The record is JSON on the wire (`session_id` as 32 lowercase hex chars,
//! no dashes).  All keys are written on send; `root_name` and `file_count`
//! are tolerated as absent on receive and default to `""` and `0`.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Payload shape ────────────────────────────────────────────────────────────

/// How the prepared payload was packaged before chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    /// A single file's bytes, verbatim.
    Raw,
    /// A tar archive under a single top-level entry named `root_name`.
    Tar,
}

/// Whether the prepared payload was gzip-wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gz,
}

// ── Session metadata ─────────────────────────────────────────────────────────

/// The session descriptor, shared read-only by both ends after adoption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(with = "uuid::serde::simple")]
    pub session_id:      Uuid,
    pub total_size:      u64,
    pub chunk_size:      u16,
    pub total_chunks:    u32,
    /// Data blocks per superblock.
    pub superblock_data: u16,
    /// Parity blocks per superblock.
    pub redundancy:      u16,
    /// Hex SHA-256 of the prepared payload (post-compression).
    pub sha256:          String,
    pub packaging:       Packaging,
    pub compression:     Compression,
    #[serde(default)]
    pub root_name:       String,
    #[serde(default)]
    pub file_count:      u32,
}

impl SessionMetadata {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// The raw 16 bytes carried in every frame of this session.
    #[inline]
    pub fn session_bytes(&self) -> [u8; 16] {
        *self.session_id.as_bytes()
    }

    /// Data-block id range covered by one superblock, clamped to the
    /// session's block count.  Empty for superblocks past the end.
    pub fn superblock_range(&self, superblock_id: u32) -> Range<u32> {
        let width = u64::from(self.superblock_data);
        let start = u64::from(superblock_id) * width;
        let end = (start + width).min(u64::from(self.total_chunks));
        let start = start.min(u64::from(self.total_chunks));
        start as u32..end as u32
    }

    /// Exact byte length of a data block: `chunk_size` everywhere except the
    /// final block, which carries the tail of the payload.
    pub fn expected_block_len(&self, block_id: u32) -> usize {
        if block_id + 1 < self.total_chunks {
            return usize::from(self.chunk_size);
        }
        let full = u64::from(self.chunk_size) * u64::from(self.total_chunks - 1);
        (self.total_size - full) as usize
    }
}

/// `ceil(total_size / chunk_size)`.
pub fn estimate_total_chunks(total_size: u64, chunk_size: u16) -> u32 {
    let chunk = u64::from(chunk_size);
    ((total_size + chunk - 1) / chunk) as u32
}

pub fn new_session_id() -> Uuid {
    Uuid::new_v4()
}

// ── File inventory ───────────────────────────────────────────────────────────

/// One entry of the preparer's per-file inventory (sender-local; only the
/// count crosses the wire).
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the payload root.
    pub path:  String,
    pub size:  u64,
    /// Seconds since the Unix epoch; 0 when unavailable.
    pub mtime: i64,
    pub mode:  Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMetadata {
        SessionMetadata {
            session_id:      new_session_id(),
            total_size:      1300,
            chunk_size:      500,
            total_chunks:    3,
            superblock_data: 3,
            redundancy:      1,
            sha256:          "00".repeat(32),
            packaging:       Packaging::Raw,
            compression:     Compression::None,
            root_name:       "sample.bin".into(),
            file_count:      1,
        }
    }

    #[test]
    fn json_roundtrip_and_hex_session_id() {
        let m = meta();
        let json = m.to_json().unwrap();
        let text = std::str::from_utf8(&json).unwrap();
        assert!(text.contains(&m.session_id.simple().to_string()));
        assert!(!text.contains('-'));
        assert_eq!(SessionMetadata::from_json(&json).unwrap(), m);
    }

    #[test]
    fn optional_keys_default_on_receive() {
        let m = meta();
        let mut value: serde_json::Value = serde_json::from_slice(&m.to_json().unwrap()).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("root_name");
        obj.remove("file_count");
        let parsed = SessionMetadata::from_json(value.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.root_name, "");
        assert_eq!(parsed.file_count, 0);
    }

    #[test]
    fn block_geometry() {
        let m = meta();
        assert_eq!(estimate_total_chunks(1300, 500), 3);
        assert_eq!(estimate_total_chunks(0, 500), 0);
        assert_eq!(m.superblock_range(0), 0..3);
        assert_eq!(m.superblock_range(1), 3..3);
        assert_eq!(m.expected_block_len(0), 500);
        assert_eq!(m.expected_block_len(2), 300);
    }
}
