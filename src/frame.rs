//! Frame format v1 — fully self-describing, mandatory checksum.
//!
//! # On-wire layout (39-byte header, all fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic           = "QRCM"  (4 ASCII bytes)
//!    4      1   version         = 1       (bumped on layout change)
//!    5      1   frame_type      0=SessionHeader 1=Data 2=Fec 3=Index
//!    6      1   flags           reserved bitfield
//!    7     16   session_id      opaque, stable for one transmission
//!   23      4   superblock_id   parity group index          (BE u32)
//!   27      4   block_id        absolute sequence number    (BE u32)
//!   31      4   total_blocks    data blocks in the session  (BE u32)
//!   35      2   blocks_in_super data blocks in this group   (BE u16)
//!   37      2   payload_len                                 (BE u16)
//!   39      N   payload
//!  39+N      4   crc32           CRC32(header ∥ payload) ← LAST  (BE u32)
//! ```
//!
//! # Endianness
//! Every numeric field is big-endian.  This is frozen for version 1; a
//! future little-endian variant would carry a distinct magic.
//!
//! # Checksum
//! `crc32` covers the full header and payload.  The optical link loses and
//! mangles symbols routinely, so every parse failure here is soft: the
//! receiver drops the frame and keeps pulling.  Nothing in this module
//! mutates receiver state.
//!
//! # Text wrapping
//! A QR symbol carries text, so the binary frame travels standard-alphabet
//! base64 with no line breaks.  Decoding is strict: non-alphabet bytes and
//! non-canonical padding are rejected before the binary layer ever runs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;
use thiserror::Error;

// ── Constants ────────────────────────────────────────────────────────────────

/// On-wire magic for every frame.
pub const FRAME_MAGIC: &[u8; 4] = b"QRCM";

/// Current frame layout version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed byte size of the frame header (excluding payload and trailing CRC).
pub const FRAME_HEADER_SIZE: usize = 39;

/// Byte size of the trailing CRC32.
pub const FRAME_CRC_SIZE: usize = 4;

/// Largest payload a single frame can carry (`payload_len` is a u16).
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

// ── Frame type ───────────────────────────────────────────────────────────────

/// Discriminates the role of a frame within the session stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Session descriptor — payload is the JSON metadata record.
    SessionHeader = 0,
    /// One chunk of the prepared payload.
    Data = 1,
    /// XOR parity over one superblock's data chunks.
    Fec = 2,
    /// Reserved — parseable but carries no semantics yet.
    Index = 3,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FrameType::SessionHeader),
            1 => Some(FrameType::Data),
            2 => Some(FrameType::Fec),
            3 => Some(FrameType::Index),
            _ => None,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalid frame magic — not a QRCM frame")]
    BadMagic,
    #[error("unsupported protocol version {0} (this build handles v{PROTOCOL_VERSION})")]
    UnsupportedVersion(u8),
    #[error("unknown frame_type {0}")]
    UnknownFrameType(u8),
    #[error("declared length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("frame CRC32 mismatch: expected {expected:#010x}, got {stored:#010x}")]
    Crc32Mismatch { expected: u32, stored: u32 },
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_PAYLOAD}-byte frame limit")]
    PayloadTooLarge(usize),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

// ── Frame ────────────────────────────────────────────────────────────────────

/// The atomic transport unit: one QR symbol carries exactly one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type:      FrameType,
    pub session_id:      [u8; 16],
    pub superblock_id:   u32,
    pub block_id:        u32,
    pub total_blocks:    u32,
    pub blocks_in_super: u16,
    pub flags:           u8,
    pub payload:         Vec<u8>,
}

impl Frame {
    /// Serialise header ∥ payload ∥ CRC32.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0..4].copy_from_slice(FRAME_MAGIC);
        header[4] = PROTOCOL_VERSION;
        header[5] = self.frame_type as u8;
        header[6] = self.flags;
        header[7..23].copy_from_slice(&self.session_id);
        BigEndian::write_u32(&mut header[23..27], self.superblock_id);
        BigEndian::write_u32(&mut header[27..31], self.block_id);
        BigEndian::write_u32(&mut header[31..35], self.total_blocks);
        BigEndian::write_u16(&mut header[35..37], self.blocks_in_super);
        BigEndian::write_u16(&mut header[37..39], self.payload.len() as u16);

        let mut h = Hasher::new();
        h.update(&header);
        h.update(&self.payload);
        let crc = h.finalize();

        let mut out =
            Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len() + FRAME_CRC_SIZE);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Parse and validate a binary frame.
    ///
    /// Returns `Err` on any mismatch — magic, version, declared length, or
    /// CRC32.  The caller MUST treat every error as a dropped frame; none of
    /// them is fatal to the session.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE + FRAME_CRC_SIZE {
            return Err(FrameError::TooShort(data.len()));
        }

        if &data[0..4] != FRAME_MAGIC {
            return Err(FrameError::BadMagic);
        }

        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        // Declared payload length must account for the buffer exactly.
        let payload_len = BigEndian::read_u16(&data[37..39]) as usize;
        let declared = FRAME_HEADER_SIZE + payload_len + FRAME_CRC_SIZE;
        if data.len() != declared {
            return Err(FrameError::LengthMismatch { declared, actual: data.len() });
        }

        // CRC32 over header ∥ payload.
        let payload_end = FRAME_HEADER_SIZE + payload_len;
        let stored = BigEndian::read_u32(&data[payload_end..payload_end + 4]);
        let mut h = Hasher::new();
        h.update(&data[..payload_end]);
        let expected = h.finalize();
        if stored != expected {
            return Err(FrameError::Crc32Mismatch { expected, stored });
        }

        let frame_type =
            FrameType::from_u8(data[5]).ok_or(FrameError::UnknownFrameType(data[5]))?;
        let mut session_id = [0u8; 16];
        session_id.copy_from_slice(&data[7..23]);

        Ok(Self {
            frame_type,
            session_id,
            superblock_id:   BigEndian::read_u32(&data[23..27]),
            block_id:        BigEndian::read_u32(&data[27..31]),
            total_blocks:    BigEndian::read_u32(&data[31..35]),
            blocks_in_super: BigEndian::read_u16(&data[35..37]),
            flags:           data[6],
            payload:         data[FRAME_HEADER_SIZE..payload_end].to_vec(),
        })
    }

    /// Encode to the textual QR symbol payload (standard base64, no breaks).
    pub fn to_b64(&self) -> Result<String, FrameError> {
        Ok(BASE64.encode(self.to_bytes()?))
    }

    /// Strict decode from a QR symbol payload.
    ///
    /// Rejects non-alphabet characters and non-canonical padding before the
    /// binary checks run.
    pub fn from_b64(text: &str) -> Result<Self, FrameError> {
        let raw = BASE64.decode(text)?;
        Self::from_bytes(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame {
            frame_type:      FrameType::Data,
            session_id:      [0x5A; 16],
            superblock_id:   3,
            block_id:        61,
            total_blocks:    128,
            blocks_in_super: 20,
            flags:           0,
            payload:         b"the quick brown fox".to_vec(),
        }
    }

    #[test]
    fn roundtrip_binary_and_b64() {
        let frame = sample();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
        assert_eq!(Frame::from_b64(&frame.to_b64().unwrap()).unwrap(), frame);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(Frame::from_bytes(&bytes), Err(FrameError::BadMagic)));
    }

    #[test]
    fn payload_corruption_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[FRAME_HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(FrameError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn truncation_rejected() {
        let bytes = sample().to_bytes().unwrap();
        assert!(Frame::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(matches!(
            Frame::from_bytes(&bytes[..10]),
            Err(FrameError::TooShort(10))
        ));
    }

    #[test]
    fn strict_base64() {
        let text = sample().to_b64().unwrap();
        assert!(Frame::from_b64(&format!("{text}!")).is_err());
        assert!(Frame::from_b64(text.trim_end_matches('=')).is_err());
    }
}
