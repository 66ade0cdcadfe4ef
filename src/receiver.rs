//! Reassembler — rebuild the payload from whatever frames survived the link.
//!
//! # State machine
//!
//! The capture loop feeds every decoded frame into [`Reassembler::ingest`]:
//!
//! - SESSION_HEADER: the first valid header is adopted and fixes the session
//!   id and metadata for good; matching re-receipts only bump a counter and
//!   foreign sessions are dropped.
//! - DATA: stored once per `block_id`, then the frame's superblock gets a
//!   recovery attempt.
//! - FEC: appended to the superblock's parity list, then a recovery attempt.
//! - INDEX: reserved — parsed by the codec, dropped here.
//!
//! Every drop is counted by cause in [`RxStats`]; none of them is fatal.
//! Only session-scoped outcomes (no header, incomplete capture, digest
//! mismatch) surface as [`ReceiveError`].
//!
//! # Recovery
//!
//! A superblock with exactly one missing data block and at least one parity
//! copy is repaired by XOR and the result truncated to the block's expected
//! length (`chunk_size`, or the tail length for the final block).  Parity for
//! a complete superblock is discarded.
//!
//! # Completion
//!
//! The session is complete when every data block id below `total_chunks` is
//! recorded.  The blocks are concatenated in ascending id order to a
//! temporary file, its SHA-256 must match the adopted metadata, and only then
//! is the result handed to extraction.  The temporary is removed on every
//! exit path.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::extract::extract_payload;
use crate::fec;
use crate::frame::{Frame, FrameType};
use crate::link::SymbolSource;
use crate::session::{estimate_total_chunks, SessionMetadata};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("no session header observed; cannot assemble payload")]
    NoHeader,
    #[error("capture ended with {received}/{total} blocks; missing blocks unrecoverable")]
    Incomplete { received: u32, total: u32 },
    #[error("payload SHA-256 mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("extraction failed: {0}")]
    Extraction(io::Error),
}

// ── Per-cause drop accounting ────────────────────────────────────────────────

/// Frame-level diagnostics.  Per-frame failures are never fatal; they land
/// here and go into the operator summary.
#[derive(Debug, Default, Clone)]
pub struct RxStats {
    pub observations:       u64,
    pub headers_seen:       u64,
    pub data_frames:        u64,
    pub fec_frames:         u64,
    pub index_frames:       u64,
    pub decode_failures:    u64,
    pub bad_headers:        u64,
    pub session_mismatches: u64,
    pub duplicate_blocks:   u64,
    pub preheader_frames:   u64,
    pub out_of_range:       u64,
    pub recovered_blocks:   u64,
}

impl RxStats {
    pub fn summary(&self) -> String {
        format!(
            "{} headers, {} data, {} fec; dropped: {} undecodable, {} bad headers, \
             {} foreign session, {} duplicate, {} before header, {} out of range; \
             {} recovered by parity",
            self.headers_seen,
            self.data_frames,
            self.fec_frames,
            self.decode_failures,
            self.bad_headers,
            self.session_mismatches,
            self.duplicate_blocks,
            self.preheader_frames,
            self.out_of_range,
            self.recovered_blocks,
        )
    }
}

// ── Reassembler ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Reassembler {
    meta:          Option<SessionMetadata>,
    session_id:    Option<[u8; 16]>,
    data_blocks:   BTreeMap<u32, Vec<u8>>,
    parity_blocks: HashMap<u32, Vec<Vec<u8>>>,
    pub stats:     RxStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The adopted session metadata, if a header has been seen.
    pub fn meta(&self) -> Option<&SessionMetadata> {
        self.meta.as_ref()
    }

    pub fn received_blocks(&self) -> u32 {
        self.data_blocks.len() as u32
    }

    /// Feed one decoded frame through the state machine.
    pub fn ingest(&mut self, frame: Frame) {
        if frame.frame_type == FrameType::SessionHeader {
            self.handle_header(frame);
            return;
        }

        let Some(session_id) = self.session_id else {
            self.stats.preheader_frames += 1;
            return;
        };
        if frame.session_id != session_id {
            self.stats.session_mismatches += 1;
            return;
        }

        match frame.frame_type {
            FrameType::Data => {
                self.stats.data_frames += 1;
                let total = self.meta.as_ref().map_or(0, |m| m.total_chunks);
                if frame.block_id >= total {
                    // A data id past the session's block count cannot belong
                    // to the payload; storing it would fake completion.
                    self.stats.out_of_range += 1;
                } else if self.data_blocks.contains_key(&frame.block_id) {
                    self.stats.duplicate_blocks += 1;
                } else {
                    self.data_blocks.insert(frame.block_id, frame.payload);
                    self.try_recover(frame.superblock_id);
                }
            }
            FrameType::Fec => {
                self.stats.fec_frames += 1;
                self.parity_blocks
                    .entry(frame.superblock_id)
                    .or_default()
                    .push(frame.payload);
                self.try_recover(frame.superblock_id);
            }
            FrameType::Index => {
                self.stats.index_frames += 1;
            }
            FrameType::SessionHeader => {}
        }
    }

    fn handle_header(&mut self, frame: Frame) {
        let meta = match SessionMetadata::from_json(&frame.payload) {
            Ok(m) => m,
            Err(e) => {
                debug!("dropping unparseable session header: {e}");
                self.stats.bad_headers += 1;
                return;
            }
        };
        // A header whose geometry is self-inconsistent cannot describe a real
        // session; treat it like a parse failure.
        let geometry_ok = if meta.total_size == 0 {
            meta.total_chunks == 0
        } else {
            meta.chunk_size > 0
                && estimate_total_chunks(meta.total_size, meta.chunk_size) == meta.total_chunks
        };
        if !geometry_ok {
            debug!("dropping session header with inconsistent block geometry");
            self.stats.bad_headers += 1;
            return;
        }
        match self.session_id {
            None => {
                info!(
                    "adopted session {} ({} bytes, {} blocks)",
                    meta.session_id.simple(),
                    meta.total_size,
                    meta.total_chunks
                );
                self.session_id = Some(frame.session_id);
                self.meta = Some(meta);
                self.stats.headers_seen = 1;
            }
            Some(sid) if sid == frame.session_id => {
                // The first adopted header wins; re-receipts are diagnostics.
                self.stats.headers_seen += 1;
            }
            Some(_) => {
                self.stats.session_mismatches += 1;
            }
        }
    }

    /// Repair the superblock if exactly one data block is missing and a
    /// parity copy survived.
    fn try_recover(&mut self, superblock_id: u32) {
        let Some(meta) = &self.meta else { return };
        let range = meta.superblock_range(superblock_id);

        let missing: Vec<u32> = range
            .clone()
            .filter(|id| !self.data_blocks.contains_key(id))
            .collect();
        if missing.is_empty() {
            // Superblock complete — its parity is dead weight now.
            self.parity_blocks.remove(&superblock_id);
            return;
        }
        if missing.len() != 1 {
            return;
        }
        let Some(parity) = self.parity_blocks.get(&superblock_id) else {
            return;
        };

        let present: Vec<&[u8]> = range
            .filter_map(|id| self.data_blocks.get(&id).map(Vec::as_slice))
            .collect();
        let Some(mut recovered) = fec::recover_single(&present, &parity[0], missing.len())
        else {
            return;
        };

        let block_id = missing[0];
        recovered.truncate(meta.expected_block_len(block_id));
        self.data_blocks.insert(block_id, recovered);
        self.stats.recovered_blocks += 1;
        debug!("recovered block {block_id} of superblock {superblock_id}");
        self.parity_blocks.remove(&superblock_id);
    }

    pub fn is_complete(&self) -> bool {
        match &self.meta {
            Some(meta) => self.data_blocks.len() as u64 >= u64::from(meta.total_chunks),
            None => false,
        }
    }

    /// Human-readable progress for periodic reporting.
    pub fn progress(&self) -> String {
        match &self.meta {
            None => "waiting for session header".to_owned(),
            Some(meta) if meta.total_chunks == 0 => "0/0 blocks (100.0%)".to_owned(),
            Some(meta) => format!(
                "{}/{} blocks ({:.1}%)",
                self.data_blocks.len(),
                meta.total_chunks,
                self.data_blocks.len() as f64 / f64::from(meta.total_chunks) * 100.0
            ),
        }
    }

    /// Concatenate blocks in ascending id order, returning the hex SHA-256 of
    /// what was written.
    pub fn write_payload<W: Write>(&self, mut dst: W) -> Result<String, ReceiveError> {
        let meta = self.meta.as_ref().ok_or(ReceiveError::NoHeader)?;
        let mut hasher = Sha256::new();
        for id in 0..meta.total_chunks {
            let block = self.data_blocks.get(&id).ok_or(ReceiveError::Incomplete {
                received: self.received_blocks(),
                total:    meta.total_chunks,
            })?;
            dst.write_all(block)?;
            hasher.update(block);
        }
        dst.flush()?;
        Ok(hex::encode(hasher.finalize()))
    }
}

// ── Receive pump ─────────────────────────────────────────────────────────────

/// How the reassembled payload should be delivered.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub output:  PathBuf,
    /// Un-tar / gunzip packaged payloads instead of copying them verbatim.
    pub extract: bool,
}

/// Verified delivery: where the result landed, under which session.
#[derive(Debug)]
pub struct ReceiveReport {
    pub output: PathBuf,
    pub meta:   SessionMetadata,
    pub stats:  RxStats,
}

/// Pull observations until the session completes or the capture ends, then
/// verify and deliver.
pub fn run_receive<S: SymbolSource>(
    source:  &mut S,
    options: &ReceiveOptions,
) -> Result<ReceiveReport, ReceiveError> {
    let mut asm = Reassembler::new();
    let mut last_report = Instant::now();

    while let Some(symbols) = source.next_observation()? {
        asm.stats.observations += 1;
        for text in symbols {
            if text.is_empty() {
                continue;
            }
            match Frame::from_b64(&text) {
                Ok(frame) => asm.ingest(frame),
                Err(e) => {
                    asm.stats.decode_failures += 1;
                    debug!("dropped symbol: {e}");
                }
            }
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("{}", asm.progress());
            last_report = Instant::now();
        }
        if asm.is_complete() {
            break;
        }
    }

    deliver(&asm, options)
}

/// Concatenate, verify, extract.  The concatenation temporary is removed on
/// every exit path by its drop guard.
fn deliver(asm: &Reassembler, options: &ReceiveOptions) -> Result<ReceiveReport, ReceiveError> {
    let meta = asm.meta().ok_or(ReceiveError::NoHeader)?;
    if !asm.is_complete() {
        return Err(ReceiveError::Incomplete {
            received: asm.received_blocks(),
            total:    meta.total_chunks,
        });
    }

    let (file, temp_path) = NamedTempFile::new()?.into_parts();
    let mut writer = BufWriter::new(file);
    let actual = asm.write_payload(&mut writer)?;
    drop(writer);

    if actual != meta.sha256 {
        return Err(ReceiveError::DigestMismatch {
            expected: meta.sha256.clone(),
            actual,
        });
    }

    let output = extract_payload(meta, &temp_path, &options.output, options.extract)
        .map_err(ReceiveError::Extraction)?;

    Ok(ReceiveReport {
        output,
        meta: meta.clone(),
        stats: asm.stats.clone(),
    })
}
