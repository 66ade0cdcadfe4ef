//! Session planner — turns a staged payload into an ordered frame sequence.
//!
//! # Emission order
//!
//! 1. `header_repeat` copies of the SESSION_HEADER frame (≥ 1), so a receiver
//!    that joins late in the acquisition window still adopts the session.
//! 2. Per superblock: up to `superblock_data` DATA frames with monotonically
//!    increasing `block_id`, then `redundancy` FEC frames.  Parity frames are
//!    stamped with the block ids directly after the superblock's data ids —
//!    diagnostic only; the receiver routes parity by `superblock_id`.
//! 3. After a superblock, the header is re-emitted whenever the data block
//!    counter is a positive multiple of `header_interval`, so receivers that
//!    start mid-stream can still resync.
//!
//! The stream is pull-driven and lazy: chunks are read from the staged file
//! only when the consumer asks for the next frame, and the sender never
//! observes capture or retries anything.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};

use log::info;

use crate::fec;
use crate::frame::{Frame, FrameType};
use crate::link::GridDisplay;
use crate::prepare::{ChunkReader, PreparedPayload};
use crate::session::{estimate_total_chunks, new_session_id, SessionMetadata};

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_CHUNK_SIZE:      u16 = 512;
pub const DEFAULT_SUPERBLOCK_DATA: u16 = 20;
pub const DEFAULT_REDUNDANCY:      u16 = 1;
pub const DEFAULT_HEADER_REPEAT:   u32 = 10;
pub const DEFAULT_HEADER_INTERVAL: u32 = 100;

// ── Metadata construction ────────────────────────────────────────────────────

/// Build the session descriptor for a staged payload.
pub fn build_metadata(
    payload:         &PreparedPayload,
    chunk_size:      u16,
    superblock_data: u16,
    redundancy:      u16,
) -> SessionMetadata {
    SessionMetadata {
        session_id:      new_session_id(),
        total_size:      payload.size,
        chunk_size,
        total_chunks:    estimate_total_chunks(payload.size, chunk_size),
        superblock_data,
        redundancy,
        sha256:          payload.sha256.clone(),
        packaging:       payload.packaging,
        compression:     payload.compression,
        root_name:       payload.root_name.clone(),
        file_count:      payload.file_count(),
    }
}

/// The SESSION_HEADER frame: its payload is the JSON metadata record.
pub fn header_frame(meta: &SessionMetadata) -> io::Result<Frame> {
    let payload = meta
        .to_json()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Frame {
        frame_type:      FrameType::SessionHeader,
        session_id:      meta.session_bytes(),
        superblock_id:   0,
        block_id:        0,
        total_blocks:    meta.total_chunks,
        blocks_in_super: 0,
        flags:           0,
        payload,
    })
}

// ── Frame stream ─────────────────────────────────────────────────────────────

/// Lazy frame sequence for one session.
///
/// Yields `io::Result<Frame>`; the only failure source is reading the staged
/// payload, which ends the stream.
pub struct FrameStream<R: Read> {
    meta:            SessionMetadata,
    chunks:          ChunkReader<R>,
    header:          Frame,
    pending:         VecDeque<Frame>,
    next_block_id:   u32,
    next_superblock: u32,
    header_interval: u32,
    exhausted:       bool,
}

impl FrameStream<BufReader<File>> {
    /// Stream a staged payload.  The payload file must outlive the stream.
    pub fn open(
        payload:         &PreparedPayload,
        meta:            &SessionMetadata,
        header_repeat:   u32,
        header_interval: u32,
    ) -> io::Result<Self> {
        let chunks = ChunkReader::open(payload.path(), usize::from(meta.chunk_size))?;
        Self::new(chunks, meta.clone(), header_repeat, header_interval)
    }
}

impl<R: Read> FrameStream<R> {
    pub fn new(
        chunks:          ChunkReader<R>,
        meta:            SessionMetadata,
        header_repeat:   u32,
        header_interval: u32,
    ) -> io::Result<Self> {
        let header = header_frame(&meta)?;
        let mut pending = VecDeque::new();
        for _ in 0..header_repeat.max(1) {
            pending.push_back(header.clone());
        }
        Ok(Self {
            meta,
            chunks,
            header,
            pending,
            next_block_id: 0,
            next_superblock: 0,
            header_interval,
            exhausted: false,
        })
    }

    /// Read one superblock's worth of chunks and queue its frames.
    /// Marks the stream exhausted at end of payload.
    fn fill_superblock(&mut self) -> io::Result<()> {
        let mut data_blocks: Vec<Vec<u8>> = Vec::with_capacity(usize::from(self.meta.superblock_data));
        for _ in 0..self.meta.superblock_data {
            match self.chunks.next() {
                Some(Ok(block)) => data_blocks.push(block),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        if data_blocks.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        let blocks_in_super = data_blocks.len() as u16;
        let session_id = self.meta.session_bytes();
        let parity = fec::parity_copies(&data_blocks, self.meta.redundancy);

        for block in data_blocks {
            self.pending.push_back(Frame {
                frame_type:      FrameType::Data,
                session_id,
                superblock_id:   self.next_superblock,
                block_id:        self.next_block_id,
                total_blocks:    self.meta.total_chunks,
                blocks_in_super,
                flags:           0,
                payload:         block,
            });
            self.next_block_id += 1;
        }

        for (parity_idx, block) in parity.into_iter().enumerate() {
            self.pending.push_back(Frame {
                frame_type:      FrameType::Fec,
                session_id,
                superblock_id:   self.next_superblock,
                block_id:        self.next_block_id + parity_idx as u32,
                total_blocks:    self.meta.total_chunks,
                blocks_in_super,
                flags:           0,
                payload:         block,
            });
        }

        self.next_superblock += 1;

        if self.header_interval > 0
            && self.next_block_id > 0
            && self.next_block_id % self.header_interval == 0
        {
            self.pending.push_back(self.header.clone());
        }
        Ok(())
    }
}

impl<R: Read> Iterator for FrameStream<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill_superblock() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

// ── Send pump ────────────────────────────────────────────────────────────────

/// What the send loop emitted before finishing or being aborted.
#[derive(Debug, Default, Clone)]
pub struct SendReport {
    pub header_frames: u64,
    pub data_frames:   u64,
    pub fec_frames:    u64,
    pub batches:       u64,
    /// The display collaborator ended the session early.
    pub aborted:       bool,
}

/// Drive the frame stream through a display collaborator in grid batches.
///
/// Each batch holds up to `cells` encoded symbols (`rows·cols` of the grid).
/// A display that returns `false` aborts cleanly: remaining frames are
/// discarded and nothing is retried.
pub fn run_send<R: Read, D: GridDisplay>(
    stream:  FrameStream<R>,
    display: &mut D,
    cells:   usize,
) -> io::Result<SendReport> {
    let cells = cells.max(1);
    let mut report = SendReport::default();
    let mut batch: Vec<String> = Vec::with_capacity(cells);

    for frame in stream {
        let frame = frame?;
        match frame.frame_type {
            FrameType::SessionHeader => report.header_frames += 1,
            FrameType::Data => report.data_frames += 1,
            FrameType::Fec => report.fec_frames += 1,
            FrameType::Index => {}
        }
        let symbol = frame
            .to_b64()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        batch.push(symbol);
        if batch.len() == cells {
            report.batches += 1;
            if !display.show_batch(&batch)? {
                report.aborted = true;
                info!("display closed; session ended early");
                return Ok(report);
            }
            batch.clear();
        }
    }

    if !batch.is_empty() {
        report.batches += 1;
        if !display.show_batch(&batch)? {
            report.aborted = true;
        }
    }
    display.finish()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Packaging;
    use std::io::Cursor;

    fn meta_for(total_size: u64, chunk_size: u16, superblock_data: u16, redundancy: u16) -> SessionMetadata {
        SessionMetadata {
            session_id:      new_session_id(),
            total_size,
            chunk_size,
            total_chunks:    estimate_total_chunks(total_size, chunk_size),
            superblock_data,
            redundancy,
            sha256:          "00".repeat(32),
            packaging:       Packaging::Raw,
            compression:     crate::session::Compression::None,
            root_name:       "t".into(),
            file_count:      1,
        }
    }

    fn frames_for(data: Vec<u8>, meta: &SessionMetadata, repeat: u32, interval: u32) -> Vec<Frame> {
        let chunks = ChunkReader::new(Cursor::new(data), usize::from(meta.chunk_size));
        FrameStream::new(chunks, meta.clone(), repeat, interval)
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
    }

    #[test]
    fn emission_order_and_parity_ids() {
        let meta = meta_for(1500, 500, 3, 1);
        let frames = frames_for(vec![9u8; 1500], &meta, 2, 0);

        let types: Vec<FrameType> = frames.iter().map(|f| f.frame_type).collect();
        assert_eq!(
            types,
            vec![
                FrameType::SessionHeader,
                FrameType::SessionHeader,
                FrameType::Data,
                FrameType::Data,
                FrameType::Data,
                FrameType::Fec,
            ]
        );
        // Parity ids sit directly after the superblock's data ids.
        assert_eq!(frames[5].block_id, 3);
        assert_eq!(frames[5].superblock_id, 0);
        assert_eq!(frames[5].payload.len(), 500);
    }

    #[test]
    fn header_reinjection_cadence() {
        // 8 data blocks, superblocks of 2, header every 4 data blocks.
        let meta = meta_for(8, 1, 2, 0);
        let frames = frames_for((0..8u8).collect(), &meta, 1, 4);
        let headers: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.frame_type == FrameType::SessionHeader)
            .map(|(i, _)| i)
            .collect();
        // Initial header, then one after blocks 0..4 and one after 4..8.
        assert_eq!(headers, vec![0, 5, 10]);
    }

    #[test]
    fn empty_payload_emits_headers_only() {
        let meta = meta_for(0, 512, 20, 1);
        let frames = frames_for(Vec::new(), &meta, 3, 100);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.frame_type == FrameType::SessionHeader));
    }
}
