//! # qrcm — one-way QR code bulk transfer
//!
//! Moves arbitrary payloads across an air gap by displaying them as a
//! time-sequenced grid of QR codes and optically capturing the stream on the
//! other side.  The channel is one-way and lossy, so the transport is built
//! around frames that survive on their own and a receiver that tolerates
//! loss, duplication and reordering.
//!
//! Transport guarantees (frozen in protocol v1):
//! - All numeric frame fields are big-endian; never negotiated
//! - Every frame is self-describing: magic, version, session id, block ids
//! - Every frame carries a mandatory CRC32; corrupt frames are dropped,
//!   counted, and never fatal
//! - The session header is a JSON descriptor repeated throughout the stream;
//!   the first valid header wins and later copies never overwrite it
//! - Superblock XOR parity recovers any single lost data block per group
//! - Completion is verified by a whole-payload SHA-256 before anything is
//!   handed to extraction; a failed digest delivers nothing

pub mod frame;
pub mod session;
pub mod fec;
pub mod prepare;
pub mod sender;
pub mod receiver;
pub mod extract;
pub mod link;

// Flat re-exports for the most common types.
pub use frame::{Frame, FrameError, FrameType, FRAME_HEADER_SIZE, FRAME_MAGIC,
                MAX_FRAME_PAYLOAD, PROTOCOL_VERSION};
pub use session::{estimate_total_chunks, new_session_id, Compression, FileEntry,
                  Packaging, SessionMetadata};
pub use prepare::{prepare_payload, ChunkReader, InputSource, PreparedPayload};
pub use sender::{build_metadata, header_frame, run_send, FrameStream, SendReport};
pub use receiver::{run_receive, Reassembler, ReceiveError, ReceiveOptions,
                   ReceiveReport, RxStats};
pub use extract::extract_payload;
pub use link::{GridDisplay, SymbolSource, TextLineDisplay, TextLineSource};
