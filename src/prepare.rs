//! Payload staging — normalise any input into one streamable byte file.
//!
//! The transport only ever moves a single flat byte sequence, so every input
//! shape funnels into a temporary staging file first:
//!
//! - directory → tar archive under a single top-level entry (`root_name`),
//!   optionally gzip-wrapped
//! - single file → verbatim copy, optionally gzip-wrapped
//! - stdin (`-`) → same as a file, `root_name` defaults to `stdin.bin`
//!
//! The staging file is owned by the returned [`PreparedPayload`] and removed
//! on drop — on every exit path, including faults.  The SHA-256 recorded in
//! the session metadata is computed over the *final* staged bytes, i.e. after
//! compression, so the receiver can verify without re-packing anything.
//!
//! [`ChunkReader`] then streams the staged file as fixed-size blocks: a lazy,
//! finite, non-restartable sequence with a possibly shorter final block.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};

use crate::session::{Compression, FileEntry, Packaging};

/// Copy buffer for staging and hashing.
const READ_BUF: usize = 256 * 1024;

// ── Input dispatch ───────────────────────────────────────────────────────────

/// Where the payload bytes come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// The invoking environment's byte stream.
    Stdin,
    /// A file or directory on disk.
    Path(PathBuf),
}

impl InputSource {
    /// `-` is the conventional stdin sentinel.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            InputSource::Stdin
        } else {
            InputSource::Path(PathBuf::from(arg))
        }
    }
}

// ── PreparedPayload ──────────────────────────────────────────────────────────

/// The staged, ready-to-chunk payload plus its descriptor.
#[derive(Debug)]
pub struct PreparedPayload {
    path:            TempPath,
    pub size:        u64,
    pub sha256:      String,
    pub packaging:   Packaging,
    pub compression: Compression,
    pub root_name:   String,
    pub files:       Vec<FileEntry>,
}

impl PreparedPayload {
    /// Location of the staged byte file.  Valid until `self` is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_count(&self) -> u32 {
        self.files.len() as u32
    }
}

// ── Preparation ──────────────────────────────────────────────────────────────

/// Stage `input` into a temporary byte file and describe it.
///
/// Unreadable input and staging I/O failures are fatal; an empty input is
/// permitted and stages a zero-byte file.
pub fn prepare_payload(
    input:     &InputSource,
    compress:  bool,
    root_name: Option<&str>,
) -> io::Result<PreparedPayload> {
    match input {
        InputSource::Path(path) if path.is_dir() => {
            prepare_directory(path, compress, root_name)
        }
        InputSource::Path(path) => {
            let base = root_name
                .map(str::to_owned)
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "input.bin".to_owned());
            let src = File::open(path)?;
            let files = gather_files(path)?;
            prepare_stream(src, compress, base, files)
        }
        InputSource::Stdin => {
            let base = root_name.unwrap_or("stdin.bin").to_owned();
            prepare_stream(io::stdin(), compress, base, Vec::new())
        }
    }
}

/// Directory → tar (optionally gzipped) under a single top-level entry.
fn prepare_directory(
    dir:       &Path,
    compress:  bool,
    root_name: Option<&str>,
) -> io::Result<PreparedPayload> {
    let base = root_name
        .map(str::to_owned)
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "payload".to_owned());

    let (file, path) = NamedTempFile::new()?.into_parts();

    if compress {
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(gz);
        tar.append_dir_all(&base, dir)?;
        let gz = tar.into_inner()?;
        gz.finish()?;
    } else {
        let mut tar = tar::Builder::new(file);
        tar.append_dir_all(&base, dir)?;
        tar.into_inner()?;
    }

    let size = std::fs::metadata(&path)?.len();
    let sha256 = file_sha256(&path)?;
    let files = gather_files(dir)?;

    Ok(PreparedPayload {
        path,
        size,
        sha256,
        packaging: Packaging::Tar,
        compression: if compress { Compression::Gz } else { Compression::None },
        root_name: base,
        files,
    })
}

/// File or stdin → verbatim copy (optionally gzipped).
fn prepare_stream<R: Read>(
    mut src:   R,
    compress:  bool,
    root_name: String,
    files:     Vec<FileEntry>,
) -> io::Result<PreparedPayload> {
    let (file, path) = NamedTempFile::new()?.into_parts();

    let (size, sha256) = if compress {
        let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        io::copy(&mut src, &mut gz)?;
        gz.finish()?;
        // The digest covers the gzipped bytes, so hash the staged file.
        (std::fs::metadata(&path)?.len(), file_sha256(&path)?)
    } else {
        let mut dst = file;
        let staged = hashing_copy(&mut src, &mut dst)?;
        dst.flush()?;
        staged
    };

    Ok(PreparedPayload {
        path,
        size,
        sha256,
        packaging: Packaging::Raw,
        compression: if compress { Compression::Gz } else { Compression::None },
        root_name,
        files,
    })
}

// ── Hashing helpers ──────────────────────────────────────────────────────────

/// Copy `src` into `dst`, returning `(bytes, hex SHA-256)` of what was written.
fn hashing_copy<R: Read, W: Write>(src: &mut R, dst: &mut W) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

/// Hex SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut src = BufReader::new(File::open(path)?);
    let mut sink = io::sink();
    let (_, digest) = hashing_copy(&mut src, &mut sink)?;
    Ok(digest)
}

// ── File inventory ───────────────────────────────────────────────────────────

fn gather_files(root: &Path) -> io::Result<Vec<FileEntry>> {
    fn entry_for(path: &Path, rel: String) -> io::Result<FileEntry> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(meta.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = None;
        Ok(FileEntry { path: rel, size: meta.len(), mtime, mode })
    }

    if root.is_file() {
        let rel = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![entry_for(root, rel)?]);
    }

    let mut entries = Vec::new();
    for item in walkdir::WalkDir::new(root) {
        let item = item.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if !item.file_type().is_file() {
            continue;
        }
        let rel = item
            .path()
            .strip_prefix(root)
            .unwrap_or(item.path())
            .to_string_lossy()
            .into_owned();
        entries.push(entry_for(item.path(), rel)?);
    }
    Ok(entries)
}

// ── Chunker ──────────────────────────────────────────────────────────────────

/// Fixed-size block iterator over a byte stream.
///
/// Yields `chunk_size`-byte blocks with a possibly shorter final block; the
/// sequence is finite and cannot be restarted.  Reads are strictly
/// sequential — no seeking.
pub struct ChunkReader<R: Read> {
    src:        R,
    chunk_size: usize,
    done:       bool,
}

impl ChunkReader<BufReader<File>> {
    /// Stream a staged payload file.
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?), chunk_size))
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn new(src: R, chunk_size: usize) -> Self {
        Self { src, chunk_size: chunk_size.max(1), done: false }
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.src.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        if filled < self.chunk_size {
            self.done = true;
            buf.truncate(filled);
        }
        Some(Ok(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn chunker_yields_short_tail() {
        let data = vec![7u8; 1300];
        let chunks: Vec<Vec<u8>> = ChunkReader::new(Cursor::new(data), 500)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 300);
    }

    #[test]
    fn chunker_empty_input() {
        let chunks: Vec<_> = ChunkReader::new(Cursor::new(Vec::new()), 512).collect();
        assert!(chunks.is_empty());
    }

    #[test]
    fn prepared_file_is_removed_on_drop() {
        let payload = prepare_stream(Cursor::new(b"hello".to_vec()), false, "x".into(), Vec::new())
            .unwrap();
        let path = payload.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(payload.size, 5);
        drop(payload);
        assert!(!path.exists());
    }
}
