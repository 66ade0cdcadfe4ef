//! Optical-link collaborator contracts.
//!
//! The transport never touches pixels.  On the way out it hands batches of
//! encoded symbol payloads to a [`GridDisplay`]; on the way in it pulls
//! observations from a [`SymbolSource`].  Rasterising QR symbols, compositing
//! the grid, video encoding, camera capture and symbol detection all live
//! behind these two traits.  The contract is just text: each QR symbol's
//! payload is exactly one base64-encoded frame.
//!
//! The implementations shipped here are line-oriented text streams (one
//! symbol per line), which is what the CLI and the test harnesses speak.  An
//! optical front end plugs in by implementing the same traits.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::debug;

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_GRID_ROWS: usize = 2;
pub const DEFAULT_GRID_COLS: usize = 2;
pub const DEFAULT_FPS:       u32 = 10;

// ── Contracts ────────────────────────────────────────────────────────────────

/// Display side: renders one grid batch per call.
///
/// A batch holds up to `rows·cols` symbol payloads.  Returning `Ok(false)`
/// means the operator closed the display: the session ends cleanly and the
/// sender discards the remaining frames.
pub trait GridDisplay {
    fn show_batch(&mut self, symbols: &[String]) -> io::Result<bool>;

    /// Flush any buffered output; called once after the last batch.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture side: yields successive observations.
///
/// Each observation carries zero or more decoded symbol payloads — whatever
/// the detector recognised in one captured video frame.  Duplicates and
/// arbitrary order across observations are expected.  `None` means the
/// capture stream ended.
pub trait SymbolSource {
    fn next_observation(&mut self) -> io::Result<Option<Vec<String>>>;
}

// ── Text-line display ────────────────────────────────────────────────────────

/// Writes each symbol payload as one text line.
///
/// `live` is the interactive channel (typically stdout); `record` optionally
/// tees the full symbol stream to a file.  Batches on the live channel are
/// paced at `fps` grids per second, matching what a screen would show.
pub struct TextLineDisplay<W: Write> {
    live:   Option<W>,
    record: Option<BufWriter<File>>,
    delay:  Duration,
}

impl<W: Write> TextLineDisplay<W> {
    pub fn new(live: Option<W>, record: Option<&Path>, fps: u32) -> io::Result<Self> {
        let record = match record {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };
        Ok(Self {
            live,
            record,
            delay: Duration::from_millis(1000 / u64::from(fps.max(1))),
        })
    }
}

impl<W: Write> GridDisplay for TextLineDisplay<W> {
    fn show_batch(&mut self, symbols: &[String]) -> io::Result<bool> {
        if let Some(rec) = &mut self.record {
            for symbol in symbols {
                writeln!(rec, "{symbol}")?;
            }
        }
        if let Some(live) = &mut self.live {
            for symbol in symbols {
                // A closed pipe is the operator shutting the display.
                match writeln!(live, "{symbol}") {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("live channel closed");
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
            }
            live.flush()?;
            thread::sleep(self.delay);
        }
        Ok(true)
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(rec) = &mut self.record {
            rec.flush()?;
        }
        if let Some(live) = &mut self.live {
            live.flush()?;
        }
        Ok(())
    }
}

// ── Text-line source ─────────────────────────────────────────────────────────

/// Reads one symbol payload per line.
///
/// A blank line maps to an observation with no recognised symbols, which is
/// what a capture frame full of glare looks like.
pub struct TextLineSource<R: BufRead> {
    src:  R,
    line: String,
}

impl<R: BufRead> TextLineSource<R> {
    pub fn new(src: R) -> Self {
        Self { src, line: String::new() }
    }
}

impl<R: BufRead> SymbolSource for TextLineSource<R> {
    fn next_observation(&mut self) -> io::Result<Option<Vec<String>>> {
        self.line.clear();
        if self.src.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let text = self.line.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            Ok(Some(Vec::new()))
        } else {
            Ok(Some(vec![text.to_owned()]))
        }
    }
}
