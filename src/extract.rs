//! Extraction — turn the verified byte file into the user-visible result.
//!
//! Dispatch on the adopted metadata:
//! - `tar` packaging with extraction requested → unpack into the destination
//!   directory (gunzipping first when the payload was gzip-wrapped)
//! - `raw` + `gz` → gunzip into the destination file
//! - `raw` + `none` → byte copy
//! - anything else → byte copy, unchanged

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::session::{Compression, Packaging, SessionMetadata};

/// Write the user-visible result for a verified payload file.
/// Returns the final output path.
pub fn extract_payload(
    meta:    &SessionMetadata,
    payload: &Path,
    output:  &Path,
    extract: bool,
) -> io::Result<PathBuf> {
    if meta.packaging == Packaging::Tar && extract {
        fs::create_dir_all(output)?;
        let file = File::open(payload)?;
        match meta.compression {
            Compression::Gz => tar::Archive::new(GzDecoder::new(file)).unpack(output)?,
            Compression::None => tar::Archive::new(file).unpack(output)?,
        }
        return Ok(output.to_path_buf());
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match (meta.packaging, meta.compression) {
        (Packaging::Raw, Compression::Gz) => {
            let mut src = GzDecoder::new(File::open(payload)?);
            let mut dst = File::create(output)?;
            io::copy(&mut src, &mut dst)?;
        }
        _ => {
            fs::copy(payload, output)?;
        }
    }
    Ok(output.to_path_buf())
}
