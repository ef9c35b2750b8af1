//! Content digests for change detection.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Calculate the hex digest of a file's contents.
///
/// The file is streamed through the hasher, never materialized in memory.
/// The digest is used solely for change detection, not tamper-proofing.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
