//! Output file naming
//!
//! Clips are written as `output_000.mp4`, `output_001.mp4`, ... in the
//! output directory. Each returned path is reserved on disk with an empty
//! placeholder so a second call can never hand out the same name.

use crate::utils::error::{CaptureError, CaptureResult};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File stem prefix for every clip
pub const OUTPUT_PREFIX: &str = "output_";

/// Default container extension
pub const DEFAULT_EXTENSION: &str = "mp4";

/// Produces collision-free sequential output paths
#[derive(Debug, Clone)]
pub struct FileNamer {
    directory: PathBuf,
    extension: String,
}

impl FileNamer {
    pub fn new(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Reserve and return the next free `output_NNN.ext` path
    pub fn next(&self) -> CaptureResult<PathBuf> {
        next_path(&self.directory, &self.extension)
    }
}

/// Format the file name for clip `index`
pub fn file_name(index: u32, extension: &str) -> String {
    format!("{}{:03}.{}", OUTPUT_PREFIX, index, extension)
}

/// Extract the clip index from an `output_NNN.ext` file name
pub fn parse_index(name: &str, extension: &str) -> Option<u32> {
    let digits = name
        .strip_prefix(OUTPUT_PREFIX)?
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Reserve and return the first unused `output_NNN.ext` path in `directory`
pub fn next_path(directory: &Path, extension: &str) -> CaptureResult<PathBuf> {
    let used = scan_indices(directory, extension)?;

    let mut index = 0u32;
    loop {
        while used.contains(&index) {
            index += 1;
        }

        let path = directory.join(file_name(index, extension));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                tracing::debug!("Reserved output path {:?}", path);
                return Ok(path);
            }
            // Created by someone else since the scan
            Err(e) if e.kind() == ErrorKind::AlreadyExists => index += 1,
            Err(e) => {
                return Err(CaptureError::Naming(format!(
                    "{} is not writable: {}",
                    directory.display(),
                    e
                )))
            }
        }
    }
}

/// Remove a reserved placeholder that never received any data
pub fn release_placeholder(path: &Path) {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!("Failed to remove unused output {:?}: {}", path, e);
            } else {
                tracing::debug!("Released unused output path {:?}", path);
            }
        }
        _ => {}
    }
}

fn scan_indices(directory: &Path, extension: &str) -> CaptureResult<BTreeSet<u32>> {
    let entries = fs::read_dir(directory).map_err(|e| {
        CaptureError::Naming(format!("cannot read {}: {}", directory.display(), e))
    })?;

    let mut used = BTreeSet::new();
    for entry in entries.flatten() {
        if let Some(index) = entry.file_name().to_str().and_then(|n| parse_index(n, extension)) {
            used.insert(index);
        }
    }
    Ok(used)
}
