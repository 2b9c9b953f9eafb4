//! Stage input discovery and output writing.
//!
//! Inputs are the files directly inside a directory with a given extension,
//! sorted by name so reports and error lists are deterministic. Outputs are
//! written through a temporary sibling and renamed into place, so readers of
//! the final path never observe a half-written document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::naming;

/// List files directly inside `dir` whose extension is exactly `ext`.
///
/// A missing directory yields an empty list; any other walk error is returned.
pub fn list_inputs(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() && naming::has_extension(entry.path(), ext) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Write `contents` to `path` atomically (temp file + rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let name = naming::display_name(path);
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Split per-file results gathered at a stage barrier into successes and failures.
pub fn split_results<T, E>(results: Vec<Result<T, E>>) -> (Vec<T>, Vec<E>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(v) => ok.push(v),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}
