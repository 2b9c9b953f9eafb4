//! Size verification of generated documents.
//!
//! Stage 4 of the pipeline, for observability only: every HTML document in
//! the output directory (compiled and minified) is re-read and its size
//! reported. Nothing is written.

use crate::config::BuildConfig;
use crate::files;
use crate::naming;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Size of one generated document.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    /// File name, e.g. `welcome.min.html`.
    pub name: String,
    pub bytes: u64,
}

impl SizeReport {
    pub fn kilobytes(&self) -> f64 {
        self.bytes as f64 / 1024.0
    }
}

/// Report the size of a document from its contents.
pub fn size_report(path: &Path, contents: &[u8]) -> SizeReport {
    SizeReport {
        name: naming::display_name(path),
        bytes: contents.len() as u64,
    }
}

/// Re-read one document and report its size.
pub fn verify_file(path: &Path) -> Result<SizeReport, VerifyError> {
    let contents = fs::read(path).map_err(|source| VerifyError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(size_report(path, &contents))
}

/// Report every HTML document in the output directory, sorted by name.
pub fn verify_all(config: &BuildConfig) -> Result<Vec<SizeReport>, VerifyError> {
    let documents = files::list_inputs(&config.paths.output, naming::HTML_EXTENSION)?;
    documents.par_iter().map(|p| verify_file(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_config;
    use tempfile::TempDir;

    #[test]
    fn kilobytes_is_bytes_over_1024() {
        let r = size_report(Path::new("dist/a.html"), &[0u8; 2048]);
        assert_eq!(r.name, "a.html");
        assert_eq!(r.bytes, 2048);
        assert_eq!(r.kilobytes(), 2.0);
    }

    #[test]
    fn reports_compiled_and_minified_documents() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::create_dir_all(&config.paths.output).unwrap();
        fs::write(config.paths.output.join("a.html"), vec![b'x'; 1536]).unwrap();
        fs::write(config.paths.output.join("a.min.html"), vec![b'x'; 512]).unwrap();
        fs::write(config.paths.output.join("logo.png"), b"png").unwrap();

        let reports = verify_all(&config).unwrap();

        assert_eq!(
            reports,
            vec![
                SizeReport { name: "a.html".into(), bytes: 1536 },
                SizeReport { name: "a.min.html".into(), bytes: 512 },
            ]
        );
    }

    #[test]
    fn does_not_modify_documents() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::create_dir_all(&config.paths.output).unwrap();
        let path = config.paths.output.join("a.html");
        fs::write(&path, "<p>x</p>").unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        verify_all(&config).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>x</p>");
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn empty_output_directory_reports_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        assert!(verify_all(&config).unwrap().is_empty());
    }
}
