//! Shared test utilities for the pugmail test suite.
//!
//! Provides a throwaway project layout and stand-in engines, so stage tests
//! run without a `pug` installation.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let config = test_config(tmp.path());
//! fs::write(config.paths.source.join("a.pug"), MINIMAL_MJML).unwrap();
//!
//! let engine = MockEngine::passthrough();
//! render_all(&engine, &config).unwrap();
//! assert_eq!(engine.rendered_paths().len(), 1);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{BuildConfig, PathsConfig};
use crate::render::{TemplateEngine, TemplateError};

// =========================================================================
// Fixtures
// =========================================================================

/// Smallest document the MJML compiler accepts.
pub const MINIMAL_MJML: &str = "<mjml><mj-body><mj-section><mj-column><mj-text>Hello</mj-text></mj-column></mj-section></mj-body></mjml>";

/// Stock config with every path under `root`. The source directory exists;
/// the intermediate and output directories do not.
pub fn test_config(root: &Path) -> BuildConfig {
    let paths = PathsConfig {
        source: root.join("src"),
        intermediate: root.join("src/mjml"),
        output: root.join("dist"),
    };
    std::fs::create_dir_all(&paths.source).unwrap();
    BuildConfig {
        paths,
        ..BuildConfig::default()
    }
}

// =========================================================================
// Template engine stand-in
// =========================================================================

/// Template engine that returns its input unchanged, recording every path
/// it was asked to render.
pub struct MockEngine {
    fail_marker: Option<String>,
    rendered: Mutex<Vec<PathBuf>>,
}

impl MockEngine {
    pub fn passthrough() -> Self {
        Self {
            fail_marker: None,
            rendered: Mutex::new(Vec::new()),
        }
    }

    /// Fails with a syntax error on any template containing `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            rendered: Mutex::new(Vec::new()),
        }
    }

    /// Paths of successfully rendered templates, sorted.
    pub fn rendered_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.rendered.lock().unwrap().clone();
        paths.sort();
        paths
    }
}

impl TemplateEngine for MockEngine {
    fn render(&self, source: &str, path: &Path) -> Result<String, TemplateError> {
        if let Some(marker) = &self.fail_marker
            && source.contains(marker.as_str())
        {
            return Err(TemplateError::Syntax(format!(
                "{}:1:1\nunexpected token `{marker}`",
                path.display()
            )));
        }
        self.rendered.lock().unwrap().push(path.to_path_buf());
        Ok(source.to_string())
    }
}
