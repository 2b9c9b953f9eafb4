//! MJML compilation: `src/mjml/*.mjml` → `dist/*.html`.
//!
//! Stage 2 of the pipeline. Each intermediate document is compiled by a
//! [`MarkupCompiler`], cleaned of empty style attributes by
//! [`styles::remove_empty_styles`](crate::styles::remove_empty_styles), and
//! written to the output directory under the same base name.
//!
//! ## Validation
//!
//! A compiler reports `{ html, errors }`. Any reported error is a hard
//! failure for that document and nothing is written for it, so a stale or
//! partially compiled file can never appear in the output directory.
//!
//! The bundled [`MrmlCompiler`] checks each document with
//! [`markup::validate`] (unknown elements, misplaced components, attributes a
//! component does not accept) and maps `mjml.validation_level` onto the
//! findings:
//!
//! | Level | Parse failure | Findings |
//! |---|---|---|
//! | `strict` | error | error |
//! | `soft` | error | logged as warnings |
//! | `skip` | error | ignored |
//!
//! With `mjml.ignore_includes`, `<mj-include>` directives are dropped before
//! parsing and the rest of the document compiles as usual.

use crate::config::{BuildConfig, MjmlConfig, ValidationLevel};
use crate::files;
use crate::markup;
use crate::naming;
use crate::styles;
use log::{debug, error, warn};
use mrml::prelude::parser::ParserOptions;
use mrml::prelude::parser::local_loader::LocalIncludeLoader;
use mrml::prelude::render::RenderOptions;
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkupError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("render error: {0}")]
    Render(String),
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{}: {source}", .path.display())]
    Markup { path: PathBuf, source: MarkupError },
    #[error("{}: MJML validation failed:\n{}", .path.display(), crate::output::indent_lines(.errors))]
    Validation { path: PathBuf, errors: Vec<String> },
    #[error("{}: cannot clean style attributes: {message}", .path.display())]
    Clean { path: PathBuf, message: String },
    #[error("{}: cannot derive an output file name", .0.display())]
    BadName(PathBuf),
    #[error("{} document(s) failed to compile:\n{}", .0.len(), crate::output::join_errors(.0))]
    Failed(Vec<CompileError>),
}

/// Result of compiling one document. A non-empty `errors` means `html`
/// must not be used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compiled {
    pub html: String,
    pub errors: Vec<String>,
}

/// An email-markup compiler consumed as a pure function.
pub trait MarkupCompiler: Sync {
    /// Compile `markup`, read from `path`. `path` anchors relative includes.
    fn compile(&self, markup: &str, path: &Path) -> Result<Compiled, MarkupError>;
}

/// Pure-Rust MJML compiler backed by `mrml`.
pub struct MrmlCompiler {
    level: ValidationLevel,
    keep_comments: bool,
    ignore_includes: bool,
    fonts: HashMap<String, Cow<'static, str>>,
}

impl MrmlCompiler {
    pub fn new(config: &MjmlConfig) -> Self {
        Self {
            level: config.validation_level,
            keep_comments: config.keep_comments,
            ignore_includes: config.ignore_includes,
            fonts: config
                .fonts
                .iter()
                .map(|(name, url)| (name.clone(), Cow::Owned(url.clone())))
                .collect(),
        }
    }

    fn parser_options(&self, path: &Path) -> ParserOptions {
        if self.ignore_includes {
            return ParserOptions::default();
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        let root = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        ParserOptions {
            include_loader: Box::new(LocalIncludeLoader::new(root)),
        }
    }
}

impl MarkupCompiler for MrmlCompiler {
    fn compile(&self, markup: &str, path: &Path) -> Result<Compiled, MarkupError> {
        let markup: Cow<'_, str> = if self.ignore_includes {
            Cow::Owned(markup::strip_includes(markup))
        } else {
            Cow::Borrowed(markup)
        };
        let parsed = mrml::parse_with_options(&markup, &self.parser_options(path))
            .map_err(|e| MarkupError::Parse(e.to_string()))?;

        let errors = match self.level {
            ValidationLevel::Strict => {
                let mut findings = markup::validate(&markup);
                findings.extend(parsed.warnings.iter().map(|w| w.to_string()));
                findings
            }
            ValidationLevel::Soft => {
                let findings = markup::validate(&markup)
                    .into_iter()
                    .chain(parsed.warnings.iter().map(|w| w.to_string()));
                for finding in findings {
                    warn!("{}: {finding}", path.display());
                }
                Vec::new()
            }
            ValidationLevel::Skip => Vec::new(),
        };
        if !errors.is_empty() {
            return Ok(Compiled {
                html: String::new(),
                errors,
            });
        }

        let opts = RenderOptions {
            disable_comments: !self.keep_comments,
            fonts: self.fonts.clone(),
            ..RenderOptions::default()
        };
        let html = parsed
            .element
            .render(&opts)
            .map_err(|e| MarkupError::Render(e.to_string()))?;
        Ok(Compiled {
            html,
            errors: Vec::new(),
        })
    }
}

/// Compile one intermediate document into `output_dir`. Returns the written path.
pub fn compile_file(
    compiler: &dyn MarkupCompiler,
    markup_path: &Path,
    output_dir: &Path,
) -> Result<PathBuf, CompileError> {
    let target = naming::html_path(markup_path, output_dir)
        .ok_or_else(|| CompileError::BadName(markup_path.to_path_buf()))?;
    let markup = fs::read_to_string(markup_path)?;

    let compiled = compiler
        .compile(&markup, markup_path)
        .map_err(|source| CompileError::Markup {
            path: markup_path.to_path_buf(),
            source,
        })?;
    if !compiled.errors.is_empty() {
        return Err(CompileError::Validation {
            path: markup_path.to_path_buf(),
            errors: compiled.errors,
        });
    }

    let html = styles::remove_empty_styles(&compiled.html).map_err(|e| CompileError::Clean {
        path: markup_path.to_path_buf(),
        message: e.to_string(),
    })?;
    files::write_atomic(&target, html.as_bytes())?;
    debug!("compiled {} → {}", markup_path.display(), target.display());
    Ok(target)
}

/// Compile every intermediate document into the output directory.
///
/// Returns the HTML documents written, in name order, after every document
/// has been attempted.
pub fn compile_all(
    compiler: &dyn MarkupCompiler,
    config: &BuildConfig,
) -> Result<Vec<PathBuf>, CompileError> {
    let documents = files::list_inputs(&config.paths.intermediate, naming::MARKUP_EXTENSION)?;
    fs::create_dir_all(&config.paths.output)?;

    let results: Vec<_> = documents
        .par_iter()
        .map(|doc| compile_file(compiler, doc, &config.paths.output))
        .collect();

    let (written, failed) = files::split_results(results);
    if failed.is_empty() {
        Ok(written)
    } else {
        for e in &failed {
            error!("{e}");
        }
        Err(CompileError::Failed(failed))
    }
}
