//! Centralized path derivation for every document the pipeline produces.
//!
//! Each stage output keeps the base name of its input and only changes the
//! directory and extension:
//!
//! ```text
//! src/welcome.pug → src/mjml/welcome.mjml → dist/welcome.html → dist/welcome.min.html
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Extension of intermediate markup documents.
pub const MARKUP_EXTENSION: &str = "mjml";
/// Extension of compiled documents.
pub const HTML_EXTENSION: &str = "html";
/// Suffix inserted before the extension of minified documents.
pub const MINIFIED_SUFFIX: &str = ".min";

/// File stem as UTF-8, or `None` for paths without a usable name.
pub fn stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(OsStr::to_str)
}

/// Intermediate markup path for a template source: `<dir>/<stem>.mjml`.
pub fn markup_path(template: &Path, intermediate_dir: &Path) -> Option<PathBuf> {
    let stem = stem(template)?;
    Some(intermediate_dir.join(format!("{stem}.{MARKUP_EXTENSION}")))
}

/// Compiled HTML path for a markup document: `<dir>/<stem>.html`.
pub fn html_path(markup: &Path, output_dir: &Path) -> Option<PathBuf> {
    let stem = stem(markup)?;
    Some(output_dir.join(format!("{stem}.{HTML_EXTENSION}")))
}

/// Minified sibling of a compiled HTML file: `<stem>.min.html` next to it.
pub fn minified_path(html: &Path) -> Option<PathBuf> {
    let stem = stem(html)?;
    let name = format!("{stem}{MINIFIED_SUFFIX}.{HTML_EXTENSION}");
    Some(html.with_file_name(name))
}

/// Whether a file is already a minified document (`*.min.html`).
pub fn is_minified(path: &Path) -> bool {
    stem(path).is_some_and(|s| s.ends_with(MINIFIED_SUFFIX))
        && has_extension(path, HTML_EXTENSION)
}

/// Case-sensitive extension check.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(OsStr::to_str) == Some(ext)
}

/// Display name used in reports: the file name, or the full path if it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
