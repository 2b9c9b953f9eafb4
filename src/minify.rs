//! HTML minification with an email-client-safe policy.
//!
//! Stage 3 of the pipeline. Every compiled `dist/<name>.html` (but never an
//! existing `<name>.min.html`) is minified into a `dist/<name>.min.html`
//! sibling. The compiled document itself is left untouched.
//!
//! ## Passes
//!
//! 1. **Empty attributes**: `class`, `id`, `style`, `title`, `lang`, `dir` and
//!    `on*` handlers with a blank value are dropped ([`lol_html`]).
//! 2. **Compaction**: text between tags is collapsed, and only the bodies of
//!    `<style>` and `<script>` go through [`minify_html`]. Tags, attributes
//!    and comments pass through byte for byte, so names keep their case
//!    (`<o:OfficeDocumentSettings>`), values keep their quotes, and Outlook's
//!    `<!--[if mso]>` conditional comments survive.
//! 3. **Closing slashes**: void elements get their `/>` back, which some
//!    legacy email renderers need to parse the document.
//!
//! If the result is somehow larger than the input, the input is written
//! instead, so a minified file is never bigger than its source.
//!
//! ## Fault Isolation
//!
//! A file that fails to minify is logged and skipped. The remaining files
//! are still processed and the stage succeeds.

use crate::config::{BuildConfig, MinifyConfig};
use crate::files;
use crate::naming;
use log::{debug, error};
use lol_html::html_content::{ContentType, EndTag, TextType};
use lol_html::{RewriteStrSettings, doc_text, element, rewrite_str};
use minify_html::Cfg;
use rayon::prelude::*;
use std::cell::Cell;
use std::rc::Rc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinifyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{}: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },
    #[error("{}: not valid UTF-8", .0.display())]
    Utf8(PathBuf),
    #[error("cannot rewrite attributes: {0}")]
    Rewrite(String),
    #[error("{}: {message}", .path.display())]
    Document { path: PathBuf, message: String },
    #[error("{}: cannot derive an output file name", .0.display())]
    BadName(PathBuf),
}

/// Elements serialized with a closing slash (`<br/>`).
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Outcome of the minify stage.
#[derive(Debug, Default)]
pub struct MinifyReport {
    /// Minified documents written.
    pub written: Vec<PathBuf>,
    /// Documents that failed, with the reason. The stage still succeeded.
    pub skipped: Vec<MinifyError>,
}

/// Collapse a text node: runs of whitespace become one space, and a node
/// that is only whitespace across a line break disappears.
fn collapse_text(text: &str) -> String {
    if text.trim().is_empty() {
        return if text.contains('\n') || text.is_empty() {
            String::new()
        } else {
            " ".to_string()
        };
    }
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Minify the body of a `style` or `script` element. Falls back to the
/// original body when the engine output cannot be unwrapped or is larger.
fn minify_body(tag: &str, body: &str, policy: &MinifyConfig) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let cfg = Cfg {
        minify_css: policy.minify_css,
        minify_js: policy.minify_js,
        keep_closing_tags: true,
        ..Cfg::default()
    };
    let wrapped = format!("{open}{body}{close}");
    String::from_utf8(minify_html::minify(wrapped.as_bytes(), &cfg))
        .ok()
        .and_then(|out| {
            out.strip_prefix(open.as_str())
                .and_then(|rest| rest.strip_suffix(close.as_str()))
                .map(str::to_string)
        })
        .filter(|minified| minified.len() <= body.len())
        .unwrap_or_else(|| body.to_string())
}

/// Shorten a legacy doctype to `<!doctype html>`.
fn html5_doctype(html: &str) -> Option<String> {
    let trimmed = html.trim_start();
    let lead = html.len() - trimmed.len();
    if !trimmed.get(..9)?.eq_ignore_ascii_case("<!doctype") {
        return None;
    }
    let end = trimmed.find('>')?;
    Some(format!("{}<!doctype html>{}", &html[..lead], &trimmed[end + 1..]))
}

/// Collapse text and minify style and script bodies, leaving every tag,
/// attribute and comment as written. `pre` and `textarea` keep their text.
fn compact(html: &str, policy: &MinifyConfig) -> Result<String, MinifyError> {
    let preformatted = Rc::new(Cell::new(0usize));
    let depth = Rc::clone(&preformatted);
    let mut pending = String::new();

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("pre, textarea", move |el| {
                if let Some(handlers) = el.end_tag_handlers() {
                    depth.set(depth.get() + 1);
                    let depth = Rc::clone(&depth);
                    handlers.push(Box::new(move |_end: &mut EndTag<'_>| {
                        depth.set(depth.get().saturating_sub(1));
                        Ok(())
                    }) as lol_html::EndTagHandler<'static>);
                }
                Ok(())
            })],
            document_content_handlers: vec![doc_text!(move |chunk| {
                pending.push_str(chunk.as_str());
                if !chunk.last_in_text_node() {
                    chunk.remove();
                    return Ok(());
                }
                let text = std::mem::take(&mut pending);
                let replacement = match chunk.text_type() {
                    TextType::Data if policy.collapse_whitespace && preformatted.get() == 0 => {
                        collapse_text(&text)
                    }
                    TextType::RawText if policy.minify_css => minify_body("style", &text, policy),
                    TextType::ScriptData if policy.minify_js => {
                        minify_body("script", &text, policy)
                    }
                    _ => text,
                };
                chunk.replace(&replacement, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|e| MinifyError::Rewrite(e.to_string()))
}

fn is_removable_when_empty(name: &str) -> bool {
    const NAMES: &[&str] = &["class", "id", "style", "title", "lang", "dir"];
    NAMES.iter().any(|n| name.eq_ignore_ascii_case(n))
        || name.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("on"))
}

/// Drop presentation and handler attributes whose value is blank.
pub fn remove_empty_attributes(html: &str) -> Result<String, MinifyError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                let empty: Vec<String> = el
                    .attributes()
                    .iter()
                    .filter(|a| a.value().trim().is_empty() && is_removable_when_empty(&a.name()))
                    .map(|a| a.name())
                    .collect();
                for name in empty {
                    el.remove_attribute(&name);
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|e| MinifyError::Rewrite(e.to_string()))
}

/// Index of the `>` closing the tag that starts at `tag[0] == '<'`,
/// skipping quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

/// Re-add the closing slash to void elements (`<br>` → `<br/>`).
///
/// Comments and the bodies of `script` and `style` elements are copied
/// verbatim.
pub fn restore_closing_slashes(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + html.len() / 64);
    let mut copied = 0;
    let mut pos = 0;

    while let Some(rel) = html[pos..].find('<') {
        let start = pos + rel;
        let rest = &html[start..];

        if rest.starts_with("<!--") {
            pos = start + rest.find("-->").map_or(rest.len(), |e| e + 3);
            continue;
        }

        let name_len = rest[1..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        if name_len == 0 {
            pos = start + 1;
            continue;
        }
        let Some(end) = tag_end(rest) else {
            break;
        };
        let name = rest[1..1 + name_len].to_ascii_lowercase();

        if name == "script" || name == "style" {
            let body = rest[end..].to_ascii_lowercase();
            pos = start + end + body.find(&format!("</{name}")).unwrap_or(body.len());
            continue;
        }

        let open = &rest[..end];
        if VOID_ELEMENTS.contains(&name.as_str()) && !open.ends_with('/') {
            out.push_str(&html[copied..start + end]);
            let unquoted_value = open.len() > 1 + name_len
                && !open.ends_with(|c: char| c == '"' || c == '\'' || c.is_whitespace());
            out.push_str(if unquoted_value { " /" } else { "/" });
            copied = start + end;
        }
        pos = start + end + 1;
    }

    out.push_str(&html[copied..]);
    out
}

/// Minify one document according to `policy`.
pub fn minify_document(html: &str, policy: &MinifyConfig) -> Result<String, MinifyError> {
    let mut doc = if policy.remove_empty_attributes {
        remove_empty_attributes(html)?
    } else {
        html.to_string()
    };

    if policy.collapse_whitespace || policy.minify_css || policy.minify_js {
        doc = compact(&doc, policy)?;
    }

    if policy.html5
        && let Some(shortened) = html5_doctype(&doc)
    {
        doc = shortened;
    }

    if policy.keep_closing_slash {
        doc = restore_closing_slashes(&doc);
    }

    if doc.len() > html.len() {
        return Ok(html.to_string());
    }
    Ok(doc)
}

/// Minify `html_path` into its `.min.html` sibling. Returns the written path.
pub fn minify_file(html_path: &Path, policy: &MinifyConfig) -> Result<PathBuf, MinifyError> {
    let target =
        naming::minified_path(html_path).ok_or_else(|| MinifyError::BadName(html_path.into()))?;
    let bytes = fs::read(html_path).map_err(|source| MinifyError::File {
        path: html_path.to_path_buf(),
        source,
    })?;
    let html = String::from_utf8(bytes).map_err(|_| MinifyError::Utf8(html_path.into()))?;

    let minified = minify_document(&html, policy).map_err(|e| MinifyError::Document {
        path: html_path.to_path_buf(),
        message: e.to_string(),
    })?;
    files::write_atomic(&target, minified.as_bytes()).map_err(|source| MinifyError::File {
        path: target.clone(),
        source,
    })?;
    debug!(
        "minified {} ({} → {} bytes)",
        html_path.display(),
        html.len(),
        minified.len()
    );
    Ok(target)
}

/// Minify every compiled document in the output directory.
///
/// Only an unreadable output directory fails the stage; per-file failures
/// are collected in [`MinifyReport::skipped`].
pub fn minify_all(config: &BuildConfig) -> Result<MinifyReport, MinifyError> {
    let sources: Vec<PathBuf> =
        files::list_inputs(&config.paths.output, naming::HTML_EXTENSION)?
            .into_iter()
            .filter(|p| !naming::is_minified(p))
            .collect();

    let results: Vec<_> = sources
        .par_iter()
        .map(|p| minify_file(p, &config.minify))
        .collect();

    let (written, skipped) = files::split_results(results);
    for e in &skipped {
        error!("Error minifying file: {e}");
    }
    Ok(MinifyReport { written, skipped })
}
