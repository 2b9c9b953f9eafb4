//! Build configuration module.
//!
//! Handles loading, validating, and merging `pugmail.toml`. Stock defaults
//! are overridden by the user file, which in turn is overridden by CLI flags.
//! The resulting [`BuildConfig`] is immutable and passed by reference into
//! every stage.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [paths]
//! source = "src"             # Template sources (*.pug)
//! intermediate = "src/mjml"  # Rendered MJML, overwritten every run
//! output = "dist"            # Compiled and minified HTML
//!
//! [templates]
//! command = "pug"            # Template compiler executable
//! extension = "pug"
//! pretty = true
//! debug = false
//! compile_debug = false
//! globals = []
//! self = false
//!
//! [mjml]
//! validation_level = "strict" # strict | soft | skip
//! keep_comments = false
//! ignore_includes = true
//!
//! [server]
//! port = 8080
//! open_browser = true
//! entry_file = "index.html"
//! startup_wait_ms = 500
//! log_level = 2
//!
//! [pipeline]
//! output_dir_errors = "abort" # abort | warn
//! watch_debounce_ms = 100
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "pugmail.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `pugmail.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Input, intermediate and output directories.
    pub paths: PathsConfig,
    /// Template compiler invocation.
    pub templates: TemplatesConfig,
    /// MJML compiler options.
    pub mjml: MjmlConfig,
    /// HTML minification policy.
    pub minify: MinifyConfig,
    /// Dev server options.
    pub server: ServerConfig,
    /// Orchestration behavior.
    pub pipeline: PipelineConfig,
}

impl BuildConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.templates.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "templates.command must not be empty".into(),
            ));
        }
        if self.templates.extension.trim().is_empty() || self.templates.extension.contains('.') {
            return Err(ConfigError::Validation(
                "templates.extension must be a bare extension such as \"pug\"".into(),
            ));
        }
        if self.mjml.beautify || self.mjml.minify {
            return Err(ConfigError::Validation(
                "mjml.beautify and mjml.minify must be false; minification runs as its own stage"
                    .into(),
            ));
        }
        if !self.mjml.preprocessors.is_empty() {
            return Err(ConfigError::Validation(
                "mjml.preprocessors is not supported by the bundled compiler".into(),
            ));
        }
        if self.minify.remove_comments {
            return Err(ConfigError::Validation(
                "minify.remove_comments must be false; conditional comments must survive".into(),
            ));
        }
        if self.minify.conservative_collapse || !self.minify.case_sensitive {
            return Err(ConfigError::Validation(
                "minify.conservative_collapse must be false and minify.case_sensitive true; \
                 the minifier always collapses fully and preserves name case"
                    .into(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".into()));
        }
        if self.server.log_level > 3 {
            return Err(ConfigError::Validation("server.log_level must be 0-3".into()));
        }
        if self.paths.intermediate == self.paths.output {
            return Err(ConfigError::Validation(
                "paths.intermediate and paths.output must differ".into(),
            ));
        }
        Ok(())
    }

    /// Directory the dev server serves: `server.root` or the output directory.
    pub fn server_root(&self) -> &Path {
        self.server.root.as_deref().unwrap_or(&self.paths.output)
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory holding the template sources.
    pub source: PathBuf,
    /// Directory receiving rendered MJML documents.
    pub intermediate: PathBuf,
    /// Directory receiving compiled and minified HTML.
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src"),
            intermediate: PathBuf::from("src/mjml"),
            output: PathBuf::from("dist"),
        }
    }
}

/// Options handed to the template compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatesConfig {
    /// Executable invoked to render templates.
    pub command: String,
    /// Template file extension, without the dot.
    pub extension: String,
    pub pretty: bool,
    pub debug: bool,
    pub compile_debug: bool,
    /// Global names exposed to templates.
    pub globals: Vec<String>,
    /// Bind template locals to `self` instead of the top-level scope.
    #[serde(rename = "self")]
    pub bind_self: bool,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            command: "pug".to_string(),
            extension: "pug".to_string(),
            pretty: true,
            debug: false,
            compile_debug: false,
            globals: Vec::new(),
            bind_self: false,
        }
    }
}

/// How MJML validation findings are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Any finding fails the file.
    Strict,
    /// Findings are logged, output is written.
    Soft,
    /// Findings are ignored.
    Skip,
}

/// Options handed to the MJML compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MjmlConfig {
    pub beautify: bool,
    pub minify: bool,
    pub validation_level: ValidationLevel,
    /// Font name → stylesheet URL registry.
    pub fonts: BTreeMap<String, String>,
    pub keep_comments: bool,
    /// Drop `mj-include` directives instead of resolving them relative to the document.
    pub ignore_includes: bool,
    pub preprocessors: Vec<String>,
}

impl Default for MjmlConfig {
    fn default() -> Self {
        Self {
            beautify: false,
            minify: false,
            validation_level: ValidationLevel::Strict,
            fonts: BTreeMap::new(),
            keep_comments: false,
            ignore_includes: true,
            preprocessors: Vec::new(),
        }
    }
}

/// Email-safe HTML minification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    /// When false only the attribute and closing-slash passes run.
    pub collapse_whitespace: bool,
    pub remove_comments: bool,
    pub remove_empty_attributes: bool,
    pub minify_css: bool,
    pub minify_js: bool,
    /// Keep one space where whitespace was collapsed.
    pub conservative_collapse: bool,
    /// Emit `<br />` rather than `<br>` for void elements.
    pub keep_closing_slash: bool,
    pub case_sensitive: bool,
    /// Shorten a legacy doctype to `<!doctype html>`.
    pub html5: bool,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            collapse_whitespace: true,
            remove_comments: false,
            remove_empty_attributes: true,
            minify_css: true,
            minify_js: true,
            conservative_collapse: false,
            keep_closing_slash: true,
            case_sensitive: true,
            html5: false,
        }
    }
}

/// Live-reload dev server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Executable providing "serve directory, reload on change".
    pub command: String,
    pub port: u16,
    /// Served directory; defaults to `paths.output`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub open_browser: bool,
    pub entry_file: String,
    /// Delay before reloading after a change, in milliseconds.
    pub startup_wait_ms: u64,
    /// 0 = silent, 1 = errors, 2 = info, 3 = debug.
    pub log_level: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "live-server".to_string(),
            port: 8080,
            root: None,
            open_browser: true,
            entry_file: "index.html".to_string(),
            startup_wait_ms: 500,
            log_level: 2,
        }
    }
}

/// What to do when the output directory cannot be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDirErrors {
    /// Fail the pipeline before any write.
    Abort,
    /// Log the failure and keep going.
    Warn,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub output_dir_errors: OutputDirErrors,
    /// Quiet period after the last template change before rebuilding.
    pub watch_debounce_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir_errors: OutputDirErrors::Abort,
            watch_debounce_ms: 100,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(BuildConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Parse a config file into an overlay value, without applying defaults.
pub fn read_config_value(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load an explicit config file. The file must exist.
pub fn load_config_file(path: &Path) -> Result<BuildConfig, ConfigError> {
    resolve_config(Some(read_config_value(path)?))
}

/// Load `pugmail.toml` from the given directory, falling back to defaults
/// when the file does not exist.
pub fn load_config(dir: &Path) -> Result<BuildConfig, ConfigError> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return resolve_config(None);
    }
    load_config_file(&path)
}

/// Returns a fully-commented stock `pugmail.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pugmail configuration
# =====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Filesystem layout
# ---------------------------------------------------------------------------
[paths]
# Template sources. Only files directly in this directory are built.
source = "src"
# Rendered MJML documents, overwritten on every run.
intermediate = "src/mjml"
# Compiled <name>.html and minified <name>.min.html. Emptied by a full build.
output = "dist"

# ---------------------------------------------------------------------------
# Template compiler
# ---------------------------------------------------------------------------
[templates]
# Executable reading a template on stdin and writing markup to stdout.
command = "pug"
extension = "pug"
pretty = true
debug = false
compile_debug = false
globals = []
self = false

# ---------------------------------------------------------------------------
# MJML compiler
# ---------------------------------------------------------------------------
[mjml]
# Raw output only. Minification is a separate stage.
beautify = false
minify = false
# strict: any finding fails the file. soft: log and write. skip: ignore.
validation_level = "strict"
keep_comments = false
# true: mj-include directives are dropped and the rest compiles.
# false: mj-include paths resolve relative to the MJML document.
ignore_includes = true
preprocessors = []

# Font name -> stylesheet URL.
[mjml.fonts]

# ---------------------------------------------------------------------------
# Minifier (email-client-safe policy)
# ---------------------------------------------------------------------------
[minify]
collapse_whitespace = true
# Must stay false: Outlook conditional comments carry client targeting.
remove_comments = false
remove_empty_attributes = true
minify_css = true
minify_js = true
conservative_collapse = false
keep_closing_slash = true
case_sensitive = true
# true: shorten a legacy doctype to <!doctype html>.
html5 = false

# ---------------------------------------------------------------------------
# Dev server
# ---------------------------------------------------------------------------
[server]
command = "live-server"
port = 8080
# root = "dist"   # Defaults to paths.output
open_browser = true
entry_file = "index.html"
startup_wait_ms = 500
# 0 = silent, 1 = errors, 2 = info, 3 = debug
log_level = 2

# ---------------------------------------------------------------------------
# Pipeline
# ---------------------------------------------------------------------------
[pipeline]
# What to do when the output directory cannot be created: "abort" or "warn".
output_dir_errors = "abort"
# Quiet period after the last template change before a rebuild starts.
watch_debounce_ms = 100
"##
}
