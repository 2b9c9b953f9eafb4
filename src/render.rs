//! Template rendering: `src/*.pug` → `src/mjml/*.mjml`.
//!
//! Stage 1 of the pipeline. Every template directly inside the source
//! directory is rendered by a [`TemplateEngine`] and written next to the
//! other intermediate documents under the same base name.
//!
//! ## Engines
//!
//! The production engine is [`PugCli`], which pipes the template through the
//! `pug` command-line compiler (stdin → stdout). The trait exists so tests and
//! embedders can substitute another renderer.
//!
//! ## Failure Contract
//!
//! A template that fails to render is never written: its previous
//! intermediate document, if any, stays untouched. All templates are
//! attempted; the stage then fails listing every template that did not
//! render.
//!
//! Intermediate documents whose template was deleted are removed, so a
//! removed template does not keep producing HTML.

use crate::config::{BuildConfig, TemplatesConfig};
use crate::files;
use crate::naming;
use log::{debug, error};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("template compiler `{command}` could not be started: {source}")]
    Spawn {
        command: String,
        source: io::Error,
    },
    #[error("{0}")]
    Syntax(String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{}: {source}", .path.display())]
    Template {
        path: PathBuf,
        source: TemplateError,
    },
    #[error("{}: cannot derive an output file name", .0.display())]
    BadName(PathBuf),
    #[error("{} template(s) failed to render:\n{}", .0.len(), crate::output::join_errors(.0))]
    Failed(Vec<RenderError>),
}

/// A template compiler consumed as a pure function: template text in,
/// markup text or an error with location info out.
pub trait TemplateEngine: Sync {
    /// Render `source`, read from `path`. `path` resolves relative includes
    /// and appears in error messages.
    fn render(&self, source: &str, path: &Path) -> Result<String, TemplateError>;
}

/// Renders templates with the `pug` CLI.
///
/// The options object mirrors the compiler's own option names, so the
/// invocation is equivalent to calling `pug.render(source, options)`.
pub struct PugCli {
    command: String,
    options: serde_json::Value,
    pretty: bool,
    compile_debug: bool,
}

impl PugCli {
    pub fn new(config: &TemplatesConfig) -> Self {
        Self {
            command: config.command.clone(),
            options: compiler_options(config),
            pretty: config.pretty,
            compile_debug: config.compile_debug,
        }
    }

    fn args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "--path".to_string(),
            path.display().to_string(),
            "--obj".to_string(),
            self.options.to_string(),
        ];
        if self.pretty {
            args.push("--pretty".to_string());
        }
        if !self.compile_debug {
            args.push("--no-debug".to_string());
        }
        args
    }
}

/// Compiler options object in the compiler's own key names.
pub fn compiler_options(config: &TemplatesConfig) -> serde_json::Value {
    serde_json::json!({
        "pretty": config.pretty,
        "debug": config.debug,
        "compileDebug": config.compile_debug,
        "globals": config.globals,
        "self": config.bind_self,
    })
}

impl TemplateEngine for PugCli {
    fn render(&self, source: &str, path: &Path) -> Result<String, TemplateError> {
        let mut child = Command::new(&self.command)
            .args(self.args(path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TemplateError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // Feed stdin from a separate thread so a large output cannot block the write.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin unavailable"))?;
        let input = source.to_owned();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));
        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| io::Error::other("stdin writer panicked"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TemplateError::Syntax(if stderr.is_empty() {
                format!("`{}` exited with {}", self.command, output.status)
            } else {
                stderr
            }));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| TemplateError::Syntax(format!("compiler output is not UTF-8: {e}")))
    }
}

/// Render a single template into `intermediate_dir`. Returns the written path.
pub fn render_file(
    engine: &dyn TemplateEngine,
    template: &Path,
    intermediate_dir: &Path,
) -> Result<PathBuf, RenderError> {
    let target = naming::markup_path(template, intermediate_dir)
        .ok_or_else(|| RenderError::BadName(template.to_path_buf()))?;
    let source = fs::read_to_string(template)?;
    let markup = engine
        .render(&source, template)
        .map_err(|source| RenderError::Template {
            path: template.to_path_buf(),
            source,
        })?;
    files::write_atomic(&target, markup.as_bytes())?;
    debug!("rendered {} → {}", template.display(), target.display());
    Ok(target)
}

/// Render every template in the source directory.
///
/// Returns the intermediate documents written, in template name order. The
/// call returns only after every template has been attempted.
pub fn render_all(
    engine: &dyn TemplateEngine,
    config: &BuildConfig,
) -> Result<Vec<PathBuf>, RenderError> {
    let templates = files::list_inputs(&config.paths.source, &config.templates.extension)?;
    fs::create_dir_all(&config.paths.intermediate)?;

    let results: Vec<_> = templates
        .par_iter()
        .map(|t| render_file(engine, t, &config.paths.intermediate))
        .collect();

    let (written, failed) = files::split_results(results);
    prune_orphans(&templates, config)?;
    if failed.is_empty() {
        Ok(written)
    } else {
        for e in &failed {
            error!("{e}");
        }
        Err(RenderError::Failed(failed))
    }
}

/// Remove intermediate documents whose template no longer exists.
fn prune_orphans(templates: &[PathBuf], config: &BuildConfig) -> Result<(), RenderError> {
    let expected: HashSet<PathBuf> = templates
        .iter()
        .filter_map(|t| naming::markup_path(t, &config.paths.intermediate))
        .collect();
    for doc in files::list_inputs(&config.paths.intermediate, naming::MARKUP_EXTENSION)? {
        if !expected.contains(&doc) {
            fs::remove_file(&doc)?;
            debug!("removed orphaned {}", doc.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockEngine, test_config};
    use tempfile::TempDir;

    #[test]
    fn compiler_options_use_compiler_key_names() {
        let opts = compiler_options(&TemplatesConfig::default());
        assert_eq!(opts["pretty"], true);
        assert_eq!(opts["debug"], false);
        assert_eq!(opts["compileDebug"], false);
        assert_eq!(opts["globals"], serde_json::json!([]));
        assert_eq!(opts["self"], false);
    }

    #[test]
    fn pug_cli_args_include_path_and_flags() {
        let engine = PugCli::new(&TemplatesConfig::default());
        let args = engine.args(Path::new("src/a.pug"));
        assert_eq!(&args[..2], &["--path".to_string(), "src/a.pug".to_string()]);
        assert!(args.contains(&"--pretty".to_string()));
        assert!(args.contains(&"--no-debug".to_string()));
    }

    #[test]
    fn pug_cli_without_pretty_omits_flag() {
        let config = TemplatesConfig {
            pretty: false,
            compile_debug: true,
            ..TemplatesConfig::default()
        };
        let args = PugCli::new(&config).args(Path::new("a.pug"));
        assert!(!args.contains(&"--pretty".to_string()));
        assert!(!args.contains(&"--no-debug".to_string()));
    }

    #[test]
    fn missing_compiler_is_spawn_error() {
        let config = TemplatesConfig {
            command: "pugmail-test-no-such-binary".to_string(),
            ..TemplatesConfig::default()
        };
        let result = PugCli::new(&config).render("p hi", Path::new("a.pug"));
        assert!(matches!(result, Err(TemplateError::Spawn { .. })));
    }

    #[test]
    fn renders_every_template_to_intermediate_dir() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("a.pug"), "<mjml>a</mjml>").unwrap();
        fs::write(config.paths.source.join("b.pug"), "<mjml>b</mjml>").unwrap();

        let written = render_all(&MockEngine::passthrough(), &config).unwrap();

        assert_eq!(written.len(), 2);
        let a = fs::read_to_string(config.paths.intermediate.join("a.mjml")).unwrap();
        assert_eq!(a, "<mjml>a</mjml>");
        assert!(config.paths.intermediate.join("b.mjml").exists());
    }

    #[test]
    fn ignores_other_extensions() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("a.pug"), "x").unwrap();
        fs::write(config.paths.source.join("readme.md"), "x").unwrap();

        let written = render_all(&MockEngine::passthrough(), &config).unwrap();
        assert_eq!(written, vec![config.paths.intermediate.join("a.mjml")]);
    }

    #[test]
    fn syntax_error_fails_stage_and_keeps_previous_output() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("bad.pug"), "BROKEN").unwrap();
        fs::write(config.paths.source.join("good.pug"), "fine").unwrap();
        fs::create_dir_all(&config.paths.intermediate).unwrap();
        fs::write(config.paths.intermediate.join("bad.mjml"), "previous").unwrap();

        let result = render_all(&MockEngine::failing_on("BROKEN"), &config);

        match result {
            Err(RenderError::Failed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].to_string().contains("bad.pug"));
            }
            other => panic!("expected render failure, got {other:?}"),
        }
        let previous = fs::read_to_string(config.paths.intermediate.join("bad.mjml")).unwrap();
        assert_eq!(previous, "previous");
        assert!(config.paths.intermediate.join("good.mjml").exists());
    }

    #[test]
    fn failure_without_previous_output_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("bad.pug"), "BROKEN").unwrap();

        assert!(render_all(&MockEngine::failing_on("BROKEN"), &config).is_err());
        assert!(!config.paths.intermediate.join("bad.mjml").exists());
    }

    #[test]
    fn removes_intermediate_of_deleted_template() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("kept.pug"), "x").unwrap();
        fs::create_dir_all(&config.paths.intermediate).unwrap();
        fs::write(config.paths.intermediate.join("gone.mjml"), "old").unwrap();
        fs::write(config.paths.intermediate.join("notes.txt"), "keep").unwrap();

        render_all(&MockEngine::passthrough(), &config).unwrap();

        assert!(!config.paths.intermediate.join("gone.mjml").exists());
        assert!(config.paths.intermediate.join("kept.mjml").exists());
        assert!(config.paths.intermediate.join("notes.txt").exists());
    }

    #[test]
    fn engine_receives_template_path() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let template = config.paths.source.join("a.pug");
        fs::write(&template, "x").unwrap();

        let engine = MockEngine::passthrough();
        render_all(&engine, &config).unwrap();

        assert_eq!(engine.rendered_paths(), vec![template]);
    }
}
