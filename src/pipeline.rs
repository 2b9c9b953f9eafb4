//! Pipeline orchestration.
//!
//! A full build walks the stages strictly in order:
//!
//! ```text
//! idle → cleaning → ensuring-output-dir → rendering → compiling → minifying → verifying
//!      → serving → watching
//! ```
//!
//! `watching` is a steady state: each template change re-enters
//! `rendering → compiling → minifying → verifying` without cleaning, without
//! re-creating the output directory and without restarting the server.
//!
//! Each stage returns only after every file it handles has been written, so
//! a stage never observes a file the previous stage is still producing. A
//! failing stage stops a full build; during watch the failure is reported
//! and the loop keeps running (see [`run_dev`]).

use crate::compile::{self, CompileError, MarkupCompiler};
use crate::config::{BuildConfig, OutputDirErrors};
use crate::minify::{self, MinifyError, MinifyReport};
use crate::output;
use crate::render::{self, RenderError, TemplateEngine};
use crate::serve::{DevServer, ServeError};
use crate::verify::{self, SizeReport, VerifyError};
use crate::watch::{self, ChangeFilter, WatchError, WatchEvent, WatchOptions};
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot clean {}: {source}", .path.display())]
    Clean { path: PathBuf, source: io::Error },
    #[error("refusing to clean {}: it is not a dedicated output directory", .0.display())]
    UnsafeClean(PathBuf),
    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Minify(#[from] MinifyError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Cleaning,
    EnsuringOutputDir,
    Rendering,
    Compiling,
    Minifying,
    Verifying,
    Serving,
    Watching,
}

impl Stage {
    /// Stages re-entered on every template change.
    pub const REBUILD: [Stage; 4] = [
        Stage::Rendering,
        Stage::Compiling,
        Stage::Minifying,
        Stage::Verifying,
    ];

    /// Successor in a full build. `Watching` has none: it loops on itself.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Idle => Some(Stage::Cleaning),
            Stage::Cleaning => Some(Stage::EnsuringOutputDir),
            Stage::EnsuringOutputDir => Some(Stage::Rendering),
            Stage::Rendering => Some(Stage::Compiling),
            Stage::Compiling => Some(Stage::Minifying),
            Stage::Minifying => Some(Stage::Verifying),
            Stage::Verifying => Some(Stage::Serving),
            Stage::Serving => Some(Stage::Watching),
            Stage::Watching => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Cleaning => "Cleaning output",
            Stage::EnsuringOutputDir => "Preparing output directory",
            Stage::Rendering => "Rendering templates",
            Stage::Compiling => "Compiling MJML",
            Stage::Minifying => "Minifying HTML",
            Stage::Verifying => "Verifying output",
            Stage::Serving => "Starting dev server",
            Stage::Watching => "Watching templates",
        }
    }
}

/// Everything one pass of the rebuild stages produced.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub rendered: Vec<PathBuf>,
    pub compiled: Vec<PathBuf>,
    pub minified: MinifyReport,
    pub sizes: Vec<SizeReport>,
}

/// Runs stages against one configuration and one pair of engines.
pub struct Pipeline<'a> {
    config: &'a BuildConfig,
    engine: &'a dyn TemplateEngine,
    compiler: &'a dyn MarkupCompiler,
    stage: Stage,
    transitions: Vec<Stage>,
    print: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a BuildConfig,
        engine: &'a dyn TemplateEngine,
        compiler: &'a dyn MarkupCompiler,
    ) -> Self {
        Self {
            config,
            engine,
            compiler,
            stage: Stage::Idle,
            transitions: Vec::new(),
            print: false,
        }
    }

    /// Print stage headers and results to stdout.
    pub fn printing(mut self, print: bool) -> Self {
        self.print = print;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order.
    pub fn transitions(&self) -> &[Stage] {
        &self.transitions
    }

    fn enter(&mut self, stage: Stage) {
        debug!("{:?} → {:?}", self.stage, stage);
        self.stage = stage;
        self.transitions.push(stage);
        if self.print {
            output::print_stage_header(stage);
        }
    }

    /// Delete the output directory and everything in it.
    pub fn clean(&mut self) -> Result<(), PipelineError> {
        self.enter(Stage::Cleaning);
        let out = &self.config.paths.output;
        if is_unsafe_to_clean(out, &self.config.paths.source) {
            return Err(PipelineError::UnsafeClean(out.clone()));
        }
        match fs::remove_dir_all(out) {
            Ok(()) => {
                info!("removed {}", out.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::Clean {
                path: out.clone(),
                source,
            }),
        }
    }

    /// Create the output directory if absent.
    ///
    /// Under `pipeline.output_dir_errors = "warn"` a failure is logged and
    /// the pipeline continues; otherwise it aborts before any write.
    pub fn ensure_output_dir(&mut self) -> Result<(), PipelineError> {
        self.enter(Stage::EnsuringOutputDir);
        let out = &self.config.paths.output;
        match fs::create_dir_all(out) {
            Ok(()) => {
                debug!("output directory {} ready", out.display());
                Ok(())
            }
            Err(source) => match self.config.pipeline.output_dir_errors {
                OutputDirErrors::Warn => {
                    warn!("cannot create output directory {}: {source}", out.display());
                    Ok(())
                }
                OutputDirErrors::Abort => Err(PipelineError::OutputDir {
                    path: out.clone(),
                    source,
                }),
            },
        }
    }

    pub fn render(&mut self) -> Result<Vec<PathBuf>, PipelineError> {
        self.enter(Stage::Rendering);
        let written = render::render_all(self.engine, self.config)?;
        if self.print {
            output::print_written(&written);
        }
        Ok(written)
    }

    pub fn compile(&mut self) -> Result<Vec<PathBuf>, PipelineError> {
        self.enter(Stage::Compiling);
        let written = compile::compile_all(self.compiler, self.config)?;
        if self.print {
            output::print_written(&written);
        }
        Ok(written)
    }

    pub fn minify(&mut self) -> Result<MinifyReport, PipelineError> {
        self.enter(Stage::Minifying);
        let report = minify::minify_all(self.config)?;
        if self.print {
            output::print_minify_output(&report);
        }
        Ok(report)
    }

    pub fn verify(&mut self) -> Result<Vec<SizeReport>, PipelineError> {
        self.enter(Stage::Verifying);
        let sizes = verify::verify_all(self.config)?;
        if self.print {
            output::print_verify_output(&sizes);
        } else {
            for size in &sizes {
                info!("{}", output::format_size_line(size));
            }
        }
        Ok(sizes)
    }

    /// Render → compile → minify → verify, stopping at the first failing stage.
    pub fn rebuild(&mut self) -> Result<BuildSummary, PipelineError> {
        let rendered = self.render()?;
        let compiled = self.compile()?;
        let minified = self.minify()?;
        let sizes = self.verify()?;
        Ok(BuildSummary {
            rendered,
            compiled,
            minified,
            sizes,
        })
    }

    /// Clean → ensure output dir → rebuild.
    pub fn build(&mut self) -> Result<BuildSummary, PipelineError> {
        self.clean()?;
        self.ensure_output_dir()?;
        self.rebuild()
    }
}

/// The output directory must be a dedicated directory: not the working
/// directory, and neither the source directory nor one of its ancestors.
fn is_unsafe_to_clean(output: &Path, source: &Path) -> bool {
    if output.as_os_str().is_empty() || output == Path::new(".") || output.parent().is_none() {
        return true;
    }
    let canon = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canon(source).starts_with(canon(output))
}

/// Full development loop: build, serve, then rebuild on every template change
/// until `running` is cleared.
///
/// A failure in the initial build is returned before the server starts.
/// Failures during watch-triggered rebuilds are reported and the loop goes on.
pub fn run_dev(
    config: &BuildConfig,
    engine: &dyn TemplateEngine,
    compiler: &dyn MarkupCompiler,
    running: Arc<AtomicBool>,
) -> Result<(), PipelineError> {
    let mut pipeline = Pipeline::new(config, engine, compiler).printing(true);
    pipeline.build()?;

    pipeline.enter(Stage::Serving);
    let server = DevServer::start(config)?;
    println!("Dev server on {}", server.url());

    pipeline.enter(Stage::Watching);
    watch_with(&mut pipeline, running)?;
    drop(server);
    Ok(())
}

/// Watch templates and rebuild on change, without cleaning or serving.
pub fn run_watch(
    config: &BuildConfig,
    engine: &dyn TemplateEngine,
    compiler: &dyn MarkupCompiler,
    running: Arc<AtomicBool>,
) -> Result<(), PipelineError> {
    let mut pipeline = Pipeline::new(config, engine, compiler).printing(true);
    pipeline.enter(Stage::Watching);
    watch_with(&mut pipeline, running)
}

fn watch_with(pipeline: &mut Pipeline<'_>, running: Arc<AtomicBool>) -> Result<(), PipelineError> {
    let config: &BuildConfig = pipeline.config;
    let options = WatchOptions::from_config(config);
    let filter = ChangeFilter::from_dir(&config.paths.source, &config.templates.extension)
        .map_err(WatchError::from)?;

    watch::watch(
        &options,
        filter,
        running,
        || {
            let result = pipeline.rebuild().map(|_| ()).map_err(|e| e.to_string());
            pipeline.stage = Stage::Watching;
            result
        },
        |event| match event {
            WatchEvent::RebuildFailed { message } => error!("rebuild failed:\n{message}"),
            other => info!("{other}"),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::MrmlCompiler;
    use crate::test_helpers::{MINIMAL_MJML, MockEngine, test_config};
    use tempfile::TempDir;

    fn compiler(config: &BuildConfig) -> MrmlCompiler {
        MrmlCompiler::new(&config.mjml)
    }

    #[test]
    fn full_build_stage_order() {
        let mut stages = vec![Stage::Idle];
        while let Some(next) = stages.last().unwrap().next() {
            stages.push(next);
        }
        assert_eq!(
            stages,
            vec![
                Stage::Idle,
                Stage::Cleaning,
                Stage::EnsuringOutputDir,
                Stage::Rendering,
                Stage::Compiling,
                Stage::Minifying,
                Stage::Verifying,
                Stage::Serving,
                Stage::Watching,
            ]
        );
    }

    #[test]
    fn build_runs_stages_in_order_and_produces_all_outputs() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("a.pug"), MINIMAL_MJML).unwrap();
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        let summary = pipeline.build().unwrap();

        assert_eq!(
            pipeline.transitions(),
            &[
                Stage::Cleaning,
                Stage::EnsuringOutputDir,
                Stage::Rendering,
                Stage::Compiling,
                Stage::Minifying,
                Stage::Verifying,
            ]
        );
        assert_eq!(summary.rendered, vec![config.paths.intermediate.join("a.mjml")]);
        assert_eq!(summary.compiled, vec![config.paths.output.join("a.html")]);
        assert_eq!(summary.minified.written, vec![config.paths.output.join("a.min.html")]);
        let names: Vec<_> = summary.sizes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.html", "a.min.html"]);
    }

    #[test]
    fn clean_build_removes_stale_output() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::create_dir_all(&config.paths.output).unwrap();
        fs::write(config.paths.output.join("stale.html"), "old").unwrap();
        fs::write(config.paths.source.join("a.pug"), MINIMAL_MJML).unwrap();
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        Pipeline::new(&config, &engine, &compiler).build().unwrap();

        assert!(!config.paths.output.join("stale.html").exists());
        assert!(config.paths.output.join("a.html").exists());
    }

    #[test]
    fn render_failure_stops_before_compiling() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("a.pug"), "BROKEN").unwrap();
        let engine = MockEngine::failing_on("BROKEN");
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        let err = pipeline.build().unwrap_err();

        assert!(matches!(err, PipelineError::Render(_)));
        assert_eq!(pipeline.stage(), Stage::Rendering);
        assert!(!pipeline.transitions().contains(&Stage::Compiling));
    }

    #[test]
    fn compile_failure_stops_before_minifying() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::write(config.paths.source.join("a.pug"), "<mjml><mj-body>").unwrap();
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        let err = pipeline.build().unwrap_err();

        assert!(matches!(err, PipelineError::Compile(_)));
        assert!(!pipeline.transitions().contains(&Stage::Minifying));
        assert!(!config.paths.output.join("a.html").exists());
    }

    #[test]
    fn rebuild_skips_cleaning() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        fs::create_dir_all(&config.paths.output).unwrap();
        fs::write(config.paths.output.join("keep.txt"), "x").unwrap();
        fs::write(config.paths.source.join("a.pug"), MINIMAL_MJML).unwrap();
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        pipeline.rebuild().unwrap();

        assert_eq!(pipeline.transitions(), &Stage::REBUILD);
        assert!(config.paths.output.join("keep.txt").exists());
    }

    #[test]
    fn output_dir_failure_aborts_by_default() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        // A regular file where the output directory should go
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        config.paths.output = blocker.join("dist");
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        let err = pipeline.ensure_output_dir().unwrap_err();
        assert!(matches!(err, PipelineError::OutputDir { .. }));
    }

    #[test]
    fn output_dir_failure_is_tolerated_when_configured() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        config.paths.output = blocker.join("dist");
        config.pipeline.output_dir_errors = OutputDirErrors::Warn;
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        assert!(pipeline.ensure_output_dir().is_ok());
    }

    #[test]
    fn refuses_to_clean_source_ancestor() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        config.paths.output = tmp.path().to_path_buf();
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);

        let mut pipeline = Pipeline::new(&config, &engine, &compiler);
        assert!(matches!(
            pipeline.clean(),
            Err(PipelineError::UnsafeClean(_))
        ));
        assert!(config.paths.source.exists());
    }

    #[test]
    fn unsafe_clean_targets() {
        assert!(is_unsafe_to_clean(Path::new(""), Path::new("src")));
        assert!(is_unsafe_to_clean(Path::new("."), Path::new("src")));
        assert!(is_unsafe_to_clean(Path::new("/"), Path::new("src")));
        assert!(!is_unsafe_to_clean(Path::new("dist"), Path::new("src")));
    }

    #[test]
    fn clean_of_missing_output_is_ok() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let engine = MockEngine::passthrough();
        let compiler = compiler(&config);
        assert!(Pipeline::new(&config, &engine, &compiler).clean().is_ok());
    }
}
