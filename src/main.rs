use clap::{Parser, Subcommand};
use pugmail::compile::MrmlCompiler;
use pugmail::config::{self, BuildConfig};
use pugmail::pipeline::{self, Pipeline};
use pugmail::render::PugCli;
use pugmail::serve::DevServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(name = "pugmail")]
#[command(about = "Build pipeline for responsive email templates")]
#[command(long_about = "\
Build pipeline for responsive email templates

Pug templates are rendered to MJML, compiled to email-safe HTML, minified
and served with live reload.

Project structure:

  pugmail.toml                 # Optional config (see 'pugmail gen-config')
  src/
  ├── welcome.pug              # Template → dist/welcome.html, dist/welcome.min.html
  ├── partials/
  │   └── footer.pug           # Included by templates, not built on its own
  └── mjml/                    # Rendered MJML, rewritten on every run
  dist/                        # Compiled and minified HTML

Pipeline:
  clean → render → compile → minify → verify → serve → watch

Every stage can be run on its own. Template rendering requires the 'pug'
command (npm install -g pug-cli); serving requires 'live-server'.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./pugmail.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Template source directory
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Output directory for compiled HTML
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Directory for rendered MJML
    #[arg(long, global = true)]
    intermediate: Option<PathBuf>,

    /// Dev server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Do not open a browser when the dev server starts
    #[arg(long, global = true)]
    no_open: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: clean → render → compile → minify → verify → serve → watch
    Build {
        /// Stop after verifying: no dev server, no watch
        #[arg(long)]
        no_serve: bool,
    },
    /// Delete the output directory
    Clean,
    /// Render templates to MJML
    Render,
    /// Compile MJML to HTML
    Compile,
    /// Write minified siblings of compiled HTML
    Minify,
    /// Report the size of every generated document
    Verify,
    /// Serve the output directory with live reload
    Serve,
    /// Rebuild on template change, without cleaning or serving
    Watch,
    /// Render and compile into a scratch directory to validate templates
    Check,
    /// Print a stock pugmail.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let command = cli.command.as_ref().unwrap_or(&Command::Build { no_serve: false });
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = load_build_config(&cli)?;
    let engine = PugCli::new(&config.templates);
    let compiler = MrmlCompiler::new(&config.mjml);
    let mut stages = Pipeline::new(&config, &engine, &compiler).printing(true);

    match command {
        Command::Build { no_serve: true } => {
            stages.build()?;
            println!("==> Build complete: {}", config.paths.output.display());
        }
        Command::Build { no_serve: false } => {
            pipeline::run_dev(&config, &engine, &compiler, interrupt_flag())?;
        }
        Command::Clean => stages.clean()?,
        Command::Render => {
            stages.render()?;
        }
        Command::Compile => {
            stages.ensure_output_dir()?;
            stages.compile()?;
        }
        Command::Minify => {
            stages.minify()?;
        }
        Command::Verify => {
            stages.verify()?;
        }
        Command::Serve => {
            // Keep pugmail alive on Ctrl+C until the server has exited.
            let _running = interrupt_flag();
            let mut server = DevServer::start(&config)?;
            println!("Dev server on {} (Ctrl+C to stop)", server.url());
            let status = server.wait()?;
            log::debug!("dev server exited: {status}");
        }
        Command::Watch => {
            pipeline::run_watch(&config, &engine, &compiler, interrupt_flag())?;
        }
        Command::Check => check(&config, &engine, &compiler)?,
        Command::GenConfig => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// `info` by default, `debug` with `--verbose`; `RUST_LOG` overrides both.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Cleared on Ctrl+C.
fn interrupt_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    }) {
        log::warn!("could not install Ctrl+C handler: {e}");
    }
    running
}

/// Stock defaults ← config file ← command-line flags.
fn load_build_config(cli: &Cli) -> Result<BuildConfig, config::ConfigError> {
    let file = match &cli.config {
        Some(path) => Some(config::read_config_value(path)?),
        None => {
            let default = Path::new(config::CONFIG_FILE_NAME);
            if default.exists() {
                Some(config::read_config_value(default)?)
            } else {
                None
            }
        }
    };
    let overlay = match file {
        Some(file) => config::merge_toml(file, cli_overrides(cli)),
        None => cli_overrides(cli),
    };
    config::resolve_config(Some(overlay))
}

fn cli_overrides(cli: &Cli) -> toml::Value {
    let mut paths = toml::Table::new();
    let mut server = toml::Table::new();
    let path_value = |p: &PathBuf| toml::Value::String(p.display().to_string());
    if let Some(source) = &cli.source {
        paths.insert("source".into(), path_value(source));
    }
    if let Some(output) = &cli.output {
        paths.insert("output".into(), path_value(output));
    }
    if let Some(intermediate) = &cli.intermediate {
        paths.insert("intermediate".into(), path_value(intermediate));
    }
    if let Some(port) = cli.port {
        server.insert("port".into(), toml::Value::Integer(i64::from(port)));
    }
    if cli.no_open {
        server.insert("open_browser".into(), toml::Value::Boolean(false));
    }

    let mut root = toml::Table::new();
    if !paths.is_empty() {
        root.insert("paths".into(), toml::Value::Table(paths));
    }
    if !server.is_empty() {
        root.insert("server".into(), toml::Value::Table(server));
    }
    toml::Value::Table(root)
}

/// Render and compile every template into a scratch directory. The project's
/// intermediate and output directories are left untouched.
fn check(
    config: &BuildConfig,
    engine: &PugCli,
    compiler: &MrmlCompiler,
) -> Result<(), Box<dyn std::error::Error>> {
    let scratch = std::env::temp_dir().join(format!("pugmail-check-{}", std::process::id()));
    let mut scratch_config = config.clone();
    scratch_config.paths.intermediate = scratch.join("mjml");
    scratch_config.paths.output = scratch.join("html");

    println!("==> Checking {}", config.paths.source.display());
    let mut stages = Pipeline::new(&scratch_config, engine, compiler).printing(true);
    let result = render_and_compile(&mut stages);
    let _ = std::fs::remove_dir_all(&scratch);
    result?;
    println!("==> Templates are valid");
    Ok(())
}

fn render_and_compile(stages: &mut Pipeline<'_>) -> Result<(), pipeline::PipelineError> {
    stages.ensure_output_dir()?;
    stages.render()?;
    stages.compile()?;
    Ok(())
}
