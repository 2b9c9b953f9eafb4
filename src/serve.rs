//! Live-reload dev server.
//!
//! Serving and browser reload are delegated to an external `live-server`
//! process. [`DevServer`] owns the child: it is started once per full build
//! and killed when the handle is dropped, so watch-triggered rebuilds never
//! restart it.

use crate::config::{BuildConfig, ServerConfig};
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("dev server `{command}` could not be started: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("nothing to serve: {} does not exist", .0.display())]
    MissingRoot(PathBuf),
}

/// Handle on a running dev server process.
#[derive(Debug)]
pub struct DevServer {
    child: Child,
    url: String,
}

impl DevServer {
    /// Spawn the dev server on the configured root (the output directory by default).
    pub fn start(config: &BuildConfig) -> Result<Self, ServeError> {
        let root = config.server_root();
        if !root.is_dir() {
            return Err(ServeError::MissingRoot(root.to_path_buf()));
        }
        let server = &config.server;
        let args = server_args(server, root);
        debug!("starting {} {}", server.command, args.join(" "));
        let child = Command::new(&server.command)
            .args(&args)
            .spawn()
            .map_err(|source| ServeError::Spawn {
                command: server.command.clone(),
                source,
            })?;
        Ok(Self {
            child,
            url: format!("http://127.0.0.1:{}/", server.port),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Block until the server exits. Ctrl+C reaches the server through the
    /// terminal's process group, so this returns once it has shut down.
    pub fn wait(&mut self) -> Result<ExitStatus, ServeError> {
        Ok(self.child.wait()?)
    }

    /// Whether the process is still alive.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!("could not stop dev server (pid {}): {e}", self.child.id());
            return;
        }
        let _ = self.child.wait();
        debug!("dev server stopped");
    }
}

/// Command-line arguments for `live-server`.
///
/// Log levels 0 and 1 map to `--quiet`, 3 to `--verbose`; 2 is the
/// server's own default.
pub fn server_args(server: &ServerConfig, root: &Path) -> Vec<String> {
    let mut args = vec![
        root.display().to_string(),
        format!("--port={}", server.port),
        format!("--entry-file={}", server.entry_file),
        format!("--wait={}", server.startup_wait_ms),
    ];
    if !server.open_browser {
        args.push("--no-browser".to_string());
    }
    match server.log_level {
        0 | 1 => args.push("--quiet".to_string()),
        3 => args.push("--verbose".to_string()),
        _ => {}
    }
    args
}
