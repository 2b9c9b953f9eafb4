//! Template change watching.
//!
//! Watches the source directory recursively and triggers one rebuild per
//! burst of template changes. Partials in subdirectories count: a change to
//! an included file changes the rendered output of its parents.
//!
//! Events are debounced: a rebuild starts once no new change has arrived
//! for `pipeline.watch_debounce_ms`. Changes that arrive while a rebuild is
//! running queue up in the channel and produce a single follow-up rebuild.
//! Editors that touch a file without changing it (save without edits,
//! metadata updates) do not trigger anything: each template's content hash
//! is compared with the last one seen.

use crate::config::BuildConfig;
use crate::naming;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directory watched recursively.
    pub source: PathBuf,
    /// Only files with this extension trigger a rebuild.
    pub extension: String,
    pub debounce: Duration,
}

impl WatchOptions {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            source: config.paths.source.clone(),
            extension: config.templates.extension.clone(),
            debounce: Duration::from_millis(config.pipeline.watch_debounce_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Started { source: PathBuf },
    FileChanged { path: PathBuf },
    RebuildStarted { changes: usize },
    RebuildComplete,
    RebuildFailed { message: String },
    Shutdown,
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Started { source } => write!(f, "watching {}", source.display()),
            WatchEvent::FileChanged { path } => write!(f, "changed: {}", path.display()),
            WatchEvent::RebuildStarted { changes } => {
                write!(f, "rebuilding ({changes} changed file(s))")
            }
            WatchEvent::RebuildComplete => write!(f, "rebuild complete"),
            WatchEvent::RebuildFailed { message } => write!(f, "rebuild failed: {message}"),
            WatchEvent::Shutdown => write!(f, "watch stopped"),
        }
    }
}

/// Pending changes and the time of the most recent one.
struct WatcherState {
    pending_changes: HashSet<PathBuf>,
    last_change: Option<Instant>,
    debounce: Duration,
}

impl WatcherState {
    fn new(debounce: Duration) -> Self {
        Self {
            pending_changes: HashSet::new(),
            last_change: None,
            debounce,
        }
    }

    fn add_change(&mut self, path: PathBuf) {
        self.pending_changes.insert(path);
        self.last_change = Some(Instant::now());
    }

    fn should_rebuild(&self) -> bool {
        match self.last_change {
            Some(last) => !self.pending_changes.is_empty() && last.elapsed() >= self.debounce,
            None => false,
        }
    }

    fn take_changes(&mut self) -> Vec<PathBuf> {
        let changes: Vec<_> = self.pending_changes.drain().collect();
        self.last_change = None;
        changes
    }
}

/// Last seen content hash of every watched template.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    extension: String,
    hashes: HashMap<PathBuf, String>,
}

impl ChangeFilter {
    /// Record the current contents of every template under `dir`.
    pub fn from_dir(dir: &Path, extension: &str) -> io::Result<Self> {
        let mut filter = Self {
            extension: extension.to_string(),
            hashes: HashMap::new(),
        };
        if !dir.exists() {
            return Ok(filter);
        }
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(io::Error::other)?;
            let path = entry.path();
            if entry.file_type().is_file() && naming::has_extension(path, extension) {
                let contents = fs::read(path)?;
                filter.hashes.insert(key(path), hash_content(&contents));
            }
        }
        Ok(filter)
    }

    /// Whether `path` is a template whose contents differ from the last
    /// recorded version. Records the new version when it does.
    pub fn is_changed(&mut self, path: &Path) -> bool {
        if !naming::has_extension(path, &self.extension) {
            return false;
        }
        let key = key(path);
        match fs::read(path) {
            Ok(contents) => {
                let hash = hash_content(&contents);
                if self.hashes.get(&key) == Some(&hash) {
                    false
                } else {
                    self.hashes.insert(key, hash);
                    true
                }
            }
            // Deleted templates change the output only if they were known.
            Err(_) => self.hashes.remove(&key).is_some(),
        }
    }
}

/// Absolute path with the parent directory resolved, so a template keeps
/// the same key after it is deleted and whether it is seen through a
/// relative or an absolute path.
fn key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

fn hash_content(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("sha256:{:x}", hasher.finalize())
}

/// Watch `options.source` and call `rebuild` after each burst of template
/// changes, until `running` is cleared.
///
/// A failing rebuild is reported through `on_event` and does not stop the loop.
pub fn watch(
    options: &WatchOptions,
    filter: ChangeFilter,
    running: Arc<AtomicBool>,
    rebuild: impl FnMut() -> Result<(), String>,
    mut on_event: impl FnMut(&WatchEvent),
) -> Result<(), WatchError> {
    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(&options.source, RecursiveMode::Recursive)?;

    on_event(&WatchEvent::Started {
        source: options.source.clone(),
    });
    run_loop(&rx, options.debounce, filter, &running, rebuild, &mut on_event);
    on_event(&WatchEvent::Shutdown);
    Ok(())
}

/// Debounce loop over changed paths, independent of the event source.
fn run_loop(
    rx: &Receiver<PathBuf>,
    debounce: Duration,
    mut filter: ChangeFilter,
    running: &AtomicBool,
    mut rebuild: impl FnMut() -> Result<(), String>,
    on_event: &mut impl FnMut(&WatchEvent),
) {
    let mut state = WatcherState::new(debounce);

    while running.load(Ordering::SeqCst) {
        if let Ok(path) = rx.recv_timeout(POLL_INTERVAL)
            && filter.is_changed(&path)
        {
            on_event(&WatchEvent::FileChanged { path: path.clone() });
            state.add_change(path);
        }

        if state.should_rebuild() {
            let changes = state.take_changes();
            on_event(&WatchEvent::RebuildStarted {
                changes: changes.len(),
            });
            match rebuild() {
                Ok(()) => on_event(&WatchEvent::RebuildComplete),
                Err(message) => on_event(&WatchEvent::RebuildFailed { message }),
            }
        }
    }
}
