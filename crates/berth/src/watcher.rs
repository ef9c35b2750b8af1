//! Directory watching.
//!
//! One worker observes the watched directory through the OS notification
//! mechanism, filters and translates the raw events, and feeds the
//! resulting change messages to the dispatcher over a channel. The two
//! workers share no mutable state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coalesce::ChangeAction;
use crate::service::ServiceError;

/// Autoload configuration.
#[derive(Debug, Clone)]
pub struct AutoloadConfig {
    /// Directory watched for bundle archives.
    pub dir: PathBuf,
    /// Quiet period after the last raw event for a path before its
    /// coalesced action dispatches.
    pub quiet_window: Duration,
    /// File extensions recognized as bundle archives.
    pub archive_extensions: Vec<String>,
    /// Ignore patterns for editor droppings and scratch files.
    pub ignore_patterns: Vec<String>,
    /// Capacity of the worker channels.
    pub channel_capacity: usize,
}

impl AutoloadConfig {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            quiet_window: Duration::from_millis(500),
            archive_extensions: vec!["so".to_string(), "dylib".to_string(), "dll".to_string()],
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
            channel_capacity: 1024,
        }
    }

    /// Set the quiet window.
    pub fn with_quiet_window(mut self, window: Duration) -> Self {
        self.quiet_window = window;
        self
    }

    /// Add a recognized archive extension.
    pub fn with_archive_extension(mut self, ext: &str) -> Self {
        self.archive_extensions.push(ext.to_string());
        self
    }

    /// Add an ignore pattern.
    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Set the worker channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Whether a path is a bundle archive this host should react to.
    pub(crate) fn is_applicable(&self, path: &Path) -> bool {
        if path.is_dir() {
            return false;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.archive_extensions.iter().any(|known| known == ext) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        for pattern in &self.ignore_patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if file_name.ends_with(suffix) {
                    return false;
                }
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                if file_name.starts_with(prefix) {
                    return false;
                }
            } else if file_name == pattern {
                return false;
            }
        }

        true
    }
}

/// Translate a raw notification into the bundle operation it implies.
fn translate(kind: &EventKind, path: &Path) -> Option<ChangeAction> {
    match kind {
        EventKind::Create(_) => Some(ChangeAction::Register),
        EventKind::Remove(_) => Some(ChangeAction::Deregister),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeAction::Deregister),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeAction::Register),
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Some(ChangeAction::Register)
            } else {
                Some(ChangeAction::Deregister)
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(ChangeAction::Reload)
        }
        _ => None,
    }
}

/// Watches the autoload directory and forwards translated change messages.
///
/// Dropping the watcher stops both the OS watch and the forwarding task.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl DirectoryWatcher {
    /// Start watching `config.dir`, sending `(path, action)` messages to
    /// `events`. Must be called from within a Tokio runtime.
    pub fn spawn(
        config: &AutoloadConfig,
        events: mpsc::Sender<(PathBuf, ChangeAction)>,
    ) -> Result<Self, ServiceError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Event>(config.channel_capacity);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = raw_tx.blocking_send(event);
                }
                Err(err) => warn!("Directory watch error: {}", err),
            },
            notify::Config::default(),
        )
        .map_err(|source| ServiceError::Watch {
            path: config.dir.clone(),
            source,
        })?;

        watcher
            .watch(&config.dir, RecursiveMode::NonRecursive)
            .map_err(|source| ServiceError::Watch {
                path: config.dir.clone(),
                source,
            })?;

        info!("Bundle autoloading now watching {:?}", config.dir);

        let filter = config.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                for path in &event.paths {
                    if !filter.is_applicable(path) {
                        continue;
                    }

                    let Some(action) = translate(&event.kind, path) else {
                        continue;
                    };

                    debug!("Observed {:?} for {:?}", action, path);
                    if events.send((path.clone(), action)).await.is_err() {
                        error!("Dispatcher channel closed, directory watching stopped");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            forwarder,
        })
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
