//! Autoload service.
//!
//! Wires the directory watcher to the dispatch worker. The dispatcher
//! owns both the coalescer and the registry, so every registry mutation
//! happens on one task and no per-path locking is needed. Unrelated
//! paths' operations are deliberately serialized in exchange.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::coalesce::{ChangeAction, ChangeCoalescer};
use crate::registry::AutoloadRegistry;
use crate::watcher::{AutoloadConfig, DirectoryWatcher};

/// Errors that can occur while starting the autoload service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The watched directory could not be observed.
    #[error("Failed to watch {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The startup scan of the watched directory failed.
    #[error("Failed to scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Running autoload service: one watcher worker, one dispatch worker.
pub struct AutoloadHost {
    watcher: DirectoryWatcher,
    dispatcher: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl AutoloadHost {
    /// Scan the watched directory, register every bundle already present,
    /// then start the watcher and dispatch workers.
    ///
    /// The scan runs synchronously before the dispatcher spawns, so
    /// pre-existing bundles are never missed and never race the workers.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: AutoloadConfig,
        mut registry: AutoloadRegistry,
    ) -> Result<Self, ServiceError> {
        info!("Starting bundle autoload for {:?}", config.dir);

        let entries = std::fs::read_dir(&config.dir).map_err(|source| ServiceError::Scan {
            path: config.dir.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && config.is_applicable(&path) {
                registry.register(&path);
            }
        }

        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let watcher = DirectoryWatcher::spawn(&config, event_tx)?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let coalescer = ChangeCoalescer::new(config.quiet_window);
        let dispatcher = tokio::spawn(dispatch_loop(registry, coalescer, event_rx, shutdown_rx));

        info!("Bundle autoloading now operational");

        Ok(Self {
            watcher,
            dispatcher,
            shutdown_tx,
        })
    }

    /// Stop both workers and wait for the dispatcher to drain.
    pub async fn shutdown(self) {
        info!("Stopping bundle autoload");

        let Self {
            watcher,
            dispatcher,
            shutdown_tx,
        } = self;

        let _ = shutdown_tx.send(()).await;
        drop(watcher);

        if let Err(err) = dispatcher.await {
            warn!("Autoload dispatcher did not stop cleanly: {}", err);
        }
    }
}

/// Consume change messages, coalesce them, and apply expired actions to
/// the registry, earliest expiry first.
async fn dispatch_loop(
    mut registry: AutoloadRegistry,
    mut coalescer: ChangeCoalescer,
    mut events: mpsc::Receiver<(PathBuf, ChangeAction)>,
    mut shutdown: mpsc::Receiver<()>,
) {
    loop {
        let due = coalescer.next_due();

        tokio::select! {
            event = events.recv() => {
                match event {
                    Some((path, action)) => {
                        debug!("Coalescing {:?} for {:?}", action, path);
                        if let Err(conflict) = coalescer.observe(path, action) {
                            error!(
                                "Change coalescing failed, bundle autoloading now frozen: {}",
                                conflict
                            );
                            return;
                        }
                    }
                    None => {
                        error!("Watcher channel closed, bundle autoloading now frozen");
                        return;
                    }
                }
            }
            _ = sleep_until_due(due) => {
                for (path, action) in coalescer.take_due(Instant::now()) {
                    apply(&mut registry, &path, action);
                }
            }
            _ = shutdown.recv() => {
                info!("Autoload dispatcher shutting down");
                return;
            }
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn apply(registry: &mut AutoloadRegistry, path: &Path, action: ChangeAction) {
    match action {
        ChangeAction::Register => registry.register(path),
        ChangeAction::Deregister => registry.deregister(path),
        ChangeAction::Reload => registry.reload(path),
    }
}
