//! Change coalescing.
//!
//! Filesystem notification mechanisms emit bursts of low-level events for
//! what is logically one change. The coalescer reduces each burst to at
//! most one pending action per path, released only after a quiet window
//! with no further events for that path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// The bundle operation a coalesced change resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Register,
    Deregister,
    Reload,
}

/// Two observed actions that cannot follow each other for one path.
///
/// Upstream filtering makes these sequences unreachable; hitting one is a
/// defect, fatal for the dispatch worker.
#[derive(Debug, Error)]
#[error("Conflicting change events for {path:?}: {prev:?} followed by {next:?}")]
pub struct MergeConflict {
    pub path: PathBuf,
    pub prev: ChangeAction,
    pub next: ChangeAction,
}

struct PendingChange {
    action: ChangeAction,
    due: Instant,
}

/// Per-path debounce state machine.
///
/// Each path is either idle or carries exactly one pending action with an
/// expiry. A new event either starts a pending action, merges into the
/// existing one (refreshing its expiry), or cancels it.
pub struct ChangeCoalescer {
    window: Duration,
    pending: HashMap<PathBuf, PendingChange>,
}

impl ChangeCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Fold one observed action into the pending state for `path`.
    pub fn observe(&mut self, path: PathBuf, next: ChangeAction) -> Result<(), MergeConflict> {
        let due = Instant::now() + self.window;

        let merged = match self.pending.remove(&path) {
            None => Some(next),
            Some(previous) => match (previous.action, next) {
                // Created then deleted inside the window: nothing happened.
                (ChangeAction::Register, ChangeAction::Deregister) => None,
                // Still being written after creation.
                (ChangeAction::Register, ChangeAction::Reload) => Some(ChangeAction::Register),
                (ChangeAction::Reload, ChangeAction::Deregister) => Some(ChangeAction::Deregister),
                (ChangeAction::Reload, ChangeAction::Reload) => Some(ChangeAction::Reload),
                (ChangeAction::Deregister, ChangeAction::Register) => {
                    warn!(
                        "In-place replacement of {:?} within one window is unsupported, dropping the pending action",
                        path
                    );
                    None
                }
                (prev, next) => return Err(MergeConflict { path, prev, next }),
            },
        };

        if let Some(action) = merged {
            self.pending.insert(path, PendingChange { action, due });
        }

        Ok(())
    }

    /// Earliest pending expiry, if anything is pending.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.due).min()
    }

    /// Remove and return every action due by `now`, earliest expiry first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, ChangeAction)> {
        let mut due: Vec<(PathBuf, ChangeAction, Instant)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(path, pending)| (path.clone(), pending.action, pending.due))
            .collect();
        due.sort_by_key(|(_, _, expiry)| *expiry);

        for (path, _, _) in &due {
            self.pending.remove(path);
        }

        due.into_iter()
            .map(|(path, action, _)| (path, action))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
