//! Identity-bound adapter for console commands.

use std::sync::Arc;

use berth_api::{AnyDelegate, CONSOLE_COMMAND, CommandRef, ConsoleCommand, ExtensionKind};
use tracing::warn;

use crate::adapter::{AnyHandle, ExtensionAdapter};
use crate::collections::ExtensionList;

/// Installs command delegates directly as their own handles.
///
/// The host indexes commands by object identity, so a swap necessarily
/// replaces the handle: the old entry leaves the collection and the new
/// delegate takes its position. Anything that cached the old handle holds
/// a dead reference afterwards.
pub struct CommandAdapter {
    commands: Arc<ExtensionList<dyn ConsoleCommand>>,
}

impl CommandAdapter {
    pub fn new(commands: Arc<ExtensionList<dyn ConsoleCommand>>) -> Self {
        Self { commands }
    }
}

impl ExtensionAdapter for CommandAdapter {
    fn kind(&self) -> ExtensionKind {
        CONSOLE_COMMAND
    }

    fn accepts(&self, delegate: &AnyDelegate) -> bool {
        delegate.downcast_ref::<CommandRef>().is_some()
    }

    fn register_stable(&self, delegates: Vec<AnyDelegate>) -> Vec<AnyHandle> {
        let mut handles = Vec::with_capacity(delegates.len());

        for delegate in delegates {
            let command = match delegate.downcast::<CommandRef>() {
                Ok(command) => *command,
                Err(_) => {
                    warn!("Dropping console command delegate with unexpected payload type");
                    continue;
                }
            };

            self.commands.insert_front(command.clone());
            handles.push(Box::new(command) as AnyHandle);
        }

        handles
    }

    fn swap(&self, handles: &mut [AnyHandle], delegates: Vec<AnyDelegate>) {
        for (handle, delegate) in handles.iter_mut().zip(delegates) {
            let current = match handle.downcast_ref::<CommandRef>() {
                Some(current) => current.clone(),
                None => {
                    warn!("Console command handle has unexpected payload type, skipping swap");
                    continue;
                }
            };

            let next = match delegate.downcast::<CommandRef>() {
                Ok(next) => *next,
                Err(_) => {
                    warn!("Dropping console command delegate with unexpected payload type");
                    continue;
                }
            };

            if self.commands.replace(&current, next.clone()) {
                *handle = Box::new(next);
            } else {
                warn!("Console command handle missing from the live collection during swap");
            }
        }
    }

    fn deregister(&self, handles: &[AnyHandle]) {
        for handle in handles {
            if let Some(command) = handle.downcast_ref::<CommandRef>() {
                self.commands.remove(command);
            }
        }
    }
}
