//! Proxy-capable adapter for status panels.

use std::sync::Arc;

use arc_swap::ArcSwap;
use berth_api::{AnyDelegate, ExtensionKind, PanelRef, STATUS_PANEL, StatusPanel};
use tracing::warn;

use crate::adapter::{AnyHandle, ExtensionAdapter};
use crate::collections::ExtensionList;

/// Identity-stable wrapper around a swappable panel delegate.
///
/// The host holds the proxy; reloads only replace what it points at. Each
/// accessor takes a single snapshot of the current delegate and reads
/// through it, so one call never observes a mix of old and new state. The
/// swappable cell itself is never exposed to consumers.
pub struct PanelProxy {
    delegate: ArcSwap<PanelRef>,
}

impl PanelProxy {
    pub fn new(initial: PanelRef) -> Self {
        Self {
            delegate: ArcSwap::from_pointee(initial),
        }
    }

    /// Atomically point the proxy at a new delegate. Concurrent readers
    /// never block and keep the snapshot they already took.
    pub fn swap(&self, next: PanelRef) {
        self.delegate.store(Arc::new(next));
    }
}

impl StatusPanel for PanelProxy {
    fn title(&self) -> String {
        self.delegate.load().title()
    }

    fn summary(&self) -> String {
        self.delegate.load().summary()
    }

    fn url_name(&self) -> String {
        self.delegate.load().url_name()
    }
}

/// Installs panels behind [`PanelProxy`] wrappers in the host's panel list.
pub struct PanelAdapter {
    panels: Arc<ExtensionList<dyn StatusPanel>>,
}

impl PanelAdapter {
    pub fn new(panels: Arc<ExtensionList<dyn StatusPanel>>) -> Self {
        Self { panels }
    }
}

impl ExtensionAdapter for PanelAdapter {
    fn kind(&self) -> ExtensionKind {
        STATUS_PANEL
    }

    fn accepts(&self, delegate: &AnyDelegate) -> bool {
        delegate.downcast_ref::<PanelRef>().is_some()
    }

    fn register_stable(&self, delegates: Vec<AnyDelegate>) -> Vec<AnyHandle> {
        let mut handles = Vec::with_capacity(delegates.len());

        for delegate in delegates {
            let panel = match delegate.downcast::<PanelRef>() {
                Ok(panel) => *panel,
                Err(_) => {
                    warn!("Dropping status panel delegate with unexpected payload type");
                    continue;
                }
            };

            let proxy = Arc::new(PanelProxy::new(panel));
            let installed: Arc<dyn StatusPanel> = proxy.clone();
            self.panels.insert_front(installed);
            handles.push(Box::new(proxy) as AnyHandle);
        }

        handles
    }

    fn swap(&self, handles: &mut [AnyHandle], delegates: Vec<AnyDelegate>) {
        for (handle, delegate) in handles.iter().zip(delegates) {
            let Some(proxy) = handle.downcast_ref::<Arc<PanelProxy>>() else {
                warn!("Status panel handle has unexpected payload type, skipping swap");
                continue;
            };

            match delegate.downcast::<PanelRef>() {
                Ok(panel) => proxy.swap(*panel),
                Err(_) => warn!("Dropping status panel delegate with unexpected payload type"),
            }
        }
    }

    fn deregister(&self, handles: &[AnyHandle]) {
        for handle in handles {
            if let Some(proxy) = handle.downcast_ref::<Arc<PanelProxy>>() {
                let installed: Arc<dyn StatusPanel> = proxy.clone();
                self.panels.remove(&installed);
            }
        }
    }
}
