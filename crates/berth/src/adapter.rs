//! Per-extension-kind install/swap/remove behavior.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use berth_api::{AnyDelegate, ExtensionKind};

/// Type-erased stable handle as held in the host's live collections.
///
/// For proxy-capable kinds this is the stable wrapper; for identity-bound
/// kinds it is the delegate itself.
pub type AnyHandle = Box<dyn Any + Send + Sync>;

/// Strategy for one extension kind: how delegates of that kind are
/// installed into, swapped inside, and removed from the host.
///
/// Adapters are stateless with respect to registrations; one instance
/// serves every bundle that provides the kind.
pub trait ExtensionAdapter: Send + Sync {
    /// The extension kind this adapter serves.
    fn kind(&self) -> ExtensionKind;

    /// Whether the delegate payload has the erased type this kind expects.
    fn accepts(&self, delegate: &AnyDelegate) -> bool;

    /// Install each delegate front-of-order and return the handles the
    /// host now actually holds, in delegate order.
    fn register_stable(&self, delegates: Vec<AnyDelegate>) -> Vec<AnyHandle>;

    /// Positionally replace what each handle represents with the
    /// corresponding new delegate. Proxy-capable kinds keep the handle
    /// object unchanged; identity-bound kinds rewrite the handle entry.
    fn swap(&self, handles: &mut [AnyHandle], delegates: Vec<AnyDelegate>);

    /// Remove each handle from the host's live collection.
    fn deregister(&self, handles: &[AnyHandle]);
}

/// Kind-keyed table of the adapters a host supports.
pub struct AdapterTable {
    adapters: HashMap<ExtensionKind, Arc<dyn ExtensionAdapter>>,
}

impl AdapterTable {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its own kind.
    pub fn insert(&mut self, adapter: Arc<dyn ExtensionAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ExtensionKind) -> Option<&Arc<dyn ExtensionAdapter>> {
        self.adapters.get(&kind)
    }
}

impl Default for AdapterTable {
    fn default() -> Self {
        Self::new()
    }
}
