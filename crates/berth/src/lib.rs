//! Hot-swap host for extension bundles.
//!
//! Watches a directory for bundle archives and keeps the host's live
//! extension collections in sync with what is on disk:
//! - dropping a bundle installs its extensions
//! - removing a bundle uninstalls them
//! - overwriting a bundle in place hot-swaps the delegates behind stable
//!   handles, so references the host already holds stay valid
//!
//! Bursts of raw filesystem events are coalesced into one action per path
//! before any registry operation runs.

mod adapter;
mod adapters;
mod coalesce;
mod collections;
mod digest;
mod loader;
mod registry;
mod service;
mod watcher;

pub use adapter::{AdapterTable, AnyHandle, ExtensionAdapter};
pub use adapters::{CommandAdapter, PanelAdapter, PanelProxy};
pub use coalesce::{ChangeAction, ChangeCoalescer, MergeConflict};
pub use collections::ExtensionList;
pub use digest::digest_file;
pub use loader::{Bundle, BundleError, BundleSource, LibraryBundleSource, LoadContext};
pub use registry::AutoloadRegistry;
pub use service::{AutoloadHost, ServiceError};
pub use watcher::{AutoloadConfig, DirectoryWatcher};

// Re-export the bundle-author contracts so hosts depend on one crate.
pub use berth_api::{
    AnyDelegate, BUNDLE_ENTRIES_SYMBOL, BundleEntriesFn, CONSOLE_COMMAND, CommandRef,
    ConsoleCommand, DescriptorError, EntryDescriptor, ExtensionKind, PanelRef, STATUS_PANEL,
    StatusPanel, command_delegate, panel_delegate,
};
