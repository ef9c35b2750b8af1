//! Bundle loading.
//!
//! Opens a bundle archive in an isolated load context, resolves the
//! exported manifest, and instantiates the delegates it declares. Load
//! failures are logged and collapse to `None`; they never reach the
//! caller as errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_api::{AnyDelegate, BUNDLE_ENTRIES_SYMBOL, BundleEntriesFn, ExtensionKind};
use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::AdapterTable;
use crate::digest::digest_file;

/// Errors that can occur while opening a bundle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleError {
    /// The archive bytes could not be digested.
    #[error("Unable to digest bundle contents: {0}")]
    Digest(#[source] std::io::Error),

    /// The bundle library could not be opened.
    #[error("Failed to open bundle library: {0}")]
    Open(#[source] libloading::Error),

    /// The manifest entry point is missing from the library.
    #[error("Bundle manifest symbol not found: {0}")]
    ManifestMissing(#[source] libloading::Error),

    /// The manifest entry point returned nothing.
    #[error("Bundle manifest returned no entries")]
    NullManifest,

    /// Every entry was skipped; the bundle offers nothing installable.
    #[error("No supported extensions found in bundle")]
    NoExtensions,
}

/// Closable scope owning all resources for one loaded bundle version.
///
/// Closing is a one-time side effect; consuming `self` makes each context
/// close exactly once. Delegates minted from a context must have been
/// dropped or swapped out before it closes.
pub trait LoadContext: Send {
    fn close(self: Box<Self>);
}

struct LibraryContext {
    path: PathBuf,
    library: Library,
}

impl LoadContext for LibraryContext {
    fn close(self: Box<Self>) {
        debug!("Closing load context for {:?}", self.path);
        drop(self.library);
    }
}

/// One loaded bundle: content digest, isolated load context, and the
/// freshly instantiated delegates grouped by extension kind.
pub struct Bundle {
    digest: String,
    context: Box<dyn LoadContext>,
    delegates: HashMap<ExtensionKind, Vec<AnyDelegate>>,
}

impl Bundle {
    pub fn new(
        digest: String,
        context: Box<dyn LoadContext>,
        delegates: HashMap<ExtensionKind, Vec<AnyDelegate>>,
    ) -> Self {
        Self {
            digest,
            context,
            delegates,
        }
    }

    /// Hex digest of the archive bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Decompose into digest, context, and delegate groups.
    pub fn into_parts(
        self,
    ) -> (
        String,
        Box<dyn LoadContext>,
        HashMap<ExtensionKind, Vec<AnyDelegate>>,
    ) {
        (self.digest, self.context, self.delegates)
    }
}

/// Where bundles come from. The registry only ever sees this seam, so the
/// concrete load mechanism stays swappable.
pub trait BundleSource: Send {
    /// Open the bundle at `path`. `None` on any failure, with the failure
    /// logged here rather than surfaced.
    fn open(&self, path: &Path) -> Option<Bundle>;
}

/// Loads bundles as shared libraries exporting a manifest entry point.
pub struct LibraryBundleSource {
    adapters: Arc<AdapterTable>,
}

impl LibraryBundleSource {
    pub fn new(adapters: Arc<AdapterTable>) -> Self {
        Self { adapters }
    }

    fn try_open(&self, path: &Path) -> Result<Bundle, BundleError> {
        let digest = digest_file(path).map_err(BundleError::Digest)?;

        // The library shares the host process's symbol namespace, so
        // capability traits resolve to the host's own definitions.
        let library = unsafe { Library::new(path) }.map_err(BundleError::Open)?;

        let entries = {
            let entry_point: Symbol<'_, BundleEntriesFn> =
                unsafe { library.get(BUNDLE_ENTRIES_SYMBOL) }
                    .map_err(BundleError::ManifestMissing)?;

            let raw = unsafe { entry_point() };
            if raw.is_null() {
                return Err(BundleError::NullManifest);
            }

            *unsafe { Box::from_raw(raw) }
        };

        let mut discovered: HashMap<ExtensionKind, Vec<AnyDelegate>> = HashMap::new();

        for entry in entries {
            let kind = entry.kind();

            let Some(adapter) = self.adapters.get(kind) else {
                debug!(
                    "Skipping unsupported extension kind {} ({})",
                    kind,
                    entry.implementation()
                );
                continue;
            };

            let instance = match entry.fresh_instance() {
                Ok(instance) => instance,
                Err(err) => {
                    warn!(
                        "Failed to instantiate extension ({}): {}",
                        entry.implementation(),
                        err
                    );
                    continue;
                }
            };

            if !adapter.accepts(&instance) {
                warn!(
                    "Skipping {} extension with incompatible instance type: {}",
                    kind,
                    entry.implementation()
                );
                continue;
            }

            info!(
                "Loaded {} extension from bundle: {}",
                kind,
                entry.implementation()
            );
            discovered.entry(kind).or_default().push(instance);
        }

        if discovered.is_empty() {
            // Dropping the library here closes the context immediately,
            // leaving no dangling handle.
            return Err(BundleError::NoExtensions);
        }

        Ok(Bundle::new(
            digest,
            Box::new(LibraryContext {
                path: path.to_path_buf(),
                library,
            }),
            discovered,
        ))
    }
}

impl BundleSource for LibraryBundleSource {
    fn open(&self, path: &Path) -> Option<Bundle> {
        match self.try_open(path) {
            Ok(bundle) => Some(bundle),
            Err(BundleError::NoExtensions) => {
                info!("No supported extensions found in {:?}", path);
                None
            }
            Err(err) => {
                warn!("Could not load bundle from {:?}: {}", path, err);
                None
            }
        }
    }
}
