//! Autoload registry.
//!
//! Owns the binding between watched paths and the bundles currently
//! installed there, and performs the three bundle operations: register,
//! deregister, and reload. Reload is all-or-nothing: compatibility with
//! the current registration is fully evaluated before any swap begins.

use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_api::{AnyDelegate, ExtensionKind};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterTable, AnyHandle, ExtensionAdapter};
use crate::digest::digest_file;
use crate::loader::{BundleSource, LibraryBundleSource, LoadContext};

/// One extension kind's live footprint: the adapter that installed it and
/// the stable handles the host now holds for it.
struct RegisteredExtension {
    adapter: Arc<dyn ExtensionAdapter>,
    handles: Vec<AnyHandle>,
}

/// Active binding of a watched path to its installed bundle.
struct Registration {
    digest: String,
    context: Box<dyn LoadContext>,
    extensions: HashMap<ExtensionKind, RegisteredExtension>,
}

/// Path-keyed registry of installed bundles.
///
/// Operations take `&mut self`; in steady state a single dispatch worker
/// owns the registry, so no two operations on any path ever overlap.
pub struct AutoloadRegistry {
    registrations: HashMap<PathBuf, Registration>,
    adapters: Arc<AdapterTable>,
    source: Box<dyn BundleSource>,
}

impl AutoloadRegistry {
    pub fn new(adapters: Arc<AdapterTable>, source: Box<dyn BundleSource>) -> Self {
        Self {
            registrations: HashMap::new(),
            adapters,
            source,
        }
    }

    /// Registry backed by the shared-library bundle loader.
    pub fn with_library_source(adapters: Arc<AdapterTable>) -> Self {
        let source = LibraryBundleSource::new(adapters.clone());
        Self::new(adapters, Box::new(source))
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.registrations.contains_key(path)
    }

    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.registrations.keys().cloned().collect()
    }

    /// Load the bundle at `path` and install its extensions.
    ///
    /// A bundle that fails to load, or whose extensions all miss their
    /// adapters, leaves no registration behind.
    pub fn register(&mut self, path: &Path) {
        info!("Registering: {:?}", path);

        if self.registrations.contains_key(path) {
            warn!("Stale registration found for {:?}, replacing it", path);
            self.deregister(path);
        }

        let Some(bundle) = self.source.open(path) else {
            return;
        };
        let (digest, context, groups) = bundle.into_parts();

        let mut extensions = HashMap::new();

        for (kind, delegates) in groups {
            let Some(adapter) = self.adapters.get(kind) else {
                warn!(
                    "No adapter found during registration for extension kind: {}",
                    kind
                );
                continue;
            };

            let handles = adapter.register_stable(delegates);
            info!(
                "Installed {} {} extension(s) from {:?}",
                handles.len(),
                kind,
                path
            );
            extensions.insert(
                kind,
                RegisteredExtension {
                    adapter: adapter.clone(),
                    handles,
                },
            );
        }

        if extensions.is_empty() {
            warn!(
                "No extensions were registered from {:?} after adapter filtering",
                path
            );
            context.close();
            return;
        }

        self.registrations.insert(
            path.to_path_buf(),
            Registration {
                digest,
                context,
                extensions,
            },
        );
    }

    /// Remove everything the bundle at `path` installed.
    pub fn deregister(&mut self, path: &Path) {
        info!("Deregistering: {:?}", path);

        let Some(registration) = self.registrations.remove(path) else {
            debug!("Nothing registered for {:?}, nothing to be done", path);
            return;
        };

        let Registration {
            context,
            extensions,
            ..
        } = registration;

        for registered in extensions.into_values() {
            registered.adapter.deregister(&registered.handles);
        }

        context.close();
    }

    /// Swap the bundle at `path` for its on-disk contents.
    ///
    /// No-op when the contents are unchanged. A new bundle whose extension
    /// kinds or per-kind counts differ from the current registration is
    /// rejected whole: its context is closed and the current registration
    /// stays untouched. On success the existing handles are reused, so
    /// externally held proxy references remain valid.
    pub fn reload(&mut self, path: &Path) {
        let current_digest = match self.registrations.get(path) {
            Some(registration) => registration.digest.clone(),
            None => {
                self.register(path);
                return;
            }
        };

        info!("Re-registering: {:?}", path);

        let candidate_digest = match digest_file(path) {
            Ok(digest) => digest,
            Err(err) => {
                warn!(
                    "Digest calculation failed, {:?} will not be reloaded: {}",
                    path, err
                );
                return;
            }
        };

        if candidate_digest == current_digest {
            info!(
                "Old and new bundle contents at {:?} are identical, nothing to do",
                path
            );
            return;
        }

        let Some(bundle) = self.source.open(path) else {
            warn!("Failed to load updated bundle from {:?}", path);
            return;
        };
        let (new_digest, new_context, mut new_groups) = bundle.into_parts();

        let Some(current) = self.registrations.get_mut(path) else {
            new_context.close();
            return;
        };

        // Compatibility is fully evaluated for every kind before any swap.
        if !same_kind_set(&current.extensions, &new_groups) {
            warn!(
                "Cannot atomically reload {:?} because extension kinds changed",
                path
            );
            new_context.close();
            return;
        }

        for (kind, registered) in &current.extensions {
            let incoming = new_groups.get(kind).map_or(0, Vec::len);
            if incoming != registered.handles.len() {
                warn!(
                    "Cannot atomically reload {:?} because extension count changed for {} ({} => {})",
                    path,
                    kind,
                    registered.handles.len(),
                    incoming
                );
                new_context.close();
                return;
            }
        }

        for (kind, registered) in current.extensions.iter_mut() {
            if let Some(delegates) = new_groups.remove(kind) {
                registered.adapter.swap(&mut registered.handles, delegates);
            }
        }

        let previous = mem::replace(&mut current.context, new_context);
        previous.close();
        current.digest = new_digest;

        info!("Re-registration complete: {:?}", path);
    }
}

fn same_kind_set(
    current: &HashMap<ExtensionKind, RegisteredExtension>,
    incoming: &HashMap<ExtensionKind, Vec<AnyDelegate>>,
) -> bool {
    current.len() == incoming.len() && current.keys().all(|kind| incoming.contains_key(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use berth_api::{CONSOLE_COMMAND, ConsoleCommand, STATUS_PANEL, StatusPanel, panel_delegate};

    use crate::adapters::{CommandAdapter, PanelAdapter};
    use crate::collections::ExtensionList;
    use crate::loader::Bundle;

    struct FixedPanel {
        title: String,
    }

    impl StatusPanel for FixedPanel {
        fn title(&self) -> String {
            self.title.clone()
        }

        fn summary(&self) -> String {
            format!("panel {}", self.title)
        }

        fn url_name(&self) -> String {
            self.title.to_lowercase()
        }
    }

    struct NamedCommand {
        name: String,
    }

    impl ConsoleCommand for NamedCommand {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn synopsis(&self) -> String {
            format!("{} <args>", self.name)
        }
    }

    struct TestContext {
        closed: Arc<AtomicBool>,
    }

    impl LoadContext for TestContext {
        fn close(self: Box<Self>) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Hands out pre-built bundles in order and counts open calls.
    struct ScriptedSource {
        bundles: Mutex<VecDeque<Option<Bundle>>>,
        opens: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(bundles: Vec<Option<Bundle>>, opens: Arc<AtomicUsize>) -> Self {
            Self {
                bundles: Mutex::new(bundles.into()),
                opens,
            }
        }
    }

    impl BundleSource for ScriptedSource {
        fn open(&self, _path: &Path) -> Option<Bundle> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.bundles.lock().unwrap().pop_front().flatten()
        }
    }

    struct Harness {
        panels: Arc<ExtensionList<dyn StatusPanel>>,
        commands: Arc<ExtensionList<dyn ConsoleCommand>>,
        adapters: Arc<AdapterTable>,
        opens: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            let panels = Arc::new(ExtensionList::<dyn StatusPanel>::new());
            let commands = Arc::new(ExtensionList::<dyn ConsoleCommand>::new());

            let mut adapters = AdapterTable::new();
            adapters.insert(Arc::new(PanelAdapter::new(panels.clone())));
            adapters.insert(Arc::new(CommandAdapter::new(commands.clone())));

            Self {
                panels,
                commands,
                adapters: Arc::new(adapters),
                opens: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn registry(&self, bundles: Vec<Option<Bundle>>) -> AutoloadRegistry {
            let source = ScriptedSource::new(bundles, self.opens.clone());
            AutoloadRegistry::new(self.adapters.clone(), Box::new(source))
        }
    }

    fn panel_bundle(digest: &str, titles: &[&str], closed: Arc<AtomicBool>) -> Bundle {
        let delegates: Vec<AnyDelegate> = titles
            .iter()
            .map(|title| {
                panel_delegate(FixedPanel {
                    title: title.to_string(),
                })
            })
            .collect();

        let mut groups = HashMap::new();
        groups.insert(STATUS_PANEL, delegates);
        Bundle::new(digest.to_string(), Box::new(TestContext { closed }), groups)
    }

    fn command_bundle(digest: &str, names: &[&str], closed: Arc<AtomicBool>) -> Bundle {
        let delegates: Vec<AnyDelegate> = names
            .iter()
            .map(|name| {
                berth_api::command_delegate(NamedCommand {
                    name: name.to_string(),
                })
            })
            .collect();

        let mut groups = HashMap::new();
        groups.insert(CONSOLE_COMMAND, delegates);
        Bundle::new(digest.to_string(), Box::new(TestContext { closed }), groups)
    }

    fn scratch_file(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.so");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn register_installs_ahead_of_preexisting_extensions() {
        let harness = Harness::new();
        let builtin: Arc<dyn StatusPanel> = Arc::new(FixedPanel {
            title: "Builtin".to_string(),
        });
        harness.panels.insert_front(builtin.clone());

        let closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![Some(panel_bundle(
            "d1",
            &["Hosted"],
            closed.clone(),
        ))]);

        let path = Path::new("/autoload/bundle.so");
        registry.register(path);

        assert!(registry.is_registered(path));
        assert_eq!(registry.registered_paths(), vec![path.to_path_buf()]);
        let snapshot = harness.panels.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].title(), "Hosted");
        assert!(Arc::ptr_eq(&snapshot[1], &builtin));
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_load_leaves_no_registration() {
        let harness = Harness::new();
        let mut registry = harness.registry(vec![None]);

        let path = Path::new("/autoload/broken.so");
        registry.register(path);

        assert!(!registry.is_registered(path));
        assert!(harness.panels.is_empty());
    }

    #[test]
    fn register_without_matching_adapter_closes_the_context() {
        let harness = Harness::new();
        let closed = Arc::new(AtomicBool::new(false));

        let mut groups = HashMap::new();
        groups.insert(
            ExtensionKind("unknown-kind"),
            vec![panel_delegate(FixedPanel {
                title: "Orphan".to_string(),
            })],
        );
        let bundle = Bundle::new(
            "d1".to_string(),
            Box::new(TestContext {
                closed: closed.clone(),
            }),
            groups,
        );

        let mut registry = harness.registry(vec![Some(bundle)]);
        let path = Path::new("/autoload/orphan.so");
        registry.register(path);

        assert!(!registry.is_registered(path));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn deregister_removes_extensions_and_closes_the_context() {
        let harness = Harness::new();
        let closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![Some(panel_bundle(
            "d1",
            &["Hosted"],
            closed.clone(),
        ))]);

        let path = Path::new("/autoload/bundle.so");
        registry.register(path);
        registry.deregister(path);

        assert!(!registry.is_registered(path));
        assert!(harness.panels.is_empty());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn deregister_of_unknown_path_is_a_no_op() {
        let harness = Harness::new();
        let mut registry = harness.registry(vec![]);

        registry.deregister(Path::new("/autoload/never-seen.so"));

        assert_eq!(harness.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reload_of_unregistered_path_behaves_as_register() {
        let harness = Harness::new();
        let closed = Arc::new(AtomicBool::new(false));
        let mut registry =
            harness.registry(vec![Some(panel_bundle("d1", &["Hosted"], closed))]);

        let path = Path::new("/autoload/bundle.so");
        registry.reload(path);

        assert!(registry.is_registered(path));
        assert_eq!(harness.panels.len(), 1);
    }

    #[test]
    fn reload_with_identical_content_is_a_no_op() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let digest = digest_file(&path).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![Some(panel_bundle(
            &digest,
            &["Hosted"],
            closed.clone(),
        ))]);

        registry.register(&path);
        assert_eq!(harness.opens.load(Ordering::SeqCst), 1);

        registry.reload(&path);

        // The candidate was never loaded and the installed state is intact.
        assert_eq!(harness.opens.load(Ordering::SeqCst), 1);
        assert!(!closed.load(Ordering::SeqCst));
        assert_eq!(harness.panels.len(), 1);
    }

    #[test]
    fn compatible_reload_preserves_panel_handle_identity() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let old_closed = Arc::new(AtomicBool::new(false));
        let new_closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![
            Some(panel_bundle(&old_digest, &["Before"], old_closed.clone())),
            Some(panel_bundle("d2", &["After"], new_closed.clone())),
        ]);

        registry.register(&path);
        let handle_before = harness.panels.snapshot()[0].clone();
        assert_eq!(handle_before.title(), "Before");

        std::fs::write(&path, b"version two").unwrap();
        registry.reload(&path);

        let snapshot = harness.panels.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &handle_before));
        assert_eq!(handle_before.title(), "After");

        // Old context closed exactly once, the adopted one left open.
        assert!(old_closed.load(Ordering::SeqCst));
        assert!(!new_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn reload_with_changed_kind_set_is_rejected_atomically() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let old_closed = Arc::new(AtomicBool::new(false));
        let new_closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![
            Some(panel_bundle(&old_digest, &["Before"], old_closed.clone())),
            Some(command_bundle("d2", &["deploy"], new_closed.clone())),
        ]);

        registry.register(&path);
        let handle_before = harness.panels.snapshot()[0].clone();

        std::fs::write(&path, b"version two").unwrap();
        registry.reload(&path);

        // Current registration untouched, rejected context closed.
        let snapshot = harness.panels.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &handle_before));
        assert_eq!(handle_before.title(), "Before");
        assert!(harness.commands.is_empty());
        assert!(!old_closed.load(Ordering::SeqCst));
        assert!(new_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn reload_with_changed_count_is_rejected_atomically() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let old_closed = Arc::new(AtomicBool::new(false));
        let new_closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![
            Some(panel_bundle(&old_digest, &["Before"], old_closed.clone())),
            Some(panel_bundle("d2", &["One", "Two"], new_closed.clone())),
        ]);

        registry.register(&path);

        std::fs::write(&path, b"version two").unwrap();
        registry.reload(&path);

        let snapshot = harness.panels.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title(), "Before");
        assert!(!old_closed.load(Ordering::SeqCst));
        assert!(new_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_reload_load_leaves_current_registration_untouched() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let old_closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![
            Some(panel_bundle(&old_digest, &["Before"], old_closed.clone())),
            None,
        ]);

        registry.register(&path);
        std::fs::write(&path, b"version two").unwrap();
        registry.reload(&path);

        assert!(registry.is_registered(&path));
        assert_eq!(harness.panels.snapshot()[0].title(), "Before");
        assert!(!old_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn reload_with_unreadable_archive_aborts() {
        let harness = Harness::new();
        let (dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let old_closed = Arc::new(AtomicBool::new(false));
        let mut registry = harness.registry(vec![Some(panel_bundle(
            &old_digest,
            &["Before"],
            old_closed.clone(),
        ))]);

        registry.register(&path);
        drop(dir);

        registry.reload(&path);

        // Digest computation failed; nothing was loaded or changed.
        assert_eq!(harness.opens.load(Ordering::SeqCst), 1);
        assert!(registry.is_registered(&path));
        assert!(!old_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn identity_bound_reload_replaces_the_handle_in_place() {
        let harness = Harness::new();
        let (_dir, path) = scratch_file(b"version one");
        let old_digest = digest_file(&path).unwrap();

        let mut registry = harness.registry(vec![
            Some(command_bundle(
                &old_digest,
                &["deploy"],
                Arc::new(AtomicBool::new(false)),
            )),
            Some(command_bundle(
                "d2",
                &["deploy"],
                Arc::new(AtomicBool::new(false)),
            )),
        ]);

        registry.register(&path);
        let before = harness.commands.snapshot()[0].clone();

        std::fs::write(&path, b"version two").unwrap();
        registry.reload(&path);

        let snapshot = harness.commands.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!Arc::ptr_eq(&snapshot[0], &before));
        assert_eq!(snapshot[0].name(), "deploy");
    }
}
