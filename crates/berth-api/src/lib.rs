//! Contracts shared between the berth host and bundle authors.
//!
//! A bundle is a shared library that exports a manifest of
//! [`EntryDescriptor`] values through the [`export_bundle!`] macro. Each
//! descriptor names the extension kind it plugs into, the implementation
//! behind it, and a constructor the host calls to mint fresh delegate
//! instances. The host never scans a bundle for types; the exported
//! manifest is the complete list of what the bundle offers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identifier for a capability category the host supports plugging into.
///
/// New extension kinds are introduced by registering a new adapter under a
/// new identifier; the core machinery never enumerates kinds itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionKind(pub &'static str);

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Kind identifier for status panels.
pub const STATUS_PANEL: ExtensionKind = ExtensionKind("status-panel");

/// Kind identifier for console commands.
pub const CONSOLE_COMMAND: ExtensionKind = ExtensionKind("console-command");

/// Type-erased delegate instance produced by a descriptor.
///
/// The concrete payload type is fixed per extension kind; use
/// [`panel_delegate`] / [`command_delegate`] so bundle and host agree on it.
pub type AnyDelegate = Box<dyn Any + Send + Sync>;

/// Read-only metadata surface for a management status panel.
///
/// Panels are proxy-capable: the host installs a stable wrapper and reads
/// through it, so a reload replaces the backing implementation without
/// changing the object the host holds.
pub trait StatusPanel: Send + Sync {
    /// Human-readable panel title.
    fn title(&self) -> String;

    /// One-line description of what the panel shows.
    fn summary(&self) -> String;

    /// URL path segment the panel is served under.
    fn url_name(&self) -> String;
}

/// A named command the host dispatches to by lookup.
///
/// Commands are identity-bound: the host indexes the delegate object
/// itself, so a reload necessarily produces a new handle and callers must
/// not cache the old one.
pub trait ConsoleCommand: Send + Sync {
    /// Name the command is invoked by.
    fn name(&self) -> String;

    /// Short usage synopsis.
    fn synopsis(&self) -> String;
}

/// Shared reference to a panel delegate.
pub type PanelRef = Arc<dyn StatusPanel>;

/// Shared reference to a command delegate.
pub type CommandRef = Arc<dyn ConsoleCommand>;

/// Erase a panel implementation into the payload the host expects.
pub fn panel_delegate<P: StatusPanel + 'static>(panel: P) -> AnyDelegate {
    Box::new(Arc::new(panel) as PanelRef)
}

/// Erase a command implementation into the payload the host expects.
pub fn command_delegate<C: ConsoleCommand + 'static>(command: C) -> AnyDelegate {
    Box::new(Arc::new(command) as CommandRef)
}

/// Errors a descriptor can report while minting an instance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DescriptorError {
    /// The constructor could not produce an instance.
    #[error("Failed to construct {0}: {1}")]
    Construction(&'static str, String),
}

/// Declares one (extension kind, implementation) pair a bundle offers and
/// how to mint a fresh instance of it.
#[derive(Debug)]
pub struct EntryDescriptor {
    kind: ExtensionKind,
    implementation: &'static str,
    construct: fn() -> Result<AnyDelegate, DescriptorError>,
}

impl EntryDescriptor {
    /// Create a descriptor for one bundle entry.
    pub const fn new(
        kind: ExtensionKind,
        implementation: &'static str,
        construct: fn() -> Result<AnyDelegate, DescriptorError>,
    ) -> Self {
        Self {
            kind,
            implementation,
            construct,
        }
    }

    /// Extension kind this entry plugs into.
    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    /// Name of the implementation behind this entry.
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    /// Mint a fresh delegate instance.
    pub fn fresh_instance(&self) -> Result<AnyDelegate, DescriptorError> {
        (self.construct)()
    }
}

/// Symbol every bundle exports as its manifest entry point.
pub const BUNDLE_ENTRIES_SYMBOL: &[u8] = b"_berth_bundle_entries";

/// Signature of the exported manifest entry point.
///
/// Returns an owned `Vec<EntryDescriptor>` boxed into a raw pointer; the
/// host takes ownership of the allocation.
pub type BundleEntriesFn = unsafe extern "C" fn() -> *mut Vec<EntryDescriptor>;

/// Export the bundle manifest.
///
/// Expands to the `_berth_bundle_entries` entry point the host resolves
/// after opening the bundle library:
///
/// ```rust,ignore
/// berth_api::export_bundle![
///     EntryDescriptor::new(STATUS_PANEL, "BuildInfoPanel", build_info_panel),
/// ];
/// ```
#[macro_export]
macro_rules! export_bundle {
    ($($entry:expr),+ $(,)?) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _berth_bundle_entries() -> *mut ::std::vec::Vec<$crate::EntryDescriptor> {
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(::std::vec![$($entry),+]))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPanel;

    impl StatusPanel for FixedPanel {
        fn title(&self) -> String {
            "Fixed".to_string()
        }

        fn summary(&self) -> String {
            "A fixed panel".to_string()
        }

        fn url_name(&self) -> String {
            "fixed".to_string()
        }
    }

    fn make_fixed_panel() -> Result<AnyDelegate, DescriptorError> {
        Ok(panel_delegate(FixedPanel))
    }

    #[test]
    fn descriptor_reports_kind_and_implementation() {
        let descriptor = EntryDescriptor::new(STATUS_PANEL, "FixedPanel", make_fixed_panel);

        assert_eq!(descriptor.kind(), STATUS_PANEL);
        assert_eq!(descriptor.implementation(), "FixedPanel");
    }

    #[test]
    fn fresh_instance_produces_the_expected_payload() {
        let descriptor = EntryDescriptor::new(STATUS_PANEL, "FixedPanel", make_fixed_panel);

        let instance = descriptor.fresh_instance().unwrap();
        let panel = instance.downcast::<PanelRef>().unwrap();
        assert_eq!(panel.title(), "Fixed");
    }

    #[test]
    fn each_instance_is_fresh() {
        let descriptor = EntryDescriptor::new(STATUS_PANEL, "FixedPanel", make_fixed_panel);

        let first = descriptor
            .fresh_instance()
            .unwrap()
            .downcast::<PanelRef>()
            .unwrap();
        let second = descriptor
            .fresh_instance()
            .unwrap()
            .downcast::<PanelRef>()
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn kind_display_uses_the_identifier() {
        assert_eq!(STATUS_PANEL.to_string(), "status-panel");
        assert_eq!(CONSOLE_COMMAND.to_string(), "console-command");
    }
}
