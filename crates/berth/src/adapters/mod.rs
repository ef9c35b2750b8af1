//! Canonical extension adapters.
//!
//! Two kinds validate the capability split: status panels are
//! proxy-capable (a reload swaps the delegate behind a stable wrapper),
//! console commands are identity-bound (a reload replaces the handle).

mod command;
mod panel;

pub use command::CommandAdapter;
pub use panel::{PanelAdapter, PanelProxy};
