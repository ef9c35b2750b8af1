//! Sample bundle: one status panel and one console command.
//!
//! Build as a `cdylib` and drop the resulting library into the host's
//! autoload directory to install both extensions.

use berth_api::{
    AnyDelegate, CONSOLE_COMMAND, ConsoleCommand, DescriptorError, EntryDescriptor, STATUS_PANEL,
    StatusPanel, command_delegate, export_bundle, panel_delegate,
};

struct BuildInfoPanel;

impl StatusPanel for BuildInfoPanel {
    fn title(&self) -> String {
        "Build Info".to_string()
    }

    fn summary(&self) -> String {
        "Shows the build the demo bundle was produced from".to_string()
    }

    fn url_name(&self) -> String {
        "build-info".to_string()
    }
}

struct EchoCommand;

impl ConsoleCommand for EchoCommand {
    fn name(&self) -> String {
        "echo".to_string()
    }

    fn synopsis(&self) -> String {
        "echo <message>".to_string()
    }
}

fn build_info_panel() -> Result<AnyDelegate, DescriptorError> {
    Ok(panel_delegate(BuildInfoPanel))
}

fn echo_command() -> Result<AnyDelegate, DescriptorError> {
    Ok(command_delegate(EchoCommand))
}

export_bundle![
    EntryDescriptor::new(STATUS_PANEL, "BuildInfoPanel", build_info_panel),
    EntryDescriptor::new(CONSOLE_COMMAND, "EchoCommand", echo_command),
];
