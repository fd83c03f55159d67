//! Typed commands delivered by the front-end.

use std::fmt;

use super::{AuthLevel, LocationId, Requester};

/// Live stream toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveToggle {
    On,
    Off,
}

/// A command against the shared desktop.
///
/// Payloads are carried as the requester typed them; the controller
/// validates them before anything touches the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskCommand {
    Reset,
    VoteReset,
    Screenshot,
    Live(LiveToggle),
    ListKeys,
    Mouse { dx: i32, dy: i32, dz: i32, dw: i32 },
    Click { button: String },
    Press { button: String },
    Release,
    Key { spec: String },
}

impl DeskCommand {
    /// Minimum level needed to issue this command.
    pub fn required_level(&self, admin: AuthLevel, vote: AuthLevel) -> AuthLevel {
        match self {
            DeskCommand::Reset | DeskCommand::Screenshot | DeskCommand::Live(_) => admin,
            DeskCommand::VoteReset => vote,
            _ => AuthLevel::DEFAULT,
        }
    }

    /// Input commands are only accepted inside the restricted locations.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            DeskCommand::Mouse { .. }
                | DeskCommand::Click { .. }
                | DeskCommand::Press { .. }
                | DeskCommand::Release
                | DeskCommand::Key { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeskCommand::Reset => "reset",
            DeskCommand::VoteReset => "vote-reset",
            DeskCommand::Screenshot => "screenshot",
            DeskCommand::Live(_) => "live",
            DeskCommand::ListKeys => "list-keys",
            DeskCommand::Mouse { .. } => "mouse",
            DeskCommand::Click { .. } => "click",
            DeskCommand::Press { .. } => "press",
            DeskCommand::Release => "release",
            DeskCommand::Key { .. } => "key",
        }
    }
}

impl fmt::Display for DeskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub requester: Requester,
    pub command: DeskCommand,
}

impl Request {
    pub fn new(requester: Requester, command: DeskCommand) -> Self {
        Self { requester, command }
    }

    pub fn location(&self) -> LocationId {
        self.requester.location
    }
}
