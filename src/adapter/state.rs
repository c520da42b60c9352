//! Session lifecycle
//!
//! ```text
//! Birth -> Initialized -> ProgramLaunched -> ProgramRunning <-> ProgramStopped
//!                                                  |
//!                                                  v
//!                                          ProgramTerminated
//! ```

use std::fmt;

use crate::dap::Command;

/// Lifecycle phase of the debug session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Birth,
    Initialized,
    ProgramLaunched,
    ProgramRunning,
    ProgramStopped,
    ProgramTerminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Birth => "birth",
            SessionState::Initialized => "initialized",
            SessionState::ProgramLaunched => "launched",
            SessionState::ProgramRunning => "running",
            SessionState::ProgramStopped => "stopped",
            SessionState::ProgramTerminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

impl SessionState {
    /// Whether `command` may be served in this state
    pub fn admits(self, command: &Command) -> bool {
        use SessionState::*;
        match command {
            Command::Initialize => self == Birth,
            Command::Launch(_) | Command::SetExceptionBreakpoints | Command::ConfigurationDone => {
                self == Initialized
            }
            Command::Threads
            | Command::StackTrace(_)
            | Command::Scopes(_)
            | Command::Variables(_)
            | Command::Step(_) => self == ProgramStopped,
            Command::Disconnect => matches!(self, Initialized | ProgramStopped | ProgramTerminated),
            Command::Invalid { .. } | Command::Unknown(_) => false,
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Birth, Initialized)
                | (Initialized, ProgramLaunched)
                | (ProgramLaunched, ProgramRunning)
                | (ProgramRunning, ProgramStopped)
                | (ProgramStopped, ProgramRunning)
                | (ProgramRunning, ProgramTerminated)
        )
    }
}
