//! Inbound commands for the simulation daemon.
//!
//! A scenario is a JSON array of these, replayed against an
//! [`NfcService`](super::service::NfcService) wired to the simulated
//! controller.  Each command maps onto one façade call or driver
//! callback; `advance` moves the manual clock so delayed events fire.

use serde::{Deserialize, Serialize};

use crate::discovery::ScreenState;

/// Steps a scenario can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AppCommand {
    Boot,
    Enable,
    Disable {
        #[serde(default = "default_true")]
        save_state: bool,
    },
    Screen {
        state: ScreenState,
    },
    /// Bring a simulated tag into the field.
    TapTag {
        handle: u32,
        uid: Vec<u8>,
        #[serde(default)]
        ndef: Option<Vec<u8>>,
    },
    /// Take a previously tapped tag out of the field.
    RemoveTag {
        handle: u32,
    },
    IgnoreTag {
        handle: u32,
        debounce_ms: u32,
    },
    PausePolling {
        timeout_ms: u32,
    },
    ResumePolling,
    RouteAid {
        aid: Vec<u8>,
        route: u8,
    },
    CommitRouting,
    SetDefaultRoute {
        location: u8,
    },
    RfField {
        on: bool,
    },
    HardwareError,
    /// Move the clock forward and run whatever became due.
    Advance {
        ms: u64,
    },
    /// Print a state snapshot.
    Dump,
}

fn default_true() -> bool {
    true
}

/// Scenario replayed when no script is given.
pub fn default_scenario() -> Vec<AppCommand> {
    vec![
        AppCommand::Boot,
        AppCommand::RouteAid {
            aid: vec![0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10],
            route: 0,
        },
        AppCommand::CommitRouting,
        AppCommand::TapTag {
            handle: 1,
            uid: vec![0x04, 0xA2, 0x3B, 0x11],
            ndef: Some(vec![0xD1, 0x01, 0x04, 0x54, 0x02, 0x65, 0x6E, 0x68]),
        },
        AppCommand::RemoveTag { handle: 1 },
        AppCommand::Screen {
            state: ScreenState::OnLocked,
        },
        AppCommand::PausePolling { timeout_ms: 2_000 },
        AppCommand::Advance { ms: 2_000 },
        AppCommand::Screen {
            state: ScreenState::OnUnlocked,
        },
        AppCommand::Dump,
        AppCommand::Disable { save_state: true },
        AppCommand::Dump,
    ]
}
