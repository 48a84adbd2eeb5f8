//! Shared mutable context of the NFC service.
//!
//! `NfcContext` is the one struct both worker threads (lifecycle and event
//! loop) and the façade read and write.  It sits behind a single
//! `parking_lot::Mutex` in the service core.  Hardware calls are never
//! made while that lock is held: callers copy what they need, drop the
//! guard, then talk to the device.

use std::collections::HashSet;

use crate::app::ports::NdefMessage;
use crate::discovery::{DiscoveryParameters, PlanInput, ReaderModeParams, ScreenState};
use crate::dispatch::{DebounceState, LiveObjectTable};
use crate::lifecycle::AdapterState;
use crate::routing::NciVersion;

// ---------------------------------------------------------------------------
// NfcContext
// ---------------------------------------------------------------------------

pub struct NfcContext {
    // --- Adapter ---
    pub state: AdapterState,
    /// When set, routing is only applied in `On`/`TurningOff`.  Cleared
    /// while enable pushes the initial configuration.
    pub nfc_state_check: bool,
    pub nci_version: NciVersion,

    // --- Discovery ---
    pub screen: ScreenState,
    /// Screen state last pushed to an NCI 1.0 controller.
    pub previous_screen: Option<ScreenState>,
    /// Parameters last applied to the controller.
    pub discovery: DiscoveryParameters,
    pub reader_mode: Option<ReaderModeParams>,
    /// Reader-mode callers that asked for polling to be switched off.
    pub polling_disable_callers: HashSet<u32>,
    /// Poll mask requested by lock-screen unlock handlers.
    pub lockscreen_poll_mask: Option<u32>,
    pub provisioning: bool,
    /// Setup wizard finished; provisioning mode ends on the next apply.
    pub provisioned: bool,
    pub polling_paused: bool,
    /// Polling stopped after a failed dispatch; restarted by `DelayPolling`.
    pub polling_delayed: bool,

    // --- Routing ---
    /// Session-only default AID route set by card emulation.
    pub overflow_route: Option<u32>,
    pub last_commit_ok: bool,

    // --- Tags and peers ---
    pub objects: LiveObjectTable,
    pub debounce: Option<DebounceState>,
    pub last_read_ndef: Option<NdefMessage>,
    pub dispatch_failures: u32,
    pub antenna_blocked_shown: bool,
    pub require_unlock_shown: bool,
    pub secure_nfc: bool,
}

impl NfcContext {
    pub fn new(antenna_blocked_shown: bool, secure_nfc: bool) -> Self {
        Self {
            state: AdapterState::Off,
            nfc_state_check: true,
            nci_version: NciVersion::default(),

            screen: ScreenState::OnUnlocked,
            previous_screen: None,
            discovery: DiscoveryParameters::off(),
            reader_mode: None,
            polling_disable_callers: HashSet::new(),
            lockscreen_poll_mask: None,
            provisioning: false,
            provisioned: false,
            polling_paused: false,
            polling_delayed: false,

            overflow_route: None,
            last_commit_ok: true,

            objects: LiveObjectTable::default(),
            debounce: None,
            last_read_ndef: None,
            dispatch_failures: 0,
            antenna_blocked_shown,
            require_unlock_shown: false,
            secure_nfc,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == AdapterState::On
    }

    pub fn screen_unlocked(&self) -> bool {
        self.screen == ScreenState::OnUnlocked
    }

    /// Keyguard showing, with the display on or off.
    pub fn screen_locked(&self) -> bool {
        matches!(self.screen, ScreenState::OnLocked | ScreenState::OffLocked)
    }

    /// Planner input for the current context.
    pub fn plan_input(
        &self,
        hce_capable: bool,
        beam_capable: bool,
        kovio_polling: bool,
    ) -> PlanInput<'_> {
        PlanInput {
            screen: self.screen,
            reader_mode: self.reader_mode.as_ref(),
            lockscreen_poll_mask: self.lockscreen_poll_mask,
            provisioning: self.provisioning,
            hce_capable,
            beam_capable,
            kovio_polling,
        }
    }
}
