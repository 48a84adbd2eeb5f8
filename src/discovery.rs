//! Discovery planning: what the controller should poll for and listen to.
//!
//! [`plan`] is a pure function of the device context.  The service compares
//! its result against the last applied [`DiscoveryParameters`] and only
//! touches the hardware when they differ (or a forced apply is requested).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::ports::ReaderCallback;

// ---------------------------------------------------------------------------
// Poll technology masks
// ---------------------------------------------------------------------------

pub const POLL_A: u32 = 0x01;
pub const POLL_B: u32 = 0x02;
pub const POLL_F: u32 = 0x04;
pub const POLL_V: u32 = 0x08;
pub const POLL_B_PRIME: u32 = 0x10;
pub const POLL_KOVIO: u32 = 0x20;

/// Default poll mask when the screen is unlocked and no reader mode is active.
pub const POLL_DEFAULT: u32 = POLL_A | POLL_B | POLL_F | POLL_V | POLL_B_PRIME;

// ---------------------------------------------------------------------------
// Reader-mode flags (as passed by applications)
// ---------------------------------------------------------------------------

pub const FLAG_READER_NFC_A: u32 = 0x1;
pub const FLAG_READER_NFC_B: u32 = 0x2;
pub const FLAG_READER_NFC_F: u32 = 0x4;
pub const FLAG_READER_NFC_V: u32 = 0x8;
pub const FLAG_READER_NFC_BARCODE: u32 = 0x10;
pub const FLAG_READER_SKIP_NDEF_CHECK: u32 = 0x80;
pub const FLAG_READER_NO_PLATFORM_SOUNDS: u32 = 0x100;

/// Translate reader-mode flags into a poll technology mask.
pub fn reader_tech_mask(flags: u32) -> u32 {
    let mut mask = 0;
    if flags & FLAG_READER_NFC_A != 0 {
        mask |= POLL_A;
    }
    if flags & FLAG_READER_NFC_B != 0 {
        mask |= POLL_B;
    }
    if flags & FLAG_READER_NFC_F != 0 {
        mask |= POLL_F;
    }
    if flags & FLAG_READER_NFC_V != 0 {
        mask |= POLL_V;
    }
    if flags & FLAG_READER_NFC_BARCODE != 0 {
        mask |= POLL_KOVIO;
    }
    mask
}

// ---------------------------------------------------------------------------
// Screen state
// ---------------------------------------------------------------------------

/// Screen/keyguard state.  Ordered: `OffUnlocked < OffLocked < OnLocked < OnUnlocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScreenState {
    OffUnlocked = 0x01,
    OffLocked = 0x02,
    OnLocked = 0x04,
    OnUnlocked = 0x08,
}

/// Bit ORed into the screen mask when lock-screen tag polling is configured.
pub const SCREEN_POLLING_TAG_MASK: u8 = 0x10;

impl ScreenState {
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Mask pushed to the controller via `set_screen_state`.
    pub const fn device_mask(self, lockscreen_polling: bool) -> u8 {
        if lockscreen_polling {
            self.bits() | SCREEN_POLLING_TAG_MASK
        } else {
            self.bits()
        }
    }
}

// ---------------------------------------------------------------------------
// Reader mode
// ---------------------------------------------------------------------------

/// Foreground reader-mode session.
#[derive(Clone)]
pub struct ReaderModeParams {
    pub flags: u32,
    pub callback: Option<Arc<dyn ReaderCallback>>,
    pub presence_check_delay_ms: u32,
}

impl ReaderModeParams {
    pub fn skips_ndef_check(&self) -> bool {
        self.flags & FLAG_READER_SKIP_NDEF_CHECK != 0
    }

    pub fn platform_sounds(&self) -> bool {
        self.flags & FLAG_READER_NO_PLATFORM_SOUNDS == 0
    }
}

impl fmt::Debug for ReaderModeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderModeParams")
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("callback", &self.callback.is_some())
            .field("presence_check_delay_ms", &self.presence_check_delay_ms)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Discovery parameters
// ---------------------------------------------------------------------------

/// Polling/listening configuration pushed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryParameters {
    pub tech_mask: u32,
    pub listen_proto_mask: u32,
    pub listen_tech_mask: u32,
    pub enable_p2p: bool,
    pub enable_low_power: bool,
    pub enable_host_routing: bool,
    pub enable_reader_mode: bool,
}

impl Default for DiscoveryParameters {
    fn default() -> Self {
        Self {
            tech_mask: 0,
            listen_proto_mask: 0,
            listen_tech_mask: 0,
            enable_p2p: false,
            enable_low_power: true,
            enable_host_routing: false,
            enable_reader_mode: false,
        }
    }
}

impl DiscoveryParameters {
    /// Parameters describing a fully disabled radio.
    pub fn off() -> Self {
        Self::default()
    }

    /// Whether applying these parameters requires discovery to run at all.
    pub fn should_enable_discovery(&self) -> bool {
        self.tech_mask != 0 || self.enable_host_routing || self.enable_reader_mode
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Everything the planner looks at.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub screen: ScreenState,
    pub reader_mode: Option<&'a ReaderModeParams>,
    /// Tech mask registered by unlock handlers; `None` when lock-screen polling is off.
    pub lockscreen_poll_mask: Option<u32>,
    pub provisioning: bool,
    pub hce_capable: bool,
    pub beam_capable: bool,
    pub kovio_polling: bool,
}

/// Compute the discovery configuration for the given context.
pub fn plan(input: &PlanInput<'_>) -> DiscoveryParameters {
    let mut params = DiscoveryParameters::default();
    let default_mask = if input.kovio_polling {
        POLL_DEFAULT | POLL_KOVIO
    } else {
        POLL_DEFAULT
    };

    if input.screen == ScreenState::OnUnlocked {
        if let Some(reader) = input.reader_mode {
            let mask = reader_tech_mask(reader.flags);
            params.tech_mask = mask;
            params.enable_reader_mode = true;
            if reader.flags != 0 && mask == 0 {
                params.enable_host_routing = true;
            }
        } else {
            params.tech_mask = default_mask;
            params.enable_p2p = input.beam_capable;
        }
    } else if input.screen == ScreenState::OnLocked && input.provisioning {
        params.tech_mask = default_mask;
        params.enable_p2p = input.beam_capable;
    } else if input.screen == ScreenState::OnLocked {
        if let Some(mask) = input.lockscreen_poll_mask {
            params.tech_mask = mask;
            params.enable_low_power = false;
            params.enable_p2p = false;
        }
    }

    if input.hce_capable && input.screen >= ScreenState::OnLocked && input.reader_mode.is_none() {
        params.enable_host_routing = true;
    }

    params
}
