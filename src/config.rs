//! Service configuration parameters
//!
//! All tunable parameters for the NFC service.
//! Values can be overridden from persistent storage or a JSON file.

use serde::{Deserialize, Serialize};

/// Core service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    // --- Watchdogs ---
    /// Bound on `initialize()` during enable (milliseconds)
    pub init_watchdog_ms: u32,
    /// Bound on `deinitialize()` and discovery reconfiguration (milliseconds)
    pub routing_watchdog_ms: u32,

    // --- Tag handling ---
    /// Presence-check interval when no reader mode overrides it (milliseconds)
    pub presence_check_delay_ms: u32,
    /// Polling backoff after a failed dispatch; `None` keeps presence checking
    pub poll_delay_ms: Option<u32>,
    /// Consecutive dispatch failures tolerated before the antenna alert
    pub max_dispatch_failures: u32,
    /// Show the one-time "antenna possibly blocked" alert
    pub antenna_blocked_alert: bool,
    /// Play the error sound when a dispatch fails with the screen unlocked
    pub notify_dispatch_failed: bool,

    // --- Capabilities ---
    /// Host card emulation available
    pub hce_capable: bool,
    /// Peer-to-peer (beam) available
    pub beam_capable: bool,
    /// Kovio barcode polling included in the default poll mask
    pub kovio_polling: bool,
    /// Privileged callers may switch polling off through reader mode
    pub polling_disable_allowed: bool,

    // --- Timing ---
    /// Longest accepted `pause_polling` timeout (milliseconds)
    pub max_polling_pause_ms: u32,
    /// Retry delay when routing is postponed because a tag is connected (milliseconds)
    pub apply_routing_retry_ms: u32,

    // --- Defaults ---
    /// SIM/SE slot selected when nothing is persisted
    pub default_uicc_slot: u8,
    /// Adapter enabled on first boot when nothing is persisted
    pub nfc_on_default: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            // Watchdogs
            init_watchdog_ms: 90_000,
            routing_watchdog_ms: 10_000,

            // Tag handling
            presence_check_delay_ms: 125,
            poll_delay_ms: None,
            max_dispatch_failures: 3,
            antenna_blocked_alert: true,
            notify_dispatch_failed: true,

            // Capabilities
            hce_capable: true,
            beam_capable: false,
            kovio_polling: false,
            polling_disable_allowed: false,

            // Timing
            max_polling_pause_ms: 40_000,
            apply_routing_retry_ms: 5_000,

            // Defaults
            default_uicc_slot: 1,
            nfc_on_default: true,
        }
    }
}
