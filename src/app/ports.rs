//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ NfcService (domain)
//! ```
//!
//! Driven adapters (the controller driver, dispatch target, feedback,
//! storage, event sinks) implement these traits.  The
//! [`NfcService`](super::service::NfcService) holds them as trait objects
//! resolved once at construction, so the domain core never touches the
//! driver directly.
//!
//! ## Threading
//!
//! Every port is `Send + Sync` and takes `&self`: calls arrive from the
//! lifecycle worker, the event loop, presence-check threads and watchdog
//! threads.  Implementations provide their own interior synchronization.
//!
//! ## Blocking
//!
//! [`DevicePort`] calls may block for a long time (controller init can
//! take tens of seconds).  The service never calls them while holding its
//! context lock.

use std::fmt;

use crate::config::ServiceConfig;
use crate::discovery::DiscoveryParameters;
use crate::routing::RouteKind;

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock driving queue deadlines.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Device port (driven adapter: domain → NFC controller driver)
// ───────────────────────────────────────────────────────────────

/// Result of a SIM/SE slot switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiccStatus {
    /// Slot selected and its secure element is present.
    Configured,
    /// Slot selected but no secure element answered.
    NotConfigured,
    /// The switch itself failed.
    Failed,
}

impl UiccStatus {
    /// Whether the slot change took effect and should be persisted.
    pub const fn is_selected(self) -> bool {
        matches!(self, Self::Configured | Self::NotConfigured)
    }
}

/// Routes and power states the controller reports from its own config.
///
/// Locations use the hardware encoding (0 = host, 1 = eSE, 2 = UICC,
/// 3 = UICC2); power states are raw 6-bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareRouteDefaults {
    pub aid_route: u8,
    pub aid_power: u8,
    pub desfire_route: u8,
    pub desfire_power: u8,
    pub mifare_clt_route: u8,
    pub mifare_clt_power: u8,
    pub felica_route: u8,
    pub felica_power: u8,
}

/// Blocking, opaque controller operations.
pub trait DevicePort: Send + Sync {
    // ── Power ─────────────────────────────────────────────────

    /// Bring the controller up.  May block for tens of seconds.
    fn initialize(&self) -> bool;

    /// Shut the controller down.
    fn deinitialize(&self) -> bool;

    /// Restore controller configuration to factory values.
    fn factory_reset(&self);

    /// Verify (and update if needed) controller firmware without enabling the radio.
    fn check_firmware(&self) -> bool;

    // ── Discovery ─────────────────────────────────────────────

    fn enable_discovery(&self, params: &DiscoveryParameters, restart: bool);

    fn disable_discovery(&self);

    /// Start (`true`) or stop (`false`) RF polling without touching listen config.
    fn start_stop_polling(&self, start: bool);

    fn set_screen_state(&self, mask: u8);

    /// Require an unlocked keyguard before tag/card-emulation traffic.
    fn set_nfc_secure(&self, enable: bool);

    // ── Routing ───────────────────────────────────────────────

    fn set_routing_entry(&self, kind: RouteKind, selector: u8, location: u8, power: u8) -> bool;

    fn clear_routing_entry(&self, kind: RouteKind);

    fn set_empty_aid_route(&self, route: u32);

    fn commit_routing(&self) -> bool;

    fn route_aid(&self, aid: &[u8], route: u8, aid_info: u32, power: u32) -> bool;

    fn unroute_aid(&self, aid: &[u8]) -> bool;

    fn default_routes(&self) -> HardwareRouteDefaults;

    /// NCI version byte reported by the controller (0x10 or 0x20).
    fn nci_version(&self) -> u8;

    // ── Secure elements ───────────────────────────────────────

    fn set_preferred_sim_slot(&self, slot: u8);

    fn select_uicc(&self, slot: u8) -> UiccStatus;

    // ── Peer links ────────────────────────────────────────────

    fn check_llcp(&self) -> bool;

    fn activate_llcp(&self) -> bool;

    // ── Listen-mode identifiers ───────────────────────────────

    fn register_t3t_identifier(&self, id: &[u8]);

    fn deregister_t3t_identifier(&self, id: &[u8]);

    // ── Diagnostics ───────────────────────────────────────────

    /// Driver-side diagnostic text, captured before a watchdog abort.
    fn dump_diagnostics(&self) -> String;

    /// Tell the driver a fatal abort is imminent.
    fn abort(&self, label: &str);
}

// ───────────────────────────────────────────────────────────────
// Detected objects
// ───────────────────────────────────────────────────────────────

/// Raw NDEF message bytes as read from a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage(pub Vec<u8>);

/// Transceive failure while talking to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagIoError;

impl fmt::Display for TagIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag I/O error")
    }
}

impl std::error::Error for TagIoError {}

/// Invoked from the presence-check thread with the tag handle once the tag is gone.
pub type TagLostHandler = Box<dyn Fn(u32) + Send + Sync>;

/// A detected tag session.
pub trait TagEndpoint: Send + Sync {
    fn handle(&self) -> u32;

    fn uid(&self) -> Vec<u8>;

    /// Technology the tag was activated with (e.g. poll mask bit, barcode).
    fn connected_technology(&self) -> u32;

    /// Detect and read NDEF content.  `Ok(None)` means no NDEF on the tag.
    fn find_and_read_ndef(&self) -> Result<Option<NdefMessage>, TagIoError>;

    fn reconnect(&self) -> bool;

    fn disconnect(&self) -> bool;

    fn start_presence_checking(&self, delay_ms: u32, on_lost: TagLostHandler);

    fn stop_presence_checking(&self);

    fn is_present(&self) -> bool;
}

/// Which side of a peer link this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    Target,
    Initiator,
}

/// A detected peer-to-peer link.
pub trait PeerEndpoint: Send + Sync {
    fn handle(&self) -> u32;

    fn mode(&self) -> PeerMode;

    fn connect(&self) -> bool;

    fn disconnect(&self) -> bool;

    fn llcp_version(&self) -> u8;
}

// ───────────────────────────────────────────────────────────────
// Upper-layer consumers
// ───────────────────────────────────────────────────────────────

/// Outcome of handing a tag to the application dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    Success,
    Failure,
}

/// Application dispatcher (foreground dispatch target, intent resolution).
pub trait TagDispatchPort: Send + Sync {
    fn dispatch_tag(&self, tag: &dyn TagEndpoint, ndef: Option<&NdefMessage>) -> DispatchResult;

    fn clear_foreground_dispatch(&self);

    fn disable_provisioning_mode(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Start,
    End,
    Error,
}

/// Audio, haptic and display-wake feedback.
pub trait FeedbackPort: Send + Sync {
    fn init(&self);

    fn release(&self);

    fn play_sound(&self, sound: Sound);

    fn vibrate(&self);

    /// Poke the power manager so the display stays on / wakes.
    fn user_activity(&self);
}

// ───────────────────────────────────────────────────────────────
// Optional capabilities (resolved once at startup)
// ───────────────────────────────────────────────────────────────

/// Host card emulation manager.
pub trait CardEmulationPort: Send + Sync {
    /// Rebuild the AID routing baseline.
    fn on_nfc_enabled(&self);

    fn on_nfc_disabled(&self);

    /// The controller's AID table was wiped; forget what was pushed.
    fn on_routing_table_cleared(&self);

    /// The default route moved; re-push AIDs.
    fn on_routing_table_changed(&self);
}

/// Peer-to-peer link manager.
pub trait P2pLinkPort: Send + Sync {
    fn enable_disable(&self, enable: bool);

    fn on_llcp_activated(&self, llcp_version: u8);

    fn on_llcp_deactivated(&self);

    fn on_llcp_first_packet(&self);
}

/// Power-coexistence module (e.g. wireless charging).
pub trait CoexistencePort: Send + Sync {
    fn should_enable(&self) -> bool;

    fn enable(&self);

    fn disable(&self);
}

/// Wired secure-element bridge.
pub trait WiredSePort: Send + Sync {
    fn init(&self);

    fn deinit(&self);
}

// ───────────────────────────────────────────────────────────────
// Callbacks registered by applications
// ───────────────────────────────────────────────────────────────

/// Why a reader-mode callback could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    /// The registering process is gone; fall back to normal dispatch.
    RemoteDied,
    /// The application failed to handle the tag.
    App,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteDied => write!(f, "remote died"),
            Self::App => write!(f, "application error"),
        }
    }
}

impl std::error::Error for CallbackError {}

/// Foreground reader-mode consumer.
pub trait ReaderCallback: Send + Sync {
    fn on_tag_discovered(&self, tag: &dyn TagEndpoint) -> Result<(), CallbackError>;
}

/// Fired when an ignored tag has stayed away for its debounce window.
pub trait TagRemovedCallback: Send + Sync {
    fn on_tag_removed(&self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists service configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort: Send + Sync {
    /// Load configuration from persistent storage.
    /// Returns [`ServiceConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<ServiceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &ServiceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ key/value store)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for preferences and crash logs.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic.
pub trait StoragePort: Send + Sync {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Caller buffer too small for the stored value.
    BufferTooSmall,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
