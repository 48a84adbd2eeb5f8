//! Crash logging and runtime diagnostics.
//!
//! Stores up to 4 crash entries in a storage ring buffer under the "crash"
//! namespace.  Each entry captures the uptime, the watchdog label (or panic
//! reason) and a truncated copy of the driver diagnostic dump.  The
//! watchdog writes an entry right before aborting; an optional panic hook
//! does the same for panics.
//!
//! [`ServiceDump`] is the on-demand state snapshot rendered by the daemon.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;

const CRASH_RING_SLOTS: usize = 4;
const CRASH_NAMESPACE: &str = "crash";
const CRASH_INDEX_KEY: &str = "crash_idx";
const ENTRY_BUF_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEntry {
    pub uptime_ms: u64,
    pub reason: heapless::String<64>,
    /// Leading part of `DevicePort::dump_diagnostics()`.
    pub driver_dump: heapless::String<256>,
}

impl CrashEntry {
    pub fn new(uptime_ms: u64, reason: &str, driver_dump: &str) -> Self {
        Self {
            uptime_ms,
            reason: truncated(reason),
            driver_dump: truncated(driver_dump),
        }
    }
}

/// Copy as much of `s` as fits, cutting on a char boundary.
fn truncated<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Storage-backed ring buffer for crash entries.
#[derive(Default)]
pub struct CrashLog {
    write_index: usize,
}

impl CrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index from storage, or default to 0.
    pub fn init(&mut self, storage: &dyn StoragePort) {
        let mut buf = [0u8; 4];
        if let Ok(4) = storage.read(CRASH_NAMESPACE, CRASH_INDEX_KEY, &mut buf) {
            self.write_index = u32::from_le_bytes(buf) as usize % CRASH_RING_SLOTS;
        }
    }

    /// Write a crash entry to the next ring slot and advance the index.
    pub fn write_entry(&mut self, storage: &dyn StoragePort, entry: &CrashEntry) {
        let slot_key = Self::slot_key(self.write_index);
        match postcard::to_allocvec(entry) {
            Ok(bytes) => {
                if let Err(e) = storage.write(CRASH_NAMESPACE, &slot_key, &bytes) {
                    log::error!("crash log: write failed: {}", e);
                }
            }
            Err(e) => log::error!("crash log: encode failed: {}", e),
        }

        self.write_index = (self.write_index + 1) % CRASH_RING_SLOTS;
        let idx_bytes = (self.write_index as u32).to_le_bytes();
        if let Err(e) = storage.write(CRASH_NAMESPACE, CRASH_INDEX_KEY, &idx_bytes) {
            log::error!("crash log: index write failed: {}", e);
        }
    }

    /// Read all stored crash entries (up to 4).
    pub fn read_all(&self, storage: &dyn StoragePort) -> heapless::Vec<CrashEntry, 4> {
        let mut entries = heapless::Vec::new();
        for i in 0..CRASH_RING_SLOTS {
            let slot_key = Self::slot_key(i);
            let mut buf = [0u8; ENTRY_BUF_SIZE];
            if let Ok(len) = storage.read(CRASH_NAMESPACE, &slot_key, &mut buf) {
                if let Ok(entry) = postcard::from_bytes::<CrashEntry>(&buf[..len]) {
                    let _ = entries.push(entry);
                }
            }
        }
        entries
    }

    /// Erase all crash entries and reset the index.
    pub fn clear(&mut self, storage: &dyn StoragePort) {
        for i in 0..CRASH_RING_SLOTS {
            if let Err(e) = storage.delete(CRASH_NAMESPACE, &Self::slot_key(i)) {
                log::warn!("crash log: delete slot {} failed: {}", i, e);
            }
        }
        if let Err(e) = storage.delete(CRASH_NAMESPACE, CRASH_INDEX_KEY) {
            log::warn!("crash log: delete index failed: {}", e);
        }
        self.write_index = 0;
    }

    pub fn count(&self, storage: &dyn StoragePort) -> usize {
        (0..CRASH_RING_SLOTS)
            .filter(|i| storage.exists(CRASH_NAMESPACE, &Self::slot_key(*i)))
            .count()
    }

    fn slot_key(index: usize) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("e{}", index));
        s
    }
}

/// Record a crash entry in one step.
pub fn record_crash(storage: &dyn StoragePort, uptime_ms: u64, reason: &str, driver_dump: &str) {
    let mut log = CrashLog::new();
    log.init(storage);
    log.write_entry(storage, &CrashEntry::new(uptime_ms, reason, driver_dump));
}

// ───────────────────────────────────────────────────────────────
// Service dump
// ───────────────────────────────────────────────────────────────

/// Point-in-time view of the service state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDump {
    pub state: String,
    pub screen_state: String,
    pub nci_version: String,
    pub discovery: String,
    pub reader_mode: bool,
    pub polling_paused: bool,
    pub live_objects: usize,
    pub debounce_active: bool,
    pub overflow_route: Option<u32>,
    pub last_commit_ok: bool,
    pub dispatch_failures: u32,
    pub pending_events: usize,
    pub crash_entries: usize,
}

// ───────────────────────────────────────────────────────────────
// Panic hook: writes a CrashEntry before the process dies
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that persists crash info to `storage`.
///
/// Chains to the previously installed hook afterwards.
pub fn install_panic_handler(storage: Arc<dyn StoragePort>) {
    let started = std::time::Instant::now();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };

        log::error!("PANIC: {}", reason);
        let uptime = started.elapsed().as_millis() as u64;
        record_crash(storage.as_ref(), uptime, reason, "");
        previous(info);
    }));
}
