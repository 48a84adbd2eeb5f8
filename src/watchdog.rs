//! Hang watchdog for blocking controller operations.
//!
//! A [`Watchdog`] arms one-shot timers around operations that must not
//! hang (controller init, deinit, discovery reconfiguration).  Each timer
//! runs on its own thread:
//!
//! ```text
//!   start(label, ms) ──▶ timer thread ── wait_until(deadline) ──┐
//!                                                               │
//!   cancel() ── canceled = true, notify ──▶ thread exits        │
//!                                                               ▼
//!                              fired = true ──▶ release wake lock
//!                                           ──▶ crash log + driver dump
//!                                           ──▶ DevicePort::abort(label)
//!                                           ──▶ abort action (process exit)
//! ```
//!
//! The canceled/fired decision is taken under one mutex, so a cancel that
//! loses the race against expiry is a no-op and the abort proceeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::app::ports::{Clock, DevicePort, StoragePort};
use crate::diagnostics::record_crash;

/// Terminates the hosting process.  Injectable so tests can observe it.
pub type AbortAction = Arc<dyn Fn(&str) + Send + Sync>;

fn abort_process(label: &str) {
    error!("watchdog: aborting process after hang in {}", label);
    std::process::abort();
}

/// Default abort action: `std::process::abort()`.
pub fn process_abort() -> AbortAction {
    Arc::new(abort_process)
}

// ───────────────────────────────────────────────────────────────
// Wake lock
// ───────────────────────────────────────────────────────────────

/// Keeps the device awake while routing is reconfigured.
#[derive(Debug)]
pub struct WakeLock {
    name: &'static str,
    held: AtomicBool,
}

impl WakeLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: AtomicBool::new(false),
        }
    }

    pub fn acquire(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            debug!("wakelock {}: acquired", self.name);
        }
    }

    /// Returns whether the lock was held.
    pub fn release(&self) -> bool {
        let was_held = self.held.swap(false, Ordering::SeqCst);
        if was_held {
            debug!("wakelock {}: released", self.name);
        }
        was_held
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

// ───────────────────────────────────────────────────────────────
// Watchdog
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WatchState {
    canceled: bool,
    fired: bool,
}

struct Shared {
    state: Mutex<WatchState>,
    wake: Condvar,
}

/// Arms hang timers.  Cheap to clone.
#[derive(Clone)]
pub struct Watchdog {
    device: Arc<dyn DevicePort>,
    storage: Arc<dyn StoragePort>,
    clock: Arc<dyn Clock>,
    wake_lock: Arc<WakeLock>,
    abort: AbortAction,
}

impl Watchdog {
    pub fn new(
        device: Arc<dyn DevicePort>,
        storage: Arc<dyn StoragePort>,
        clock: Arc<dyn Clock>,
        wake_lock: Arc<WakeLock>,
        abort: AbortAction,
    ) -> Self {
        Self {
            device,
            storage,
            clock,
            wake_lock,
            abort,
        }
    }

    /// Arm a timer.  The returned handle must be canceled before `timeout_ms`.
    pub fn start(&self, label: &'static str, timeout_ms: u32) -> WatchdogHandle {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState::default()),
            wake: Condvar::new(),
        });
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let worker = self.clone();
        let thread_shared = shared.clone();

        let spawned = thread::Builder::new()
            .name(format!("watchdog-{label}"))
            .spawn(move || worker.run(label, &thread_shared, deadline));
        if let Err(e) = spawned {
            error!("watchdog {}: timer thread failed to start: {}", label, e);
        }
        debug!("watchdog {}: armed for {} ms", label, timeout_ms);

        WatchdogHandle { label, shared }
    }

    fn run(&self, label: &'static str, shared: &Shared, deadline: Instant) {
        let mut state = shared.state.lock();
        while !state.canceled {
            if shared.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.canceled {
            return;
        }
        state.fired = true;
        drop(state);

        self.fire(label);
    }

    fn fire(&self, label: &str) {
        error!("watchdog {}: timeout, controller hang", label);
        if self.wake_lock.release() {
            info!("watchdog {}: released routing wake lock", label);
        }
        let dump = self.device.dump_diagnostics();
        record_crash(
            self.storage.as_ref(),
            self.clock.now_ms(),
            &format!("watchdog: {label}"),
            &dump,
        );
        self.device.abort(label);
        (self.abort)(label);
    }
}

/// An armed timer.
pub struct WatchdogHandle {
    label: &'static str,
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    /// Disarm.  Returns `false` if the timer already fired; the abort then proceeds.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.fired {
            return false;
        }
        if !state.canceled {
            state.canceled = true;
            debug!("watchdog {}: canceled", self.label);
        }
        drop(state);
        self.shared.wake.notify_all();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.shared.state.lock().fired
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
