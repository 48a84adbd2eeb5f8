//! Serialized event queue.
//!
//! Events are produced by:
//! - Driver callbacks (tag discovered, link up/down, RF field)
//! - Façade calls (route AIDs, commit routing, polling pause, SIM/SE switch)
//! - Timers (tag debounce, polling resume, delayed polling)
//!
//! Events are consumed by exactly one thread, which processes them
//! one at a time in deadline order.  Immediate posts keep FIFO order.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Driver cb    │────▶│              │     │              │
//! │ Façade call  │────▶│  EventQueue  │────▶│  Event loop  │
//! │ Delayed post │────▶│  (deadline)  │     │  (consumer)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! The same queue type backs the lifecycle worker, carrying
//! [`LifecycleTask`](crate::lifecycle::LifecycleTask)s instead of [`Event`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::app::ports::{Clock, PeerEndpoint, TagEndpoint};
use crate::discovery::ScreenState;

/// Reason attached to a preferred-payment change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PaymentChangeReason {
    Loaded = 1,
    Changed = 2,
    Updated = 3,
}

/// Typed stimuli handled by the event loop.
pub enum Event {
    // ── Discovery ─────────────────────────────────────────
    /// A tag was activated by the controller.
    TagDiscovered(Arc<dyn TagEndpoint>),
    /// Presence checking lost the tag with this handle.
    TagLost(u32),
    /// Debounce window elapsed without the tag coming back.
    TagDebounce,

    // ── Peer links ────────────────────────────────────────
    LinkActivated(Arc<dyn PeerEndpoint>),
    LinkDeactivated(Arc<dyn PeerEndpoint>),
    LinkFirstPacket,

    // ── Routing ───────────────────────────────────────────
    RouteAid {
        aid: Vec<u8>,
        route: u8,
        aid_info: u32,
        power: u32,
    },
    UnrouteAid(Vec<u8>),
    RegisterT3tIdentifier(Vec<u8>),
    DeregisterT3tIdentifier(Vec<u8>),
    CommitRouting,
    ComputeRoutingParameters,
    /// Clear TECH and PROTOCOL entries, then recompute.
    ResetAndUpdateRoutingParameters,
    /// Default AID route moved: wipe the AID table and let card emulation re-push it.
    RebuildAidTable,
    /// Secure element slot changed: wipe every entry kind and rebuild from scratch.
    RebuildRoutingTable,
    /// Move the session default AID route to this location.
    UpdateDefaultAidRoute(u8),

    // ── Polling / discovery configuration ─────────────────
    ApplyScreenState(ScreenState),
    ApplyRouting { force: bool },
    PausePolling { timeout_ms: u32 },
    ResumePolling,
    DelayPolling,

    // ── Notifications ─────────────────────────────────────
    RfFieldActivated,
    RfFieldDeactivated,
    PreferredPaymentChanged(PaymentChangeReason),

    // ── Secure element ────────────────────────────────────
    InitWiredSe,
    DeinitWiredSe,
    SelectUicc(u8),
    SetNfcSecure(bool),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TagDiscovered(_) => "TagDiscovered",
            Self::TagLost(_) => "TagLost",
            Self::TagDebounce => "TagDebounce",
            Self::LinkActivated(_) => "LinkActivated",
            Self::LinkDeactivated(_) => "LinkDeactivated",
            Self::LinkFirstPacket => "LinkFirstPacket",
            Self::RouteAid { .. } => "RouteAid",
            Self::UnrouteAid(_) => "UnrouteAid",
            Self::RegisterT3tIdentifier(_) => "RegisterT3tIdentifier",
            Self::DeregisterT3tIdentifier(_) => "DeregisterT3tIdentifier",
            Self::CommitRouting => "CommitRouting",
            Self::ComputeRoutingParameters => "ComputeRoutingParameters",
            Self::ResetAndUpdateRoutingParameters => "ResetAndUpdateRoutingParameters",
            Self::RebuildAidTable => "RebuildAidTable",
            Self::RebuildRoutingTable => "RebuildRoutingTable",
            Self::UpdateDefaultAidRoute(_) => "UpdateDefaultAidRoute",
            Self::ApplyScreenState(_) => "ApplyScreenState",
            Self::ApplyRouting { .. } => "ApplyRouting",
            Self::PausePolling { .. } => "PausePolling",
            Self::ResumePolling => "ResumePolling",
            Self::DelayPolling => "DelayPolling",
            Self::RfFieldActivated => "RfFieldActivated",
            Self::RfFieldDeactivated => "RfFieldDeactivated",
            Self::PreferredPaymentChanged(_) => "PreferredPaymentChanged",
            Self::InitWiredSe => "InitWiredSe",
            Self::DeinitWiredSe => "DeinitWiredSe",
            Self::SelectUicc(_) => "SelectUicc",
            Self::SetNfcSecure(_) => "SetNfcSecure",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagDiscovered(tag) => write!(f, "TagDiscovered(handle={})", tag.handle()),
            Self::TagLost(handle) => write!(f, "TagLost(handle={handle})"),
            Self::ApplyScreenState(s) => write!(f, "ApplyScreenState({s:?})"),
            Self::ApplyRouting { force } => write!(f, "ApplyRouting(force={force})"),
            Self::PausePolling { timeout_ms } => write!(f, "PausePolling({timeout_ms} ms)"),
            Self::SelectUicc(slot) => write!(f, "SelectUicc({slot})"),
            Self::RouteAid { aid, route, .. } => {
                write!(f, "RouteAid(len={}, route={route})", aid.len())
            }
            other => f.write_str(other.name()),
        }
    }
}

// ── Deadline-ordered queue ────────────────────────────────────
//
// Keys are (deadline_ms, sequence).  Immediate posts use `now` as the
// deadline, so two posts at the same instant keep submission order and
// a delayed event never overtakes an earlier-due one.

struct QueueState<T> {
    pending: BTreeMap<(u64, u64), T>,
    next_seq: u64,
    closed: bool,
}

/// Multi-producer, single-consumer queue with delayed delivery.
pub struct EventQueue<T> {
    name: &'static str,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            clock,
            state: Mutex::new(QueueState {
                pending: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue for immediate processing.
    /// Returns `false` if the queue has been closed (event dropped).
    pub fn post(&self, event: T) -> bool {
        self.post_delayed(event, 0)
    }

    /// Enqueue for processing once `delay_ms` has elapsed.
    pub fn post_delayed(&self, event: T, delay_ms: u32) -> bool {
        let deadline = self.clock.now_ms() + u64::from(delay_ms);
        let mut state = self.state.lock();
        if state.closed {
            log::debug!("{}: closed, dropping event", self.name);
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert((deadline, seq), event);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Drop every pending event matching `pred`.  Returns how many were removed.
    pub fn remove_matching(&self, pred: impl Fn(&T) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|_, event| !pred(event));
        before - state.pending.len()
    }

    /// Whether any pending event (due or not) matches `pred`.
    pub fn has_matching(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.state.lock().pending.values().any(pred)
    }

    /// Pop the earliest event whose deadline has passed, without blocking.
    pub fn pop_due(&self) -> Option<T> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        Self::take_due(&mut *state, now)
    }

    /// Block until an event is due.  Returns `None` once the queue is closed.
    pub fn next_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = self.clock.now_ms();
            if let Some(event) = Self::take_due(&mut *state, now) {
                return Some(event);
            }
            match state.pending.keys().next() {
                Some(&(deadline, _)) => {
                    let wait = Duration::from_millis(deadline.saturating_sub(now).max(1));
                    let _ = self.available.wait_for(&mut state, wait);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Deadline of the earliest pending event, due or not.
    pub fn next_deadline(&self) -> Option<u64> {
        self.state.lock().pending.keys().next().map(|&(d, _)| d)
    }

    /// Stop accepting events and wake the consumer.  Pending events are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        drop(state);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_due(state: &mut QueueState<T>, now: u64) -> Option<T> {
        let key = *state.pending.keys().next()?;
        if key.0 > now {
            return None;
        }
        state.pending.remove(&key)
    }
}
