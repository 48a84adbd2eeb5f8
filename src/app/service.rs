//! NFC service: the hexagonal core.
//!
//! [`NfcService`] owns the shared context, the two work queues and the
//! driven ports.  It exposes a hardware-agnostic façade; all I/O flows
//! through port traits resolved once at construction, so the whole
//! service runs against mock adapters in tests.
//!
//! ```text
//!  driver callbacks ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  façade calls     ──▶ │          NfcService          │
//!                       │ lifecycle worker · event loop│ ──▶ DevicePort
//!                       └──────────────────────────────┘
//! ```
//!
//! Two execution modes share the same handlers:
//! - [`NfcService::start`] spawns one thread per queue.
//! - [`NfcService::run_until_idle`] drains both queues on the calling
//!   thread; paired with a manual clock it makes timing deterministic.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::ServiceConfig;
use crate::context::NfcContext;
use crate::diagnostics::{CrashLog, ServiceDump};
use crate::discovery::{ReaderModeParams, ScreenState, reader_tech_mask};
use crate::error::{NfcError, Result};
use crate::events::{Event, EventQueue, PaymentChangeReason};
use crate::lifecycle::{AdapterState, LifecycleTask};
use crate::prefs::{PrefKey, Prefs};
use crate::routing::{Destination, RouteCategory, RoutingCoordinator};
use crate::watchdog::{AbortAction, WakeLock, Watchdog, process_abort};

use super::events::AppEvent;
use super::ports::{
    CardEmulationPort, Clock, CoexistencePort, DevicePort, EventSink, FeedbackPort, P2pLinkPort,
    PeerEndpoint, ReaderCallback, StoragePort, TagDispatchPort, TagEndpoint, TagRemovedCallback,
    WiredSePort,
};

// ───────────────────────────────────────────────────────────────
// Construction inputs
// ───────────────────────────────────────────────────────────────

/// Every adapter the service talks to.  Optional capabilities stay `None`
/// when the platform lacks them.
pub struct ServicePorts {
    pub device: Arc<dyn DevicePort>,
    pub dispatcher: Arc<dyn TagDispatchPort>,
    pub feedback: Arc<dyn FeedbackPort>,
    pub sink: Arc<dyn EventSink>,
    pub storage: Arc<dyn StoragePort>,
    pub clock: Arc<dyn Clock>,
    pub card_emulation: Option<Arc<dyn CardEmulationPort>>,
    pub p2p: Option<Arc<dyn P2pLinkPort>>,
    pub coexistence: Option<Arc<dyn CoexistencePort>>,
    pub wired_se: Option<Arc<dyn WiredSePort>>,
    pub abort: AbortAction,
}

impl ServicePorts {
    pub fn new(
        device: Arc<dyn DevicePort>,
        dispatcher: Arc<dyn TagDispatchPort>,
        feedback: Arc<dyn FeedbackPort>,
        sink: Arc<dyn EventSink>,
        storage: Arc<dyn StoragePort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device,
            dispatcher,
            feedback,
            sink,
            storage,
            clock,
            card_emulation: None,
            p2p: None,
            coexistence: None,
            wired_se: None,
            abort: process_abort(),
        }
    }

    pub fn with_card_emulation(mut self, port: Arc<dyn CardEmulationPort>) -> Self {
        self.card_emulation = Some(port);
        self
    }

    pub fn with_p2p(mut self, port: Arc<dyn P2pLinkPort>) -> Self {
        self.p2p = Some(port);
        self
    }

    pub fn with_coexistence(mut self, port: Arc<dyn CoexistencePort>) -> Self {
        self.coexistence = Some(port);
        self
    }

    pub fn with_wired_se(mut self, port: Arc<dyn WiredSePort>) -> Self {
        self.wired_se = Some(port);
        self
    }

    /// Replace the watchdog's process abort (tests observe it instead).
    pub fn with_abort_action(mut self, abort: AbortAction) -> Self {
        self.abort = abort;
        self
    }
}

/// Identity of a reader-mode requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: u32,
    pub privileged: bool,
    pub foreground: bool,
}

// ───────────────────────────────────────────────────────────────
// Core (shared by the worker threads)
// ───────────────────────────────────────────────────────────────

pub(crate) struct Core {
    pub(crate) config: ServiceConfig,
    pub(crate) device: Arc<dyn DevicePort>,
    pub(crate) dispatcher: Arc<dyn TagDispatchPort>,
    pub(crate) feedback: Arc<dyn FeedbackPort>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) storage: Arc<dyn StoragePort>,
    pub(crate) card_emulation: Option<Arc<dyn CardEmulationPort>>,
    pub(crate) p2p: Option<Arc<dyn P2pLinkPort>>,
    pub(crate) coexistence: Option<Arc<dyn CoexistencePort>>,
    pub(crate) wired_se: Option<Arc<dyn WiredSePort>>,
    pub(crate) prefs: Prefs,
    pub(crate) routing: RoutingCoordinator,
    pub(crate) watchdog: Watchdog,
    pub(crate) routing_wake_lock: Arc<WakeLock>,
    pub(crate) ctx: Mutex<NfcContext>,
    /// Serializes discovery reconfiguration between the two workers.
    pub(crate) apply_lock: Mutex<()>,
    pub(crate) events: Arc<EventQueue<Event>>,
    pub(crate) lifecycle: EventQueue<LifecycleTask>,
}

impl Core {
    pub(crate) fn emit(&self, event: AppEvent) {
        self.sink.emit(&event);
    }
}

// ───────────────────────────────────────────────────────────────
// NfcService
// ───────────────────────────────────────────────────────────────

pub struct NfcService {
    core: Arc<Core>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NfcService {
    /// Build the service.  Nothing runs until [`start`](Self::start) or
    /// [`run_until_idle`](Self::run_until_idle).
    pub fn new(config: ServiceConfig, ports: ServicePorts) -> Self {
        let prefs = Prefs::new(ports.storage.clone());
        let routing_wake_lock = Arc::new(WakeLock::new("routing"));
        let watchdog = Watchdog::new(
            ports.device.clone(),
            ports.storage.clone(),
            ports.clock.clone(),
            routing_wake_lock.clone(),
            ports.abort,
        );
        let ctx = NfcContext::new(
            prefs.get_bool(PrefKey::AntennaBlockedShown, false),
            prefs.get_bool(PrefKey::SecureNfcOn, false),
        );

        let core = Core {
            routing: RoutingCoordinator::new(ports.device.clone(), prefs.clone()),
            events: Arc::new(EventQueue::new("events", ports.clock.clone())),
            lifecycle: EventQueue::new("lifecycle", ports.clock),
            config,
            device: ports.device,
            dispatcher: ports.dispatcher,
            feedback: ports.feedback,
            sink: ports.sink,
            storage: ports.storage,
            card_emulation: ports.card_emulation,
            p2p: ports.p2p,
            coexistence: ports.coexistence,
            wired_se: ports.wired_se,
            prefs,
            watchdog,
            routing_wake_lock,
            ctx: Mutex::new(ctx),
            apply_lock: Mutex::new(()),
        };

        Self {
            core: Arc::new(core),
            workers: Mutex::new(Vec::new()),
        }
    }

    // ── Execution ─────────────────────────────────────────────

    /// Spawn the lifecycle worker and the event loop.
    pub fn start(&self) -> io::Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        let core = self.core.clone();
        workers.push(thread::Builder::new().name("nfc-lifecycle".into()).spawn(
            move || {
                while let Some(task) = core.lifecycle.next_blocking() {
                    core.run_lifecycle_task(task);
                }
                debug!("lifecycle worker exiting");
            },
        )?);

        let core = self.core.clone();
        workers.push(thread::Builder::new().name("nfc-events".into()).spawn(
            move || {
                while let Some(event) = core.events.next_blocking() {
                    core.handle_event(event);
                }
                debug!("event loop exiting");
            },
        )?);

        let state = self.state();
        self.core.emit(AppEvent::Started(state));
        info!("NfcService started (adapter {})", state);
        Ok(())
    }

    /// Process every due task and event on the calling thread.
    /// Returns how many items ran.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        loop {
            if let Some(task) = self.core.lifecycle.pop_due() {
                self.core.run_lifecycle_task(task);
            } else if let Some(event) = self.core.events.pop_due() {
                self.core.handle_event(event);
            } else {
                return processed;
            }
            processed += 1;
        }
    }

    /// Close both queues (pending work is dropped) and join the workers.
    pub fn shutdown(&self) {
        self.core.lifecycle.close();
        self.core.events.close();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("NfcService stopped");
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn boot(&self) {
        self.core.lifecycle.post(LifecycleTask::Boot);
    }

    /// Persist NFC as on and queue an enable.
    pub fn enable(&self) -> Result<()> {
        self.core.prefs.set_bool(PrefKey::NfcOn, true)?;
        self.core.lifecycle.post(LifecycleTask::Enable);
        Ok(())
    }

    /// Queue a disable.  `save_state` persists NFC as off.
    pub fn disable(&self, save_state: bool) -> Result<()> {
        if save_state {
            self.core.prefs.set_bool(PrefKey::NfcOn, false)?;
        }
        self.core
            .lifecycle
            .post(LifecycleTask::Disable { save_state });
        Ok(())
    }

    pub fn state(&self) -> AdapterState {
        self.core.ctx.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.core.ctx.lock().is_enabled()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.core.config
    }

    // ── Driver callbacks ──────────────────────────────────────

    pub fn on_tag_discovered(&self, tag: Arc<dyn TagEndpoint>) {
        self.core.events.post(Event::TagDiscovered(tag));
    }

    pub fn on_link_activated(&self, peer: Arc<dyn PeerEndpoint>) {
        self.core.events.post(Event::LinkActivated(peer));
    }

    pub fn on_link_deactivated(&self, peer: Arc<dyn PeerEndpoint>) {
        self.core.events.post(Event::LinkDeactivated(peer));
    }

    pub fn on_link_first_packet(&self) {
        self.core.events.post(Event::LinkFirstPacket);
    }

    pub fn on_rf_field_activated(&self) {
        self.core.events.post(Event::RfFieldActivated);
    }

    pub fn on_rf_field_deactivated(&self) {
        self.core.events.post(Event::RfFieldDeactivated);
    }

    /// The controller reported an unrecoverable error: restart it.
    pub fn on_hw_error_reported(&self) {
        warn!("hardware error reported, restarting controller");
        self.core
            .lifecycle
            .post(LifecycleTask::Disable { save_state: false });
        self.core.lifecycle.post(LifecycleTask::Enable);
    }

    pub fn on_preferred_payment_changed(&self, reason: PaymentChangeReason) {
        self.core.events.post(Event::PreferredPaymentChanged(reason));
    }

    pub fn on_screen_state_changed(&self, screen: ScreenState) {
        self.core.events.post(Event::ApplyScreenState(screen));
    }

    // ── Discovery control ─────────────────────────────────────

    /// Start, update or (with `flags == 0`) stop a reader-mode session.
    pub fn set_reader_mode(
        &self,
        caller: Caller,
        flags: u32,
        callback: Option<Arc<dyn ReaderCallback>>,
        presence_check_delay_ms: Option<u32>,
    ) -> Result<()> {
        if !caller.privileged && !caller.foreground {
            return Err(NfcError::InvalidCallerState(
                "reader mode requires a foreground caller",
            ));
        }
        let disable_polling = flags != 0 && reader_tech_mask(flags) == 0;
        if disable_polling && !(caller.privileged && self.core.config.polling_disable_allowed) {
            return Err(NfcError::InvalidCallerState(
                "caller may not disable polling",
            ));
        }

        let (enabled, stop_tags) = {
            let mut ctx = self.core.ctx.lock();
            let enabled = ctx.is_enabled();
            if !enabled && !caller.privileged {
                return Err(NfcError::InvalidCallerState("NFC is disabled"));
            }

            let mut stop_tags = Vec::new();
            if flags != 0 {
                if disable_polling {
                    ctx.polling_disable_callers.insert(caller.id);
                } else if !ctx.polling_disable_callers.is_empty() {
                    return Err(NfcError::InvalidCallerState(
                        "polling is disabled by another caller",
                    ));
                }
                ctx.reader_mode = Some(ReaderModeParams {
                    flags,
                    callback,
                    presence_check_delay_ms: presence_check_delay_ms
                        .unwrap_or(self.core.config.presence_check_delay_ms),
                });
                info!("reader mode on (flags {:#x})", flags);
            } else {
                ctx.polling_disable_callers.remove(&caller.id);
                if ctx.polling_disable_callers.is_empty() {
                    ctx.reader_mode = None;
                    stop_tags = ctx.objects.tags();
                    info!("reader mode off");
                }
            }
            (enabled, stop_tags)
        };

        for tag in stop_tags {
            tag.stop_presence_checking();
        }
        if enabled {
            self.core.events.post(Event::ApplyRouting { force: false });
        }
        Ok(())
    }

    /// The process behind a reader-mode session went away.
    pub fn on_reader_mode_caller_died(&self, caller_id: u32) {
        let reapply = {
            let mut ctx = self.core.ctx.lock();
            if ctx.reader_mode.is_none() {
                return;
            }
            ctx.polling_disable_callers.remove(&caller_id);
            if ctx.polling_disable_callers.is_empty() {
                ctx.reader_mode = None;
                true
            } else {
                false
            }
        };
        if reapply {
            info!("reader mode caller {} died, leaving reader mode", caller_id);
            self.core.events.post(Event::ApplyRouting { force: false });
        }
    }

    /// Stop polling for `timeout_ms`, after which it resumes on its own.
    pub fn pause_polling(&self, timeout_ms: u32) -> Result<()> {
        if timeout_ms == 0 || timeout_ms > self.core.config.max_polling_pause_ms {
            return Err(NfcError::InvalidArgument("pause timeout out of range"));
        }
        self.core
            .events
            .remove_matching(|e| matches!(e, Event::ResumePolling));
        self.core.events.post(Event::PausePolling { timeout_ms });
        Ok(())
    }

    /// Resume polling early.  No-op unless paused.
    pub fn resume_polling(&self) -> Result<()> {
        self.core
            .events
            .remove_matching(|e| matches!(e, Event::ResumePolling));
        self.core.events.post(Event::ResumePolling);
        Ok(())
    }

    /// Ignore the tag behind `handle` until it has been away for `debounce_ms`.
    pub fn ignore(
        &self,
        handle: u32,
        debounce_ms: u32,
        callback: Option<Arc<dyn TagRemovedCallback>>,
    ) -> bool {
        self.core.ignore(handle, debounce_ms, callback)
    }

    /// Tech mask to poll while the keyguard is showing; `None` turns it off.
    pub fn set_lockscreen_polling(&self, mask: Option<u32>) {
        let enabled = {
            let mut ctx = self.core.ctx.lock();
            ctx.lockscreen_poll_mask = mask;
            ctx.is_enabled()
        };
        if enabled {
            self.core.events.post(Event::ApplyRouting { force: false });
        }
    }

    pub fn set_provisioning_mode(&self, provisioning: bool) {
        self.core.ctx.lock().provisioning = provisioning;
    }

    /// The device finished setup; provisioning mode ends on the next routing apply.
    pub fn set_device_provisioned(&self, provisioned: bool) {
        let enabled = {
            let mut ctx = self.core.ctx.lock();
            ctx.provisioned = provisioned;
            ctx.is_enabled()
        };
        if provisioned && enabled {
            self.core.events.post(Event::ApplyRouting { force: false });
        }
    }

    /// Toggle secure NFC.  Refused (returns `false`) when turning it off
    /// with the keyguard showing.
    pub fn set_nfc_secure(&self, enable: bool) -> Result<bool> {
        if !enable && self.core.ctx.lock().screen_locked() {
            info!("keyguard must be unlocked before turning secure NFC off");
            return Ok(false);
        }
        self.core.prefs.set_bool(PrefKey::SecureNfcOn, enable)?;
        self.core.ctx.lock().secure_nfc = enable;
        self.core.events.post(Event::SetNfcSecure(enable));
        Ok(true)
    }

    // ── Routing ───────────────────────────────────────────────

    pub fn route_aids(&self, aid: Vec<u8>, route: u8, aid_info: u32, power: u32) {
        self.core.events.post(Event::RouteAid {
            aid,
            route,
            aid_info,
            power,
        });
    }

    pub fn unroute_aids(&self, aid: Vec<u8>) {
        self.core.events.post(Event::UnrouteAid(aid));
    }

    pub fn register_t3t_identifier(&self, id: Vec<u8>) {
        self.core.events.post(Event::RegisterT3tIdentifier(id));
    }

    pub fn deregister_t3t_identifier(&self, id: Vec<u8>) {
        self.core.events.post(Event::DeregisterT3tIdentifier(id));
    }

    pub fn commit_routing(&self) {
        self.core.events.post(Event::CommitRouting);
    }

    pub fn compute_routing_parameters(&self) {
        self.core.events.post(Event::ComputeRoutingParameters);
    }

    /// Move the session default AID route to `location` (hardware encoding).
    pub fn update_default_aid_route(&self, location: u8) {
        self.core.events.post(Event::UpdateDefaultAidRoute(location));
    }

    /// Persist a routing override for `category`.
    pub fn set_category_route(
        &self,
        category: RouteCategory,
        dest_app_id: u8,
        full: bool,
        low: bool,
        none: bool,
    ) -> Result<()> {
        let dest = Destination::from_app_id(dest_app_id)
            .ok_or(NfcError::InvalidArgument("unknown route destination"))?;
        if category == RouteCategory::DefaultAid && !self.core.config.hce_capable {
            return Err(NfcError::InvalidCallerState(
                "host card emulation is not supported",
            ));
        }

        let nci = self.core.ctx.lock().nci_version;
        let entry = self
            .core
            .routing
            .encode_category(category, dest, full, low, none, nci)?;
        let changed = self.core.routing.store_category(category, entry)?;

        if changed && category == RouteCategory::DefaultAid && self.is_enabled() {
            self.core.events.post(Event::RebuildAidTable);
        }
        Ok(())
    }

    /// Encoded route currently configured for `category`.
    pub fn category_route(&self, category: RouteCategory) -> u32 {
        self.core.routing.category_route(category)
    }

    /// Switch the active SIM/SE slot.  The outcome is reported as
    /// [`AppEvent::UiccSelected`].
    pub fn select_uicc(&self, slot: u8) -> Result<()> {
        if !self.is_enabled() {
            return Err(NfcError::InvalidCallerState("NFC is disabled"));
        }
        self.core.events.post(Event::SelectUicc(slot));
        Ok(())
    }

    /// Card emulation overflowed the controller's AID table.
    /// Emits [`AppEvent::RoutingTableFull`] only once until cleared.
    pub fn notify_routing_table_full(&self) -> Result<()> {
        if self.core.prefs.get_bool(PrefKey::RoutingTableFull, false) {
            debug!("routing table full already reported");
            return Ok(());
        }
        self.core.prefs.set_bool(PrefKey::RoutingTableFull, true)?;
        self.core.emit(AppEvent::RoutingTableFull);
        Ok(())
    }

    pub fn clear_routing_table_full(&self) -> Result<()> {
        self.core.prefs.remove(PrefKey::RoutingTableFull)?;
        Ok(())
    }

    // ── Diagnostics ───────────────────────────────────────────

    pub fn pending_events(&self) -> usize {
        self.core.events.len()
    }

    pub fn live_object_count(&self) -> usize {
        self.core.ctx.lock().objects.len()
    }

    /// Whether a tag or peer with `handle` is currently registered.
    pub fn is_live(&self, handle: u32) -> bool {
        self.core.ctx.lock().objects.contains(handle)
    }

    /// Snapshot of the service state for `dump`.
    pub fn dump(&self) -> ServiceDump {
        let crash_entries = CrashLog::new().count(self.core.storage.as_ref());
        let pending_events = self.core.events.len();
        let ctx = self.core.ctx.lock();
        ServiceDump {
            state: ctx.state.to_string(),
            screen_state: format!("{:?}", ctx.screen),
            nci_version: format!("{:?}", ctx.nci_version),
            discovery: format!("{:?}", ctx.discovery),
            reader_mode: ctx.reader_mode.is_some(),
            polling_paused: ctx.polling_paused,
            live_objects: ctx.objects.len(),
            debounce_active: ctx.debounce.is_some(),
            overflow_route: ctx.overflow_route,
            last_commit_ok: ctx.last_commit_ok,
            dispatch_failures: ctx.dispatch_failures,
            pending_events,
            crash_entries,
        }
    }
}

impl Drop for NfcService {
    fn drop(&mut self) {
        if !self.workers.lock().is_empty() {
            self.shutdown();
        }
    }
}
