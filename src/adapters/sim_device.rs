//! Simulated NFC controller and tags.
//!
//! [`SimDevice`] implements [`DevicePort`] entirely in memory: it keeps
//! the routing table, the applied discovery configuration and the screen
//! mask so the daemon and tests can observe what the service pushed.
//! [`SimTag`] is a tag whose removal is triggered explicitly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use parking_lot::Mutex;

use crate::app::ports::{
    DevicePort, HardwareRouteDefaults, NdefMessage, TagEndpoint, TagIoError, TagLostHandler,
    UiccStatus,
};
use crate::discovery::DiscoveryParameters;
use crate::routing::RouteKind;

#[derive(Debug, Default)]
struct SimState {
    initialized: bool,
    discovery: Option<DiscoveryParameters>,
    polling: bool,
    screen_mask: u8,
    secure: bool,
    routes: BTreeMap<(u8, u8), (u8, u8)>,
    aids: BTreeMap<Vec<u8>, u8>,
    empty_aid_route: Option<u32>,
    commits: u32,
    t3t_ids: Vec<Vec<u8>>,
    sim_slot: u8,
    factory_resets: u32,
}

/// In-memory controller.
pub struct SimDevice {
    nci_version: u8,
    defaults: HardwareRouteDefaults,
    fail_init: AtomicBool,
    state: Mutex<SimState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// NCI 2.0 controller with host-routed AIDs and eSE-routed tech/protocol.
    pub fn new() -> Self {
        Self::with_nci_version(0x20)
    }

    pub fn with_nci_version(nci_version: u8) -> Self {
        Self {
            nci_version,
            defaults: HardwareRouteDefaults {
                aid_route: 0,
                aid_power: 0x39,
                desfire_route: 1,
                desfire_power: 0x39,
                mifare_clt_route: 1,
                mifare_clt_power: 0x39,
                felica_route: 1,
                felica_power: 0x39,
            },
            fail_init: AtomicBool::new(false),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Make the next `initialize()` calls fail.
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Discovery configuration currently running, if any.
    pub fn discovery(&self) -> Option<DiscoveryParameters> {
        self.state.lock().discovery
    }

    pub fn screen_mask(&self) -> u8 {
        self.state.lock().screen_mask
    }

    pub fn commits(&self) -> u32 {
        self.state.lock().commits
    }

    pub fn routed_aids(&self) -> usize {
        self.state.lock().aids.len()
    }

    pub fn empty_aid_route(&self) -> Option<u32> {
        self.state.lock().empty_aid_route
    }
}

impl DevicePort for SimDevice {
    fn initialize(&self) -> bool {
        if self.fail_init.load(Ordering::SeqCst) {
            info!("sim: initialize failed (injected)");
            return false;
        }
        self.state.lock().initialized = true;
        info!("sim: controller initialized");
        true
    }

    fn deinitialize(&self) -> bool {
        let mut s = self.state.lock();
        s.initialized = false;
        s.discovery = None;
        s.polling = false;
        info!("sim: controller deinitialized");
        true
    }

    fn factory_reset(&self) {
        let mut s = self.state.lock();
        s.factory_resets += 1;
        s.routes.clear();
        s.aids.clear();
        info!("sim: factory reset");
    }

    fn check_firmware(&self) -> bool {
        debug!("sim: firmware up to date");
        true
    }

    fn enable_discovery(&self, params: &DiscoveryParameters, restart: bool) {
        let mut s = self.state.lock();
        s.discovery = Some(*params);
        s.polling = params.tech_mask != 0;
        debug!(
            "sim: discovery on, tech {:#04x} (restart={})",
            params.tech_mask, restart
        );
    }

    fn disable_discovery(&self) {
        let mut s = self.state.lock();
        s.discovery = None;
        s.polling = false;
        debug!("sim: discovery off");
    }

    fn start_stop_polling(&self, start: bool) {
        self.state.lock().polling = start;
        debug!("sim: polling {}", if start { "started" } else { "stopped" });
    }

    fn set_screen_state(&self, mask: u8) {
        self.state.lock().screen_mask = mask;
    }

    fn set_nfc_secure(&self, enable: bool) {
        self.state.lock().secure = enable;
    }

    fn set_routing_entry(&self, kind: RouteKind, selector: u8, location: u8, power: u8) -> bool {
        self.state
            .lock()
            .routes
            .insert((kind as u8, selector), (location, power));
        true
    }

    fn clear_routing_entry(&self, kind: RouteKind) {
        let mut s = self.state.lock();
        if kind == RouteKind::Aid {
            s.aids.clear();
        } else {
            s.routes.retain(|(k, _), _| *k != kind as u8);
        }
    }

    fn set_empty_aid_route(&self, route: u32) {
        self.state.lock().empty_aid_route = Some(route);
    }

    fn commit_routing(&self) -> bool {
        let mut s = self.state.lock();
        s.commits += 1;
        info!(
            "sim: routing committed ({} entries, {} AIDs)",
            s.routes.len(),
            s.aids.len()
        );
        true
    }

    fn route_aid(&self, aid: &[u8], route: u8, _aid_info: u32, _power: u32) -> bool {
        self.state.lock().aids.insert(aid.to_vec(), route);
        true
    }

    fn unroute_aid(&self, aid: &[u8]) -> bool {
        self.state.lock().aids.remove(aid).is_some()
    }

    fn default_routes(&self) -> HardwareRouteDefaults {
        self.defaults
    }

    fn nci_version(&self) -> u8 {
        self.nci_version
    }

    fn set_preferred_sim_slot(&self, slot: u8) {
        self.state.lock().sim_slot = slot;
    }

    fn select_uicc(&self, slot: u8) -> UiccStatus {
        if !(1..=2).contains(&slot) {
            return UiccStatus::Failed;
        }
        self.state.lock().sim_slot = slot;
        UiccStatus::Configured
    }

    fn check_llcp(&self) -> bool {
        true
    }

    fn activate_llcp(&self) -> bool {
        true
    }

    fn register_t3t_identifier(&self, id: &[u8]) {
        self.state.lock().t3t_ids.push(id.to_vec());
    }

    fn deregister_t3t_identifier(&self, id: &[u8]) {
        self.state.lock().t3t_ids.retain(|t| t != id);
    }

    fn dump_diagnostics(&self) -> String {
        let s = self.state.lock();
        format!(
            "sim: init={} polling={} screen={:#04x} secure={} routes={} aids={} commits={} slot={} resets={}",
            s.initialized,
            s.polling,
            s.screen_mask,
            s.secure,
            s.routes.len(),
            s.aids.len(),
            s.commits,
            s.sim_slot,
            s.factory_resets
        )
    }

    fn abort(&self, label: &str) {
        info!("sim: abort requested ({})", label);
    }
}

// ───────────────────────────────────────────────────────────────
// Tags
// ───────────────────────────────────────────────────────────────

/// A tag held in the simulated field until [`SimTag::remove`].
pub struct SimTag {
    handle: u32,
    uid: Vec<u8>,
    ndef: Option<NdefMessage>,
    present: AtomicBool,
    on_lost: Mutex<Option<TagLostHandler>>,
}

impl SimTag {
    pub fn new(handle: u32, uid: Vec<u8>, ndef: Option<Vec<u8>>) -> Self {
        Self {
            handle,
            uid,
            ndef: ndef.map(NdefMessage),
            present: AtomicBool::new(true),
            on_lost: Mutex::new(None),
        }
    }

    /// Take the tag out of the field; presence checking reports it lost.
    pub fn remove(&self) {
        self.present.store(false, Ordering::SeqCst);
        let handler = self.on_lost.lock().take();
        if let Some(on_lost) = handler {
            on_lost(self.handle);
        }
    }
}

impl TagEndpoint for SimTag {
    fn handle(&self) -> u32 {
        self.handle
    }

    fn uid(&self) -> Vec<u8> {
        self.uid.clone()
    }

    fn connected_technology(&self) -> u32 {
        1
    }

    fn find_and_read_ndef(&self) -> Result<Option<NdefMessage>, TagIoError> {
        if self.is_present() {
            Ok(self.ndef.clone())
        } else {
            Err(TagIoError)
        }
    }

    fn reconnect(&self) -> bool {
        self.is_present()
    }

    fn disconnect(&self) -> bool {
        self.on_lost.lock().take();
        true
    }

    fn start_presence_checking(&self, delay_ms: u32, on_lost: TagLostHandler) {
        debug!("sim tag {}: presence check every {} ms", self.handle, delay_ms);
        *self.on_lost.lock() = Some(on_lost);
    }

    fn stop_presence_checking(&self) {
        self.on_lost.lock().take();
    }

    fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }
}
