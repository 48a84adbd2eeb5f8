//! Fuzz target: scenario replay
//!
//! Parses arbitrary bytes as a JSON command list and replays whatever
//! parses against the simulated controller on a manual clock.  The
//! service must never panic and a disable must always leave the live
//! object table empty.
//!
//! cargo fuzz run fuzz_scenario

#![no_main]

use std::collections::HashMap;
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use nfcd::adapters::log_sink::LogEventSink;
use nfcd::adapters::sim_device::{SimDevice, SimTag};
use nfcd::adapters::sim_host::{LogCardEmulation, LogFeedback, SimDispatcher};
use nfcd::adapters::store::MemStore;
use nfcd::adapters::time::ManualClock;
use nfcd::app::commands::AppCommand;
use nfcd::{AdapterState, NfcService, ServicePorts};

fuzz_target!(|data: &[u8]| {
    let Ok(script) = serde_json::from_slice::<Vec<AppCommand>>(data) else {
        return;
    };

    let clock = Arc::new(ManualClock::new());
    let ports = ServicePorts::new(
        Arc::new(SimDevice::new()),
        Arc::new(SimDispatcher::new()),
        Arc::new(LogFeedback),
        Arc::new(LogEventSink::new()),
        Arc::new(MemStore::new()),
        clock.clone(),
    )
    .with_card_emulation(Arc::new(LogCardEmulation))
    .with_abort_action(Arc::new(|_: &str| {}));
    let service = NfcService::new(Default::default(), ports);
    let mut tags: HashMap<u32, Arc<SimTag>> = HashMap::new();

    for cmd in script.into_iter().take(64) {
        match cmd {
            AppCommand::Boot => service.boot(),
            AppCommand::Enable => {
                let _ = service.enable();
            }
            AppCommand::Disable { save_state } => {
                let _ = service.disable(save_state);
                service.run_until_idle();
                if service.state() == AdapterState::Off {
                    assert_eq!(service.live_object_count(), 0);
                }
            }
            AppCommand::Screen { state } => service.on_screen_state_changed(state),
            AppCommand::TapTag { handle, uid, ndef } => {
                let tag = Arc::new(SimTag::new(handle, uid, ndef));
                tags.insert(handle, tag.clone());
                service.on_tag_discovered(tag);
            }
            AppCommand::RemoveTag { handle } => {
                if let Some(tag) = tags.remove(&handle) {
                    tag.remove();
                }
            }
            AppCommand::IgnoreTag { handle, debounce_ms } => {
                service.ignore(handle, debounce_ms % 60_000, None);
            }
            AppCommand::PausePolling { timeout_ms } => {
                let _ = service.pause_polling(timeout_ms);
            }
            AppCommand::ResumePolling => {
                let _ = service.resume_polling();
            }
            AppCommand::RouteAid { aid, route } => service.route_aids(aid, route, 0, 0x39),
            AppCommand::CommitRouting => service.commit_routing(),
            AppCommand::SetDefaultRoute { location } => {
                service.update_default_aid_route(location % 4);
            }
            AppCommand::RfField { on: true } => service.on_rf_field_activated(),
            AppCommand::RfField { on: false } => service.on_rf_field_deactivated(),
            AppCommand::HardwareError => service.on_hw_error_reported(),
            AppCommand::Advance { ms } => clock.advance(ms % 120_000),
            AppCommand::Dump => {
                let _ = service.dump();
            }
        }
        service.run_until_idle();
    }
});
