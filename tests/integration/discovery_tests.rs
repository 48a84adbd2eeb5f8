//! Screen state, reader mode and polling pause against the controller.

use std::sync::Arc;

use nfcd::config::ServiceConfig;
use nfcd::discovery::{
    FLAG_READER_NFC_A, FLAG_READER_SKIP_NDEF_CHECK, POLL_A, POLL_DEFAULT, ScreenState,
};
use nfcd::{Caller, NfcError};

use crate::mock_hw::{DeviceCall, MockTag, Rig};

const FOREGROUND: Caller = Caller {
    id: 100,
    privileged: false,
    foreground: true,
};

const SYSTEM: Caller = Caller {
    id: 1,
    privileged: true,
    foreground: false,
};

fn set_screen(rig: &Rig, screen: ScreenState) {
    rig.service.on_screen_state_changed(screen);
    rig.service.run_until_idle();
}

#[test]
fn nci2_screen_lock_is_left_to_the_controller() {
    let rig = Rig::enabled();
    rig.device.clear_calls();

    set_screen(&rig, ScreenState::OnLocked);

    assert_eq!(rig.device.calls(), vec![DeviceCall::SetScreenState(0x04)]);
    assert_eq!(rig.service.dump().screen_state, "OnLocked");
}

#[test]
fn nci1_screen_lock_keeps_only_host_routing() {
    let rig = Rig::builder().nci_version(0x10).build();
    rig.enable();

    set_screen(&rig, ScreenState::OnLocked);

    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, 0);
    assert!(params.enable_host_routing);
}

#[test]
fn nci1_screen_off_without_hce_stops_discovery() {
    let rig = Rig::builder()
        .config(ServiceConfig {
            hce_capable: false,
            ..ServiceConfig::default()
        })
        .nci_version(0x10)
        .without_card_emulation()
        .build();
    rig.enable();

    set_screen(&rig, ScreenState::OffLocked);
    assert_eq!(rig.device.last_discovery(), Some(None));
    assert!(rig.device.calls().contains(&DeviceCall::SetScreenState(0x02)));

    set_screen(&rig, ScreenState::OnUnlocked);
    match rig.device.calls().last() {
        Some(DeviceCall::EnableDiscovery { params, restart }) => {
            assert_eq!(params.tech_mask, POLL_DEFAULT);
            assert!(!restart);
        }
        other => panic!("expected discovery enable, got {other:?}"),
    }
}

#[test]
fn screen_change_while_off_is_only_recorded() {
    let rig = Rig::new();
    set_screen(&rig, ScreenState::OnLocked);
    assert!(rig.device.calls().is_empty());

    rig.enable();
    assert!(rig.device.calls().contains(&DeviceCall::SetScreenState(0x04)));
    assert_eq!(rig.service.dump().screen_state, "OnLocked");
}

#[test]
fn unchanged_plan_does_not_touch_controller() {
    let rig = Rig::enabled();
    rig.device.clear_calls();
    set_screen(&rig, ScreenState::OnUnlocked);
    assert_eq!(
        rig.device
            .count(|c| matches!(c, DeviceCall::EnableDiscovery { .. } | DeviceCall::DisableDiscovery)),
        0
    );
}

#[test]
fn nci1_screen_change_restarts_discovery() {
    let rig = Rig::builder().nci_version(0x10).build();
    rig.enable();
    rig.device.clear_calls();

    set_screen(&rig, ScreenState::OnLocked);
    let calls = rig.device.calls();
    assert_eq!(calls[0], DeviceCall::DisableDiscovery);
    assert_eq!(calls[1], DeviceCall::SetScreenState(0x04));
    assert!(matches!(
        calls[2],
        DeviceCall::EnableDiscovery { restart: true, .. }
    ));

    rig.device.clear_calls();
    set_screen(&rig, ScreenState::OnLocked);
    assert!(rig.device.calls().is_empty());
}

#[test]
fn lockscreen_polling_sets_tag_bit_and_mask() {
    let rig = Rig::new();
    rig.service.set_lockscreen_polling(Some(POLL_A));
    rig.enable();
    assert!(rig.device.calls().contains(&DeviceCall::SetScreenState(0x18)));

    set_screen(&rig, ScreenState::OnLocked);
    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, POLL_A);
    assert!(!params.enable_low_power);
    assert!(rig.device.calls().contains(&DeviceCall::SetScreenState(0x14)));
}

#[test]
fn reader_mode_restricts_poll_mask() {
    let rig = Rig::enabled();
    rig.service
        .set_reader_mode(FOREGROUND, FLAG_READER_NFC_A, None, None)
        .unwrap();
    rig.service.run_until_idle();

    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, POLL_A);
    assert!(params.enable_reader_mode);
    assert!(!params.enable_host_routing);
    assert!(rig.service.dump().reader_mode);

    rig.service.set_reader_mode(FOREGROUND, 0, None, None).unwrap();
    rig.service.run_until_idle();
    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, POLL_DEFAULT);
    assert!(!rig.service.dump().reader_mode);
}

#[test]
fn reader_mode_rejects_background_callers() {
    let rig = Rig::enabled();
    let background = Caller {
        id: 5,
        privileged: false,
        foreground: false,
    };
    assert!(matches!(
        rig.service.set_reader_mode(background, FLAG_READER_NFC_A, None, None),
        Err(NfcError::InvalidCallerState(_))
    ));
}

#[test]
fn reader_mode_needs_nfc_on_unless_privileged() {
    let rig = Rig::new();
    assert!(
        rig.service
            .set_reader_mode(FOREGROUND, FLAG_READER_NFC_A, None, None)
            .is_err()
    );
    assert!(
        rig.service
            .set_reader_mode(SYSTEM, FLAG_READER_NFC_A, None, None)
            .is_ok()
    );
    rig.service.run_until_idle();
    assert!(rig.device.calls().is_empty());
}

#[test]
fn disabling_polling_is_privileged() {
    let rig = Rig::builder()
        .config(ServiceConfig {
            polling_disable_allowed: true,
            ..ServiceConfig::default()
        })
        .build();
    rig.enable();

    assert!(
        rig.service
            .set_reader_mode(FOREGROUND, FLAG_READER_SKIP_NDEF_CHECK, None, None)
            .is_err()
    );

    rig.service
        .set_reader_mode(SYSTEM, FLAG_READER_SKIP_NDEF_CHECK, None, None)
        .unwrap();
    rig.service.run_until_idle();
    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, 0);
    assert!(params.enable_host_routing);
    assert!(params.enable_reader_mode);

    assert!(matches!(
        rig.service
            .set_reader_mode(FOREGROUND, FLAG_READER_NFC_A, None, None),
        Err(NfcError::InvalidCallerState(_))
    ));
}

#[test]
fn polling_disable_rejected_when_not_allowed() {
    let rig = Rig::enabled();
    assert!(
        rig.service
            .set_reader_mode(SYSTEM, FLAG_READER_SKIP_NDEF_CHECK, None, None)
            .is_err()
    );
}

#[test]
fn dead_reader_mode_caller_restores_default_polling() {
    let rig = Rig::enabled();
    rig.service
        .set_reader_mode(FOREGROUND, FLAG_READER_NFC_A, None, None)
        .unwrap();
    rig.service.run_until_idle();

    rig.service.on_reader_mode_caller_died(FOREGROUND.id);
    rig.service.run_until_idle();

    assert!(!rig.service.dump().reader_mode);
    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, POLL_DEFAULT);
}

#[test]
fn pause_polling_validates_timeout() {
    let rig = Rig::enabled();
    let max = rig.service.config().max_polling_pause_ms;
    assert!(matches!(
        rig.service.pause_polling(0),
        Err(NfcError::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.service.pause_polling(max + 1),
        Err(NfcError::InvalidArgument(_))
    ));
    assert!(rig.service.pause_polling(max).is_ok());
}

#[test]
fn paused_polling_resumes_after_timeout() {
    let rig = Rig::enabled();
    rig.device.clear_calls();

    rig.service.pause_polling(1_000).unwrap();
    assert!(rig.device.calls().is_empty());
    rig.service.run_until_idle();
    assert_eq!(rig.device.calls(), vec![DeviceCall::DisableDiscovery]);
    assert!(rig.service.dump().polling_paused);

    rig.advance(999);
    assert_eq!(rig.device.last_discovery(), Some(None));

    rig.advance(1);
    let calls = rig.device.calls();
    let last = calls.last().unwrap();
    match last {
        DeviceCall::EnableDiscovery { params, restart } => {
            assert_eq!(params.tech_mask, POLL_DEFAULT);
            assert!(!restart);
        }
        other => panic!("expected discovery restart, got {other:?}"),
    }
    assert!(!rig.service.dump().polling_paused);
}

#[test]
fn resume_polling_ends_pause_early() {
    let rig = Rig::enabled();
    rig.service.pause_polling(10_000).unwrap();
    rig.service.resume_polling().unwrap();
    rig.service.run_until_idle();

    assert!(!rig.service.dump().polling_paused);
    assert!(rig.device.last_discovery().flatten().is_some());
    assert_eq!(rig.service.pending_events(), 0);
}

#[test]
fn pause_polling_queues_behind_earlier_requests() {
    let rig = Rig::enabled();
    rig.device.clear_calls();

    rig.service.route_aids(vec![0xA0, 0x01], 1, 0, 0x3B);
    rig.service.pause_polling(1_000).unwrap();
    assert!(rig.device.calls().is_empty());
    rig.service.run_until_idle();

    let routed = rig
        .device
        .position(|c| matches!(c, DeviceCall::RouteAid { .. }))
        .unwrap();
    let paused = rig
        .device
        .position(|c| *c == DeviceCall::DisableDiscovery)
        .unwrap();
    assert!(routed < paused);
}

#[test]
fn resume_without_pause_is_a_no_op() {
    let rig = Rig::enabled();
    rig.device.clear_calls();
    rig.service.resume_polling().unwrap();
    rig.service.run_until_idle();
    assert!(rig.device.calls().is_empty());
}

#[test]
fn routing_waits_while_tag_is_connected() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(1, &[0xAA]));
    rig.tap(&tag);
    rig.device.clear_calls();

    rig.service
        .set_reader_mode(FOREGROUND, FLAG_READER_NFC_A, None, None)
        .unwrap();
    rig.service.run_until_idle();
    assert_eq!(rig.device.last_discovery(), None);

    let retry = u64::from(rig.service.config().apply_routing_retry_ms);
    rig.advance(retry);
    assert_eq!(rig.device.last_discovery(), None);

    tag.remove();
    rig.service.run_until_idle();
    let params = rig.device.last_discovery().flatten().unwrap();
    assert_eq!(params.tech_mask, POLL_A);
}

#[test]
fn tag_retry_fires_once_when_not_paused() {
    let rig = Rig::enabled();
    rig.tap(&Arc::new(MockTag::new(1, &[0xAA])));

    rig.service.set_lockscreen_polling(Some(POLL_A));
    rig.service.run_until_idle();
    assert_eq!(rig.service.pending_events(), 1);

    let retry = u64::from(rig.service.config().apply_routing_retry_ms);
    rig.advance(retry);
    assert_eq!(rig.service.pending_events(), 0);
    rig.advance(retry);
    assert_eq!(rig.service.pending_events(), 0);
    assert!(!rig.service.dump().polling_paused);
}

#[test]
fn t3t_registration_restarts_discovery() {
    let rig = Rig::enabled();
    rig.device.clear_calls();

    rig.service.register_t3t_identifier(vec![0x02, 0xFE, 0x00]);
    rig.service.run_until_idle();

    let calls = rig.device.calls();
    assert_eq!(calls[0], DeviceCall::DisableDiscovery);
    assert_eq!(calls[1], DeviceCall::RegisterT3t(vec![0x02, 0xFE, 0x00]));
    assert!(matches!(
        calls[2],
        DeviceCall::EnableDiscovery { restart: true, .. }
    ));

    rig.service.deregister_t3t_identifier(vec![0x02, 0xFE, 0x00]);
    rig.service.run_until_idle();
    assert!(
        rig.device
            .calls()
            .contains(&DeviceCall::DeregisterT3t(vec![0x02, 0xFE, 0x00]))
    );
}
