//! Tag dispatch, debounce, dispatch failures and peer links.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use nfcd::app::events::AppEvent;
use nfcd::app::ports::{CallbackError, PeerMode, ReaderCallback, Sound};
use nfcd::config::ServiceConfig;
use nfcd::discovery::{
    FLAG_READER_NFC_A, FLAG_READER_NO_PLATFORM_SOUNDS, FLAG_READER_SKIP_NDEF_CHECK, ScreenState,
};
use nfcd::prefs::{PrefKey, Prefs};
use nfcd::{AdapterState, Caller, TECH_NFC_BARCODE};

use crate::mock_hw::{
    CountingRemovedCallback, DeviceCall, MockPeer, MockReaderCallback, MockTag, NdefBehavior, Rig,
};

const APP: Caller = Caller {
    id: 42,
    privileged: false,
    foreground: true,
};

fn reader_mode(rig: &Rig, flags: u32, callback: Option<Arc<MockReaderCallback>>) {
    let callback = callback.map(|cb| cb as Arc<dyn ReaderCallback>);
    rig.service.set_reader_mode(APP, flags, callback, None).unwrap();
    rig.service.run_until_idle();
}

fn failing_rig(config: ServiceConfig) -> Rig {
    let rig = Rig::builder().config(config).build();
    rig.enable();
    rig.dispatcher.succeed.store(false, Ordering::SeqCst);
    rig
}

#[test]
fn ndef_tag_is_dispatched() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(1, &[0x04, 0xA2]));
    rig.tap(&tag);

    assert_eq!(
        *rig.dispatcher.dispatched.lock(),
        vec![(1, Some(vec![0xD1, 0x01, 0x01, 0x54]))]
    );
    assert_eq!(rig.sounds(), vec![Sound::End]);
    assert_eq!(rig.feedback.vibrations.load(Ordering::SeqCst), 1);
    assert_eq!(rig.feedback.user_activity.load(Ordering::SeqCst), 1);
    assert_eq!(*tag.presence_delay.lock(), Some(125));
    assert!(tag.presence_checking());
    assert!(rig.service.is_live(1));
}

#[test]
fn lost_tag_is_unregistered() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(1, &[0x04]));
    rig.tap(&tag);
    tag.remove();
    rig.service.run_until_idle();
    assert!(!rig.service.is_live(1));
    assert_eq!(rig.service.live_object_count(), 0);
}

#[test]
fn tag_without_ndef_is_dispatched_bare() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(2, &[0x05]).with_ndef(NdefBehavior::Empty));
    rig.tap(&tag);
    assert_eq!(*rig.dispatcher.dispatched.lock(), vec![(2, None)]);
    assert_eq!(tag.reconnects.load(Ordering::SeqCst), 0);
}

#[test]
fn unreadable_tag_is_dropped_when_reconnect_fails() {
    let rig = Rig::enabled();
    let tag = Arc::new(
        MockTag::new(3, &[0x06])
            .with_ndef(NdefBehavior::IoError)
            .with_reconnect(false),
    );
    rig.tap(&tag);

    assert_eq!(rig.dispatcher.dispatch_count(), 0);
    assert_eq!(tag.disconnects.load(Ordering::SeqCst), 1);
    assert!(!rig.service.is_live(3));
    assert!(rig.sounds().is_empty());
}

#[test]
fn unreadable_tag_is_dispatched_after_reconnect() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(4, &[0x07]).with_ndef(NdefBehavior::IoError));
    rig.tap(&tag);

    assert_eq!(tag.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(*rig.dispatcher.dispatched.lock(), vec![(4, None)]);
    assert!(rig.service.is_live(4));
}

#[test]
fn barcode_tag_skips_ndef_read() {
    let rig = Rig::enabled();
    let tag = Arc::new(MockTag::new(5, &[0x08]).with_technology(TECH_NFC_BARCODE));
    rig.tap(&tag);
    assert_eq!(tag.ndef_reads.load(Ordering::SeqCst), 0);
    assert_eq!(*rig.dispatcher.dispatched.lock(), vec![(5, None)]);
}

#[test]
fn reader_mode_skip_ndef_check() {
    let rig = Rig::enabled();
    reader_mode(&rig, FLAG_READER_NFC_A | FLAG_READER_SKIP_NDEF_CHECK, None);

    let tag = Arc::new(MockTag::new(6, &[0x09]));
    rig.tap(&tag);
    assert_eq!(tag.ndef_reads.load(Ordering::SeqCst), 0);
    assert_eq!(*rig.dispatcher.dispatched.lock(), vec![(6, None)]);
    // reader-mode feedback plus the dispatch feedback
    assert_eq!(rig.sounds(), vec![Sound::End, Sound::End]);
}

#[test]
fn reader_callback_receives_tag() {
    let rig = Rig::enabled();
    let callback = Arc::new(MockReaderCallback::new(Ok(())));
    reader_mode(&rig, FLAG_READER_NFC_A, Some(callback.clone()));

    let tag = Arc::new(MockTag::new(7, &[0x0A]));
    rig.tap(&tag);

    assert_eq!(*callback.seen.lock(), vec![7]);
    assert_eq!(rig.dispatcher.dispatch_count(), 0);
    assert_eq!(rig.sounds(), vec![Sound::End]);
    assert_eq!(rig.feedback.user_activity.load(Ordering::SeqCst), 1);
    assert!(rig.service.is_live(7));
}

#[test]
fn reader_mode_can_silence_platform_sounds() {
    let rig = Rig::enabled();
    let callback = Arc::new(MockReaderCallback::new(Ok(())));
    reader_mode(
        &rig,
        FLAG_READER_NFC_A | FLAG_READER_NO_PLATFORM_SOUNDS,
        Some(callback),
    );
    rig.tap(&Arc::new(MockTag::new(8, &[0x0B])));
    assert!(rig.sounds().is_empty());
    assert_eq!(rig.feedback.vibrations.load(Ordering::SeqCst), 0);
}

#[test]
fn dead_reader_callback_falls_back_to_dispatch() {
    let rig = Rig::enabled();
    let callback = Arc::new(MockReaderCallback::new(Err(CallbackError::RemoteDied)));
    reader_mode(&rig, FLAG_READER_NFC_A, Some(callback.clone()));

    rig.tap(&Arc::new(MockTag::new(9, &[0x0C])));
    assert_eq!(*callback.seen.lock(), vec![9]);
    assert_eq!(rig.dispatcher.dispatch_count(), 1);
}

#[test]
fn failing_reader_callback_stops_dispatch() {
    let rig = Rig::enabled();
    let callback = Arc::new(MockReaderCallback::new(Err(CallbackError::App)));
    reader_mode(&rig, FLAG_READER_NFC_A, Some(callback));

    rig.tap(&Arc::new(MockTag::new(10, &[0x0D])));
    assert_eq!(rig.dispatcher.dispatch_count(), 0);
}

#[test]
fn reader_mode_presence_delay_is_used() {
    let rig = Rig::enabled();
    rig.service
        .set_reader_mode(APP, FLAG_READER_NFC_A, None, Some(250))
        .unwrap();
    rig.service.run_until_idle();

    let tag = Arc::new(MockTag::new(11, &[0x0E]));
    rig.tap(&tag);
    assert_eq!(*tag.presence_delay.lock(), Some(250));
}

#[test]
fn leaving_reader_mode_stops_presence_checks() {
    let rig = Rig::enabled();
    reader_mode(&rig, FLAG_READER_NFC_A, None);
    let tag = Arc::new(MockTag::new(12, &[0x0F]));
    rig.tap(&tag);
    assert!(tag.presence_checking());

    reader_mode(&rig, 0, None);
    assert!(!tag.presence_checking());
}

// ── Debounce ──────────────────────────────────────────────────

#[test]
fn ignored_tag_is_swallowed_until_it_stays_away() {
    let rig = Rig::enabled();
    let first = Arc::new(MockTag::new(1, &[0xAA, 0xBB]));
    rig.tap(&first);

    let removed = Arc::new(CountingRemovedCallback::default());
    assert!(rig.service.ignore(1, 1_000, Some(removed.clone())));
    assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);
    assert!(!rig.service.is_live(1));

    rig.advance(500);
    let again = Arc::new(MockTag::new(2, &[0xAA, 0xBB]).with_payload(&[0x01]));
    rig.tap(&again);
    assert_eq!(rig.dispatcher.dispatch_count(), 1);
    assert_eq!(again.disconnects.load(Ordering::SeqCst), 1);

    rig.advance(999);
    assert_eq!(removed.fired.load(Ordering::SeqCst), 0);
    rig.advance(1);
    assert_eq!(removed.fired.load(Ordering::SeqCst), 1);
    assert!(!rig.service.dump().debounce_active);
}

#[test]
fn same_ndef_on_other_tag_is_swallowed() {
    let rig = Rig::enabled();
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    assert!(rig.service.ignore(1, 1_000, None));

    rig.tap(&Arc::new(MockTag::new(2, &[0x02])));
    assert_eq!(rig.dispatcher.dispatch_count(), 1);
    assert!(rig.service.dump().debounce_active);
}

#[test]
fn different_tag_ends_debounce_early() {
    let rig = Rig::enabled();
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    let removed = Arc::new(CountingRemovedCallback::default());
    assert!(rig.service.ignore(1, 5_000, Some(removed.clone())));

    let other = Arc::new(MockTag::new(2, &[0x02]).with_payload(&[0xD1, 0x01, 0x01, 0x55]));
    rig.tap(&other);

    assert_eq!(removed.fired.load(Ordering::SeqCst), 1);
    assert_eq!(rig.dispatcher.dispatch_count(), 2);
    assert!(!rig.service.dump().debounce_active);

    rig.advance(5_000);
    assert_eq!(removed.fired.load(Ordering::SeqCst), 1);
}

#[test]
fn debounce_callback_still_fires_after_disable() {
    let rig = Rig::enabled();
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    let removed = Arc::new(CountingRemovedCallback::default());
    assert!(rig.service.ignore(1, 1_000, Some(removed.clone())));

    rig.disable();
    assert_eq!(removed.fired.load(Ordering::SeqCst), 0);
    rig.advance(1_000);
    assert_eq!(removed.fired.load(Ordering::SeqCst), 1);
    assert!(!rig.service.dump().debounce_active);
}

#[test]
fn ignore_of_unknown_handle_fails() {
    let rig = Rig::enabled();
    assert!(!rig.service.ignore(99, 1_000, None));
}

#[test]
fn zero_debounce_ends_window_now() {
    let rig = Rig::enabled();
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    let removed = Arc::new(CountingRemovedCallback::default());
    assert!(rig.service.ignore(1, 10_000, Some(removed.clone())));

    assert!(rig.service.ignore(1, 0, None));
    rig.service.run_until_idle();
    assert_eq!(removed.fired.load(Ordering::SeqCst), 1);
    assert_eq!(rig.service.pending_events(), 0);
}

// ── Dispatch failures ─────────────────────────────────────────

#[test]
fn failed_dispatch_plays_error_and_unregisters() {
    let rig = failing_rig(ServiceConfig::default());
    let tag = Arc::new(MockTag::new(1, &[0x01]));
    rig.tap(&tag);

    assert_eq!(rig.sounds(), vec![Sound::Error]);
    assert!(!rig.service.is_live(1));
    assert!(tag.presence_checking());
    assert_eq!(rig.service.dump().dispatch_failures, 1);
}

#[test]
fn failed_dispatch_is_quiet_while_locked() {
    let rig = failing_rig(ServiceConfig::default());
    rig.service.on_screen_state_changed(ScreenState::OnLocked);
    rig.service.run_until_idle();
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    assert!(rig.sounds().is_empty());
}

#[test]
fn repeated_failures_raise_antenna_alert_once() {
    let rig = failing_rig(ServiceConfig::default());
    for handle in 1..=3 {
        rig.tap(&Arc::new(MockTag::new(handle, &[handle as u8])));
    }
    assert_eq!(rig.sink.count(&AppEvent::AntennaBlocked), 0);

    rig.tap(&Arc::new(MockTag::new(4, &[0x04])));
    assert_eq!(rig.sink.count(&AppEvent::AntennaBlocked), 1);
    assert!(Prefs::new(rig.storage.clone()).get_bool(PrefKey::AntennaBlockedShown, false));

    for handle in 5..=12 {
        rig.tap(&Arc::new(MockTag::new(handle, &[handle as u8])));
    }
    assert_eq!(rig.sink.count(&AppEvent::AntennaBlocked), 1);

    let restarted = Rig::builder().storage(rig.storage.clone()).build();
    restarted.enable();
    restarted.dispatcher.succeed.store(false, Ordering::SeqCst);
    for handle in 1..=6 {
        restarted.tap(&Arc::new(MockTag::new(handle, &[handle as u8])));
    }
    assert_eq!(restarted.sink.count(&AppEvent::AntennaBlocked), 0);
}

#[test]
fn successful_dispatch_resets_failure_count() {
    let rig = failing_rig(ServiceConfig::default());
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    rig.tap(&Arc::new(MockTag::new(2, &[0x02])));
    rig.dispatcher.succeed.store(true, Ordering::SeqCst);
    rig.tap(&Arc::new(MockTag::new(3, &[0x03])));
    assert_eq!(rig.service.dump().dispatch_failures, 0);
}

#[test]
fn antenna_alert_can_be_disabled() {
    let rig = failing_rig(ServiceConfig {
        antenna_blocked_alert: false,
        ..ServiceConfig::default()
    });
    for handle in 1..=8 {
        rig.tap(&Arc::new(MockTag::new(handle, &[handle as u8])));
    }
    assert_eq!(rig.sink.count(&AppEvent::AntennaBlocked), 0);
}

#[test]
fn poll_delay_backs_off_after_failure() {
    let rig = failing_rig(ServiceConfig {
        poll_delay_ms: Some(500),
        ..ServiceConfig::default()
    });
    let tag = Arc::new(MockTag::new(1, &[0x01]));
    rig.tap(&tag);

    assert!(!tag.presence_checking());
    assert_eq!(
        rig.device.count(|c| *c == DeviceCall::StartStopPolling(false)),
        1
    );

    rig.advance(499);
    assert_eq!(rig.device.count(|c| *c == DeviceCall::StartStopPolling(true)), 0);
    rig.advance(1);
    assert_eq!(rig.device.count(|c| *c == DeviceCall::StartStopPolling(true)), 1);
}

#[test]
fn poll_backoff_is_not_restarted_by_second_failure() {
    let rig = failing_rig(ServiceConfig {
        poll_delay_ms: Some(500),
        ..ServiceConfig::default()
    });
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    rig.advance(200);
    rig.tap(&Arc::new(MockTag::new(2, &[0x02])));

    assert_eq!(
        rig.device.count(|c| *c == DeviceCall::StartStopPolling(false)),
        1
    );
    assert_eq!(rig.service.pending_events(), 1);

    rig.advance(300);
    assert_eq!(rig.device.count(|c| *c == DeviceCall::StartStopPolling(true)), 1);
    assert_eq!(rig.service.pending_events(), 0);
}

#[test]
fn screen_change_cancels_poll_backoff() {
    let rig = failing_rig(ServiceConfig {
        poll_delay_ms: Some(500),
        ..ServiceConfig::default()
    });
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));
    rig.service.on_screen_state_changed(ScreenState::OnLocked);
    rig.service.run_until_idle();
    rig.advance(1_000);
    assert_eq!(rig.device.count(|c| *c == DeviceCall::StartStopPolling(true)), 0);
}

#[test]
fn provisioning_failures_are_silent() {
    let rig = failing_rig(ServiceConfig::default());
    rig.service.set_provisioning_mode(true);
    rig.tap(&Arc::new(MockTag::new(1, &[0x01])));

    assert!(rig.sounds().is_empty());
    assert!(rig.service.is_live(1));
    assert_eq!(rig.service.dump().dispatch_failures, 0);
}

#[test]
fn provisioned_device_leaves_provisioning_mode() {
    let rig = Rig::enabled();
    rig.service.set_provisioning_mode(true);
    rig.service.set_device_provisioned(true);
    rig.service.run_until_idle();
    assert_eq!(rig.dispatcher.provisioning_disabled.load(Ordering::SeqCst), 1);
}

// ── Peers ─────────────────────────────────────────────────────

#[test]
fn target_peer_link_lifecycle() {
    let rig = Rig::enabled();
    let peer = Arc::new(MockPeer::new(20, PeerMode::Target));

    rig.service.on_link_activated(peer.clone());
    rig.service.run_until_idle();
    assert_eq!(peer.connects.load(Ordering::SeqCst), 1);
    assert!(rig.service.is_live(20));

    rig.service.on_link_first_packet();
    rig.service.on_link_deactivated(peer.clone());
    rig.service.run_until_idle();

    assert_eq!(peer.disconnects.load(Ordering::SeqCst), 1);
    assert!(!rig.service.is_live(20));
    assert_eq!(
        rig.p2p.calls(),
        vec!["activated(0x11)", "first_packet", "deactivated"]
    );
}

#[test]
fn initiator_peer_is_not_connected_by_us() {
    let rig = Rig::enabled();
    let peer = Arc::new(MockPeer::new(21, PeerMode::Initiator));
    rig.service.on_link_activated(peer.clone());
    rig.service.on_link_deactivated(peer.clone());
    rig.service.run_until_idle();

    assert_eq!(peer.connects.load(Ordering::SeqCst), 0);
    assert_eq!(peer.disconnects.load(Ordering::SeqCst), 0);
    assert_eq!(rig.service.live_object_count(), 0);
}

// ── RF field and secure NFC ───────────────────────────────────

#[test]
fn rf_field_events_are_forwarded() {
    let rig = Rig::enabled();
    rig.service.on_rf_field_activated();
    rig.service.on_rf_field_deactivated();
    rig.service.run_until_idle();
    assert_eq!(rig.sink.count(&AppEvent::RfFieldOn), 1);
    assert_eq!(rig.sink.count(&AppEvent::RfFieldOff), 1);
    assert_eq!(rig.sink.count(&AppEvent::RequireUnlock), 0);
}

#[test]
fn secure_nfc_asks_for_unlock_once_per_lock() {
    let rig = Rig::enabled();
    rig.device.clear_calls();
    assert!(rig.service.set_nfc_secure(true).unwrap());
    assert!(rig.device.calls().is_empty());
    rig.service.run_until_idle();
    assert_eq!(rig.device.calls()[0], DeviceCall::SetNfcSecure(true));

    rig.service.on_screen_state_changed(ScreenState::OnLocked);
    rig.service.on_rf_field_activated();
    rig.service.on_rf_field_activated();
    rig.service.run_until_idle();
    assert_eq!(rig.sink.count(&AppEvent::RequireUnlock), 1);

    rig.service.on_screen_state_changed(ScreenState::OnUnlocked);
    rig.service.on_screen_state_changed(ScreenState::OnLocked);
    rig.service.on_rf_field_activated();
    rig.service.run_until_idle();
    assert_eq!(rig.sink.count(&AppEvent::RequireUnlock), 2);
}

#[test]
fn secure_nfc_cannot_be_turned_off_while_locked() {
    let rig = Rig::enabled();
    rig.service.set_nfc_secure(true).unwrap();
    rig.service.on_screen_state_changed(ScreenState::OffLocked);
    rig.service.run_until_idle();

    assert!(!rig.service.set_nfc_secure(false).unwrap());
    assert!(Prefs::new(rig.storage.clone()).get_bool(PrefKey::SecureNfcOn, false));

    let restarted = Rig::builder().storage(rig.storage.clone()).build();
    restarted.enable();
    assert!(restarted.device.calls().contains(&DeviceCall::SetNfcSecure(true)));
}

#[test]
fn tag_read_across_disable_is_dropped() {
    let rig = Arc::new(Rig::enabled());
    let weak = Arc::downgrade(&rig);
    let tag = Arc::new(MockTag::new(1, &[0x01]).with_read_hook(move || {
        if let Some(rig) = weak.upgrade() {
            rig.disable();
        }
    }));
    rig.tap(&tag);

    assert_eq!(rig.service.state(), AdapterState::Off);
    assert_eq!(rig.dispatcher.dispatch_count(), 0);
    assert_eq!(rig.service.live_object_count(), 0);
    assert_eq!(tag.disconnects.load(Ordering::SeqCst), 1);
    assert!(!tag.presence_checking());

    rig.enable();
    assert_eq!(tag.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn tag_reported_while_off_is_dropped() {
    let rig = Rig::new();
    let tag = Arc::new(MockTag::new(1, &[0x01]));
    rig.tap(&tag);
    assert_eq!(rig.dispatcher.dispatch_count(), 0);
    assert_eq!(tag.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(rig.service.live_object_count(), 0);
}
