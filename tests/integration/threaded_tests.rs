//! The service on its own worker threads with a real clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nfcd::AdapterState;
use nfcd::adapters::store::MemStore;
use nfcd::adapters::time::SystemClock;
use nfcd::app::events::AppEvent;
use nfcd::config::ServiceConfig;
use nfcd::{NfcService, ServicePorts};

use crate::mock_hw::{
    DeviceCall, MockCardEmulation, MockDevice, MockDispatcher, MockFeedback, MockTag,
    RecordingSink,
};

struct Threaded {
    service: NfcService,
    device: Arc<MockDevice>,
    dispatcher: Arc<MockDispatcher>,
    sink: Arc<RecordingSink>,
}

fn threaded() -> Threaded {
    let device = Arc::new(MockDevice::new(0x20));
    let dispatcher = Arc::new(MockDispatcher::new());
    let sink = Arc::new(RecordingSink::default());
    let ports = ServicePorts::new(
        device.clone(),
        dispatcher.clone(),
        Arc::new(MockFeedback::default()),
        sink.clone(),
        Arc::new(MemStore::new()),
        Arc::new(SystemClock::new()),
    )
    .with_card_emulation(Arc::new(MockCardEmulation::default()))
    .with_abort_action(Arc::new(|_: &str| {}));

    Threaded {
        service: NfcService::new(ServiceConfig::default(), ports),
        device,
        dispatcher,
        sink,
    }
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let until = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < until, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn workers_run_lifecycle_and_events() {
    let t = threaded();
    t.service.start().unwrap();
    assert_eq!(t.sink.events()[0], AppEvent::Started(AdapterState::Off));

    t.service.enable().unwrap();
    wait_for("adapter on", || t.service.state() == AdapterState::On);
    wait_for("routing commit", || {
        t.device.count(|c| *c == DeviceCall::CommitRouting) == 1
    });

    let tag = Arc::new(MockTag::new(1, &[0x11]));
    t.service.on_tag_discovered(tag.clone());
    wait_for("dispatch", || t.dispatcher.dispatch_count() == 1);

    tag.remove();
    wait_for("tag lost", || !t.service.is_live(1));

    t.service.shutdown();
}

#[test]
fn paused_polling_resumes_in_real_time() {
    let t = threaded();
    t.service.start().unwrap();
    t.service.enable().unwrap();
    wait_for("adapter on", || t.service.state() == AdapterState::On);

    wait_for("routing commit", || {
        t.device.count(|c| *c == DeviceCall::CommitRouting) == 1
    });

    t.device.clear_calls();
    t.service.pause_polling(30).unwrap();
    wait_for("polling paused", || {
        t.device.position(|c| *c == DeviceCall::DisableDiscovery).is_some()
    });
    wait_for("polling resumed", || {
        matches!(t.device.last_discovery(), Some(Some(_)))
    });
}

#[test]
fn shutdown_stops_workers_with_pending_work() {
    let t = threaded();
    t.service.start().unwrap();
    t.service.compute_routing_parameters();
    t.service.shutdown();
    t.service.shutdown();
    assert_eq!(t.service.state(), AdapterState::Off);
}
