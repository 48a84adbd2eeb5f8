//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade.  A broadcast or notification adapter would implement
//! the same trait.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::AdapterStateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            AppEvent::RoutingTableFull => {
                warn!("ROUTE | routing table full");
            }
            AppEvent::PreferredPaymentChanged(reason) => {
                info!("PAY   | preferred payment {:?}", reason);
            }
            AppEvent::RfFieldOn => {
                info!("FIELD | on");
            }
            AppEvent::RfFieldOff => {
                info!("FIELD | off");
            }
            AppEvent::AntennaBlocked => {
                warn!("ALERT | antenna possibly blocked");
            }
            AppEvent::RequireUnlock => {
                info!("ALERT | unlock required for secure NFC");
            }
            AppEvent::UiccSelected { slot, status } => {
                info!("UICC  | slot {} {:?}", slot, status);
            }
            AppEvent::Started(state) => {
                info!("START | adapter={}", state);
            }
        }
    }
}
