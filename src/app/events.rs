//! Outbound application events.
//!
//! The [`NfcService`](super::service::NfcService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log them, broadcast them to
//! applications, raise a notification, etc.

use crate::app::ports::UiccStatus;
use crate::events::PaymentChangeReason;
use crate::lifecycle::AdapterState;

/// Structured events emitted by the service core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The adapter moved between lifecycle states.
    AdapterStateChanged { from: AdapterState, to: AdapterState },

    /// The controller ran out of routing table space.  Emitted once until cleared.
    RoutingTableFull,

    /// The preferred payment service was loaded or changed.
    PreferredPaymentChanged(PaymentChangeReason),

    /// An external RF field appeared.
    RfFieldOn,

    /// The external RF field went away.
    RfFieldOff,

    /// Repeated dispatch failures suggest the antenna is covered.
    AntennaBlocked,

    /// Secure NFC is on and the keyguard must be dismissed before tapping.
    RequireUnlock,

    /// Outcome of a SIM/SE slot switch requested through `select_uicc`.
    UiccSelected { slot: u8, status: UiccStatus },

    /// The service worker threads are running (carries the adapter state).
    Started(AdapterState),
}
