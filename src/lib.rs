//! nfcd library.
//!
//! NFC controller service core: adapter lifecycle, discovery planning,
//! routing table management, tag/peer dispatch and hang watchdogs.  The
//! controller and every upper layer sit behind port traits in
//! [`app::ports`]; [`adapters`] holds the in-memory implementations used
//! by the simulation daemon and the test suite.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod prefs;
pub mod routing;
pub mod watchdog;

mod context;
mod dispatch;
mod event_loop;

pub use app::service::{Caller, NfcService, ServicePorts};
pub use dispatch::TECH_NFC_BARCODE;
pub use error::{NfcError, Result};
pub use lifecycle::AdapterState;
