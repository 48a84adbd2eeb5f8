//! Application core: domain logic behind port traits.
//!
//! This module holds the service façade and its boundary: lifecycle,
//! discovery, routing and tag dispatch are orchestrated by
//! [`service::NfcService`].  All interaction with the controller and the
//! upper layers happens through **port traits** defined in [`ports`],
//! keeping this layer testable without real hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
