//! Unified error types for the NFC service.
//!
//! Every fallible façade operation funnels into [`NfcError`].  Lifecycle and
//! hardware failures are normally absorbed by the service (logged, reflected
//! in adapter state, reported through the event sink); only boundary
//! validation failures reach callers.

use thiserror::Error;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level service error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NfcError {
    /// `initialize()` returned false. The adapter is back in OFF.
    #[error("hardware init failed: {0}")]
    HardwareInitFailure(&'static str),

    /// A bounded hardware operation overran its watchdog.
    #[error("hardware hang during {0}")]
    HardwareHang(String),

    /// The controller rejected a routing commit. Retried on the next recompute.
    #[error("routing commit failed")]
    RoutingCommitFailure,

    /// NDEF detection failed and the one reconnect attempt failed too.
    #[error("tag read failed (handle {0})")]
    TagReadFailure(u32),

    /// No consumer accepted a detected tag.
    #[error("tag dispatch failed (handle {0})")]
    DispatchFailure(u32),

    /// The caller is not allowed to make this request in the current state.
    #[error("rejected: {0}")]
    InvalidCallerState(&'static str),

    /// A request parameter is outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<StorageError> for NfcError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<ConfigError> for NfcError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl NfcError {
    /// Fatal errors end the process; everything else is recoverable in place.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::HardwareHang(_))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Service-wide `Result` alias.
pub type Result<T> = core::result::Result<T, NfcError>;
