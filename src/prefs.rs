//! Typed preference accessors over [`StoragePort`].
//!
//! All keys live in the `nfc` namespace.  Booleans are stored as a single
//! byte, integers as 4 little-endian bytes.  Read failures fall back to the
//! caller's default and are logged; write failures propagate.

use std::sync::Arc;

use log::warn;

use crate::app::ports::{StorageError, StoragePort};

pub const PREFS_NAMESPACE: &str = "nfc";

/// Every persisted preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    NfcOn,
    SecureNfcOn,
    FirstBoot,
    DefaultRoute,
    DesfireRoute,
    MifareCltRoute,
    FelicaRoute,
    UiccSlot,
    AntennaBlockedShown,
    RoutingTableFull,
}

impl PrefKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NfcOn => "nfc_on",
            Self::SecureNfcOn => "secure_nfc_on",
            Self::FirstBoot => "first_boot",
            Self::DefaultRoute => "default_route",
            Self::DesfireRoute => "desfire_route",
            Self::MifareCltRoute => "mifare_clt_route",
            Self::FelicaRoute => "felica_route",
            Self::UiccSlot => "uicc_slot",
            Self::AntennaBlockedShown => "antenna_blocked_shown",
            Self::RoutingTableFull => "routing_table_full",
        }
    }
}

/// Cheap-to-clone handle onto the preference store.
#[derive(Clone)]
pub struct Prefs {
    storage: Arc<dyn StoragePort>,
}

impl Prefs {
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self { storage }
    }

    pub fn get_bool(&self, key: PrefKey, default: bool) -> bool {
        let mut buf = [0u8; 1];
        match self.storage.read(PREFS_NAMESPACE, key.as_str(), &mut buf) {
            Ok(1) => buf[0] != 0,
            Ok(_) => {
                warn!("prefs: {} has unexpected length, using default", key.as_str());
                default
            }
            Err(StorageError::NotFound) => default,
            Err(e) => {
                warn!("prefs: read {} failed: {}", key.as_str(), e);
                default
            }
        }
    }

    pub fn set_bool(&self, key: PrefKey, value: bool) -> Result<(), StorageError> {
        self.storage
            .write(PREFS_NAMESPACE, key.as_str(), &[u8::from(value)])
    }

    /// `None` when the key was never written.
    pub fn get_u32(&self, key: PrefKey) -> Option<u32> {
        let mut buf = [0u8; 4];
        match self.storage.read(PREFS_NAMESPACE, key.as_str(), &mut buf) {
            Ok(4) => Some(u32::from_le_bytes(buf)),
            Ok(_) => {
                warn!("prefs: {} has unexpected length, ignoring", key.as_str());
                None
            }
            Err(StorageError::NotFound) => None,
            Err(e) => {
                warn!("prefs: read {} failed: {}", key.as_str(), e);
                None
            }
        }
    }

    pub fn set_u32(&self, key: PrefKey, value: u32) -> Result<(), StorageError> {
        self.storage
            .write(PREFS_NAMESPACE, key.as_str(), &value.to_le_bytes())
    }

    pub fn remove(&self, key: PrefKey) -> Result<(), StorageError> {
        self.storage.delete(PREFS_NAMESPACE, key.as_str())
    }

    pub fn contains(&self, key: PrefKey) -> bool {
        self.storage.exists(PREFS_NAMESPACE, key.as_str())
    }

    pub fn storage(&self) -> &Arc<dyn StoragePort> {
        &self.storage
    }
}
