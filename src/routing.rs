//! Listen-mode routing: where contactless transactions are delivered.
//!
//! The controller keeps three kinds of entries (technology, protocol, AID).
//! Each entry carries a destination location and a power-state mask packed
//! into a single integer:
//!
//! ```text
//!   bits 10..8   location   0 = host, 1 = eSE, 2 = UICC, 3 = UICC2
//!   bit  5       screen on, unlocked
//!   bit  4       screen on, locked
//!   bit  3       screen off
//!   bit  2       no power (battery off)
//!   bit  1       low power (phone off)
//!   bit  0       full power (phone on)
//! ```
//!
//! [`RoutingCoordinator`] turns persisted category overrides and
//! hardware-reported defaults into [`RouteEntry`] batches and pushes them
//! to the [`DevicePort`].  All of its mutating entry points run on the
//! event loop, so a clear can never interleave with a commit.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::ports::{DevicePort, HardwareRouteDefaults};
use crate::error::{NfcError, Result};
use crate::prefs::{PrefKey, Prefs};

/// Shift of the location field inside an encoded entry.
pub const ROUTE_LOC_SHIFT: u32 = 8;

// ---------------------------------------------------------------------------
// Listen protocol / technology selectors
// ---------------------------------------------------------------------------

pub const PROTO_ISO_DEP: u8 = 0x01;
pub const PROTO_NFC_DEP: u8 = 0x02;
pub const PROTO_T3T: u8 = 0x04;
pub const PROTO_ISO7816: u8 = 0x20;

pub const TECH_A: u8 = 0x01;
pub const TECH_B: u8 = 0x02;
pub const TECH_F: u8 = 0x04;

// ---------------------------------------------------------------------------
// NCI version
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NciVersion {
    V1_0,
    #[default]
    V2_0,
}

impl NciVersion {
    /// Controllers reporting anything other than 1.0 are treated as 2.0.
    pub const fn from_byte(raw: u8) -> Self {
        if raw == 0x10 { Self::V1_0 } else { Self::V2_0 }
    }

    /// Power bits kept from the hardware default when `full` is requested.
    pub const fn power_mask(self) -> u32 {
        match self {
            Self::V1_0 => 0x1F,
            Self::V2_0 => 0x39,
        }
    }

    /// Mask applied to host-destined entries: the host cannot serve power-off,
    /// battery-off or screen-off transactions.
    pub const fn host_mask(self) -> u32 {
        match self {
            Self::V1_0 => 0xE9,
            Self::V2_0 => 0x11,
        }
    }
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Execution environment as named by applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Destination {
    Host = 0,
    Ese = 1,
    Uicc = 2,
    Uicc2 = 4,
}

impl Destination {
    pub const fn from_app_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Host),
            1 => Some(Self::Ese),
            2 => Some(Self::Uicc),
            4 => Some(Self::Uicc2),
            _ => None,
        }
    }

    /// Hardware location field for this destination.
    pub const fn location(self) -> u8 {
        match self {
            Self::Uicc2 => 3,
            Self::Uicc => 2,
            Self::Ese => 1,
            Self::Host => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RouteKind {
    Tech = 1,
    Protocol = 2,
    Aid = 4,
}

/// One row of the controller routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub kind: RouteKind,
    pub selector: u8,
    pub location: u8,
    pub power: u8,
}

impl RouteEntry {
    /// Build an entry from an encoded route value.
    pub fn from_encoded(kind: RouteKind, selector: u8, encoded: u32) -> Self {
        Self {
            kind,
            selector,
            location: decode_location(encoded),
            power: decode_power(encoded),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Pack a destination and requested power states into a route value.
///
/// `default_power` is the hardware-reported power mask for the category;
/// its screen bits survive only when `full` is requested.  `host_masked`
/// categories drop power-off/battery-off/screen-off bits for the host.
pub fn encode_route(
    dest: Destination,
    full: bool,
    low: bool,
    none: bool,
    default_power: u8,
    version: NciVersion,
    host_masked: bool,
) -> u32 {
    let mut entry = u32::from(dest.location()) << ROUTE_LOC_SHIFT;
    if full {
        entry |= (u32::from(default_power) & version.power_mask()) | 0x01;
    }
    if low {
        entry |= 0x02;
    }
    if none {
        entry |= 0x04;
    }
    if host_masked && dest == Destination::Host {
        entry &= version.host_mask();
    }
    entry
}

/// Pack a hardware-reported (location, power) pair.
pub fn encode_hardware_default(location: u8, power: u8, host_masked: bool) -> u32 {
    let mut entry = (u32::from(power) & 0x3F) | (u32::from(location) << ROUTE_LOC_SHIFT);
    if host_masked && location == 0 {
        entry &= 0xF9;
    }
    entry
}

pub const fn decode_location(entry: u32) -> u8 {
    ((entry >> ROUTE_LOC_SHIFT) & 0x07) as u8
}

pub const fn decode_power(entry: u32) -> u8 {
    (entry & 0x3F) as u8
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Routing categories an application may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteCategory {
    DefaultAid,
    Desfire,
    MifareClt,
    Felica,
}

impl RouteCategory {
    pub const fn pref_key(self) -> PrefKey {
        match self {
            Self::DefaultAid => PrefKey::DefaultRoute,
            Self::Desfire => PrefKey::DesfireRoute,
            Self::MifareClt => PrefKey::MifareCltRoute,
            Self::Felica => PrefKey::FelicaRoute,
        }
    }

    /// ISO-DEP based categories cannot be served by the host in low-power states.
    pub const fn host_masked(self) -> bool {
        matches!(self, Self::DefaultAid | Self::Desfire)
    }

    /// Hardware (location, power) reported for this category.
    pub const fn hardware_default(self, hw: &HardwareRouteDefaults) -> (u8, u8) {
        match self {
            Self::DefaultAid => (hw.aid_route, hw.aid_power),
            Self::Desfire => (hw.desfire_route, hw.desfire_power),
            Self::MifareClt => (hw.mifare_clt_route, hw.mifare_clt_power),
            Self::Felica => (hw.felica_route, hw.felica_power),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Computes and commits routing entries.
///
/// Session state (overflow route, NCI version, last commit result) lives in
/// the service context and is passed in; persisted overrides are read
/// through [`Prefs`].  Hardware defaults come from the controller's static
/// configuration and are read once, at construction.
pub struct RoutingCoordinator {
    device: Arc<dyn DevicePort>,
    prefs: Prefs,
    defaults: HardwareRouteDefaults,
}

impl RoutingCoordinator {
    pub fn new(device: Arc<dyn DevicePort>, prefs: Prefs) -> Self {
        let defaults = device.default_routes();
        debug!("routing: hardware defaults {:?}", defaults);
        Self {
            device,
            prefs,
            defaults,
        }
    }

    /// Encoded route for `category`: persisted override, else hardware default.
    pub fn category_route(&self, category: RouteCategory) -> u32 {
        if let Some(route) = self.prefs.get_u32(category.pref_key()) {
            return route;
        }
        let (location, power) = category.hardware_default(&self.defaults);
        encode_hardware_default(location, power, category.host_masked())
    }

    /// Default AID route with the session overflow taking precedence.
    pub fn configured_default_route(&self, overflow: Option<u32>) -> u32 {
        overflow.unwrap_or_else(|| self.category_route(RouteCategory::DefaultAid))
    }

    /// Overflow value for a request to move the default AID route to `location`.
    /// `None` means the request matches the configured default.
    pub fn overflow_for(&self, location: u8) -> Option<u32> {
        let current = self.category_route(RouteCategory::DefaultAid) >> ROUTE_LOC_SHIFT;
        if u32::from(location) == current {
            return None;
        }
        Some(encode_hardware_default(location, self.defaults.aid_power, true))
    }

    /// Entries implied by the current configuration.
    pub fn compute_entries(&self, version: NciVersion, overflow: Option<u32>) -> Vec<RouteEntry> {
        let proto_route = self.category_route(RouteCategory::Desfire);
        let default_route = self.configured_default_route(overflow);
        let clt_route = self.category_route(RouteCategory::MifareClt);
        let felica_route = self.category_route(RouteCategory::Felica);

        let mut entries = Vec::with_capacity(5);
        if version == NciVersion::V1_0 {
            entries.push(RouteEntry::from_encoded(
                RouteKind::Protocol,
                PROTO_ISO7816,
                default_route,
            ));
            entries.push(RouteEntry {
                kind: RouteKind::Protocol,
                selector: PROTO_T3T,
                location: 0,
                power: 0x01,
            });
        }
        entries.push(RouteEntry::from_encoded(
            RouteKind::Protocol,
            PROTO_ISO_DEP,
            proto_route,
        ));

        if clt_route == felica_route {
            entries.push(RouteEntry::from_encoded(
                RouteKind::Tech,
                TECH_A | TECH_B | TECH_F,
                clt_route,
            ));
        } else {
            entries.push(RouteEntry::from_encoded(
                RouteKind::Tech,
                TECH_A | TECH_B,
                clt_route,
            ));
            entries.push(RouteEntry::from_encoded(RouteKind::Tech, TECH_F, felica_route));
        }
        entries
    }

    /// Push the computed entries.  Returns `false` if the controller refused any.
    pub fn compute_and_set(&self, version: NciVersion, overflow: Option<u32>) -> bool {
        let mut all_ok = true;
        for entry in self.compute_entries(version, overflow) {
            debug!(
                "routing: set {:?} sel={:#04x} loc={} power={:#04x}",
                entry.kind, entry.selector, entry.location, entry.power
            );
            if !self
                .device
                .set_routing_entry(entry.kind, entry.selector, entry.location, entry.power)
            {
                warn!("routing: controller rejected {:?} entry {:#04x}", entry.kind, entry.selector);
                all_ok = false;
            }
        }
        all_ok
    }

    /// Drop TECH and PROTOCOL entries, then recompute them.
    pub fn reset_and_update(&self, version: NciVersion, overflow: Option<u32>) -> bool {
        self.device.clear_routing_entry(RouteKind::Tech);
        self.device.clear_routing_entry(RouteKind::Protocol);
        self.compute_and_set(version, overflow)
    }

    /// Two-step commit: set the empty-AID route, then commit the table.
    pub fn commit(&self, overflow: Option<u32>) -> Result<()> {
        let default_route = self.configured_default_route(overflow);
        info!("routing: commit (default route {:#06x})", default_route);
        self.device.set_empty_aid_route(default_route);
        if self.device.commit_routing() {
            Ok(())
        } else {
            Err(NfcError::RoutingCommitFailure)
        }
    }

    /// Encode a category override as it would be persisted.
    pub fn encode_category(
        &self,
        category: RouteCategory,
        dest: Destination,
        full: bool,
        low: bool,
        none: bool,
        version: NciVersion,
    ) -> Result<u32> {
        if dest == Destination::Uicc2 {
            return Err(NfcError::InvalidArgument("UICC2 is not supported"));
        }
        let (_, default_power) = category.hardware_default(&self.defaults);
        Ok(encode_route(
            dest,
            full,
            low,
            none,
            default_power,
            version,
            category.host_masked(),
        ))
    }

    /// Persist a category override.  Returns whether the stored value changed.
    pub fn store_category(&self, category: RouteCategory, entry: u32) -> Result<bool> {
        let previous = self.category_route(category);
        self.prefs.set_u32(category.pref_key(), entry)?;
        info!("routing: {:?} route set to {:#06x}", category, entry);
        Ok(previous != entry)
    }
}
