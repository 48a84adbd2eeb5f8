//! Tag and peer handling on the event loop.
//!
//! ```text
//!   TagDiscovered ──▶ fast path? ──yes──────────────────────────┐
//!                       │ no                                    │
//!                       ▼                                       │
//!                  read NDEF ── error ──▶ reconnect ── fail ──▶ drop
//!                       │                     │ ok (no NDEF)    │
//!                       ▼                     ▼                 │
//!                  debounce match? ──yes──▶ extend window, drop │
//!                       │ no                                    │
//!                       ▼                                       ▼
//!                  presence checking ──────────────────▶ dispatch
//! ```
//!
//! Every tag or peer handed upward is registered in the [`LiveObjectTable`]
//! until it is lost, deactivated or the adapter turns off.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{
    CallbackError, DispatchResult, NdefMessage, PeerEndpoint, PeerMode, Sound, TagEndpoint,
    TagRemovedCallback,
};
use crate::app::service::Core;
use crate::discovery::{ReaderModeParams, ScreenState};
use crate::error::NfcError;
use crate::events::Event;
use crate::prefs::PrefKey;

/// Technology id reported by barcode (Kovio) tags, which carry no NDEF.
pub const TECH_NFC_BARCODE: u32 = 10;

// ---------------------------------------------------------------------------
// Live objects
// ---------------------------------------------------------------------------

/// A tag or peer currently handed to the upper layers.
#[derive(Clone)]
pub enum LiveObject {
    Tag(Arc<dyn TagEndpoint>),
    Peer(Arc<dyn PeerEndpoint>),
}

impl LiveObject {
    pub fn handle(&self) -> u32 {
        match self {
            Self::Tag(tag) => tag.handle(),
            Self::Peer(peer) => peer.handle(),
        }
    }

    /// Disconnect on adapter shutdown.  Peers are only torn down from the target side.
    pub fn disconnect_for_shutdown(&self) {
        match self {
            Self::Tag(tag) => {
                tag.disconnect();
            }
            Self::Peer(peer) if peer.mode() == PeerMode::Target => {
                peer.disconnect();
            }
            Self::Peer(_) => {}
        }
    }
}

/// Handle-keyed registry of live objects.  At most one entry per handle.
#[derive(Default)]
pub struct LiveObjectTable {
    objects: HashMap<u32, LiveObject>,
}

impl LiveObjectTable {
    /// Register `object`.  Returns `false` (and keeps the existing entry)
    /// when the handle is already registered.
    pub fn register(&mut self, object: LiveObject) -> bool {
        match self.objects.entry(object.handle()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(object);
                true
            }
        }
    }

    pub fn unregister(&mut self, handle: u32) -> Option<LiveObject> {
        self.objects.remove(&handle)
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.objects.contains_key(&handle)
    }

    pub fn tag(&self, handle: u32) -> Option<Arc<dyn TagEndpoint>> {
        match self.objects.get(&handle) {
            Some(LiveObject::Tag(tag)) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn tags(&self) -> Vec<Arc<dyn TagEndpoint>> {
        self.objects
            .values()
            .filter_map(|o| match o {
                LiveObject::Tag(tag) => Some(tag.clone()),
                LiveObject::Peer(_) => None,
            })
            .collect()
    }

    /// Remove everything.  Used on the transition to OFF.
    pub fn drain(&mut self) -> Vec<LiveObject> {
        self.objects.drain().map(|(_, o)| o).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

/// A tag the caller asked to ignore until it has been away for `debounce_ms`.
#[derive(Clone)]
pub struct DebounceState {
    pub uid: Vec<u8>,
    pub debounce_ms: u32,
    pub handle: u32,
    pub callback: Option<Arc<dyn TagRemovedCallback>>,
}

// ---------------------------------------------------------------------------
// Event loop handlers
// ---------------------------------------------------------------------------

impl Core {
    pub(crate) fn on_tag_discovered(&self, tag: Arc<dyn TagEndpoint>) {
        let (enabled, reader) = {
            let ctx = self.ctx.lock();
            (ctx.is_enabled(), ctx.reader_mode.clone())
        };
        if !enabled {
            debug!("tag {}: reported while adapter is off, dropping", tag.handle());
            tag.disconnect();
            return;
        }
        let presence_delay = reader
            .as_ref()
            .map_or(self.config.presence_check_delay_ms, |r| r.presence_check_delay_ms);

        let skip_ndef = reader.as_ref().is_some_and(ReaderModeParams::skips_ndef_check);
        if skip_ndef || tag.connected_technology() == TECH_NFC_BARCODE {
            debug!("tag {}: skipping NDEF check", tag.handle());
            self.start_presence_checking(&tag, presence_delay);
            self.dispatch_tag(tag, reader.as_ref(), None);
            return;
        }

        let ndef = match tag.find_and_read_ndef() {
            Ok(ndef) => ndef,
            Err(e) => {
                if !tag.reconnect() {
                    tag.disconnect();
                    warn!("{} ({})", NfcError::TagReadFailure(tag.handle()), e);
                    return;
                }
                debug!("tag {}: reconnected after {}, no NDEF", tag.handle(), e);
                None
            }
        };

        if self.debounce_swallows(tag.as_ref(), ndef.as_ref()) {
            return;
        }

        self.ctx.lock().last_read_ndef = ndef.clone();
        self.start_presence_checking(&tag, presence_delay);
        self.dispatch_tag(tag, reader.as_ref(), ndef);
    }

    /// Returns `true` when the tag belongs to the active debounce window.
    /// A different tag ends the window early and fires its callback.
    fn debounce_swallows(&self, tag: &dyn TagEndpoint, ndef: Option<&NdefMessage>) -> bool {
        let mut ctx = self.ctx.lock();
        let Some(debounce) = ctx.debounce.as_ref() else {
            return false;
        };
        let same_ndef = ndef.is_some() && ndef == ctx.last_read_ndef.as_ref();
        if debounce.uid == tag.uid() || same_ndef {
            let window = debounce.debounce_ms;
            drop(ctx);
            self.events.remove_matching(|e| matches!(e, Event::TagDebounce));
            self.events.post_delayed(Event::TagDebounce, window);
            tag.disconnect();
            debug!("tag {}: ignored, debounce extended by {} ms", tag.handle(), window);
            return true;
        }

        let callback = ctx.debounce.take().and_then(|d| d.callback);
        drop(ctx);
        self.events.remove_matching(|e| matches!(e, Event::TagDebounce));
        if let Some(cb) = callback {
            cb.on_tag_removed();
        }
        false
    }

    fn start_presence_checking(&self, tag: &Arc<dyn TagEndpoint>, delay_ms: u32) {
        let events = self.events.clone();
        tag.start_presence_checking(
            delay_ms,
            Box::new(move |handle| {
                events.post(Event::TagLost(handle));
            }),
        );
    }

    fn dispatch_tag(
        &self,
        tag: Arc<dyn TagEndpoint>,
        reader: Option<&ReaderModeParams>,
        ndef: Option<NdefMessage>,
    ) {
        let handle = tag.handle();
        let unlocked = {
            let mut ctx = self.ctx.lock();
            if ctx.is_enabled() {
                if !ctx.objects.register(LiveObject::Tag(tag.clone())) {
                    warn!("tag {}: handle already registered", handle);
                }
                Some(ctx.screen_unlocked())
            } else {
                None
            }
        };
        // The adapter may have turned off while the NDEF read blocked.
        let Some(unlocked) = unlocked else {
            debug!("tag {}: adapter left ON during read, dropping", handle);
            tag.disconnect();
            return;
        };

        if let Some(reader) = reader {
            if reader.platform_sounds() {
                self.feedback.vibrate();
                self.feedback.play_sound(Sound::End);
            }
            if let Some(callback) = &reader.callback {
                if unlocked {
                    self.feedback.user_activity();
                }
                match callback.on_tag_discovered(tag.as_ref()) {
                    Ok(()) => return,
                    Err(CallbackError::RemoteDied) => {
                        warn!("reader callback gone, falling back to dispatch");
                    }
                    Err(e) => {
                        warn!("reader callback failed: {}", e);
                        return;
                    }
                }
            }
        }

        match self.dispatcher.dispatch_tag(tag.as_ref(), ndef.as_ref()) {
            DispatchResult::Success => {
                self.ctx.lock().dispatch_failures = 0;
                if unlocked {
                    self.feedback.user_activity();
                }
                self.feedback.vibrate();
                self.feedback.play_sound(Sound::End);
            }
            DispatchResult::Failure => {
                if self.ctx.lock().provisioning {
                    debug!("tag {}: not dispatched during provisioning", handle);
                } else {
                    self.on_dispatch_failed(tag.as_ref(), unlocked);
                }
            }
        }
    }

    fn on_dispatch_failed(&self, tag: &dyn TagEndpoint, unlocked: bool) {
        let handle = tag.handle();
        info!("{}", NfcError::DispatchFailure(handle));
        self.ctx.lock().objects.unregister(handle);

        if let Some(delay) = self.config.poll_delay_ms {
            tag.stop_presence_checking();
            let already_delayed = {
                let mut ctx = self.ctx.lock();
                std::mem::replace(&mut ctx.polling_delayed, true)
            };
            if !already_delayed {
                self.device.start_stop_polling(false);
                self.events.post_delayed(Event::DelayPolling, delay);
                debug!("polling paused for {} ms after failed dispatch", delay);
            }
        }

        if unlocked && self.config.notify_dispatch_failed {
            self.feedback.play_sound(Sound::Error);
        }

        let alert = {
            let mut ctx = self.ctx.lock();
            if ctx.antenna_blocked_shown || !self.config.antenna_blocked_alert {
                false
            } else {
                ctx.dispatch_failures += 1;
                if ctx.dispatch_failures > self.config.max_dispatch_failures {
                    ctx.dispatch_failures = 0;
                    ctx.antenna_blocked_shown = true;
                    true
                } else {
                    false
                }
            }
        };
        if alert {
            if let Err(e) = self.prefs.set_bool(PrefKey::AntennaBlockedShown, true) {
                warn!("antenna alert flag not persisted: {}", e);
            }
            self.emit(AppEvent::AntennaBlocked);
        }
    }

    pub(crate) fn on_tag_lost(&self, handle: u32) {
        let reapply = {
            let mut ctx = self.ctx.lock();
            if ctx.objects.unregister(handle).is_none() {
                debug!("tag {}: lost after unregistration", handle);
            }
            ctx.screen > ScreenState::OnLocked
        };
        if reapply {
            self.apply_routing(false);
        }
    }

    pub(crate) fn on_tag_debounce(&self) {
        let callback = self.ctx.lock().debounce.take().and_then(|d| d.callback);
        debug!("debounce window closed");
        if let Some(cb) = callback {
            cb.on_tag_removed();
        }
    }

    /// Stop reporting `handle` until it has been absent for `debounce_ms`.
    pub(crate) fn ignore(
        &self,
        handle: u32,
        debounce_ms: u32,
        callback: Option<Arc<dyn TagRemovedCallback>>,
    ) -> bool {
        let mut ctx = self.ctx.lock();
        if debounce_ms == 0 && ctx.debounce.as_ref().is_some_and(|d| d.handle == handle) {
            drop(ctx);
            self.events.remove_matching(|e| matches!(e, Event::TagDebounce));
            self.events.post(Event::TagDebounce);
            return true;
        }

        let Some(tag) = ctx.objects.tag(handle) else {
            return false;
        };
        ctx.objects.unregister(handle);
        let uid = tag.uid();
        ctx.debounce = Some(DebounceState {
            uid,
            debounce_ms,
            handle,
            callback,
        });
        drop(ctx);

        tag.disconnect();
        self.events.remove_matching(|e| matches!(e, Event::TagDebounce));
        self.events.post_delayed(Event::TagDebounce, debounce_ms);
        info!("tag {}: ignored for {} ms", handle, debounce_ms);
        true
    }

    pub(crate) fn on_delay_polling(&self) {
        let restart = {
            let mut ctx = self.ctx.lock();
            std::mem::replace(&mut ctx.polling_delayed, false)
        };
        if restart {
            debug!("restarting polling after dispatch backoff");
            self.device.start_stop_polling(true);
        }
    }

    // --- Peers ---

    pub(crate) fn on_link_activated(&self, peer: Arc<dyn PeerEndpoint>) {
        self.feedback.user_activity();
        let handle = peer.handle();

        if peer.mode() == PeerMode::Target && !peer.connect() {
            warn!("peer {}: connect failed", handle);
            return;
        }
        if !(self.device.check_llcp() && self.device.activate_llcp()) {
            warn!("peer {}: LLCP activation failed", handle);
            if peer.mode() == PeerMode::Target {
                peer.disconnect();
            }
            return;
        }

        let registered = {
            let mut ctx = self.ctx.lock();
            if ctx.is_enabled() {
                if !ctx.objects.register(LiveObject::Peer(peer.clone())) {
                    warn!("peer {}: handle already registered", handle);
                }
                true
            } else {
                false
            }
        };
        if !registered {
            debug!("peer {}: adapter left ON during activation, dropping", handle);
            LiveObject::Peer(peer).disconnect_for_shutdown();
            return;
        }
        info!("peer {}: LLCP link up ({:?})", handle, peer.mode());
        if let Some(p2p) = &self.p2p {
            p2p.on_llcp_activated(peer.llcp_version());
        }
    }

    pub(crate) fn on_link_deactivated(&self, peer: Arc<dyn PeerEndpoint>) {
        let handle = peer.handle();
        let removed = self.ctx.lock().objects.unregister(handle).is_some();
        if removed && peer.mode() == PeerMode::Target {
            peer.disconnect();
        }
        info!("peer {}: LLCP link down", handle);
        if let Some(p2p) = &self.p2p {
            p2p.on_llcp_deactivated();
        }
    }

    pub(crate) fn on_link_first_packet(&self) {
        if let Some(p2p) = &self.p2p {
            p2p.on_llcp_first_packet();
        }
    }
}
