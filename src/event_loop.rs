//! Event loop handlers: routing, discovery and screen-state application.
//!
//! [`Core::handle_event`] is the single consumer of the event queue.  It
//! also owns [`Core::apply_routing`], the only path that reconfigures
//! discovery; the lifecycle worker calls it too, serialized by the
//! apply lock.

use log::{debug, error, info, warn};

use crate::app::events::AppEvent;
use crate::app::service::Core;
use crate::discovery::{DiscoveryParameters, ScreenState, plan};
use crate::events::Event;
use crate::lifecycle::AdapterState;
use crate::prefs::PrefKey;
use crate::routing::{NciVersion, RouteKind};

impl Core {
    pub(crate) fn handle_event(&self, event: Event) {
        debug!("event: {:?}", event);
        match event {
            Event::TagDiscovered(tag) => self.on_tag_discovered(tag),
            Event::TagLost(handle) => self.on_tag_lost(handle),
            Event::TagDebounce => self.on_tag_debounce(),

            Event::LinkActivated(peer) => self.on_link_activated(peer),
            Event::LinkDeactivated(peer) => self.on_link_deactivated(peer),
            Event::LinkFirstPacket => self.on_link_first_packet(),

            Event::RouteAid {
                aid,
                route,
                aid_info,
                power,
            } => {
                if !self.device.route_aid(&aid, route, aid_info, power) {
                    warn!("controller rejected AID route ({} bytes -> {})", aid.len(), route);
                }
            }
            Event::UnrouteAid(aid) => {
                if !self.device.unroute_aid(&aid) {
                    debug!("unroute of unknown AID ({} bytes)", aid.len());
                }
            }
            Event::RegisterT3tIdentifier(id) => {
                self.with_discovery_paused(|| self.device.register_t3t_identifier(&id));
            }
            Event::DeregisterT3tIdentifier(id) => {
                self.with_discovery_paused(|| self.device.deregister_t3t_identifier(&id));
            }
            Event::CommitRouting => self.commit_routing(),
            Event::ComputeRoutingParameters => self.compute_routing(),
            Event::ResetAndUpdateRoutingParameters => self.reset_and_update_routing(),
            Event::UpdateDefaultAidRoute(location) => {
                let overflow = self.routing.overflow_for(location);
                self.ctx.lock().overflow_route = overflow;
                debug!("overflow route now {:?}", overflow);
                self.reset_and_update_routing();
            }
            Event::RebuildAidTable => {
                if let Some(ce) = &self.card_emulation {
                    ce.on_routing_table_cleared();
                    self.device.clear_routing_entry(RouteKind::Aid);
                    ce.on_routing_table_changed();
                }
            }
            Event::RebuildRoutingTable => self.rebuild_routing_table(),

            Event::ApplyScreenState(screen) => self.apply_screen_state(screen),
            Event::ApplyRouting { force } => self.apply_routing(force),
            Event::PausePolling { timeout_ms } => self.pause_polling(timeout_ms),
            Event::ResumePolling => self.resume_polling(),
            Event::DelayPolling => self.on_delay_polling(),

            Event::RfFieldActivated => self.on_rf_field_activated(),
            Event::RfFieldDeactivated => self.emit(AppEvent::RfFieldOff),
            Event::PreferredPaymentChanged(reason) => {
                self.emit(AppEvent::PreferredPaymentChanged(reason));
            }

            Event::InitWiredSe => {
                if let Some(se) = &self.wired_se {
                    se.init();
                }
            }
            Event::DeinitWiredSe => {
                if let Some(se) = &self.wired_se {
                    se.deinit();
                }
            }
            Event::SelectUicc(slot) => self.select_uicc(slot),
            Event::SetNfcSecure(enable) => {
                self.device.set_nfc_secure(enable);
                info!("secure NFC {}", if enable { "on" } else { "off" });
                self.compute_routing();
            }
        }
    }

    // --- Discovery ---

    /// Planned parameters for the current context.
    pub(crate) fn planned_discovery(&self) -> DiscoveryParameters {
        let ctx = self.ctx.lock();
        plan(&ctx.plan_input(
            self.config.hce_capable,
            self.config.beam_capable,
            self.config.kovio_polling,
        ))
    }

    /// Bring discovery in line with the context.  Skips the controller
    /// when nothing changed unless `force` is set.
    pub(crate) fn apply_routing(&self, force: bool) {
        let (connected_tags, finish_provisioning) = {
            let mut ctx = self.ctx.lock();
            if ctx.nfc_state_check
                && !matches!(ctx.state, AdapterState::On | AdapterState::TurningOff)
            {
                debug!("apply routing skipped in state {}", ctx.state);
                return;
            }
            let finish = ctx.provisioning && ctx.provisioned;
            if finish {
                ctx.provisioning = false;
            }
            let tags = if ctx.screen_unlocked() {
                ctx.objects.tags()
            } else {
                Vec::new()
            };
            (tags, finish)
        };

        if finish_provisioning {
            info!("provisioning complete, leaving provisioning mode");
            self.dispatcher.disable_provisioning_mode();
        }

        // A pending resume only acts while polling is paused; tag loss re-applies.
        if connected_tags.iter().any(|t| t.is_present()) {
            debug!("tag connected, not updating discovery parameters");
            self.events
                .post_delayed(Event::ResumePolling, self.config.apply_routing_retry_ms);
            return;
        }

        let _serial = self.apply_lock.lock();
        let watchdog = self
            .watchdog
            .start("applyRouting", self.config.routing_watchdog_ms);

        let new = self.planned_discovery();
        let old = self.ctx.lock().discovery;
        if force || new != old {
            if new.should_enable_discovery() {
                debug!("enable discovery {:?}", new);
                self.device.enable_discovery(&new, old.should_enable_discovery());
            } else {
                debug!("disable discovery");
                self.device.disable_discovery();
            }
            self.ctx.lock().discovery = new;
        } else {
            debug!("discovery configuration unchanged");
        }

        watchdog.cancel();
    }

    fn pause_polling(&self, timeout_ms: u32) {
        {
            let _serial = self.apply_lock.lock();
            self.device.disable_discovery();
            let mut ctx = self.ctx.lock();
            ctx.polling_paused = true;
            ctx.discovery = DiscoveryParameters::off();
        }
        self.events.post_delayed(Event::ResumePolling, timeout_ms);
        info!("polling paused for {} ms", timeout_ms);
    }

    fn resume_polling(&self) {
        {
            let mut ctx = self.ctx.lock();
            if !ctx.polling_paused {
                debug!("resume polling: not paused");
                return;
            }
            ctx.polling_paused = false;
        }
        self.events
            .remove_matching(|e| matches!(e, Event::ResumePolling));
        info!("polling resumed");
        self.apply_routing(false);
    }

    /// Run `op` with discovery stopped, then restart it with fresh parameters.
    fn with_discovery_paused(&self, op: impl FnOnce()) {
        let _serial = self.apply_lock.lock();
        self.device.disable_discovery();
        op();
        self.restart_discovery();
    }

    /// Re-plan after discovery was stopped and start it again if the new
    /// plan needs it.  Caller holds the apply lock.
    fn restart_discovery(&self) {
        let new = self.planned_discovery();
        let restart = {
            let mut ctx = self.ctx.lock();
            let restart = ctx.discovery.should_enable_discovery();
            ctx.discovery = new;
            restart
        };
        if new.should_enable_discovery() {
            self.device.enable_discovery(&new, restart);
        }
    }

    fn apply_screen_state(&self, screen: ScreenState) {
        let (state, nci, previous, lockscreen_polling) = {
            let mut ctx = self.ctx.lock();
            ctx.screen = screen;
            ctx.polling_delayed = false;
            (
                ctx.state,
                ctx.nci_version,
                ctx.previous_screen,
                ctx.lockscreen_poll_mask.is_some(),
            )
        };
        self.events
            .remove_matching(|e| matches!(e, Event::DelayPolling));

        if matches!(state, AdapterState::Off | AdapterState::TurningOff) {
            debug!("screen {:?} recorded while adapter {}", screen, state);
            return;
        }

        self.routing_wake_lock.acquire();
        if nci == NciVersion::V1_0 {
            if previous != Some(screen) {
                let _serial = self.apply_lock.lock();
                self.device.disable_discovery();
                self.device.set_screen_state(screen.bits());
                self.ctx.lock().previous_screen = Some(screen);
                self.restart_discovery();
            }
        } else {
            if screen == ScreenState::OnUnlocked {
                self.apply_routing(false);
                self.ctx.lock().require_unlock_shown = false;
            }
            if lockscreen_polling {
                self.apply_routing(false);
            }
            self.device
                .set_screen_state(screen.device_mask(lockscreen_polling));
            self.ctx.lock().previous_screen = Some(screen);
        }
        self.routing_wake_lock.release();
    }

    // --- Routing ---

    fn routing_session(&self) -> (NciVersion, Option<u32>) {
        let ctx = self.ctx.lock();
        (ctx.nci_version, ctx.overflow_route)
    }

    fn commit_routing(&self) {
        let overflow = self.ctx.lock().overflow_route;
        let result = self.routing.commit(overflow);
        if let Err(e) = &result {
            error!("{}", e);
        }
        self.ctx.lock().last_commit_ok = result.is_ok();
    }

    fn compute_routing(&self) {
        let (nci, overflow) = self.routing_session();
        if !self.routing.compute_and_set(nci, overflow) {
            warn!("routing: compute left some entries unset");
        }
        self.retry_failed_commit();
    }

    fn reset_and_update_routing(&self) {
        let (nci, overflow) = self.routing_session();
        if !self.routing.reset_and_update(nci, overflow) {
            warn!("routing: reset left some entries unset");
        }
        self.retry_failed_commit();
    }

    fn retry_failed_commit(&self) {
        if !self.ctx.lock().last_commit_ok {
            info!("routing: retrying failed commit");
            self.commit_routing();
        }
    }

    fn rebuild_routing_table(&self) {
        let Some(ce) = &self.card_emulation else {
            self.apply_routing(false);
            return;
        };
        ce.on_routing_table_cleared();
        self.device.clear_routing_entry(RouteKind::Aid);
        self.device.clear_routing_entry(RouteKind::Tech);
        self.device.clear_routing_entry(RouteKind::Protocol);
        let (nci, overflow) = self.routing_session();
        if !self.routing.compute_and_set(nci, overflow) {
            warn!("routing: rebuild left some entries unset");
        }
        ce.on_nfc_enabled();
        self.retry_failed_commit();
    }

    fn select_uicc(&self, slot: u8) {
        if !self.ctx.lock().is_enabled() {
            warn!("select UICC slot {}: adapter turned off, dropping", slot);
            return;
        }
        let status = self.device.select_uicc(slot);
        info!("select UICC slot {}: {:?}", slot, status);
        if status.is_selected() {
            if let Err(e) = self.prefs.set_u32(PrefKey::UiccSlot, u32::from(slot)) {
                warn!("UICC slot {} not persisted: {}", slot, e);
            }
        }
        self.emit(AppEvent::UiccSelected { slot, status });
        self.rebuild_routing_table();
    }

    // --- RF field ---

    fn on_rf_field_activated(&self) {
        self.emit(AppEvent::RfFieldOn);
        let require_unlock = {
            let mut ctx = self.ctx.lock();
            let show = !ctx.require_unlock_shown && ctx.secure_nfc && ctx.screen_locked();
            if show {
                ctx.require_unlock_shown = true;
            }
            show
        };
        if require_unlock {
            self.emit(AppEvent::RequireUnlock);
        }
    }
}
