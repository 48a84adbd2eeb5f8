//! Adapter lifecycle: boot, enable, disable.
//!
//! ```text
//!           enable                init ok
//!   ┌─────┐ ───────▶ ┌───────────┐ ───────▶ ┌────┐
//!   │ Off │          │ TurningOn │          │ On │
//!   └─────┘ ◀─────── └───────────┘          └────┘
//!      ▲     init fail                         │ disable
//!      │                                       ▼
//!      │             deinit done        ┌────────────┐
//!      └─────────────────────────────── │ TurningOff │
//!                                       └────────────┘
//! ```
//!
//! Tasks run one at a time on the lifecycle worker.  An enable while
//! turning off (or a disable while turning on) is rejected; repeated
//! requests in the target direction are no-ops.

use std::fmt;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::events::AppEvent;
use crate::app::service::Core;
use crate::discovery::DiscoveryParameters;
use crate::error::{NfcError, Result};
use crate::events::{Event, PaymentChangeReason};
use crate::prefs::PrefKey;
use crate::routing::NciVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::TurningOn => "turning_on",
            Self::On => "on",
            Self::TurningOff => "turning_off",
        };
        f.write_str(name)
    }
}

/// Work items for the lifecycle worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTask {
    Enable,
    Disable { save_state: bool },
    Boot,
}

impl Core {
    pub(crate) fn run_lifecycle_task(&self, task: LifecycleTask) {
        let result = match task {
            LifecycleTask::Enable => self.enable_internal(),
            LifecycleTask::Disable { .. } => self.disable_internal(),
            LifecycleTask::Boot => self.boot_internal(),
        };
        if let Err(e) = result {
            warn!("lifecycle {:?}: {}", task, e);
        }
    }

    pub(crate) fn set_state(&self, to: AdapterState) {
        let from = {
            let mut ctx = self.ctx.lock();
            std::mem::replace(&mut ctx.state, to)
        };
        if from != to {
            info!("adapter state {} -> {}", from, to);
            self.emit(AppEvent::AdapterStateChanged { from, to });
        }
    }

    fn boot_internal(&self) -> Result<()> {
        if self.prefs.get_bool(PrefKey::FirstBoot, true) {
            info!("first boot: factory reset");
            self.prefs.set_bool(PrefKey::FirstBoot, false)?;
            self.device.factory_reset();
        }

        if self.prefs.get_bool(PrefKey::NfcOn, self.config.nfc_on_default) {
            info!("boot: NFC was on, enabling");
            self.enable_internal()
        } else {
            info!("boot: NFC off, checking firmware");
            if !self.device.check_firmware() {
                warn!("boot: firmware check failed");
            }
            Ok(())
        }
    }

    fn enable_internal(&self) -> Result<()> {
        match self.ctx.lock().state {
            AdapterState::On | AdapterState::TurningOn => return Ok(()),
            AdapterState::TurningOff => {
                return Err(NfcError::InvalidCallerState("adapter is turning off"));
            }
            AdapterState::Off => {}
        }
        self.set_state(AdapterState::TurningOn);

        let watchdog = self.watchdog.start("enable", self.config.init_watchdog_ms);
        self.routing_wake_lock.acquire();
        let initialized = self.device.initialize();
        self.routing_wake_lock.release();
        watchdog.cancel();

        if !initialized {
            error!("controller initialization failed");
            self.set_state(AdapterState::Off);
            return Err(NfcError::HardwareInitFailure("initialize"));
        }

        let secure = self.ctx.lock().secure_nfc;
        self.device.set_nfc_secure(secure);

        if let Some(coex) = &self.coexistence {
            if coex.should_enable() {
                coex.enable();
            }
        }

        let slot = self
            .prefs
            .get_u32(PrefKey::UiccSlot)
            .and_then(|s| u8::try_from(s).ok())
            .unwrap_or(self.config.default_uicc_slot);
        self.device.set_preferred_sim_slot(slot);

        self.ctx.lock().overflow_route = None;
        if let Some(ce) = &self.card_emulation {
            ce.on_nfc_enabled();
            self.events.post(Event::ComputeRoutingParameters);
        }

        let nci = NciVersion::from_byte(self.device.nci_version());
        let stale = {
            let mut ctx = self.ctx.lock();
            ctx.nci_version = nci;
            ctx.objects.drain()
        };
        for object in &stale {
            warn!("object {} outlived the last shutdown, disconnecting", object.handle());
            object.disconnect_for_shutdown();
        }
        info!("controller up, NCI {:?}", nci);

        if self.config.beam_capable {
            if let Some(p2p) = &self.p2p {
                p2p.enable_disable(true);
            }
        }
        self.events
            .post(Event::PreferredPaymentChanged(PaymentChangeReason::Loaded));
        self.feedback.init();

        let (screen, lockscreen_polling) = {
            let mut ctx = self.ctx.lock();
            ctx.nfc_state_check = false;
            (ctx.screen, ctx.lockscreen_poll_mask.is_some())
        };
        if lockscreen_polling {
            self.apply_routing(false);
        }
        self.device
            .set_screen_state(screen.device_mask(lockscreen_polling));
        self.apply_routing(true);
        self.ctx.lock().nfc_state_check = true;

        self.events.post(Event::CommitRouting);
        self.events.post(Event::InitWiredSe);
        self.set_state(AdapterState::On);
        Ok(())
    }

    fn disable_internal(&self) -> Result<()> {
        match self.ctx.lock().state {
            AdapterState::Off | AdapterState::TurningOff => return Ok(()),
            AdapterState::TurningOn => {
                return Err(NfcError::InvalidCallerState("adapter is turning on"));
            }
            AdapterState::On => {}
        }
        self.set_state(AdapterState::TurningOff);

        if let Some(coex) = &self.coexistence {
            coex.disable();
        }
        self.events.post(Event::DeinitWiredSe);

        let watchdog = self.watchdog.start("disable", self.config.routing_watchdog_ms);

        if let Some(ce) = &self.card_emulation {
            ce.on_nfc_disabled();
        }
        if let Some(p2p) = &self.p2p {
            p2p.enable_disable(false);
        }

        self.events
            .remove_matching(|e| matches!(e, Event::DelayPolling));
        // A pending debounce stays armed so its removal callback still fires.
        let live = {
            let mut ctx = self.ctx.lock();
            ctx.polling_delayed = false;
            ctx.objects.drain()
        };
        for object in &live {
            object.disconnect_for_shutdown();
        }
        self.dispatcher.clear_foreground_dispatch();

        if !self.device.deinitialize() {
            warn!("controller deinitialize reported failure");
        }
        watchdog.cancel();

        {
            let mut ctx = self.ctx.lock();
            ctx.discovery = DiscoveryParameters::off();
            ctx.reader_mode = None;
            ctx.polling_disable_callers.clear();
            ctx.polling_paused = false;
        }
        self.feedback.release();
        self.set_state(AdapterState::Off);
        Ok(())
    }
}
