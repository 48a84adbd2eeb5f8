//! Simulated upper layers: application dispatcher, feedback and card
//! emulation.  They only log what they are asked to do, with the
//! dispatcher accepting tags that carry NDEF.

use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use crate::app::ports::{
    CardEmulationPort, DispatchResult, FeedbackPort, NdefMessage, Sound, TagDispatchPort,
    TagEndpoint,
};

/// Dispatcher that delivers NDEF tags and rejects everything else.
#[derive(Debug, Default)]
pub struct SimDispatcher {
    delivered: AtomicU32,
}

impl SimDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl TagDispatchPort for SimDispatcher {
    fn dispatch_tag(&self, tag: &dyn TagEndpoint, ndef: Option<&NdefMessage>) -> DispatchResult {
        match ndef {
            Some(msg) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                info!("dispatch: tag {} ({} NDEF bytes)", tag.handle(), msg.0.len());
                DispatchResult::Success
            }
            None => {
                info!("dispatch: no handler for tag {}", tag.handle());
                DispatchResult::Failure
            }
        }
    }

    fn clear_foreground_dispatch(&self) {
        debug!("dispatch: foreground dispatch cleared");
    }

    fn disable_provisioning_mode(&self) {
        debug!("dispatch: provisioning mode off");
    }
}

/// Feedback that writes sounds and haptics to the log.
#[derive(Debug, Default)]
pub struct LogFeedback;

impl FeedbackPort for LogFeedback {
    fn init(&self) {
        debug!("feedback: loaded");
    }

    fn release(&self) {
        debug!("feedback: released");
    }

    fn play_sound(&self, sound: Sound) {
        info!("feedback: sound {:?}", sound);
    }

    fn vibrate(&self) {
        debug!("feedback: vibrate");
    }

    fn user_activity(&self) {
        debug!("feedback: user activity");
    }
}

/// Card emulation manager that only reports its notifications.
#[derive(Debug, Default)]
pub struct LogCardEmulation;

impl CardEmulationPort for LogCardEmulation {
    fn on_nfc_enabled(&self) {
        info!("hce: NFC enabled, AID baseline rebuilt");
    }

    fn on_nfc_disabled(&self) {
        info!("hce: NFC disabled");
    }

    fn on_routing_table_cleared(&self) {
        debug!("hce: routing table cleared");
    }

    fn on_routing_table_changed(&self) {
        debug!("hce: routing table changed");
    }
}
