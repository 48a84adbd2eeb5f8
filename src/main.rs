//! nfcd: simulation daemon.
//!
//! Wires [`NfcService`] to the in-memory adapters and replays a scenario
//! (a JSON list of commands, or the built-in default) on a manual clock.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  SimDevice        SimDispatcher   LogFeedback   MemStore     │
//! │  (DevicePort)     (dispatch)      (feedback)    (storage)    │
//! │  LogEventSink     LogCardEmulation              ManualClock  │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  NfcService: lifecycle · event loop · routing          │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use nfcd::adapters::log_sink::LogEventSink;
use nfcd::adapters::sim_device::{SimDevice, SimTag};
use nfcd::adapters::sim_host::{LogCardEmulation, LogFeedback, SimDispatcher};
use nfcd::adapters::store::MemStore;
use nfcd::adapters::time::ManualClock;
use nfcd::app::commands::{AppCommand, default_scenario};
use nfcd::app::ports::{ConfigPort, DevicePort};
use nfcd::config::ServiceConfig;
use nfcd::diagnostics::install_panic_handler;
use nfcd::{NfcService, ServicePorts};

#[derive(Debug, Parser)]
#[command(name = "nfcd", version, about = "NFC controller service (simulated controller)")]
struct Cli {
    /// JSON file with `ServiceConfig` overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON scenario to replay instead of the built-in one
    #[arg(long)]
    script: Option<PathBuf>,

    /// Simulate an NCI 1.0 controller
    #[arg(long)]
    nci1: bool,
}

/// Overrides from `path` are persisted first, so the service always boots
/// from whatever the store holds.
fn load_config(store: &MemStore, path: Option<&PathBuf>) -> Result<ServiceConfig> {
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ServiceConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        store.save(&config).context("invalid config")?;
    }
    Ok(store.load()?)
}

fn load_script(path: Option<&PathBuf>) -> Result<Vec<AppCommand>> {
    let Some(path) = path else {
        return Ok(default_scenario());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing script {}", path.display()))
}

struct Simulation {
    service: NfcService,
    device: Arc<SimDevice>,
    clock: Arc<ManualClock>,
    tags: HashMap<u32, Arc<SimTag>>,
}

impl Simulation {
    fn run(&mut self, cmd: AppCommand) -> Result<()> {
        info!("> {:?}", cmd);
        match cmd {
            AppCommand::Boot => self.service.boot(),
            AppCommand::Enable => self.service.enable()?,
            AppCommand::Disable { save_state } => self.service.disable(save_state)?,
            AppCommand::Screen { state } => self.service.on_screen_state_changed(state),
            AppCommand::TapTag { handle, uid, ndef } => {
                let tag = Arc::new(SimTag::new(handle, uid, ndef));
                self.tags.insert(handle, tag.clone());
                self.service.on_tag_discovered(tag);
            }
            AppCommand::RemoveTag { handle } => match self.tags.remove(&handle) {
                Some(tag) => tag.remove(),
                None => warn!("no tag with handle {}", handle),
            },
            AppCommand::IgnoreTag {
                handle,
                debounce_ms,
            } => {
                if !self.service.ignore(handle, debounce_ms, None) {
                    warn!("tag {} is not live", handle);
                }
            }
            AppCommand::PausePolling { timeout_ms } => self.service.pause_polling(timeout_ms)?,
            AppCommand::ResumePolling => self.service.resume_polling()?,
            AppCommand::RouteAid { aid, route } => self.service.route_aids(aid, route, 0, 0x39),
            AppCommand::CommitRouting => self.service.commit_routing(),
            AppCommand::SetDefaultRoute { location } => {
                self.service.update_default_aid_route(location);
            }
            AppCommand::RfField { on: true } => self.service.on_rf_field_activated(),
            AppCommand::RfField { on: false } => self.service.on_rf_field_deactivated(),
            AppCommand::HardwareError => self.service.on_hw_error_reported(),
            AppCommand::Advance { ms } => self.clock.advance(ms),
            AppCommand::Dump => {
                self.service.run_until_idle();
                let dump = serde_json::to_string_pretty(&self.service.dump())?;
                println!("{dump}");
                println!("{}", self.device.dump_diagnostics());
            }
        }
        self.service.run_until_idle();
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let storage = Arc::new(MemStore::new());
    let config = load_config(&storage, cli.config.as_ref())?;
    let script = load_script(cli.script.as_ref())?;
    info!("nfcd starting ({} scenario steps)", script.len());

    let device = Arc::new(if cli.nci1 {
        SimDevice::with_nci_version(0x10)
    } else {
        SimDevice::new()
    });
    let clock = Arc::new(ManualClock::new());
    install_panic_handler(storage.clone());

    let ports = ServicePorts::new(
        device.clone(),
        Arc::new(SimDispatcher::new()),
        Arc::new(LogFeedback),
        Arc::new(LogEventSink::new()),
        storage,
        clock.clone(),
    )
    .with_card_emulation(Arc::new(LogCardEmulation));

    let mut sim = Simulation {
        service: NfcService::new(config, ports),
        device,
        clock,
        tags: HashMap::new(),
    };

    for (step, cmd) in script.into_iter().enumerate() {
        sim.run(cmd).with_context(|| format!("scenario step {step}"))?;
    }

    info!("scenario finished, adapter {}", sim.service.state());
    Ok(())
}
