//! Simulated step scan running under a beam suspender.
//!
//! A simulated beam signal flips between good and bad on a fixed period while
//! a blocking executor walks a step scan wrapped in the configured suspender
//! and bundle filter. Every executed instruction is logged.
//!
//! ```text
//! RUST_LOG=daq_suspend=debug,suspend_sim=info suspend_sim --config config/suspend.toml
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use daq_suspend::config::{ScanConfig, SuspendConfig};
use daq_suspend::counter::ThresholdCounter;
use daq_suspend::plan::stubs::trigger_and_read;
use daq_suspend::resource::{resolve_movable, Device, MovableRef};
use daq_suspend::suspend::{ConditionWatcher, DropAndRetry};
use daq_suspend::{run_plan, BoxPlan, Command, ConditionSource, Msg, MsgPlan, Reply, Signal, SuspendResult};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulated scan under a beam suspender", long_about = None)]
struct Args {
    /// Configuration file (TOML); missing file means defaults
    #[arg(short, long, default_value = "config/suspend.toml")]
    config: PathBuf,

    /// Toggle the simulated beam this often, in milliseconds
    #[arg(long, default_value_t = 400)]
    flap_ms: u64,

    /// Time each reading takes, in milliseconds
    #[arg(long, default_value_t = 50)]
    read_ms: u64,
}

#[derive(Debug, Default)]
struct Summary {
    issued: usize,
    saved: usize,
    dropped: usize,
}

/// Executes instructions against the simulated beam.
struct SimExecutor {
    beam: Signal<f64>,
    read_time: Duration,
    counter: Option<Arc<ThresholdCounter>>,
    summary: Summary,
}

impl SimExecutor {
    fn run(mut self, mut plan: BoxPlan) -> SuspendResult<Summary> {
        run_plan(&mut plan, |msg| self.execute(msg))?;
        Ok(self.summary)
    }

    fn execute(&mut self, msg: &Msg) -> Reply {
        self.summary.issued += 1;
        match msg.command {
            Command::Wait => {
                info!("plan waiting for beam to recover");
                Reply::None
            }
            Command::Read => {
                thread::sleep(self.read_time);
                let det = msg.target.clone().unwrap_or_else(|| "det".to_string());
                let level = self.beam.value();
                let mut reading = serde_json::Map::new();
                reading.insert(
                    det.clone(),
                    json!({
                        "value": level,
                        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
                    }),
                );
                let reading = Value::Object(reading);
                if let Some(counter) = &self.counter {
                    counter.on_event(&det, &reading);
                }
                info!(%msg, level, "read");
                Reply::Value(reading)
            }
            Command::Save => {
                self.summary.saved += 1;
                info!("bundle saved");
                Reply::None
            }
            Command::Drop => {
                self.summary.dropped += 1;
                info!("bundle dropped");
                Reply::None
            }
            _ => {
                debug!(%msg, "executed");
                Reply::None
            }
        }
    }
}

fn default_scan() -> ScanConfig {
    ScanConfig {
        device: Device::new("sim_stage").with_component("motor", "sim_stage:x"),
        detectors: vec!["det".to_string()],
        start: 0.0,
        stop: 1.0,
        points: 5,
    }
}

fn step_scan(movable: &MovableRef, scan: &ScanConfig) -> MsgPlan {
    let detectors: Vec<&str> = scan.detectors.iter().map(String::as_str).collect();
    let step = if scan.points > 1 {
        (scan.stop - scan.start) / (scan.points - 1) as f64
    } else {
        0.0
    };
    let msgs: Vec<Msg> = (0..scan.points)
        .flat_map(|i| {
            let position = scan.start + step * i as f64;
            std::iter::once(movable.move_to(position)).chain(trigger_and_read(&detectors, "primary"))
        })
        .collect();
    MsgPlan::new(msgs)
}

fn build_plan(config: &SuspendConfig, beam: &Signal<f64>, scan: MsgPlan) -> Result<BoxPlan> {
    let source: Arc<dyn ConditionSource<f64>> = Arc::new(beam.clone());
    let condition = config.watcher.condition.build::<f64>();
    let hold_down = config.watcher.hold_down;

    let suspended: BoxPlan = if config.watcher.drop_and_retry {
        Box::new(DropAndRetry::new(source, condition, hold_down).wrap(scan)?)
    } else {
        let mut builder = ConditionWatcher::builder(source, condition).with_hold_down(hold_down);
        if let Some(commands) = &config.watcher.commands {
            builder = builder.with_commands(commands.clone());
        }
        Box::new(builder.build().wrap(scan)?)
    };

    if config.bundle_filter.is_enabled() {
        Ok(Box::new(config.bundle_filter.build().wrap(suspended)))
    } else {
        Ok(suspended)
    }
}

async fn flap(beam: Signal<f64>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let next = if beam.value() >= 0.5 { 0.0 } else { 1.0 };
        if let Err(err) = beam.put(next) {
            warn!(%err, "could not update simulated beam");
        }
    }
}

async fn monitor(mut beam: watch::Receiver<f64>) {
    while beam.changed().await.is_ok() {
        let level = *beam.borrow();
        debug!(level, "beam changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = SuspendConfig::load_from(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .init();
    info!(name = %config.application.name, "starting simulated scan");

    let beam = Signal::new("beam_mj", 1.0_f64)
        .with_description("Simulated pulse energy")
        .with_units("mJ");
    let scan = config.scan.clone().unwrap_or_else(default_scan);
    let movable = resolve_movable(&scan.device)?;
    info!(device = %movable.device, role = %movable.role, target = %movable.target, "scanning movable");

    let plan = build_plan(&config, &beam, step_scan(&movable, &scan))?;
    let counter = config.threshold.as_ref().map(|threshold| Arc::new(threshold.build()));

    let flapper = tokio::spawn(flap(beam.clone(), Duration::from_millis(args.flap_ms)));
    let watcher = tokio::spawn(monitor(beam.watch()));

    let executor = SimExecutor {
        beam: beam.clone(),
        read_time: Duration::from_millis(args.read_ms),
        counter: counter.clone(),
        summary: Summary::default(),
    };
    let summary = tokio::task::spawn_blocking(move || executor.run(plan))
        .await
        .context("Executor task panicked")??;

    flapper.abort();
    watcher.abort();

    info!(
        issued = summary.issued,
        saved = summary.saved,
        dropped = summary.dropped,
        "scan finished"
    );
    if let Some(counter) = counter {
        match counter.cell().try_get() {
            Some(reached) => info!(trigger = %reached.trigger, total = reached.total, "threshold reached"),
            None => info!(total = counter.total(), "threshold not reached"),
        }
    }
    Ok(())
}
