//! `ctrlaw run`: assemble the simulated plant, build the loop from config, run it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use ctrlaw_config::Loaded;
use ctrlaw_core::{RunSummary, builder_from_loaded};
use ctrlaw_sim::{AlwaysAlive, ScriptedLiveness, SimulatedPlant};
use eyre::WrapErr;

use crate::sink::JsonlSink;

/// Command-line overrides applied on top of `[loop]`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub steps: Option<u64>,
    pub dry_run: bool,
    pub gain: Option<f64>,
    pub records: Option<std::path::PathBuf>,
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Plant over the loop's readbacks and every actuator the loop writes.
pub fn build_plant(loaded: &Loaded) -> eyre::Result<SimulatedPlant> {
    let t = &loaded.tables;
    let p = &loaded.config.plant;
    let readbacks = t.readbacks().to_vec();
    let mut actuators = t.actuators().to_vec();
    if let Some(m) = t.compensation_matrix.as_ref() {
        actuators.extend(m.rows.iter().cloned());
    }

    let mut response = vec![0.0; readbacks.len() * actuators.len()];
    if let Some(r) = t.plant_response.as_ref() {
        for (i, rb) in readbacks.iter().enumerate() {
            let Some(row) = r.rows.iter().position(|n| n == rb) else {
                continue;
            };
            for (j, act) in actuators.iter().enumerate() {
                if let Some(col) = r.cols.iter().position(|n| n == act) {
                    response[i * actuators.len() + j] = r.get(row, col);
                }
            }
        }
    }
    let offsets = readbacks
        .iter()
        .map(|n| p.offsets.get(n).copied().unwrap_or(0.0))
        .collect();
    let initial: Vec<f64> = actuators
        .iter()
        .map(|n| p.actuators.get(n).copied().unwrap_or(0.0))
        .collect();

    let mut plant = SimulatedPlant::new(readbacks, actuators)
        .with_offsets(offsets)?
        .with_response(response)?
        .with_actuator_values(&initial)?;
    for (name, v) in &p.channels {
        plant = plant.with_channel(name.clone(), *v);
    }
    for (name, v) in &p.waveforms {
        plant = plant.with_waveform(name.clone(), v.clone());
    }
    if p.noise > 0.0 {
        plant = plant.with_noise(p.noise, p.seed);
    }
    // Test hook: fail every read after this many.
    if let Some(n) = env_u64("CTRLAW_SIM_TIMEOUT") {
        plant.fail_after(n);
    }
    Ok(plant)
}

pub fn run_loop(
    loaded: &Loaded,
    opts: &RunOptions,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let mut loaded = loaded.clone();
    let control = &mut loaded.config.control;
    if let Some(s) = opts.steps {
        control.steps = s;
    }
    if let Some(g) = opts.gain {
        control.gain = g;
    }
    control.dry_run |= opts.dry_run;

    let plant = build_plant(&loaded).wrap_err("building simulated plant")?;
    let mut b = builder_from_loaded(&loaded)?
        .with_provider(plant)
        .with_cancel(shutdown);
    // Test hook: the watchdog answers Abort after this many pings.
    b = match env_u64("CTRLAW_SIM_ABORT_AFTER") {
        Some(n) => b.with_liveness(ScriptedLiveness::abort_after(n)),
        None => b.with_liveness(AlwaysAlive::new()),
    };
    if let Some(path) = opts.records.as_ref() {
        b = b.with_sink(JsonlSink::create(path)?);
    }

    let mut lp = b.build()?;
    tracing::info!(
        readbacks = lp.readbacks().len(),
        actuators = lp.controls().len(),
        steps = lp.params().steps,
        dry_run = lp.params().dry_run,
        "run start"
    );
    lp.run()
}
