#![allow(dead_code)]

use ctrlaw_core::{ControlLoopBuilder, CorrectionMatrix, DynControlLoop, LoopParams, Set};
use ctrlaw_sim::SimulatedPlant;
use ctrlaw_traits::clock::ManualClock;

pub fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

pub fn matrix(rows: &[&str], cols: &[&str], data: Vec<f64>) -> CorrectionMatrix {
    CorrectionMatrix::new(names(rows), names(cols), data).unwrap()
}

/// Plant with static readbacks (no response to the actuators).
pub fn plant(readbacks: &[&str], offsets: Vec<f64>, actuators: &[&str], initial: &[f64]) -> SimulatedPlant {
    SimulatedPlant::new(names(readbacks), names(actuators))
        .with_offsets(offsets)
        .unwrap()
        .with_actuator_values(initial)
        .unwrap()
}

pub fn integral(gain: f64) -> LoopParams {
    LoopParams {
        gain,
        integral: true,
        ..LoopParams::default()
    }
}

/// Builder over `plant` with a manual clock, ready to `build()`.
pub fn builder(
    plant: &SimulatedPlant,
    k: CorrectionMatrix,
    params: LoopParams,
    clock: &ManualClock,
) -> ControlLoopBuilder<Set, Set> {
    DynControlLoop::builder()
        .with_provider(plant.clone())
        .with_matrix(k)
        .with_params(params)
        .with_clock(Box::new(clock.clone()))
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
