//! Simulated process plant, watchdog, and diagnostics sink.
//!
//! `SimulatedPlant` answers reads of readback channels with a linear response to the
//! current actuator setpoints: `r = offset + R · (u − u0)`. Any other channel is a plain
//! scalar that can be set from a test or scripted to change over time. Clones share
//! state, so a test can keep a handle after moving the plant into the control loop.

pub mod error;
pub mod liveness;
pub mod sink;

pub use error::SimError;
pub use liveness::{AlwaysAlive, ScriptedLiveness};
pub use sink::MemorySink;

use ctrlaw_traits::ValueProvider;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Default)]
struct PlantState {
    readbacks: Vec<String>,
    actuators: Vec<String>,
    offsets: Vec<f64>,
    // readbacks x actuators, row-major
    response: Vec<f64>,
    baseline: Vec<f64>,
    channels: HashMap<String, f64>,
    waveforms: HashMap<String, Vec<f64>>,
    scripts: HashMap<String, VecDeque<f64>>,
    noise_amp: f64,
    rng: u32,
    fail_after: Option<u64>,
    disconnected: Option<String>,
    reads: u64,
    writes: u64,
}

impl PlantState {
    fn next_noise(&mut self) -> f64 {
        if self.noise_amp == 0.0 {
            return 0.0;
        }
        // xorshift32
        let mut x = self.rng.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let unit = f64::from(x) / (f64::from(u32::MAX) + 1.0);
        (unit * 2.0 - 1.0) * self.noise_amp
    }

    fn actuator_value(&self, k: usize) -> f64 {
        self.channels
            .get(&self.actuators[k])
            .copied()
            .unwrap_or(self.baseline[k])
    }

    fn readback_value(&mut self, j: usize) -> f64 {
        let name = &self.readbacks[j];
        if let Some(q) = self.scripts.get_mut(name) {
            // Scripted values play out in order; the last one sticks.
            if q.len() > 1 {
                if let Some(v) = q.pop_front() {
                    return v;
                }
            } else if let Some(v) = q.front() {
                return *v;
            }
        }
        let n_act = self.actuators.len();
        let mut r = self.offsets[j];
        for k in 0..n_act {
            r += self.response[j * n_act + k] * (self.actuator_value(k) - self.baseline[k]);
        }
        r + self.next_noise()
    }

    fn scalar_value(&mut self, name: &str) -> Result<f64> {
        if let Some(q) = self.scripts.get_mut(name) {
            if q.len() > 1 {
                if let Some(v) = q.pop_front() {
                    return Ok(v);
                }
            } else if let Some(v) = q.front() {
                return Ok(*v);
            }
        }
        self.channels
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownChannel(name.to_string()))
    }

    fn check_transport(&mut self, name: &str) -> Result<()> {
        if let Some(bad) = &self.disconnected
            && bad == name
        {
            return Err(SimError::Disconnected(name.to_string()));
        }
        self.reads += 1;
        if let Some(n) = self.fail_after
            && self.reads > n
        {
            return Err(SimError::Timeout(name.to_string()));
        }
        Ok(())
    }
}

/// Linear plant with shared, inspectable state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlant {
    state: Arc<Mutex<PlantState>>,
}

impl SimulatedPlant {
    /// A plant whose readbacks sit at zero and do not respond to the actuators.
    pub fn new(readbacks: Vec<String>, actuators: Vec<String>) -> Self {
        let n_rb = readbacks.len();
        let n_act = actuators.len();
        let mut channels = HashMap::new();
        for a in &actuators {
            channels.insert(a.clone(), 0.0);
        }
        let state = PlantState {
            readbacks,
            actuators,
            offsets: vec![0.0; n_rb],
            response: vec![0.0; n_rb * n_act],
            baseline: vec![0.0; n_act],
            channels,
            rng: 0x9E37_79B9,
            ..PlantState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlantState> {
        // A poisoned lock only means another test thread panicked; the data is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Readback values when every actuator sits at its baseline.
    pub fn with_offsets(self, offsets: Vec<f64>) -> Result<Self> {
        {
            let mut s = self.lock();
            if offsets.len() != s.readbacks.len() {
                return Err(SimError::Shape(format!(
                    "{} offsets for {} readbacks",
                    offsets.len(),
                    s.readbacks.len()
                )));
            }
            s.offsets = offsets;
        }
        Ok(self)
    }

    /// Response matrix, readbacks x actuators, row-major.
    pub fn with_response(self, response: Vec<f64>) -> Result<Self> {
        {
            let mut s = self.lock();
            let want = s.readbacks.len() * s.actuators.len();
            if response.len() != want {
                return Err(SimError::Shape(format!(
                    "response has {} entries, expected {want}",
                    response.len()
                )));
            }
            s.response = response;
        }
        Ok(self)
    }

    /// Initial actuator setpoints; these also become the response baseline.
    pub fn with_actuator_values(self, values: &[f64]) -> Result<Self> {
        {
            let mut s = self.lock();
            if values.len() != s.actuators.len() {
                return Err(SimError::Shape(format!(
                    "{} actuator values for {} actuators",
                    values.len(),
                    s.actuators.len()
                )));
            }
            s.baseline = values.to_vec();
            let names = s.actuators.clone();
            for (n, v) in names.into_iter().zip(values) {
                s.channels.insert(n, *v);
            }
        }
        Ok(self)
    }

    /// Add an extra scalar channel (test value, trigger, gain binding...).
    pub fn with_channel(self, name: impl Into<String>, value: f64) -> Self {
        self.lock().channels.insert(name.into(), value);
        self
    }

    pub fn with_waveform(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.lock().waveforms.insert(name.into(), values);
        self
    }

    /// Uniform noise in `[-amplitude, amplitude]` added to every readback.
    pub fn with_noise(self, amplitude: f64, seed: u32) -> Self {
        {
            let mut s = self.lock();
            s.noise_amp = amplitude.abs();
            s.rng = seed.max(1);
        }
        self
    }

    /// Successive reads of `name` return these values; the last one repeats.
    pub fn script(&self, name: impl Into<String>, values: impl IntoIterator<Item = f64>) {
        self.lock()
            .scripts
            .insert(name.into(), values.into_iter().collect());
    }

    /// Every channel read after the first `reads` fails with a timeout.
    pub fn fail_after(&self, reads: u64) {
        self.lock().fail_after = Some(reads);
    }

    pub fn disconnect(&self, name: impl Into<String>) {
        self.lock().disconnected = Some(name.into());
    }

    pub fn set_channel(&self, name: impl Into<String>, value: f64) {
        self.lock().channels.insert(name.into(), value);
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.lock().channels.get(name).copied()
    }

    /// Number of channel reads served so far.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    /// Number of write calls served so far.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }
}

impl ValueProvider for SimulatedPlant {
    fn read(
        &mut self,
        names: &[String],
        _timeout: Duration,
    ) -> std::result::Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.lock();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            s.check_transport(name)?;
            let v = match s.readbacks.iter().position(|r| r == name) {
                Some(j) => s.readback_value(j),
                None => s.scalar_value(name)?,
            };
            out.push(v);
        }
        tracing::trace!(count = names.len(), "sim read");
        Ok(out)
    }

    fn write(
        &mut self,
        names: &[String],
        values: &[f64],
        _timeout: Duration,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.lock();
        if names.len() != values.len() {
            return Err(Box::new(SimError::Arity {
                names: names.len(),
                values: values.len(),
            }));
        }
        for name in names {
            if !s.channels.contains_key(name) {
                return Err(Box::new(SimError::UnknownChannel(name.clone())));
            }
        }
        for (name, v) in names.iter().zip(values) {
            s.channels.insert(name.clone(), *v);
        }
        s.writes += 1;
        tracing::trace!(count = names.len(), "sim write");
        Ok(())
    }

    fn read_array(
        &mut self,
        name: &str,
        _timeout: Duration,
    ) -> std::result::Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.lock();
        s.check_transport(name)?;
        s.waveforms
            .get(name)
            .cloned()
            .ok_or_else(|| Box::new(SimError::UnknownChannel(name.to_string())) as _)
    }
}
