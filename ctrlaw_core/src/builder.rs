//! Type-state builder for `ControlLoop` and the generic `build_control_loop` constructor.
//!
//! `build()` is only available once a provider and a correction matrix are set;
//! `try_build()` is always available and reports what is missing.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver;
use ctrlaw_traits::{Clock, DiagnosticsSink, Liveness, MonotonicClock, ValueProvider};

use crate::channel::ChannelSet;
use crate::compensation::{Compensation, CompensationSpec};
use crate::config::{AverageSpec, DespikeParams, GlitchSpec, LiveBindings, LoopParams, RampSpec, TriggerSpec};
use crate::despike::{Despike, NeighborDespiker, ThresholdRamp};
use crate::error::{BuildError, Result};
use crate::filter::FilterCoefficients;
use crate::glitch::GlitchBuffer;
use crate::law::CorrectionLaw;
use crate::limiter::{DeltaLimits, Window};
use crate::matrix::CorrectionMatrix;
use crate::mocks::{NoWatchdog, NullSink};
use crate::range_test::{RangeMonitor, TestSpec, WaveformTest};
use crate::scheduler::{ControlLoop, DespikeState, LiveKind, Reconfigure, RunState};
use crate::wait::Pacer;

/// Loop over a boxed provider, as produced by `ControlLoopBuilder`.
pub type DynControlLoop = ControlLoop<Box<dyn ValueProvider + Send>>;

impl DynControlLoop {
    pub fn builder() -> ControlLoopBuilder<Missing, Missing> {
        ControlLoopBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Everything besides the provider and the matrix. Unset parts fall back to defaults:
/// no filter, no limits, no tests, no despiking, a null sink, no watchdog, the monotonic clock.
#[derive(Default)]
pub struct LoopParts {
    pub params: LoopParams,
    pub average: AverageSpec,
    pub filter: Option<FilterCoefficients>,
    /// Applies to actuators missing from `delta_limits`.
    pub global_delta_limit: f64,
    pub delta_limits: Vec<(String, f64)>,
    pub readback_limits: Vec<(String, Window)>,
    pub control_limits: Vec<(String, Window)>,
    pub tests: Vec<TestSpec>,
    pub waveform_tests: Vec<WaveformTest>,
    pub despike: Option<DespikeParams>,
    pub ramp: Option<RampSpec>,
    /// Readbacks listed here override the default (all enabled).
    pub despike_selection: Vec<(String, bool)>,
    pub glitch: GlitchSpec,
    pub trigger: Option<TriggerSpec>,
    pub live: LiveBindings,
    pub compensation: Option<CompensationSpec>,
    pub sink: Option<Box<dyn DiagnosticsSink + Send>>,
    pub liveness: Option<Box<dyn Liveness + Send>>,
    pub clock: Option<Box<dyn Clock + Send + Sync>>,
    pub cancel: Option<Arc<AtomicBool>>,
    pub reconfigure: Option<Receiver<Reconfigure>>,
    pub despiker: Option<Box<dyn Despike + Send>>,
}

pub struct ControlLoopBuilder<P, K> {
    provider: Option<Box<dyn ValueProvider + Send>>,
    matrix: Option<CorrectionMatrix>,
    parts: LoopParts,
    _p: PhantomData<P>,
    _k: PhantomData<K>,
}

impl Default for ControlLoopBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            provider: None,
            matrix: None,
            parts: LoopParts::default(),
            _p: PhantomData,
            _k: PhantomData,
        }
    }
}

fn invalid(cond: bool, msg: &'static str) -> Result<()> {
    if cond {
        return Err(eyre::Report::new(BuildError::InvalidConfig(msg)));
    }
    Ok(())
}

fn unique(names: &[String], what: &str) -> Result<()> {
    for (i, n) in names.iter().enumerate() {
        if names[..i].contains(n) {
            return Err(eyre::Report::new(BuildError::Shape(format!(
                "duplicate {what} {n}"
            ))));
        }
    }
    Ok(())
}

fn position(names: &[String], name: &str, what: &str) -> Result<usize> {
    names.iter().position(|n| n == name).ok_or_else(|| {
        eyre::Report::new(BuildError::Shape(format!("{what} names unknown channel {name}")))
    })
}

#[inline]
fn ordered(min: f64, max: f64) -> bool {
    min <= max
}

fn windows(names: &[String], rows: &[(String, Window)], what: &str) -> Result<Vec<Option<Window>>> {
    let mut out = vec![None; names.len()];
    for (name, w) in rows {
        invalid(!ordered(w.min, w.max), "limit window min must be <= max")?;
        out[position(names, name, what)?] = Some(*w);
    }
    Ok(out)
}

/// Validate and construct a `ControlLoop`.
///
/// Single source of truth for validation, used by both `ControlLoopBuilder::try_build()`
/// and direct callers who want a statically dispatched provider.
pub fn build_control_loop<P: ValueProvider>(
    provider: P,
    matrix: CorrectionMatrix,
    parts: LoopParts,
) -> Result<ControlLoop<P>> {
    let LoopParts {
        params,
        average,
        filter,
        global_delta_limit,
        delta_limits,
        readback_limits,
        control_limits,
        tests,
        waveform_tests,
        despike,
        ramp,
        despike_selection,
        glitch,
        trigger,
        live,
        compensation,
        sink,
        liveness,
        clock,
        cancel,
        reconfigure,
        despiker,
    } = parts;

    invalid(!params.gain.is_finite(), "gain must be finite")?;
    invalid(params.interval.is_zero(), "interval must be > 0")?;
    invalid(params.update_interval == 0, "update_interval must be >= 1")?;
    invalid(params.ping_interval.is_zero(), "ping_interval must be > 0")?;
    invalid(params.io_timeout.is_zero(), "io_timeout must be > 0")?;
    invalid(average.n == 0, "average.n must be >= 1")?;
    invalid(
        params.action_limit.is_some_and(|a| !(a.is_finite() && a >= 0.0)),
        "action_limit must be finite and >= 0",
    )?;
    invalid(!global_delta_limit.is_finite(), "delta limit must be finite")?;
    invalid(
        delta_limits.iter().any(|(_, l)| !l.is_finite()),
        "delta limits must be finite",
    )?;

    let actuators = matrix.rows().to_vec();
    let readback_names = matrix.cols().to_vec();
    unique(&actuators, "actuator")?;
    unique(&readback_names, "readback")?;

    let mut law = CorrectionLaw::new(matrix, params.gain, params.integral);
    if let Some(f) = filter.as_ref() {
        law = law.with_filter(f.to_filter(&actuators)?);
    }

    let limits = if delta_limits.is_empty() {
        DeltaLimits::Global(global_delta_limit)
    } else {
        let mut per = vec![global_delta_limit; actuators.len()];
        for (name, l) in &delta_limits {
            per[position(&actuators, name, "delta limits")?] = *l;
        }
        DeltaLimits::PerChannel(per)
    };
    let readback_windows = windows(&readback_names, &readback_limits, "readback limits")?;
    let control_windows = windows(&actuators, &control_limits, "control limits")?;

    let compensation = match compensation {
        None => None,
        Some(spec) => {
            let names = spec.matrix.rows().to_vec();
            unique(&names, "compensation actuator")?;
            let overlap: Vec<&str> = names
                .iter()
                .filter(|n| actuators.contains(n))
                .map(String::as_str)
                .collect();
            if !overlap.is_empty() {
                return Err(eyre::Report::new(BuildError::OverlappingActuators(
                    overlap.join(", "),
                )));
            }
            invalid(!spec.gain.is_finite(), "compensation gain must be finite")?;
            let m = spec.matrix.aligned_to(&names, &actuators)?;
            let mut law = CorrectionLaw::new(m, spec.gain, spec.integral);
            if let Some(f) = spec.filter.as_ref() {
                law = law.with_filter(f.to_filter(&names)?);
            }
            Some(Compensation::new(law))
        }
    };

    let despike = if despike.is_some() || ramp.is_some() || live.threshold.is_some() {
        let p = despike.unwrap_or_default();
        invalid(
            p.neighbors == 0 || p.passes == 0 || p.average_of == 0,
            "despike neighbors, passes and average_of must be >= 1",
        )?;
        invalid(!p.threshold.is_finite(), "despike threshold must be finite")?;
        invalid(
            ramp.is_some_and(|r| !(r.start.is_finite() && r.end.is_finite())),
            "despike ramp thresholds must be finite",
        )?;
        Some(DespikeState {
            params: p,
            ramp: ramp.map(ThresholdRamp::new),
            live_threshold: None,
        })
    } else {
        None
    };

    let mut readbacks = ChannelSet::new(readback_names);
    if despike.is_some() {
        readbacks.despike.iter_mut().for_each(|d| *d = true);
        for (name, on) in &despike_selection {
            let i = position(readbacks.names(), name, "despike selection")?;
            readbacks.despike[i] = *on;
        }
    }

    invalid(
        tests.iter().any(|t| !ordered(t.min, t.max)),
        "test min must be <= max",
    )?;
    invalid(
        waveform_tests
            .iter()
            .flat_map(|w| &w.points)
            .any(|p| !ordered(p.min, p.max)),
        "waveform test min must be <= max",
    )?;
    let test_names = tests.iter().map(|t| t.channel.clone()).collect();
    let test_mask = tests.iter().map(|t| t.despike).collect();

    if let Some(t) = trigger.as_ref() {
        invalid(t.poll.is_zero(), "trigger poll must be > 0")?;
    }

    invalid(
        live.compensation_gain.is_some() && compensation.is_none(),
        "live compensation gain requires a compensation law",
    )?;
    invalid(
        live.ramp_trigger.is_some() && ramp.is_none(),
        "live ramp trigger requires a despike ramp",
    )?;
    let mut live_names = Vec::new();
    let mut live_kinds = Vec::new();
    for (name, kind) in [
        (&live.gain, LiveKind::Gain),
        (&live.compensation_gain, LiveKind::CompensationGain),
        (&live.threshold, LiveKind::Threshold),
        (&live.ramp_trigger, LiveKind::RampTrigger),
    ] {
        if let Some(n) = name {
            live_names.push(n.clone());
            live_kinds.push(kind);
        }
    }

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => Arc::from(c),
        None => Arc::new(MonotonicClock::new()),
    };
    let pacer = Pacer::new(
        clock,
        liveness.unwrap_or_else(|| Box::new(NoWatchdog)),
        cancel.unwrap_or_default(),
        params.ping_interval,
    );

    let error = vec![0.0; readbacks.len()];
    Ok(ControlLoop {
        provider,
        sink: sink.unwrap_or_else(|| Box::new(NullSink)),
        pacer,
        monitor: RangeMonitor::new(params.backoff_cap),
        params,
        average,
        readbacks,
        controls: ChannelSet::new(actuators),
        law,
        limits,
        readback_windows,
        control_windows,
        compensation,
        despiker: despiker.unwrap_or_else(|| Box::new(NeighborDespiker)),
        despike,
        tests,
        test_names,
        test_mask,
        waveforms: waveform_tests,
        glitch: GlitchBuffer::new(glitch.rows),
        glitch_spec: glitch,
        trigger,
        live_names,
        live_kinds,
        reconfigure,
        error,
        run: RunState::default(),
    })
}

impl<P, K> ControlLoopBuilder<P, K> {
    /// Fallible build available in any type-state; reports which required part is missing.
    pub fn try_build(self) -> Result<DynControlLoop> {
        let provider = self
            .provider
            .ok_or_else(|| eyre::Report::new(BuildError::MissingProvider))?;
        let matrix = self
            .matrix
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMatrix))?;
        build_control_loop(provider, matrix, self.parts)
    }

    /// Hand back the optional parts, e.g. to build with a statically dispatched provider.
    pub fn into_parts(self) -> LoopParts {
        self.parts
    }
}

/// Chainable setters that do not affect type-state.
impl<P, K> ControlLoopBuilder<P, K> {
    pub fn with_params(mut self, params: LoopParams) -> Self {
        self.parts.params = params;
        self
    }
    pub fn with_average(mut self, average: AverageSpec) -> Self {
        self.parts.average = average;
        self
    }
    pub fn with_filter(mut self, filter: FilterCoefficients) -> Self {
        self.parts.filter = Some(filter);
        self
    }
    /// Limit for every actuator not named by `with_delta_limits`; `<= 0` is unlimited.
    pub fn with_global_delta_limit(mut self, limit: f64) -> Self {
        self.parts.global_delta_limit = limit;
        self
    }
    pub fn with_delta_limits(mut self, limits: Vec<(String, f64)>) -> Self {
        self.parts.delta_limits = limits;
        self
    }
    pub fn with_readback_limits(mut self, limits: Vec<(String, Window)>) -> Self {
        self.parts.readback_limits = limits;
        self
    }
    pub fn with_control_limits(mut self, limits: Vec<(String, Window)>) -> Self {
        self.parts.control_limits = limits;
        self
    }
    pub fn with_tests(mut self, tests: Vec<TestSpec>) -> Self {
        self.parts.tests = tests;
        self
    }
    pub fn with_waveform_tests(mut self, tests: Vec<WaveformTest>) -> Self {
        self.parts.waveform_tests = tests;
        self
    }
    pub fn with_despike(mut self, params: DespikeParams, ramp: Option<RampSpec>) -> Self {
        self.parts.despike = Some(params);
        self.parts.ramp = ramp;
        self
    }
    pub fn with_despike_selection(mut self, selection: Vec<(String, bool)>) -> Self {
        self.parts.despike_selection = selection;
        self
    }
    /// Replace the neighbour-window despiker.
    pub fn with_despiker(mut self, despiker: impl Despike + Send + 'static) -> Self {
        self.parts.despiker = Some(Box::new(despiker));
        self
    }
    pub fn with_glitch(mut self, glitch: GlitchSpec) -> Self {
        self.parts.glitch = glitch;
        self
    }
    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.parts.trigger = Some(trigger);
        self
    }
    pub fn with_live(mut self, live: LiveBindings) -> Self {
        self.parts.live = live;
        self
    }
    pub fn with_compensation(mut self, spec: CompensationSpec) -> Self {
        self.parts.compensation = Some(spec);
        self
    }
    pub fn with_sink(mut self, sink: impl DiagnosticsSink + Send + 'static) -> Self {
        self.parts.sink = Some(Box::new(sink));
        self
    }
    pub fn with_liveness(mut self, liveness: impl Liveness + Send + 'static) -> Self {
        self.parts.liveness = Some(Box::new(liveness));
        self
    }
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.parts.clock = Some(clock);
        self
    }
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.parts.cancel = Some(cancel);
        self
    }
    pub fn with_reconfigure(mut self, rx: Receiver<Reconfigure>) -> Self {
        self.parts.reconfigure = Some(rx);
        self
    }
}

// Setters that advance type-state
impl<K> ControlLoopBuilder<Missing, K> {
    pub fn with_provider(
        self,
        provider: impl ValueProvider + Send + 'static,
    ) -> ControlLoopBuilder<Set, K> {
        ControlLoopBuilder {
            provider: Some(Box::new(provider)),
            matrix: self.matrix,
            parts: self.parts,
            _p: PhantomData,
            _k: PhantomData,
        }
    }
}

impl<P> ControlLoopBuilder<P, Missing> {
    pub fn with_matrix(self, matrix: CorrectionMatrix) -> ControlLoopBuilder<P, Set> {
        ControlLoopBuilder {
            provider: self.provider,
            matrix: Some(matrix),
            parts: self.parts,
            _p: PhantomData,
            _k: PhantomData,
        }
    }
}

impl ControlLoopBuilder<Set, Set> {
    /// Validate and build. Only available once the provider and matrix are set.
    pub fn build(self) -> Result<DynControlLoop> {
        self.try_build()
    }
}
