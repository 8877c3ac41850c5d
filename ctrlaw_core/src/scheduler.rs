//! The iteration engine.
//!
//! One `step()` runs: reconfigure → trigger → live bindings → acquire → despike →
//! clamp → range tests → correct → limit → compensate → write → record → sleep.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use ctrlaw_traits::{
    DiagnosticsSink, IterationRecord, Severity, Snapshot, StatsRecord, ValueProvider,
};
use eyre::WrapErr;

use crate::acquire::{acquire_average, check_finite, read_checked};
use crate::channel::ChannelSet;
use crate::compensation::Compensation;
use crate::config::{AverageSpec, DespikeParams, GlitchSpec, LoopParams, TriggerSpec};
use crate::despike::{Despike, ThresholdRamp, despike_masked};
use crate::error::{LawError, Result};
use crate::glitch::{GlitchBuffer, is_glitch};
use crate::law::CorrectionLaw;
use crate::limiter::{DeltaLimits, Window, clamp_setpoints, clamp_values, limit_deltas};
use crate::matrix::CorrectionMatrix;
use crate::provider_error::map_provider_error;
use crate::range_test::{Failure, RangeMonitor, TestSpec, WaveformTest, evaluate_scalars};
use crate::stats::{channel_stats, rms};
use crate::status::{IterationStatus, RunSummary, SkipReason};
use crate::util::unix_now;
use crate::wait::Pacer;

/// Parameter change requested while the loop runs; applied at the top of the next iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconfigure {
    Gain(f64),
    CompensationGain(f64),
    Interval(Duration),
    Steps(u64),
    DryRun(bool),
    /// Must carry the same actuator and readback names; order may differ.
    Matrix(CorrectionMatrix),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LiveKind {
    Gain,
    CompensationGain,
    Threshold,
    RampTrigger,
}

#[derive(Debug, Clone)]
pub(crate) struct DespikeState {
    pub(crate) params: DespikeParams,
    pub(crate) ramp: Option<ThresholdRamp>,
    pub(crate) live_threshold: Option<f64>,
}

impl DespikeState {
    /// Live channel beats ramp beats the configured threshold.
    fn effective(&self) -> DespikeParams {
        let threshold = self
            .live_threshold
            .or_else(|| self.ramp.as_ref().map(ThresholdRamp::current))
            .unwrap_or(self.params.threshold);
        DespikeParams {
            threshold,
            ..self.params
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunState {
    begun: bool,
    step: u64,
    started: Option<Instant>,
    start_epoch: f64,
    target: Option<Instant>,
    first_read_done: bool,
    last_ramp_trigger: bool,
    summary: RunSummary,
}

pub struct ControlLoop<P> {
    pub(crate) provider: P,
    pub(crate) sink: Box<dyn DiagnosticsSink + Send>,
    pub(crate) pacer: Pacer,
    pub(crate) params: LoopParams,
    pub(crate) average: AverageSpec,
    pub(crate) readbacks: ChannelSet,
    pub(crate) controls: ChannelSet,
    pub(crate) law: CorrectionLaw,
    pub(crate) limits: DeltaLimits,
    pub(crate) readback_windows: Vec<Option<Window>>,
    pub(crate) control_windows: Vec<Option<Window>>,
    pub(crate) compensation: Option<Compensation>,
    pub(crate) despiker: Box<dyn Despike + Send>,
    pub(crate) despike: Option<DespikeState>,
    pub(crate) tests: Vec<TestSpec>,
    pub(crate) test_names: Vec<String>,
    pub(crate) test_mask: Vec<bool>,
    pub(crate) waveforms: Vec<WaveformTest>,
    pub(crate) monitor: RangeMonitor,
    pub(crate) glitch: GlitchBuffer,
    pub(crate) glitch_spec: GlitchSpec,
    pub(crate) trigger: Option<TriggerSpec>,
    pub(crate) live_names: Vec<String>,
    pub(crate) live_kinds: Vec<LiveKind>,
    pub(crate) reconfigure: Option<Receiver<Reconfigure>>,
    pub(crate) error: Vec<f64>,
    pub(crate) run: RunState,
}

impl<P> std::fmt::Debug for ControlLoop<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("actuators", &self.controls.names())
            .field("readbacks", &self.readbacks.names())
            .field("gain", &self.law.gain)
            .field("step", &self.run.step)
            .finish_non_exhaustive()
    }
}

impl<P: ValueProvider> ControlLoop<P> {
    pub fn readbacks(&self) -> &ChannelSet {
        &self.readbacks
    }

    pub fn controls(&self) -> &ChannelSet {
        &self.controls
    }

    pub fn compensation(&self) -> Option<&Compensation> {
        self.compensation.as_ref()
    }

    pub fn params(&self) -> &LoopParams {
        &self.params
    }

    /// Gain in effect (after live bindings and reconfiguration).
    pub fn gain(&self) -> f64 {
        self.law.gain
    }

    pub fn matrix(&self) -> &CorrectionMatrix {
        self.law.matrix()
    }

    /// Despike threshold in effect, if despiking is configured.
    pub fn despike_threshold(&self) -> Option<f64> {
        self.despike.as_ref().map(|d| d.effective().threshold)
    }

    pub fn is_out_of_range(&self) -> bool {
        self.monitor.is_out_of_range()
    }

    /// Consecutive out-of-range iterations in the current episode.
    pub fn out_of_range_count(&self) -> u64 {
        self.monitor.backoff().counter()
    }

    pub fn steps_done(&self) -> u64 {
        self.run.step
    }

    pub fn summary(&self) -> &RunSummary {
        &self.run.summary
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Read the present actuator setpoints and start the clock. Called by `step` if needed.
    pub fn begin(&mut self) -> Result<()> {
        if self.run.begun {
            return Ok(());
        }
        let timeout = self.params.io_timeout;
        let initial = read_checked(
            &mut self.provider,
            self.controls.names(),
            timeout,
            "initial setpoints",
        )
        .wrap_err("reading initial actuator setpoints")?;
        self.controls.initial.copy_from_slice(&initial);
        if self.law.is_integral() {
            self.controls.value.copy_from_slice(&initial);
        } else {
            self.controls.value.iter_mut().for_each(|v| *v = 0.0);
        }
        self.controls.old.copy_from_slice(&self.controls.value);
        self.run.summary.final_control = initial;

        if let Some(comp) = self.compensation.as_mut() {
            let v = read_checked(
                &mut self.provider,
                comp.controls().names(),
                timeout,
                "initial setpoints",
            )
            .wrap_err("reading initial compensation setpoints")?;
            comp.begin(&v);
        }

        let now = self.pacer.now();
        self.run.started = Some(now);
        self.run.target = Some(now);
        self.run.start_epoch = unix_now();
        self.run.begun = true;
        self.pacer.ping()?;
        tracing::info!(
            actuators = self.controls.len(),
            readbacks = self.readbacks.len(),
            gain = self.law.gain,
            interval_ms = self.params.interval.as_millis() as u64,
            steps = self.params.steps,
            integral = self.law.is_integral(),
            dry_run = self.params.dry_run,
            compensation = self.compensation.is_some(),
            "control loop start"
        );
        Ok(())
    }

    /// Run one iteration, including its trailing sleep.
    pub fn step(&mut self) -> Result<IterationStatus> {
        self.begin()?;
        self.pacer.check_cancel()?;
        self.drain_reconfigure();
        if self.params.steps > 0 && self.run.step >= self.params.steps {
            return Ok(IterationStatus::Finished);
        }
        self.pacer.ping_if_due()?;
        self.run.step += 1;
        let step = self.run.step;
        let timeout = self.params.io_timeout;

        if let Some(trigger) = self.trigger.clone()
            && !self.wait_trigger(&trigger)?
        {
            tracing::warn!(step, channel = %trigger.channel, "trigger timed out; skipping iteration");
            self.run.summary.steps = step;
            self.run.summary.skipped += 1;
            self.run.target = Some(self.pacer.now());
            return Ok(IterationStatus::Skipped(SkipReason::NoTrigger));
        }

        self.apply_live_bindings()?;

        // Acquire
        let fresh = acquire_average(
            &mut self.provider,
            self.readbacks.names(),
            &self.average,
            timeout,
            &mut self.pacer,
        )?;
        self.readbacks.update(&fresh);
        if !self.run.first_read_done {
            self.readbacks.old.copy_from_slice(&fresh);
            self.readbacks.delta.iter_mut().for_each(|d| *d = 0.0);
            self.readbacks.capture_initial();
            self.run.first_read_done = true;
        }
        self.condition_readbacks(step);

        // Test
        let (test_values, failures) = self.evaluate_tests()?;
        let verdict = self
            .monitor
            .observe(self.pacer.now(), &failures, self.params.interval);
        if verdict.out_of_range {
            self.run.summary.out_of_range += 1;
        }
        if verdict.log {
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            let names = names.join(", ");
            tracing::warn!(
                step,
                failing = %names,
                count = self.monitor.backoff().counter(),
                "range test failed; correction suspended"
            );
            self.pacer
                .log_message(&format!("out of range: {names}"), Severity::Warning);
        }
        if verdict.recovered {
            tracing::info!(
                step,
                hold_off_ms = verdict.hold_off.as_millis() as u64,
                "back in range"
            );
        }
        if verdict.reset_due {
            self.restore_initial(step)?;
        }

        // Correct
        let hold = self.params.hold_present_values;
        for (j, e) in self.error.iter_mut().enumerate() {
            *e = if hold {
                self.readbacks.value[j] - self.readbacks.initial[j]
            } else {
                self.readbacks.value[j]
            };
        }
        let skip = if verdict.out_of_range {
            Some(SkipReason::OutOfRange)
        } else if verdict.recovered {
            Some(SkipReason::HoldOff)
        } else if let Some(al) = self.params.action_limit
            && self.error.iter().all(|e| e.abs() < al)
        {
            Some(SkipReason::ActionLimit)
        } else {
            None
        };

        self.law
            .correct(&mut self.controls, &self.error, skip.is_some())?;
        let pre_limit = self.compensation.as_ref().map(|_| self.controls.delta.clone());
        let integral = self.law.is_integral();
        let factor = if skip.is_some() {
            1.0
        } else {
            limit_deltas(&mut self.controls, &self.limits, integral)
        };
        if factor < 1.0 {
            tracing::debug!(step, factor, "deltas limited");
        }
        let clamped = clamp_setpoints(&mut self.controls, &self.control_windows, integral);
        if clamped > 0 {
            tracing::debug!(step, clamped, "setpoints clamped");
        }
        if let (Some(comp), Some(pre)) = (self.compensation.as_mut(), pre_limit.as_deref()) {
            comp.correct(pre, factor, skip.is_some())?;
        }
        if let Some(i) = self.controls.first_non_finite() {
            return Err(LawError::NonFinite {
                stage: "limit",
                channel: self.controls.names()[i].clone(),
            }
            .into());
        }
        let setpoints = self.law.setpoints(&self.controls);
        check_finite("write", self.controls.names(), &setpoints)?;
        let comp_setpoints = self.compensation.as_ref().map(Compensation::setpoints);
        if let (Some(comp), Some(cs)) = (self.compensation.as_ref(), comp_setpoints.as_deref()) {
            check_finite("write", comp.controls().names(), cs)?;
        }

        // Write
        if skip.is_none() && !self.params.dry_run {
            self.provider
                .write(self.controls.names(), &setpoints, timeout)
                .map_err(|e| map_provider_error(e.as_ref()))
                .wrap_err("writing actuator setpoints")?;
            if let (Some(comp), Some(cs)) = (self.compensation.as_ref(), comp_setpoints.as_deref())
            {
                self.provider
                    .write(comp.controls().names(), cs, timeout)
                    .map_err(|e| map_provider_error(e.as_ref()))
                    .wrap_err("writing compensation setpoints")?;
            }
        }
        tracing::debug!(step, skipped = skip.is_some(), factor, "iteration");

        // Record
        self.record(step, &setpoints, test_values, skip.is_some(), factor, &failures);
        self.run.summary.steps = step;
        if skip.is_some() {
            self.run.summary.skipped += 1;
        }
        self.run.summary.final_control = setpoints;

        // Sleep
        let interval = self.params.interval;
        if verdict.out_of_range {
            self.pacer.wait(verdict.sleep)?;
            self.run.target = Some(self.pacer.now());
        } else {
            let now = self.pacer.now();
            let (base, gap) = if verdict.recovered {
                (now, verdict.hold_off.saturating_add(interval))
            } else {
                (self.run.target.unwrap_or(now), interval)
            };
            let mut target = base.checked_add(gap).ok_or_else(|| {
                LawError::State(format!("next iteration {gap:?} away overflows the clock"))
            })?;
            if target < now {
                tracing::debug!(
                    step,
                    late_ms = (now - target).as_millis() as u64,
                    "iteration overran its interval"
                );
                target = now;
            } else {
                self.pacer.wait(target - now)?;
            }
            self.run.target = Some(target);
        }

        Ok(match skip {
            Some(r) => IterationStatus::Skipped(r),
            None => IterationStatus::Corrected { factor },
        })
    }

    /// Step until the configured number of steps has run.
    ///
    /// With `steps = 0` this only returns through an error, `LawError::Cancelled` included.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.begin()?;
        while self.step()? != IterationStatus::Finished {}
        let s = &self.run.summary;
        tracing::info!(
            steps = s.steps,
            skipped = s.skipped,
            out_of_range = s.out_of_range,
            glitches = s.glitches,
            "control loop finished"
        );
        Ok(self.run.summary.clone())
    }

    fn drain_reconfigure(&mut self) {
        let Some(rx) = self.reconfigure.as_ref() else {
            return;
        };
        let requests: Vec<Reconfigure> = rx.try_iter().collect();
        for r in requests {
            self.apply_reconfigure(r);
        }
    }

    fn apply_reconfigure(&mut self, request: Reconfigure) {
        match request {
            Reconfigure::Gain(g) if g.is_finite() => {
                self.law.gain = g;
                tracing::info!(gain = g, "gain reconfigured");
            }
            Reconfigure::CompensationGain(g) if g.is_finite() && self.compensation.is_some() => {
                if let Some(c) = self.compensation.as_mut() {
                    c.law_mut().gain = g;
                }
                tracing::info!(gain = g, "compensation gain reconfigured");
            }
            Reconfigure::Interval(d) if !d.is_zero() => {
                self.params.interval = d;
                tracing::info!(interval_ms = d.as_millis() as u64, "interval reconfigured");
            }
            Reconfigure::Steps(n) => {
                self.params.steps = n;
                tracing::info!(steps = n, "steps reconfigured");
            }
            Reconfigure::DryRun(b) => {
                self.params.dry_run = b;
                tracing::info!(dry_run = b, "dry run reconfigured");
            }
            Reconfigure::Matrix(m) => {
                match m.aligned_to(self.controls.names(), self.readbacks.names()) {
                    Ok(m) => {
                        self.law.set_matrix(m);
                        tracing::info!("correction matrix reconfigured");
                    }
                    Err(e) => tracing::warn!(error = %e, "rejected matrix reconfiguration"),
                }
            }
            other => tracing::warn!(request = ?other, "rejected invalid reconfiguration"),
        }
    }

    fn wait_trigger(&mut self, t: &TriggerSpec) -> Result<bool> {
        let start = self.pacer.now();
        let deadline = start.checked_add(t.timeout).unwrap_or(start);
        let names = std::slice::from_ref(&t.channel);
        loop {
            let v = read_checked(&mut self.provider, names, self.params.io_timeout, "trigger")?;
            if v[0] != 0.0 {
                return Ok(true);
            }
            let now = self.pacer.now();
            if now >= deadline {
                return Ok(false);
            }
            self.pacer.wait(t.poll.min(deadline - now))?;
        }
    }

    fn apply_live_bindings(&mut self) -> Result<()> {
        if self.live_names.is_empty() {
            return Ok(());
        }
        let values = read_checked(
            &mut self.provider,
            &self.live_names,
            self.params.io_timeout,
            "live bindings",
        )?;
        for (kind, v) in self.live_kinds.iter().zip(values) {
            match kind {
                LiveKind::Gain => self.law.gain = v,
                LiveKind::CompensationGain => {
                    if let Some(c) = self.compensation.as_mut() {
                        c.law_mut().gain = v;
                    }
                }
                LiveKind::Threshold => {
                    if let Some(d) = self.despike.as_mut() {
                        d.live_threshold = Some(v);
                    }
                }
                LiveKind::RampTrigger => {
                    let on = v != 0.0;
                    if on
                        && !self.run.last_ramp_trigger
                        && let Some(r) = self.despike.as_mut().and_then(|d| d.ramp.as_mut())
                    {
                        r.rearm();
                        tracing::info!("despike threshold ramp re-armed");
                    }
                    self.run.last_ramp_trigger = on;
                }
            }
        }
        Ok(())
    }

    /// Despike and clamp the fresh readbacks, then refresh their deltas.
    fn condition_readbacks(&mut self, step: u64) {
        let in_range = !self.monitor.is_out_of_range();
        if let Some(d) = self.despike.as_mut() {
            if in_range && let Some(r) = d.ramp.as_mut() {
                r.advance();
            }
            let params = d.effective();
            let n = despike_masked(
                &*self.despiker,
                &mut self.readbacks.value,
                &self.readbacks.despike,
                &params,
            );
            if n > 0 {
                tracing::debug!(step, replaced = n, threshold = params.threshold, "readbacks despiked");
            }
        }
        let clamped = clamp_values(&mut self.readbacks.value, &self.readback_windows);
        if clamped > 0 {
            tracing::debug!(step, clamped, "readbacks clamped");
        }
        for i in 0..self.readbacks.len() {
            self.readbacks.delta[i] = self.readbacks.value[i] - self.readbacks.old[i];
        }
    }

    fn evaluate_tests(&mut self) -> Result<(Option<Vec<f64>>, Vec<Failure>)> {
        let timeout = self.params.io_timeout;
        let mut failures = Vec::new();
        let mut values = None;
        if !self.tests.is_empty() {
            let mut v = read_checked(&mut self.provider, &self.test_names, timeout, "tests")?;
            if let Some(d) = self.despike.as_ref() {
                despike_masked(&*self.despiker, &mut v, &self.test_mask, &d.effective());
            }
            evaluate_scalars(&self.tests, &v, &mut failures);
            values = Some(v);
        }
        for wf in &self.waveforms {
            let data = self
                .provider
                .read_array(&wf.waveform, timeout)
                .map_err(|e| map_provider_error(e.as_ref()))?;
            if let Some(i) = data.iter().position(|v| !v.is_finite()) {
                return Err(LawError::NonFinite {
                    stage: "waveform test",
                    channel: format!("{}[{i}]", wf.waveform),
                }
                .into());
            }
            wf.evaluate(&data, &mut failures);
        }
        Ok((values, failures))
    }

    fn restore_initial(&mut self, step: u64) -> Result<()> {
        if self.params.dry_run {
            tracing::warn!(step, "reset time elapsed; dry run, setpoints not restored");
            return Ok(());
        }
        let timeout = self.params.io_timeout;
        self.provider
            .write(self.controls.names(), &self.controls.initial, timeout)
            .map_err(|e| map_provider_error(e.as_ref()))
            .wrap_err("restoring initial actuator setpoints")?;
        if self.law.is_integral() {
            self.controls.value.copy_from_slice(&self.controls.initial);
        } else {
            self.controls.value.iter_mut().for_each(|v| *v = 0.0);
        }
        if let Some(comp) = self.compensation.as_mut() {
            let initial = comp.controls().initial.clone();
            self.provider
                .write(comp.controls().names(), &initial, timeout)
                .map_err(|e| map_provider_error(e.as_ref()))
                .wrap_err("restoring initial compensation setpoints")?;
            comp.begin(&initial);
        }
        tracing::warn!(step, "reset time elapsed; initial setpoints restored");
        self.pacer
            .log_message("initial setpoints restored after reset time", Severity::Warning);
        Ok(())
    }

    fn record(
        &mut self,
        step: u64,
        setpoints: &[f64],
        tests: Option<Vec<f64>>,
        skipped: bool,
        factor: f64,
        failures: &[Failure],
    ) {
        let elapsed = self
            .run
            .started
            .map_or(0.0, |t| self.pacer.clock().secs_since(t));
        let rec = IterationRecord {
            step,
            epoch_time: self.run.start_epoch + elapsed,
            elapsed_time: elapsed,
            readbacks: self.readbacks.value.clone(),
            controls: setpoints.to_vec(),
            tests,
            skipped,
            limit_factor: factor,
        };
        if let Err(e) = self.sink.record(&rec) {
            tracing::warn!(step, error = %e, "diagnostics record failed");
        }

        if step % self.params.update_interval.max(1) == 0 {
            let stats = StatsRecord {
                step,
                elapsed_time: elapsed,
                readback: channel_stats(self.readbacks.names(), &self.readbacks.value),
                readback_delta: channel_stats(self.readbacks.names(), &self.readbacks.delta),
                control: channel_stats(self.controls.names(), setpoints),
                control_delta: channel_stats(self.controls.names(), &self.controls.delta),
            };
            tracing::debug!(
                step,
                readback_rms = stats.readback.rms,
                control_delta_rms = stats.control_delta.rms,
                "statistics"
            );
            if let Err(e) = self.sink.statistics(&stats) {
                tracing::warn!(step, error = %e, "diagnostics statistics failed");
            }
        }

        if self.glitch.is_enabled() {
            self.glitch.push(Snapshot {
                step,
                elapsed_time: elapsed,
                readbacks: rec.readbacks,
                controls: rec.controls,
            });
            let fired = is_glitch(
                &self.glitch_spec,
                rms(&self.readbacks.value),
                rms(setpoints),
                failures,
            );
            if fired {
                let rows = self.glitch.take();
                tracing::warn!(step, rows = rows.len(), "glitch captured");
                self.run.summary.glitches += 1;
                if let Err(e) = self.sink.glitch(&rows) {
                    tracing::warn!(step, error = %e, "diagnostics glitch dump failed");
                }
            }
        }
    }
}
