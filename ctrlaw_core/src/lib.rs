#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop setpoint correction (transport-agnostic).
//!
//! Every iteration reads a set of readback channels, turns their deviation into
//! actuator corrections through a gain matrix, limits and writes them. All I/O goes
//! through `ctrlaw_traits::ValueProvider`; time, watchdog and diagnostics go through
//! `Clock`, `Liveness` and `DiagnosticsSink`.
//!
//! ## Architecture
//!
//! - **Acquisition**: averaged, finite-checked reads (`acquire`)
//! - **Conditioning**: neighbour despiking with a rampable threshold (`despike`), readback clamps
//! - **Range tests**: scalar and waveform windows, hold-off, reset, log backoff (`range_test`)
//! - **Correction**: `delta = −gain · K · error`, optional per-actuator IIR (`law`, `filter`)
//! - **Limiting**: proportional delta scaling and setpoint windows (`limiter`)
//! - **Compensation**: a second law driven by the primary deltas (`compensation`)
//! - **Scheduling**: fixed-interval pacing with watchdog pings (`scheduler`, `wait`)
//!
//! Build a loop with `DynControlLoop::builder()` or, from a loaded configuration,
//! `conversions::builder_from_loaded`.

pub mod acquire;
pub mod builder;
pub mod channel;
pub mod compensation;
pub mod config;
pub mod conversions;
pub mod despike;
pub mod error;
pub mod filter;
pub mod glitch;
pub mod law;
pub mod limiter;
pub mod matrix;
pub mod mocks;
pub mod provider_error;
pub mod ring;
pub mod scheduler;
pub mod stats;
pub mod status;
pub mod util;
pub mod wait;

pub use builder::{
    ControlLoopBuilder, DynControlLoop, LoopParts, Missing, Set, build_control_loop,
};
pub use channel::ChannelSet;
pub use compensation::{Compensation, CompensationSpec};
pub use config::{
    AverageSpec, DespikeParams, GlitchSpec, LiveBindings, LoopParams, RampSpec, TriggerSpec,
};
pub use conversions::builder_from_loaded;
pub use despike::{Despike, NeighborDespiker, ThresholdRamp};
pub use error::{BuildError, LawError, Report, Result};
pub use filter::{FilterCoefficients, IirFilter};
pub use law::CorrectionLaw;
pub use limiter::{DeltaLimits, Window};
pub use matrix::CorrectionMatrix;
pub use range_test::{TestSpec, WaveformPoint, WaveformTest};
pub use scheduler::{ControlLoop, Reconfigure};
pub use status::{IterationStatus, RunSummary, SkipReason};
