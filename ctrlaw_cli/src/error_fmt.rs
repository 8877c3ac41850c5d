//! Human-readable error descriptions, exit codes and structured JSON errors.

use ctrlaw_core::error::{BuildError, LawError};
use ctrlaw_traits::LivenessStatus;

fn law_error(err: &eyre::Report) -> Option<&LawError> {
    err.chain().find_map(|c| c.downcast_ref::<LawError>())
}

fn build_error(err: &eyre::Report) -> Option<&BuildError> {
    err.chain().find_map(|c| c.downcast_ref::<BuildError>())
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = build_error(err) {
        return match be {
            BuildError::MissingProvider => {
                "What happened: No value provider was given to the correction loop.\nLikely causes: The transport failed to initialize or was not passed to the builder.\nHow to fix: Construct the provider and pass it via with_provider(...).".to_string()
            }
            BuildError::MissingMatrix => {
                "What happened: No correction matrix was given to the loop.\nLikely causes: [tables].matrix is missing or the builder was not configured.\nHow to fix: Point [tables].matrix at a CSV of actuator rows and readback columns.".to_string()
            }
            BuildError::OverlappingActuators(names) => format!(
                "What happened: Compensation actuators overlap the primary actuators ({names}).\nLikely causes: The compensation matrix reuses a row name from the correction matrix.\nHow to fix: Give the compensation law its own actuators."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `ctrlaw check`."
            ),
            BuildError::Shape(msg) => format!(
                "What happened: Channel tables do not line up ({msg}).\nLikely causes: A table names a channel the correction matrix does not have.\nHow to fix: Fix the channel names in the CSV tables, then rerun `ctrlaw check`."
            ),
        };
    }

    if let Some(le) = law_error(err) {
        return match le {
            LawError::Timeout => "What happened: A channel read or write timed out.\nLikely causes: The transport is unreachable or [loop].io_timeout_ms is too low.\nHow to fix: Check the transport and consider raising io_timeout_ms.".to_string(),
            LawError::Transport(msg) => format!(
                "What happened: Transport error ({msg}).\nLikely causes: A channel name is unknown to the transport or the connection dropped.\nHow to fix: Verify channel names in the tables and [plant], and that the transport is up."
            ),
            LawError::NonFinite { stage, channel } => format!(
                "What happened: A non-finite value appeared during {stage} on {channel}.\nLikely causes: A readback returned NaN/Inf or the matrix and gain drove a setpoint out of range.\nHow to fix: Inspect that channel and the matrix row or column feeding it."
            ),
            LawError::Liveness(LivenessStatus::Abort) => "What happened: The watchdog asked the loop to stop.\nLikely causes: An operator or supervisor aborted the run.\nHow to fix: Start a new run when ready.".to_string(),
            LawError::Liveness(status) => format!(
                "What happened: The watchdog answered {status}.\nLikely causes: The supervisor stopped hearing from the loop or failed itself.\nHow to fix: Check the supervisor, and that [loop].ping_interval_s is below its timeout."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Config loading reports plain eyre messages.
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();
    if lower.starts_with("loading config")
        || lower.contains("invalid configuration")
        || lower.contains("parsing toml")
        || lower.contains("csv")
        || lower.contains("reading config file")
    {
        return format!(
            "What happened: Configuration could not be loaded.\nLikely causes: {msg}\nHow to fix: Edit the config or table named above and rerun `ctrlaw check`."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable short name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if build_error(err).is_some() {
        return "Config";
    }
    match law_error(err) {
        Some(LawError::Liveness(LivenessStatus::Abort)) => "LivenessAbort",
        Some(LawError::Liveness(LivenessStatus::Timeout)) => "LivenessTimeout",
        Some(LawError::Liveness(_)) => "LivenessError",
        Some(LawError::Timeout) => "Timeout",
        Some(LawError::Transport(_)) => "Transport",
        Some(LawError::NonFinite { .. }) => "NonFinite",
        Some(LawError::Cancelled) => "Cancelled",
        Some(LawError::State(_)) | None => {
            if is_config_error(err) {
                "Config"
            } else {
                "Error"
            }
        }
    }
}

fn is_config_error(err: &eyre::Report) -> bool {
    err.chain().any(|c| {
        let s = c.to_string();
        s.starts_with("invalid configuration")
            || s.starts_with("parsing TOML config")
            || s.starts_with("reading config file")
            || s.starts_with("loading ")
    })
}

/// Exit codes: 0 ok or cancelled, 1 generic, 2 liveness abort, 3 liveness timeout,
/// 4 transport, 5 non-finite, 6 configuration.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Cancelled" => 0,
        "LivenessAbort" => 2,
        "LivenessTimeout" => 3,
        "Timeout" | "Transport" => 4,
        "NonFinite" => 5,
        "Config" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(LawError::NonFinite { stage, channel }) = law_error(err) {
        obj["details"] = json!({ "stage": stage, "channel": channel });
    }
    obj.to_string()
}
