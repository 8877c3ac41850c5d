//! Maps `Box<dyn Error>` from the `ValueProvider` boundary to a typed `LawError`.
//!
//! With the `sim-errors` feature the simulated plant's `SimError` is downcast for an
//! exact mapping; anything else falls back to inspecting the message.

use crate::error::LawError;

pub fn map_provider_error(e: &(dyn std::error::Error + 'static)) -> LawError {
    #[cfg(feature = "sim-errors")]
    {
        if let Some(se) = e.downcast_ref::<ctrlaw_sim::SimError>() {
            return match se {
                ctrlaw_sim::SimError::Timeout(_) => LawError::Timeout,
                other => LawError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        LawError::Timeout
    } else {
        LawError::Transport(s)
    }
}
