//! JSON-lines diagnostics sink for `ctrlaw run --records`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ctrlaw_traits::record::{ChannelStats, IterationRecord, Snapshot, StatsRecord};
use ctrlaw_traits::DiagnosticsSink;
use eyre::WrapErr;
use serde_json::{Value, json};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One JSON object per line, tagged by `kind` (`record`, `stats`, `glitch`).
pub struct JsonlSink<W: Write> {
    out: W,
}

impl JsonlSink<BufWriter<File>> {
    pub fn create(path: &Path) -> eyre::Result<Self> {
        let f = File::create(path)
            .wrap_err_with(|| format!("creating records file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(f)))
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn line(&mut self, v: &Value) -> Result<(), BoxError> {
        serde_json::to_writer(&mut self.out, v)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

fn stats_json(s: &ChannelStats) -> Value {
    json!({
        "rms": s.rms,
        "mean": s.mean,
        "mad": s.mad,
        "largest": s.largest,
        "largest_name": s.largest_name,
    })
}

impl<W: Write> DiagnosticsSink for JsonlSink<W> {
    fn record(&mut self, r: &IterationRecord) -> Result<(), BoxError> {
        self.line(&json!({
            "kind": "record",
            "step": r.step,
            "epoch_time": r.epoch_time,
            "elapsed_time": r.elapsed_time,
            "readbacks": r.readbacks,
            "controls": r.controls,
            "tests": r.tests,
            "skipped": r.skipped,
            "limit_factor": r.limit_factor,
        }))
    }

    fn statistics(&mut self, s: &StatsRecord) -> Result<(), BoxError> {
        self.line(&json!({
            "kind": "stats",
            "step": s.step,
            "elapsed_time": s.elapsed_time,
            "readback": stats_json(&s.readback),
            "readback_delta": stats_json(&s.readback_delta),
            "control": stats_json(&s.control),
            "control_delta": stats_json(&s.control_delta),
        }))
    }

    fn glitch(&mut self, rows: &[Snapshot]) -> Result<(), BoxError> {
        let rows: Vec<Value> = rows
            .iter()
            .map(|s| {
                json!({
                    "step": s.step,
                    "elapsed_time": s.elapsed_time,
                    "readbacks": s.readbacks,
                    "controls": s.controls,
                })
            })
            .collect();
        self.line(&json!({ "kind": "glitch", "rows": rows }))?;
        // Glitch dumps are rare and worth having on disk immediately.
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Drop for JsonlSink<W> {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "flushing records file failed");
        }
    }
}
