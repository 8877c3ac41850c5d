use ctrlaw_traits::{DiagnosticsSink, IterationRecord, Snapshot, StatsRecord};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Stored {
    records: Vec<IterationRecord>,
    stats: Vec<StatsRecord>,
    glitches: Vec<Vec<Snapshot>>,
}

/// In-memory diagnostics sink. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Stored>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stored> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn records(&self) -> Vec<IterationRecord> {
        self.lock().records.clone()
    }

    pub fn stats(&self) -> Vec<StatsRecord> {
        self.lock().stats.clone()
    }

    /// One entry per glitch dump, each oldest first.
    pub fn glitches(&self) -> Vec<Vec<Snapshot>> {
        self.lock().glitches.clone()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(
        &mut self,
        record: &IterationRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.lock().records.push(record.clone());
        Ok(())
    }

    fn statistics(
        &mut self,
        stats: &StatsRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.lock().stats.push(stats.clone());
        Ok(())
    }

    fn glitch(
        &mut self,
        snapshots: &[Snapshot],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.lock().glitches.push(snapshots.to_vec());
        Ok(())
    }
}
