//! The `publish` handle given to every collector (spec.md §4.4).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reconwatch_bus::Bus;
use reconwatch_types::{Finding, LogEntry};
use serde_json::Value;

/// Cheap, cloneable cancellation flag the orchestrator can flip from outside
/// the collector's task; collectors check it at loop boundaries (spec.md §5).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Publisher {
    job_id: String,
    bus: Arc<Bus>,
    last_progress: AtomicU8,
    cancel: CancelToken,
    collected: Mutex<Vec<Finding>>,
    logs: Mutex<Vec<LogEntry>>,
}

impl Publisher {
    pub fn new(job_id: impl Into<String>, bus: Arc<Bus>, cancel: CancelToken) -> Self {
        Self {
            job_id: job_id.into(),
            bus,
            last_progress: AtomicU8::new(0),
            cancel,
            collected: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        }
    }

    /// Monotonic within a run: a lower value than the last reported progress
    /// is clamped up rather than rejected, so a collector racing two phases
    /// never regresses the UI.
    pub fn progress(&self, pct: u8, message: impl Into<String>) {
        let pct = pct.min(100);
        let prev = self.last_progress.fetch_max(pct, Ordering::Relaxed);
        let effective = pct.max(prev);
        self.bus.publish_progress(&self.job_id, effective, message);
    }

    pub fn finding(&self, mut finding: Finding) {
        finding.evidence.insert("job_id".to_string(), Value::String(self.job_id.clone()));
        let stamped = self.bus.publish_finding(&self.job_id, finding);
        self.collected.lock().push(stamped);
    }

    pub fn log(&self, level: &str, message: impl Into<String>, data: Option<Value>) {
        let entry = LogEntry { level: level.to_string(), message: message.into(), data, timestamp: chrono::Utc::now() };
        match level {
            "error" => tracing::error!(job_id = %self.job_id, message = %entry.message),
            "warn" => tracing::warn!(job_id = %self.job_id, message = %entry.message),
            _ => tracing::info!(job_id = %self.job_id, message = %entry.message),
        }
        self.logs.lock().push(entry);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn last_progress(&self) -> u8 {
        self.last_progress.load(Ordering::Relaxed)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn collected_findings(&self) -> Vec<Finding> {
        self.collected.lock().clone()
    }

    pub fn collected_logs(&self) -> Vec<LogEntry> {
        self.logs.lock().clone()
    }
}
