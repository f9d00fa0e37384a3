//! C2 — Finding Bus and C3 — Observer Channel Registry.
//!
//! `FindingStore` holds a per-job, lock-protected append-only list of
//! findings. `ObserverRegistry` maps `job_id -> observer sink` for live
//! streaming. `Bus` composes the two: every `add`/`add_many` call appends
//! to the store and best-effort fans the finding out to any subscriber,
//! exactly as spec.md §4.2 describes ("Findings published during the run
//! are also pushed to C3's subscribers for that job").

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use reconwatch_types::Finding;
use serde_json::Value;
use tokio::sync::mpsc;

/// Observer-facing event shapes (spec.md §4.3), bit-exact field sets.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Progress { progress: u8, message: String, timestamp: DateTime<Utc> },
    FindingEvent { data: Value, timestamp: DateTime<Utc> },
    Complete { total_findings: usize, urls_crawled: Option<usize>, total_time_seconds: f64, timestamp: DateTime<Utc> },
    Error { error: String, timestamp: DateTime<Utc> },
    Superseded,
}

const SINK_CAPACITY: usize = 256;

/// C3 — at most one sink per job; a second `subscribe` supersedes the first.
#[derive(Default)]
pub struct ObserverRegistry {
    sinks: DashMap<String, mpsc::Sender<ObserverEvent>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, job_id: &str) -> mpsc::Receiver<ObserverEvent> {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        if let Some(prev) = self.sinks.insert(job_id.to_string(), tx) {
            let _ = prev.try_send(ObserverEvent::Superseded);
        }
        rx
    }

    pub fn unsubscribe(&self, job_id: &str) {
        self.sinks.remove(job_id);
    }

    /// Best-effort, non-blocking. A full or dead sink is simply dropped;
    /// collectors never block on publication.
    pub fn publish(&self, job_id: &str, event: ObserverEvent) {
        if let Some(sink) = self.sinks.get(job_id) {
            if sink.try_send(event).is_err() {
                drop(sink);
                self.sinks.remove(job_id);
            }
        }
    }

    pub fn is_subscribed(&self, job_id: &str) -> bool {
        self.sinks.contains_key(job_id)
    }
}

/// C2 — per-job append-only finding list.
#[derive(Default)]
pub struct FindingStore {
    jobs: DashMap<String, Mutex<Vec<Finding>>>,
    // Monotonic per-job clock (nanoseconds since the first finding) used to
    // give `discovered_at` a total order even when wall-clock resolution
    // would otherwise tie two findings.
    clocks: DashMap<String, AtomicI64>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_timestamp(&self, job_id: &str) -> DateTime<Utc> {
        let clock = self.clocks.entry(job_id.to_string()).or_insert_with(|| AtomicI64::new(0));
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let prev = clock.load(Ordering::SeqCst);
        let next = now.max(prev + 1);
        clock.store(next, Ordering::SeqCst);
        DateTime::from_timestamp_nanos(next)
    }

    pub fn add(&self, job_id: &str, mut finding: Finding) -> Finding {
        finding.discovered_at = self.next_timestamp(job_id);
        let slot = self.jobs.entry(job_id.to_string()).or_default();
        slot.lock().push(finding.clone());
        finding
    }

    pub fn add_many(&self, job_id: &str, findings: Vec<Finding>) -> Vec<Finding> {
        let slot = self.jobs.entry(job_id.to_string()).or_default();
        let mut guard = slot.lock();
        let mut stamped = Vec::with_capacity(findings.len());
        for mut f in findings {
            f.discovered_at = self.next_timestamp(job_id);
            guard.push(f.clone());
            stamped.push(f);
        }
        stamped
    }

    /// Point-in-time snapshot: findings with `discovered_at` strictly after
    /// `after`. Concurrent appends made after the snapshot is taken are not
    /// included, per spec.md §4.2.
    pub fn get_since(&self, job_id: &str, after: DateTime<Utc>) -> Vec<Finding> {
        match self.jobs.get(job_id) {
            Some(slot) => {
                let guard = slot.lock();
                guard.iter().filter(|f| f.discovered_at > after).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn all(&self, job_id: &str) -> Vec<Finding> {
        match self.jobs.get(job_id) {
            Some(slot) => slot.lock().clone(),
            None => Vec::new(),
        }
    }
}

/// Glues C2 and C3: the thing collectors and the orchestrator actually hold.
#[derive(Default)]
pub struct Bus {
    pub store: FindingStore,
    pub observers: ObserverRegistry,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_finding(&self, job_id: &str, finding: Finding) -> Finding {
        let stamped = self.store.add(job_id, finding);
        let data = serde_json::to_value(&stamped).unwrap_or(Value::Null);
        self.observers.publish(
            job_id,
            ObserverEvent::FindingEvent { data, timestamp: stamped.discovered_at },
        );
        stamped
    }

    pub fn publish_progress(&self, job_id: &str, progress: u8, message: impl Into<String>) {
        self.observers.publish(
            job_id,
            ObserverEvent::Progress { progress, message: message.into(), timestamp: Utc::now() },
        );
    }

    pub fn publish_complete(&self, job_id: &str, total_findings: usize, urls_crawled: Option<usize>, total_time_seconds: f64) {
        self.observers.publish(
            job_id,
            ObserverEvent::Complete { total_findings, urls_crawled, total_time_seconds, timestamp: Utc::now() },
        );
    }

    pub fn publish_error(&self, job_id: &str, error: impl Into<String>) {
        self.observers.publish(job_id, ObserverEvent::Error { error: error.into(), timestamp: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_types::{Capability, Severity};

    fn finding(title: &str) -> Finding {
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            capability: Capability::ExposureDiscovery,
            severity: Severity::Info,
            risk_score: 1.0,
            title: title.to_string(),
            description: String::new(),
            evidence: Default::default(),
            affected_assets: vec![],
            recommendations: vec![],
            discovered_at: Utc::now(),
            target: "example.com".to_string(),
        }
    }

    #[test]
    fn get_since_zero_returns_findings_in_append_order() {
        let store = FindingStore::new();
        store.add("job-1", finding("f1"));
        store.add("job-1", finding("f2"));
        store.add("job-1", finding("f3"));

        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        let all = store.get_since("job-1", epoch);
        assert_eq!(all.iter().map(|f| f.title.as_str()).collect::<Vec<_>>(), vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn get_since_excludes_findings_added_after_the_snapshot() {
        let store = FindingStore::new();
        store.add("job-1", finding("f1"));
        let snapshot_after = store.all("job-1").last().unwrap().discovered_at;
        store.add("job-1", finding("f2"));

        let later = store.get_since("job-1", snapshot_after);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].title, "f2");
    }

    #[tokio::test]
    async fn second_subscribe_supersedes_the_first() {
        let registry = ObserverRegistry::new();
        let mut first = registry.subscribe("job-1");
        let _second = registry.subscribe("job-1");

        let evt = first.recv().await.unwrap();
        assert!(matches!(evt, ObserverEvent::Superseded));
    }

    #[tokio::test]
    async fn bus_fans_out_findings_to_subscriber() {
        let bus = Bus::new();
        let mut rx = bus.observers.subscribe("job-1");
        bus.publish_finding("job-1", finding("f1"));

        let evt = rx.recv().await.unwrap();
        assert!(matches!(evt, ObserverEvent::FindingEvent { .. }));
        assert_eq!(bus.store.all("job-1").len(), 1);
    }
}
