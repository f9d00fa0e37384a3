//! C13 — Orchestrator.
//!
//! Wires every other component behind one explicit `AppContext` instead of
//! the teacher's `static XDR_ENGINE: Lazy<Arc<RwLock<XdrEngine>>>` global
//! singleton (`frontend/phantom-xdr-core/src/lib.rs`) — the re-architecture
//! spec.md §9 calls for. `create_job`/`execute_job`/`quick_scan` implement
//! §4.13 verbatim; the per-job `Publisher`/`CancelToken` plumbing is
//! `reconwatch_collectors::publish`'s contract.

pub mod settings;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use reconwatch_bus::Bus;
use reconwatch_collectors::email_auth::EmailAuthCollector;
use reconwatch_collectors::exposure::ExposureCollector;
use reconwatch_collectors::infra_config::InfraConfigCollector;
use reconwatch_collectors::investigation::InvestigationCollector;
use reconwatch_collectors::network::NetworkSecurityCollector;
use reconwatch_collectors::{CancelToken, Collector, CollectorError, Publisher};
use reconwatch_darkweb::DarkWebPipeline;
use reconwatch_graph::beacon::BeaconDetector;
use reconwatch_graph::DomainGraph;
use reconwatch_queue::{JobFilter, JobStore, QueueError};
use reconwatch_risk::RiskEngine;
use reconwatch_storage::{Storage, UserContext};
use reconwatch_types::{Capability, Finding, Job, JobStatus, Metadata, Priority, RiskScore};
use serde_json::Value;
use thiserror::Error;

pub use settings::Settings;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("collector failed: {0}")]
    Collector(String),
    #[error("job {0} is not in a runnable state")]
    NotRunnable(String),
}

fn job_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect();
    format!("job-{suffix}")
}

/// Per-capability defaults merged under caller-supplied config (spec.md
/// §4.13 step 2). Only the dark-web pipeline has tunable knobs today; other
/// capabilities run with no required configuration.
fn default_config(capability: Capability, settings: &Settings) -> Metadata {
    let mut config = Metadata::new();
    if capability == Capability::DarkWebIntelligence {
        config.insert("max_urls".to_string(), Value::from(settings.darkweb_default_crawl_limit));
        config.insert("worker_threads".to_string(), Value::from(settings.darkweb_max_workers));
        config.insert("depth".to_string(), Value::from(1));
        config.insert("crawl_timeout".to_string(), Value::from(settings.darkweb_crawl_timeout.as_secs()));
    }
    config
}

fn merge_config(default: Metadata, override_config: Option<Metadata>) -> Metadata {
    let mut merged = default;
    if let Some(overrides) = override_config {
        merged.extend(overrides);
    }
    merged
}

/// Everything a job needs wired together, owned by the process that embeds
/// this crate (the `reconwatch` CLI binary, or a future HTTP façade). No
/// global state: every call that touches shared resources goes through an
/// `&AppContext`.
pub struct AppContext {
    pub queue: JobStore,
    pub bus: Arc<Bus>,
    pub storage: Arc<dyn Storage>,
    pub graph: Arc<DomainGraph>,
    pub beacons: Arc<BeaconDetector>,
    pub risk: RiskEngine,
    pub settings: Settings,
    collectors: HashMap<Capability, Arc<dyn Collector>>,
    cancel_tokens: dashmap::DashMap<String, CancelToken>,
}

impl AppContext {
    pub fn new(storage: Arc<dyn Storage>, settings: Settings) -> Self {
        let graph = Arc::new(DomainGraph::new());
        let beacons = Arc::new(BeaconDetector::new());
        let darkweb = DarkWebPipeline::new(graph.clone(), settings.socks_proxy_url());

        let mut collectors: HashMap<Capability, Arc<dyn Collector>> = HashMap::new();
        collectors.insert(Capability::ExposureDiscovery, Arc::new(ExposureCollector::new()));
        collectors.insert(Capability::EmailSecurity, Arc::new(EmailAuthCollector::new()));
        collectors.insert(Capability::InfrastructureTesting, Arc::new(InfraConfigCollector::new()));
        collectors.insert(Capability::Investigation, Arc::new(InvestigationCollector::new()));
        collectors.insert(Capability::DarkWebIntelligence, Arc::new(darkweb));
        collectors.insert(Capability::NetworkSecurity, Arc::new(NetworkSecurityCollector::new(beacons.clone())));

        Self {
            queue: JobStore::new(settings.queue_capacity),
            bus: Arc::new(Bus::new()),
            storage,
            graph,
            beacons,
            risk: RiskEngine::new(),
            settings,
            collectors,
            cancel_tokens: dashmap::DashMap::new(),
        }
    }

    /// §4.13 `create_job`.
    pub async fn create_job(
        &self,
        capability: Capability,
        target: impl Into<String>,
        config: Option<Metadata>,
        priority: Option<Priority>,
        user_id: Option<String>,
    ) -> Result<Job, OrchestratorError> {
        let mut job = Job::new(job_id(), capability, target.into(), priority.unwrap_or(Priority::Normal));
        job.config = merge_config(default_config(capability, &self.settings), config);
        job.owner_user_id = user_id;
        job.status = JobStatus::Queued;

        self.queue.put(job.clone())?;
        if let Err(err) = self.storage.save_job(&job).await {
            tracing::warn!(job_id = %job.id, error = %err, "job persistence failed, continuing from in-memory state");
        }
        tracing::info!(job_id = %job.id, capability = ?job.capability, target = %job.target, "job_created");
        Ok(job)
    }

    /// Cancels a queued or running job. A queued job is marked cancelled in
    /// place (the heap entry is skipped by `pop_next` once the stored status
    /// no longer reads `Queued`); a running job's cancel token is flipped so
    /// the collector notices at its next loop boundary.
    pub fn cancel_job(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let mut job = self.queue.get(job_id).ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if let Some(token) = self.cancel_tokens.get(job_id) {
            token.cancel();
        }
        if job.status == JobStatus::Queued || job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            self.queue.put(job)?;
        }
        Ok(())
    }

    /// §4.13 `execute_job`. Runs the job's capability to completion,
    /// persisting transitions and findings as it goes, and returns the
    /// final job record.
    pub async fn execute_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let mut job = self.queue.get(job_id).ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Queued && job.status != JobStatus::Pending {
            return Err(OrchestratorError::NotRunnable(job_id.to_string()));
        }

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.queue.put(job.clone())?;
        if let Err(err) = self.storage.save_job(&job).await {
            tracing::warn!(job_id = %job.id, error = %err, "job persistence failed, continuing from in-memory state");
        }

        let collector = self.collectors.get(&job.capability).cloned();
        let cancel = CancelToken::new();
        self.cancel_tokens.insert(job.id.clone(), cancel.clone());
        let publisher = Publisher::new(job.id.clone(), self.bus.clone(), cancel);

        let outcome = match collector {
            Some(collector) => collector.run(&job, &publisher).await,
            None => Err(CollectorError::Failed(format!("no collector registered for {:?}", job.capability))),
        };
        self.cancel_tokens.remove(&job.id);

        match outcome {
            Ok(findings) => {
                self.persist_and_notify(&job, &findings).await;
                job.findings = findings;
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.completed_at = Some(Utc::now());
                job.execution_logs = publisher.collected_logs();
                tracing::info!(job_id = %job.id, findings = job.findings.len(), "job_completed");
            }
            Err(CollectorError::Cancelled) => {
                let findings = publisher.collected_findings();
                self.persist_and_notify(&job, &findings).await;
                job.findings = findings;
                job.status = JobStatus::Cancelled;
                job.progress = publisher.last_progress();
                job.completed_at = Some(Utc::now());
                job.execution_logs = publisher.collected_logs();
            }
            Err(CollectorError::Failed(message)) => {
                // spec.md §4.13 step 5 says progress is frozen on exception,
                // not forced to 100 — taken as authoritative over §3's more
                // general "100 iff completed|failed" invariant (see DESIGN.md).
                let findings = publisher.collected_findings();
                self.persist_and_notify(&job, &findings).await;
                job.findings = findings;
                job.status = JobStatus::Failed;
                job.error = Some(message.clone());
                job.progress = publisher.last_progress();
                job.completed_at = Some(Utc::now());
                job.execution_logs = publisher.collected_logs();
                tracing::warn!(job_id = %job.id, error = %message, "job_failed");
            }
        }

        self.queue.put(job.clone())?;
        if let Err(err) = self.storage.save_job(&job).await {
            tracing::warn!(job_id = %job.id, error = %err, "job persistence failed, continuing from in-memory state");
        }
        self.risk.calculate_risk_score(&job.target, &job.findings);
        Ok(job)
    }

    /// §4.13 step 3: tag, persist and (for critical/high severity with a
    /// known owner) notify. Notification *dispatch* is out of scope (a
    /// named Non-goal); the decision point itself — which findings would
    /// page someone — still runs, logged rather than sent anywhere.
    async fn persist_and_notify(&self, job: &Job, findings: &[Finding]) {
        for finding in findings {
            if let Err(err) = self.storage.save_finding(finding, job.owner_user_id.as_deref()).await {
                tracing::warn!(job_id = %job.id, error = %err, "finding persistence failed, continuing from in-memory state");
            }
            if matches!(finding.severity, reconwatch_types::Severity::Critical | reconwatch_types::Severity::High) {
                if let Some(user_id) = &job.owner_user_id {
                    tracing::info!(job_id = %job.id, user_id = %user_id, finding = %finding.title, "notification_created");
                }
            }
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.queue.get(job_id)
    }

    pub fn list_jobs(&self, filter: JobFilter) -> Vec<Job> {
        self.queue.list(filter)
    }

    /// §4.13 `quick_scan`: Exposure, Infra, Email sequentially at high
    /// priority, aggregated into one risk score over the union of findings.
    pub async fn quick_scan(&self, domain: impl Into<String>) -> Result<QuickScanSummary, OrchestratorError> {
        let target = domain.into();
        let mut jobs = Vec::with_capacity(3);
        for capability in [Capability::ExposureDiscovery, Capability::InfrastructureTesting, Capability::EmailSecurity] {
            let job = self.create_job(capability, target.clone(), None, Some(Priority::High), None).await?;
            let completed = self.execute_job(&job.id).await?;
            jobs.push(completed);
        }

        let all_findings: Vec<Finding> = jobs.iter().flat_map(|j| j.findings.clone()).collect();
        let risk = self.risk.calculate_risk_score(&target, &all_findings);
        Ok(QuickScanSummary { target, jobs, risk })
    }

    pub async fn storage_jobs(&self, ctx: &UserContext) -> Result<Vec<Job>, OrchestratorError> {
        self.storage.list_jobs(ctx).await.map_err(|e| OrchestratorError::Collector(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct QuickScanSummary {
    pub target: String,
    pub jobs: Vec<Job>,
    pub risk: RiskScore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_storage::MemoryStore;

    fn context() -> AppContext {
        AppContext::new(Arc::new(MemoryStore::new()), Settings::default())
    }

    #[test]
    fn generated_job_ids_have_expected_shape() {
        let id = job_id();
        assert!(id.starts_with("job-"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn create_job_queues_with_merged_default_config() {
        let ctx = context();
        let job = ctx.create_job(Capability::DarkWebIntelligence, "example.onion", None, None, None).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.config.get("max_urls").and_then(|v| v.as_u64()), Some(50));
        assert_eq!(ctx.queue.pop_next().unwrap().id, job.id);
    }

    #[tokio::test]
    async fn create_job_override_wins_over_default() {
        let ctx = context();
        let mut overrides = Metadata::new();
        overrides.insert("max_urls".to_string(), Value::from(5));
        let job = ctx
            .create_job(Capability::DarkWebIntelligence, "example.onion", Some(overrides), None, None)
            .await
            .unwrap();
        assert_eq!(job.config.get("max_urls").and_then(|v| v.as_u64()), Some(5));
    }

    #[tokio::test]
    async fn queue_saturation_is_surfaced_as_queue_full() {
        let ctx = AppContext::new(Arc::new(MemoryStore::new()), Settings { queue_capacity: 1, ..Settings::default() });
        ctx.create_job(Capability::ExposureDiscovery, "a.com", None, None, None).await.unwrap();
        let err = ctx.create_job(Capability::ExposureDiscovery, "b.com", None, None, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Queue(QueueError::Full)));
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_marks_it_cancelled_without_running_it() {
        let ctx = context();
        let job = ctx.create_job(Capability::ExposureDiscovery, "a.com", None, None, None).await.unwrap();
        ctx.cancel_job(&job.id).unwrap();
        assert_eq!(ctx.get_job(&job.id).unwrap().status, JobStatus::Cancelled);
        assert!(ctx.queue.pop_next().is_none());
    }

    #[tokio::test]
    async fn execute_job_on_unknown_capability_fails_cleanly() {
        // Investigation collector does a live HTTP fetch; exercise the
        // not-runnable path instead so this test stays network-free.
        let ctx = context();
        let job = ctx.create_job(Capability::ExposureDiscovery, "a.com", None, None, None).await.unwrap();
        ctx.cancel_job(&job.id).unwrap();
        let err = ctx.execute_job(&job.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRunnable(_)));
    }
}
