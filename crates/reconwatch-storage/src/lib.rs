//! C12 — Storage Adapter.
//!
//! Exposes per-concern stores (jobs, findings, positive indicators, graph
//! entities/edges) behind a single `Storage` trait, grounded on
//! `phantom-secop-core/src/datastore.rs`'s `DataStore` trait family. Each
//! store is constructed with a `UserContext` (`db_conn` is out of scope per
//! spec.md §1 — "relational schema details" is an external collaborator;
//! this crate is the contract a real Postgres/Redis backend implements).
//! Non-admin reads filter by `user_id`; non-admin writes stamp it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reconwatch_types::{Finding, GraphEdge, GraphEntity, Job, PositiveIndicator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl UserContext {
    pub fn admin() -> Self {
        Self { user_id: None, is_admin: true }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), is_admin: false }
    }

    fn visible(&self, owner: Option<&String>) -> bool {
        self.is_admin || owner.map(|o| Some(o) == self.user_id.as_ref()).unwrap_or(true)
    }
}

/// The storage contract. Writes are best-effort relative to in-memory
/// orchestrator state: callers log failures and proceed (spec.md §4.12).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<(), StorageError>;
    async fn get_job(&self, id: &str, ctx: &UserContext) -> Result<Option<Job>, StorageError>;
    async fn list_jobs(&self, ctx: &UserContext) -> Result<Vec<Job>, StorageError>;

    async fn save_finding(&self, finding: &Finding, owner_user_id: Option<&str>) -> Result<(), StorageError>;
    async fn list_findings(&self, job_id: &str, ctx: &UserContext) -> Result<Vec<Finding>, StorageError>;

    async fn save_positive_indicator(&self, indicator: &PositiveIndicator) -> Result<(), StorageError>;
    async fn list_positive_indicators(&self, target: &str, ctx: &UserContext) -> Result<Vec<PositiveIndicator>, StorageError>;

    async fn save_entity(&self, entity: &GraphEntity) -> Result<(), StorageError>;
    async fn save_edge(&self, edge: &GraphEdge, owner_user_id: Option<&str>) -> Result<(), StorageError>;
    async fn list_entities(&self, ctx: &UserContext) -> Result<Vec<GraphEntity>, StorageError>;
    async fn list_edges(&self, ctx: &UserContext) -> Result<Vec<GraphEdge>, StorageError>;
}

struct FindingRecord {
    finding: Finding,
    owner_user_id: Option<String>,
}

struct EdgeRecord {
    edge: GraphEdge,
    owner_user_id: Option<String>,
}

/// In-memory implementation. Stands in for a real Postgres/Redis-backed
/// store, matching the teacher's `DataStoreType::Memory` default variant.
#[derive(Default)]
pub struct MemoryStore {
    jobs: DashMap<String, Job>,
    findings: DashMap<String, FindingRecord>,
    indicators: DashMap<String, PositiveIndicator>,
    entities: DashMap<String, GraphEntity>,
    edges: DashMap<(String, String, String), EdgeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str, ctx: &UserContext) -> Result<Option<Job>, StorageError> {
        Ok(self
            .jobs
            .get(id)
            .filter(|j| ctx.visible(j.owner_user_id.as_ref()))
            .map(|j| j.clone()))
    }

    async fn list_jobs(&self, ctx: &UserContext) -> Result<Vec<Job>, StorageError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| ctx.visible(j.owner_user_id.as_ref()))
            .map(|j| j.clone())
            .collect())
    }

    async fn save_finding(&self, finding: &Finding, owner_user_id: Option<&str>) -> Result<(), StorageError> {
        self.findings.insert(
            finding.id.clone(),
            FindingRecord { finding: finding.clone(), owner_user_id: owner_user_id.map(String::from) },
        );
        Ok(())
    }

    async fn list_findings(&self, job_id: &str, ctx: &UserContext) -> Result<Vec<Finding>, StorageError> {
        Ok(self
            .findings
            .iter()
            .filter(|r| ctx.visible(r.owner_user_id.as_ref()))
            .filter(|r| r.finding.job_id() == Some(job_id))
            .map(|r| r.finding.clone())
            .collect())
    }

    async fn save_positive_indicator(&self, indicator: &PositiveIndicator) -> Result<(), StorageError> {
        self.indicators.insert(indicator.id.clone(), indicator.clone());
        Ok(())
    }

    async fn list_positive_indicators(&self, target: &str, ctx: &UserContext) -> Result<Vec<PositiveIndicator>, StorageError> {
        Ok(self
            .indicators
            .iter()
            .filter(|i| ctx.visible(Some(&i.user_id)))
            .filter(|i| i.target == target)
            .map(|i| i.clone())
            .collect())
    }

    async fn save_entity(&self, entity: &GraphEntity) -> Result<(), StorageError> {
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn save_edge(&self, edge: &GraphEdge, owner_user_id: Option<&str>) -> Result<(), StorageError> {
        self.edges.insert(edge.key(), EdgeRecord { edge: edge.clone(), owner_user_id: owner_user_id.map(String::from) });
        Ok(())
    }

    async fn list_entities(&self, ctx: &UserContext) -> Result<Vec<GraphEntity>, StorageError> {
        Ok(self
            .entities
            .iter()
            .filter(|e| ctx.visible(e.owner_user_id.as_ref()))
            .map(|e| e.clone())
            .collect())
    }

    async fn list_edges(&self, ctx: &UserContext) -> Result<Vec<GraphEdge>, StorageError> {
        Ok(self
            .edges
            .iter()
            .filter(|r| ctx.visible(r.owner_user_id.as_ref()))
            .map(|r| r.edge.clone())
            .collect())
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_types::{Capability, Priority};

    #[tokio::test]
    async fn non_admin_cannot_see_other_users_jobs() {
        let store = MemoryStore::new();
        let mut job = Job::new("job-1".into(), Capability::ExposureDiscovery, "example.com".into(), Priority::Normal);
        job.owner_user_id = Some("alice".into());
        store.save_job(&job).await.unwrap();

        let bob = UserContext::user("bob");
        assert!(store.get_job("job-1", &bob).await.unwrap().is_none());

        let admin = UserContext::admin();
        assert!(store.get_job("job-1", &admin).await.unwrap().is_some());

        let alice = UserContext::user("alice");
        assert!(store.get_job("job-1", &alice).await.unwrap().is_some());
    }
}
