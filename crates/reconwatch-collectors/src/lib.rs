//! C4 — Collector Interface, plus the C5–C8 collector implementations.
//!
//! The per-capability engine shape (`...Trait` + `...Engine` struct with an
//! async `run`) is grounded on `frontend/phantom-xdr-core/src/{endpoint_protection,
//! api_security, email_security, network_analysis}.rs`; exact phase lists,
//! wordlists and scoring tables are grounded on
//! `examples/original_source/backend/app/collectors/{web_recon,email_audit}.py`.

pub mod exposure;
pub mod email_auth;
pub mod infra_config;
pub mod investigation;
pub mod network;
pub mod publish;

pub use publish::{CancelToken, Publisher};

use async_trait::async_trait;
use reconwatch_types::{Finding, Job};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector cancelled")]
    Cancelled,
    #[error("collector failed: {0}")]
    Failed(String),
}

/// C4 contract every capability implements. `publish` is given progress,
/// finding and log sinks; collectors must publish each finding exactly once
/// and report progress monotonically from 5 to 100 (spec.md §4.4).
#[async_trait]
pub trait Collector: Send + Sync {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError>;
}
