//! Shared domain types for the ReconWatch threat-intelligence engine.
//!
//! These are the entities described in the platform's data model: jobs,
//! findings, graph entities/edges, dark-web sites, extracted entities and
//! risk scores. Every store and collector in the workspace speaks these
//! types at its boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Metadata = HashMap<String, Value>;

/// A unit of work a collector can perform against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ExposureDiscovery,
    DarkWebIntelligence,
    EmailSecurity,
    InfrastructureTesting,
    NetworkSecurity,
    Investigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Valid forward transitions per spec.md §3: pending -> queued -> running -> terminal.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Lower value = scheduled earlier. Ord derive gives min-heap ordering for
/// `Reverse<Priority>` in a `BinaryHeap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Background = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity/score band agreement required by the Finding invariant.
    pub fn score_band(self) -> (f64, f64) {
        match self {
            Severity::Info => (0.0, 20.0),
            Severity::Low => (20.0, 40.0),
            Severity::Medium => (40.0, 65.0),
            Severity::High => (65.0, 85.0),
            Severity::Critical => (85.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub capability: Capability,
    pub severity: Severity,
    pub risk_score: f64,
    pub title: String,
    pub description: String,
    pub evidence: Metadata,
    pub affected_assets: Vec<String>,
    pub recommendations: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub target: String,
}

impl Finding {
    pub fn job_id(&self) -> Option<&str> {
        self.evidence.get("job_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub capability: Capability,
    pub target: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub progress: u8,
    pub config: Metadata,
    pub metadata: Metadata,
    pub execution_logs: Vec<LogEntry>,
    pub findings: Vec<Finding>,
    pub owner_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: String, capability: Capability, target: String, priority: Priority) -> Self {
        Self {
            id,
            capability,
            target,
            status: JobStatus::Pending,
            priority,
            progress: 0,
            config: Metadata::new(),
            metadata: Metadata::new(),
            execution_logs: Vec::new(),
            findings: Vec::new(),
            owner_user_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositiveIndicator {
    pub id: String,
    pub user_id: String,
    pub target: String,
    pub title: String,
    pub description: String,
    pub score_bonus: f64,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub entity_type: String,
    pub value: String,
    pub severity: Severity,
    pub metadata: Metadata,
    pub discovered_at: DateTime<Utc>,
    pub owner_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation: String,
    pub weight: f64,
    pub metadata: Metadata,
}

impl GraphEdge {
    pub fn key(&self) -> (String, String, String) {
        (self.source_entity_id.clone(), self.target_entity_id.clone(), self.relation.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnionCategory {
    Marketplace,
    Forum,
    LeakSite,
    Ransomware,
    Carding,
    Drugs,
    Hacking,
    Fraud,
    Crypto,
    Weapons,
    Counterfeit,
    Hosting,
    Search,
    Social,
    News,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnionSite {
    pub site_id: String,
    pub url: String,
    pub category: OnionCategory,
    pub threat_level: ThreatLevel,
    pub language: String,
    pub content_hash: String,
    pub linked_sites: Vec<String>,
    pub extracted_entities: Vec<ExtractedEntity>,
    pub keywords_matched: Vec<String>,
    pub risk_score: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    pub page_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractedEntityType {
    Email,
    Bitcoin,
    Ethereum,
    Monero,
    OnionV2,
    OnionV3,
    SshFingerprint,
    PgpKey,
    Phone,
    IpAddress,
    CreditCard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: ExtractedEntityType,
    pub value: String,
    pub context: String,
    pub source_url: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandMention {
    pub mention_id: String,
    pub keyword: String,
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub job_id: String,
    pub target_url: String,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub depth: i32,
    pub extract_entities: bool,
}

impl PartialEq for CrawlJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for CrawlJob {}
impl PartialOrd for CrawlJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CrawlJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lower priority integer sorts first; paired with Reverse in a BinaryHeap.
        self.priority.cmp(&other.priority)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelType {
    HttpTunnel,
    DnsTunnel,
    IcmpTunnel,
    WebsocketCovert,
    ChunkedEncoding,
    LongPolling,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionConfidence {
    Confirmed,
    High,
    Medium,
    Low,
    Suspicious,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelDetection {
    pub detection_id: String,
    pub tunnel_type: TunnelType,
    pub confidence: DetectionConfidence,
    pub source_ip: String,
    pub destination_ip: String,
    pub destination_port: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_count: u32,
    pub indicators: Vec<String>,
    pub risk_score: f64,
    pub sample_requests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconingPattern {
    pub pattern_id: String,
    pub source_ip: String,
    pub destination: String,
    pub interval_seconds: f64,
    pub interval_variance: f64,
    pub confidence: f64,
    pub sample_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Minimal,
}

impl RiskLevel {
    pub fn from_overall(score: f64) -> Self {
        if score >= 90.0 {
            RiskLevel::Minimal
        } else if score >= 75.0 {
            RiskLevel::Low
        } else if score >= 50.0 {
            RiskLevel::Medium
        } else if score >= 25.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Worsening,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: String,
    pub weight: f64,
    pub score: f64,
    pub findings_count: u32,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub target: String,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub critical_issues: u32,
    pub high_issues: u32,
    pub medium_issues: u32,
    pub low_issues: u32,
    pub trend: Trend,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_allowed_graph() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn risk_level_thresholds_match_spec_exactly() {
        assert_eq!(RiskLevel::from_overall(90.0), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_overall(89.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_overall(75.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_overall(50.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_overall(25.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_overall(24.9), RiskLevel::Critical);
    }

    #[test]
    fn crawl_job_orders_by_priority_ascending() {
        let mk = |p: i32| CrawlJob {
            job_id: "j".into(),
            target_url: "http://x.onion".into(),
            priority: p,
            scheduled_at: Utc::now(),
            depth: 1,
            extract_entities: true,
        };
        let mut v = vec![mk(5), mk(1), mk(3)];
        v.sort();
        assert_eq!(v.iter().map(|c| c.priority).collect::<Vec<_>>(), vec![1, 3, 5]);
    }
}
