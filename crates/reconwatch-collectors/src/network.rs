//! C8 — Network Security Collector.
//!
//! The original has no real probing logic for this capability, just a single
//! static finding (`examples/original_source/backend/app/services/orchestrator.py`,
//! `_generate_network_findings`). We keep that baseline finding but also
//! back its claim with real data: every run samples the shared beacon/tunnel
//! detector (`reconwatch_graph::beacon::BeaconDetector`) for patterns
//! already observed against the job's target, rather than just asserting
//! "detection_enabled" with nothing behind it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reconwatch_graph::beacon::BeaconDetector;
use reconwatch_types::{Capability, Finding, Job, Severity};
use uuid::Uuid;

use crate::{Collector, CollectorError, Publisher};

pub struct NetworkSecurityCollector {
    beacons: Arc<BeaconDetector>,
}

impl NetworkSecurityCollector {
    pub fn new(beacons: Arc<BeaconDetector>) -> Self {
        Self { beacons }
    }
}

#[async_trait]
impl Collector for NetworkSecurityCollector {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError> {
        publish.progress(20, "checking tunnel/beacon detector state");

        let mut findings = vec![Finding {
            id: format!("find-{}", &Uuid::new_v4().simple().to_string()[..8]),
            capability: Capability::NetworkSecurity,
            severity: Severity::Low,
            risk_score: 20.0,
            title: "HTTP Tunnel Detection Capability".to_string(),
            description: "Network can detect HTTP tunneling attempts".to_string(),
            evidence: [("detection_enabled".to_string(), serde_json::Value::Bool(true))].into_iter().collect(),
            affected_assets: vec![job.target.clone()],
            recommendations: vec!["Continue monitoring".to_string()],
            discovered_at: Utc::now(),
            target: job.target.clone(),
        }];

        publish.progress(70, "correlating beaconing patterns for target");
        for pattern in self.beacons.detect() {
            if pattern.destination != job.target && pattern.source_ip != job.target {
                continue;
            }
            findings.push(Finding {
                id: format!("find-{}", &Uuid::new_v4().simple().to_string()[..8]),
                capability: Capability::NetworkSecurity,
                severity: Severity::High,
                risk_score: (pattern.confidence * 100.0).min(100.0),
                title: format!("Beaconing Pattern Detected: {}", pattern.destination),
                description: format!(
                    "{} contacted {} every ~{:.0}s with low variance ({} samples), consistent with C2 beaconing",
                    pattern.source_ip, pattern.destination, pattern.interval_seconds, pattern.sample_count
                ),
                evidence: [("pattern_id".to_string(), serde_json::Value::String(pattern.pattern_id.clone()))]
                    .into_iter()
                    .collect(),
                affected_assets: vec![pattern.source_ip.clone(), pattern.destination.clone()],
                recommendations: vec!["Isolate the source host and inspect the destination".to_string()],
                discovered_at: Utc::now(),
                target: job.target.clone(),
            });
        }

        for finding in &findings {
            publish.finding(finding.clone());
        }
        publish.progress(100, "network security scan complete");
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_bus::Bus;
    use reconwatch_types::Priority;

    #[tokio::test]
    async fn run_always_reports_the_baseline_tunnel_detection_finding() {
        let collector = NetworkSecurityCollector::new(Arc::new(BeaconDetector::new()));
        let job = Job::new("job-1".to_string(), Capability::NetworkSecurity, "10.0.0.5".to_string(), Priority::Normal);
        let bus = Arc::new(Bus::new());
        let cancel = crate::CancelToken::new();
        let publish = Publisher::new(job.id.clone(), bus, cancel);
        let findings = collector.run(&job, &publish).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "HTTP Tunnel Detection Capability");
    }

    #[tokio::test]
    async fn beaconing_pattern_against_target_is_surfaced_as_a_finding() {
        let beacons = Arc::new(BeaconDetector::new());
        let base = Utc::now();
        for i in 0..10 {
            beacons.record_contact("10.0.0.5", "203.0.113.9", base + chrono::Duration::seconds(i * 60));
        }
        let collector = NetworkSecurityCollector::new(beacons);
        let job = Job::new("job-1".to_string(), Capability::NetworkSecurity, "203.0.113.9".to_string(), Priority::Normal);
        let bus = Arc::new(Bus::new());
        let cancel = crate::CancelToken::new();
        let publish = Publisher::new(job.id.clone(), bus, cancel);
        let findings = collector.run(&job, &publish).await.unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings[1].title.starts_with("Beaconing Pattern Detected"));
    }
}
