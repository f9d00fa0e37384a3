//! C8 — Investigation Collector.
//!
//! Domain-tree classification, tracker/CDN lists and risk thresholds come
//! from spec.md §4.8 (no original-source Python module exists for this
//! capability). The engine shape follows
//! `frontend/phantom-xdr-core/src/api_security.rs`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reconwatch_types::{Capability, Finding, Job, Severity};
use serde_json::json;

use crate::{Collector, CollectorError, Publisher};

const TRACKER_HOSTS: &[&str] = &[
    "google-analytics.com", "googletagmanager.com", "doubleclick.net", "facebook.net",
    "hotjar.com", "segment.io", "mixpanel.com", "amplitude.com", "fullstory.com",
    "adroll.com", "criteo.com", "taboola.com", "outbrain.com", "scorecardresearch.com",
    "quantserve.com", "newrelic.com", "sentry.io",
];

const CDN_HOSTS: &[&str] = &["cloudflare.com", "akamai.net", "fastly.net", "cloudfront.net", "jsdelivr.net"];

const SUSPICIOUS_TLDS: &[&str] = &["tk", "ml", "ga", "cf", "xyz", "top", "click", "work"];

const COMMON_BRANDS: &[&str] = &["google", "microsoft", "apple", "amazon", "paypal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostClass {
    FirstParty,
    ThirdParty,
    Tracker,
    Cdn,
}

#[derive(Debug, Clone)]
struct HarEntry {
    host: String,
    initiator_host: Option<String>,
    bytes: u64,
    is_redirect: bool,
}

fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

fn classify_host(host: &str, root: &str) -> HostClass {
    if TRACKER_HOSTS.iter().any(|t| host.ends_with(t)) {
        HostClass::Tracker
    } else if CDN_HOSTS.iter().any(|c| host.ends_with(c)) {
        HostClass::Cdn
    } else if registrable_domain(host) == registrable_domain(root) {
        HostClass::FirstParty
    } else {
        HostClass::ThirdParty
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1).min(dp[i][j - 1] + 1).min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}

pub struct InvestigationCollector;

impl Default for InvestigationCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl InvestigationCollector {
    pub fn new() -> Self {
        Self
    }

    fn finding(
        target: &str,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        risk_score: f64,
        evidence: serde_json::Value,
    ) -> Finding {
        let evidence_map = match evidence {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            capability: Capability::Investigation,
            severity,
            risk_score,
            title: title.into(),
            description: description.into(),
            evidence: evidence_map,
            affected_assets: vec![target.to_string()],
            recommendations: vec![],
            discovered_at: Utc::now(),
            target: target.to_string(),
        }
    }

    /// Approximates a HAR capture with a single direct request, since this
    /// collector has no headless browser available in-process; it still
    /// exercises the full domain-tree classification pipeline against
    /// whatever hosts a lightweight fetch can observe via redirects.
    async fn capture(&self, target: &str) -> Vec<HarEntry> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("static client config");
        let url = format!("https://{target}");
        let mut entries = vec![HarEntry { host: target.to_string(), initiator_host: None, bytes: 0, is_redirect: false }];
        if let Ok(resp) = client.get(&url).send().await {
            let final_host = resp.url().host_str().unwrap_or(target).to_string();
            let bytes = resp.content_length().unwrap_or(0);
            if final_host != target {
                entries.push(HarEntry { host: final_host, initiator_host: Some(target.to_string()), bytes, is_redirect: true });
            }
        }
        entries
    }

    /// `initiator_host` records each entry's parent per §4.8 ("parent =
    /// initiator's host when available"); entries whose initiator fell
    /// outside the captured set parent back to `root`.
    fn build_domain_tree(&self, root: &str, entries: &[HarEntry]) -> HashMap<String, (HostClass, String)> {
        entries
            .iter()
            .map(|e| (e.host.clone(), (classify_host(&e.host, root), e.initiator_host.clone().unwrap_or_else(|| root.to_string()))))
            .collect()
    }

    /// Risk is weighted by the share of transferred bytes each class of
    /// host accounts for, per §4.8's "request-size-weighted risk score",
    /// not just raw host counts.
    fn domain_tree_risk(&self, tree: &HashMap<String, (HostClass, String)>, entries: &[HarEntry]) -> (f64, Finding) {
        let tracker_count = tree.values().filter(|(c, _)| *c == HostClass::Tracker).count();
        let third_party_count = tree.values().filter(|(c, _)| *c == HostClass::ThirdParty).count();
        let redirect_count = entries.iter().filter(|e| e.is_redirect).count();
        let total_domains = tree.len();

        let total_bytes: u64 = entries.iter().map(|e| e.bytes).sum();
        let tracker_bytes: u64 = entries
            .iter()
            .filter(|e| tree.get(&e.host).is_some_and(|(c, _)| *c == HostClass::Tracker))
            .map(|e| e.bytes)
            .sum();
        let size_weight = if total_bytes > 0 { tracker_bytes as f64 / total_bytes as f64 } else { 0.0 };

        let mut risk = 0.0;
        risk += tracker_count as f64 * 0.15;
        risk += third_party_count as f64 * 0.05;
        risk += redirect_count as f64 * 0.1;
        risk += size_weight * 0.2;
        if total_domains > 20 {
            risk += 0.2;
        }
        let risk = risk.min(1.0);

        let severity = if risk >= 0.8 {
            Severity::Critical
        } else if risk >= 0.6 {
            Severity::High
        } else if risk >= 0.4 {
            Severity::Medium
        } else if risk >= 0.2 {
            Severity::Low
        } else {
            Severity::Info
        };

        let finding = Self::finding(
            "",
            "Domain Tree Risk Assessment",
            format!("{tracker_count} trackers, {third_party_count} third-party hosts, {redirect_count} redirects across {total_domains} domains"),
            severity,
            risk * 100.0,
            json!({"tracker_count": tracker_count, "third_party_count": third_party_count, "redirect_count": redirect_count, "total_domains": total_domains}),
        );
        (risk, finding)
    }

    fn reputation_heuristic(&self, target: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        if let Some(tld) = target.rsplit('.').next() {
            if SUSPICIOUS_TLDS.contains(&tld) {
                findings.push(Self::finding(
                    target,
                    "Suspicious TLD",
                    format!(".{tld} is frequently abused for low-cost disposable domains"),
                    Severity::Low,
                    25.0,
                    json!({"tld": tld}),
                ));
            }
        }
        let base = target.split('.').next().unwrap_or(target);
        for brand in COMMON_BRANDS {
            let distance = levenshtein(base, brand);
            if distance > 0 && distance <= 2 {
                findings.push(Self::finding(
                    target,
                    "Possible Typosquat",
                    format!("Domain is edit-distance {distance} from brand name '{brand}'"),
                    Severity::High,
                    80.0,
                    json!({"brand": brand, "distance": distance}),
                ));
            }
        }
        findings
    }
}

#[async_trait]
impl Collector for InvestigationCollector {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError> {
        let target = job.target.clone();
        let mut all = Vec::new();

        publish.progress(20, "capturing page and building HAR");
        let entries = self.capture(&target).await;
        if publish.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        publish.progress(50, "building domain tree");
        let tree = self.build_domain_tree(&target, &entries);

        publish.progress(70, "scoring domain-tree risk");
        let (_, mut risk_finding) = self.domain_tree_risk(&tree, &entries);
        risk_finding.target = target.clone();
        risk_finding.affected_assets = vec![target.clone()];
        all.push(risk_finding);

        publish.progress(90, "running reputation heuristics");
        all.extend(self.reputation_heuristic(&target));

        for finding in &all {
            publish.finding(finding.clone());
        }
        publish.progress(100, "investigation complete");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tracker_host_classifies_as_tracker() {
        assert_eq!(classify_host("www.google-analytics.com", "example.com"), HostClass::Tracker);
    }

    #[test]
    fn same_registrable_domain_classifies_first_party() {
        assert_eq!(classify_host("static.example.com", "example.com"), HostClass::FirstParty);
    }

    #[test]
    fn unrelated_host_classifies_third_party() {
        assert_eq!(classify_host("evil.net", "example.com"), HostClass::ThirdParty);
    }

    #[test]
    fn typosquat_distance_one_from_google_is_flagged() {
        let collector = InvestigationCollector::new();
        let findings = collector.reputation_heuristic("googel.com");
        assert!(findings.iter().any(|f| f.title == "Possible Typosquat"));
    }

    #[test]
    fn suspicious_tld_is_flagged() {
        let collector = InvestigationCollector::new();
        let findings = collector.reputation_heuristic("freebies.tk");
        assert!(findings.iter().any(|f| f.title == "Suspicious TLD"));
    }
}
