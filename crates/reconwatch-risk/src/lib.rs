//! C11 — Risk Engine.
//!
//! Grounded on `frontend/phantom-xdr-core/src/risk_assessment.rs` (the
//! `DashMap`-backed score store shape) and
//! `examples/original_source/backend/app/services/risk_engine.py` (category
//! weights, severity deductions, `RiskLevel` thresholds, trend derivation).

use std::collections::VecDeque;

use dashmap::DashMap;
use reconwatch_types::{Capability, Finding, RiskFactor, RiskLevel, RiskScore, Severity, Trend};

const HISTORY_CAPACITY: usize = 100;
const CATEGORY_TREND_THRESHOLD: f64 = 5.0;
const OVERALL_TREND_THRESHOLD: f64 = 3.0;

const CATEGORIES: &[(&str, f64)] = &[
    ("exposure", 0.20),
    ("dark_web", 0.20),
    ("email_security", 0.15),
    ("infrastructure", 0.20),
    ("authentication", 0.15),
    ("network", 0.10),
];

fn severity_deduction(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 25.0,
        Severity::High => 15.0,
        Severity::Medium => 8.0,
        Severity::Low => 3.0,
        Severity::Info => 1.0,
    }
}

/// A finding may count against more than one category — e.g. an email
/// finding affects both `email_security` and `authentication` (SPF/DKIM/DMARC
/// are authentication mechanisms). Open-question decision recorded in
/// DESIGN.md: `Investigation` findings count against `network`, since the
/// collector's domain-tree/reputation analysis is a network-behavior signal.
fn categories_for(capability: Capability) -> &'static [&'static str] {
    match capability {
        Capability::ExposureDiscovery => &["exposure"],
        Capability::DarkWebIntelligence => &["dark_web"],
        Capability::EmailSecurity => &["email_security", "authentication"],
        Capability::InfrastructureTesting => &["infrastructure"],
        Capability::NetworkSecurity => &["network"],
        Capability::Investigation => &["network"],
    }
}

#[derive(Default)]
pub struct RiskEngine {
    history: DashMap<String, VecDeque<RiskScore>>,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calculate_risk_score(&self, target: &str, findings: &[Finding]) -> RiskScore {
        let mut critical_issues = 0;
        let mut high_issues = 0;
        let mut medium_issues = 0;
        let mut low_issues = 0;

        let mut category_scores: Vec<(String, f64, u32)> =
            CATEGORIES.iter().map(|(name, _)| (name.to_string(), 100.0, 0)).collect();

        for finding in findings {
            match finding.severity {
                Severity::Critical => critical_issues += 1,
                Severity::High => high_issues += 1,
                Severity::Medium => medium_issues += 1,
                Severity::Low => low_issues += 1,
                Severity::Info => {}
            }
            let deduction = severity_deduction(finding.severity);
            for category in categories_for(finding.capability) {
                if let Some(entry) = category_scores.iter_mut().find(|(name, _, _)| name == category) {
                    entry.1 = (entry.1 - deduction).max(0.0);
                    entry.2 += 1;
                }
            }
        }

        let previous = self.history.get(target).and_then(|h| h.back().cloned());

        let factors: Vec<RiskFactor> = CATEGORIES
            .iter()
            .zip(category_scores.iter())
            .map(|((name, weight), (_, score, count))| {
                let prev_score = previous
                    .as_ref()
                    .and_then(|p| p.factors.iter().find(|f| &f.category == name))
                    .map(|f| f.score);
                let trend = trend_for(prev_score, *score, CATEGORY_TREND_THRESHOLD);
                RiskFactor { category: name.to_string(), weight: *weight, score: *score, findings_count: *count, trend }
            })
            .collect();

        let overall_score: f64 = factors.iter().map(|f| f.score * f.weight).sum();
        let risk_level = RiskLevel::from_overall(overall_score);
        let trend = trend_for(previous.as_ref().map(|p| p.overall_score), overall_score, OVERALL_TREND_THRESHOLD);

        let score = RiskScore {
            target: target.to_string(),
            overall_score,
            risk_level,
            factors,
            critical_issues,
            high_issues,
            medium_issues,
            low_issues,
            trend,
            last_updated: chrono::Utc::now(),
        };

        let mut ring = self.history.entry(target.to_string()).or_default();
        ring.push_back(score.clone());
        if ring.len() > HISTORY_CAPACITY {
            ring.pop_front();
        }
        score
    }

    pub fn history_for(&self, target: &str) -> Vec<RiskScore> {
        self.history.get(target).map(|h| h.iter().cloned().collect()).unwrap_or_default()
    }
}

fn trend_for(previous: Option<f64>, current: f64, threshold: f64) -> Trend {
    match previous {
        None => Trend::Stable,
        Some(prev) => {
            let delta = current - prev;
            if delta > threshold {
                Trend::Improving
            } else if delta < -threshold {
                Trend::Worsening
            } else {
                Trend::Stable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_types::Capability;

    fn finding(capability: Capability, severity: Severity) -> Finding {
        Finding {
            id: "f".into(),
            capability,
            severity,
            risk_score: 0.0,
            title: String::new(),
            description: String::new(),
            evidence: Default::default(),
            affected_assets: vec![],
            recommendations: vec![],
            discovered_at: chrono::Utc::now(),
            target: "example.com".into(),
        }
    }

    #[test]
    fn overall_score_is_bounded_and_risk_level_matches_thresholds() {
        let engine = RiskEngine::new();
        let findings = vec![
            finding(Capability::ExposureDiscovery, Severity::Critical),
            finding(Capability::EmailSecurity, Severity::High),
        ];
        let score = engine.calculate_risk_score("example.com", &findings);
        assert!((0.0..=100.0).contains(&score.overall_score));
        assert_eq!(score.risk_level, RiskLevel::from_overall(score.overall_score));
    }

    #[test]
    fn trend_flips_from_improving_to_worsening_across_two_calls() {
        let engine = RiskEngine::new();
        // First call establishes a low baseline (many criticals).
        let bad = vec![finding(Capability::ExposureDiscovery, Severity::Critical); 4];
        let first = engine.calculate_risk_score("example.com", &bad);
        assert_eq!(first.trend, Trend::Stable);

        // Second call: no findings at all -> every category score rises -> improving.
        let second = engine.calculate_risk_score("example.com", &[]);
        assert_eq!(second.trend, Trend::Improving);

        // Third call: pile criticals back on -> worsening.
        let third = engine.calculate_risk_score("example.com", &bad);
        assert_eq!(third.trend, Trend::Worsening);
    }
}
