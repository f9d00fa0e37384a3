//! C7 — Infra-Config Collector.
//!
//! Probe sequence, payload tables and scoring come from spec.md §4.7 (no
//! original-source Python equivalent exists for this capability — nginx/CVE
//! probing is new to this corpus). The trait + struct shape follows
//! `frontend/phantom-xdr-core/src/network_analysis.rs`.

use async_trait::async_trait;
use chrono::Utc;
use reconwatch_types::{Capability, Finding, Job, Severity};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::{Collector, CollectorError, Publisher};

const REQUIRED_SECURITY_HEADERS: &[&str] = &[
    "strict-transport-security",
    "content-security-policy",
    "x-content-type-options",
    "x-frame-options",
    "referrer-policy",
    "permissions-policy",
    "x-xss-protection",
];

const CRLF_PAYLOADS: &[&str] = &[
    "%0d%0aSet-Cookie:%20test=injected",
    "%0d%0aX-Injected:%20true",
    "%0aSet-Cookie:%20test=injected",
    "\r\nSet-Cookie: test=injected",
    "%E5%98%8A%E5%98%8DSet-Cookie:%20test=injected",
];

const COMMON_PATHS: &[&str] = &["/", "/index.html", "/api", "/login", "/search", "/static/", "/assets/", "/images/", "/css/", "/js/"];

const MERGE_SLASH_PATTERNS: &[&str] = &["//", "/./", "/..%2f", "/%2e%2e/", "/..;/"];

fn header_deduction(header: &str) -> f64 {
    match header {
        "strict-transport-security" | "content-security-policy" => 20.0,
        "x-content-type-options" | "x-frame-options" => 15.0,
        _ => 10.0,
    }
}

fn finding_deduction(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 30.0,
        Severity::High => 20.0,
        Severity::Medium => 10.0,
        Severity::Low => 5.0,
        Severity::Info => 0.0,
    }
}

pub struct InfraConfigCollector {
    client: Client,
}

impl Default for InfraConfigCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl InfraConfigCollector {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .build()
            .expect("static client config");
        Self { client }
    }

    fn finding(
        target: &str,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        evidence: serde_json::Value,
    ) -> Finding {
        let evidence_map = match evidence {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            capability: Capability::InfrastructureTesting,
            severity,
            risk_score: finding_deduction(severity) * 3.0,
            title: title.into(),
            description: description.into(),
            evidence: evidence_map,
            affected_assets: vec![target.to_string()],
            recommendations: vec![],
            discovered_at: Utc::now(),
            target: target.to_string(),
        }
    }

    async fn header_audit(&self, target: &str, base_url: &str) -> (Vec<Finding>, Option<String>, f64) {
        let mut findings = Vec::new();
        let mut deduction = 0.0;

        let Ok(resp) = self.client.get(base_url).send().await else {
            return (findings, None, deduction);
        };
        let server_header = resp.headers().get("server").and_then(|v| v.to_str().ok()).map(String::from);
        let present: Vec<String> = resp.headers().keys().map(|k| k.as_str().to_lowercase()).collect();

        for header in REQUIRED_SECURITY_HEADERS {
            if !present.iter().any(|h| h == header) {
                deduction += header_deduction(header);
                findings.push(Self::finding(
                    target,
                    format!("Missing Security Header: {header}"),
                    format!("Response did not include the {header} header"),
                    Severity::Medium,
                    json!({"header": header}),
                ));
            }
        }

        if let Some(server) = &server_header {
            findings.push(Self::finding(
                target,
                "Server Identity Disclosed",
                format!("Server header discloses: {server}"),
                Severity::Info,
                json!({"server": server}),
            ));
        }

        (findings, server_header, deduction)
    }

    async fn crlf_injection(&self, target: &str, base_url: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for path in std::iter::once(&"/").chain(COMMON_PATHS.iter()).take(11) {
            for payload in CRLF_PAYLOADS {
                let url = format!("{base_url}{path}{payload}");
                if let Ok(resp) = self.client.get(&url).send().await {
                    let injected = resp
                        .headers()
                        .get_all("set-cookie")
                        .iter()
                        .any(|v| v.to_str().unwrap_or_default().contains("test=injected"))
                        || resp.headers().contains_key("x-injected");
                    if injected {
                        findings.push(Self::finding(
                            target,
                            "CRLF Injection",
                            format!("Response header injection succeeded at {path} via CRLF payload"),
                            Severity::High,
                            json!({"path": path, "payload": payload}),
                        ));
                        break;
                    }
                }
            }
        }
        findings
    }

    async fn purge_method(&self, target: &str, base_url: &str) -> Vec<Finding> {
        let url = format!("{base_url}/*");
        if let Ok(resp) = self.client.request(reqwest::Method::from_bytes(b"PURGE").unwrap(), &url).send().await {
            if resp.status().as_u16() == 204 {
                return vec![Self::finding(
                    target,
                    "PURGE Method Accepted",
                    "Server accepted a PURGE request against a wildcard path",
                    Severity::Medium,
                    json!({"status": 204}),
                )];
            }
        }
        vec![]
    }

    async fn variable_leakage(&self, target: &str, base_url: &str) -> Vec<Finding> {
        let url = format!("{base_url}/foo$http_referer");
        if let Ok(resp) = self.client.get(&url).header("Referer", "bar").send().await {
            if let Ok(body) = resp.text().await {
                if body.contains("foobar") {
                    return vec![Self::finding(
                        target,
                        "Nginx Variable Leakage",
                        "Referer-derived nginx variable was reflected in the response body",
                        Severity::Medium,
                        json!({"url": url}),
                    )];
                }
            }
        }
        vec![]
    }

    async fn path_traversal(&self, target: &str, base_url: &str, baseline: &str) -> Vec<Finding> {
        let markers = ["root:", "bin/bash", "[extensions]"];
        for pattern in MERGE_SLASH_PATTERNS {
            let url = format!("{base_url}{pattern}etc/passwd");
            if let Ok(resp) = self.client.get(&url).send().await {
                if let Ok(body) = resp.text().await {
                    if markers.iter().any(|m| body.contains(m)) || body == baseline {
                        return vec![Self::finding(
                            target,
                            "Path Traversal via Merge-Slashes",
                            format!("Server exposed filesystem content through pattern {pattern}"),
                            Severity::Critical,
                            json!({"pattern": pattern}),
                        )];
                    }
                }
            }
        }
        vec![]
    }

    async fn hop_by_hop_fuzzing(&self, target: &str, base_url: &str) -> Vec<Finding> {
        const HEADERS: &[&str] = &[
            "X-Forwarded-For", "X-Real-IP", "X-Client-IP", "X-Forwarded-Host",
            "X-Originating-IP", "True-Client-IP", "CF-Connecting-IP", "X-Cluster-Client-IP",
            "Forwarded", "X-Forwarded",
        ];
        const SPOOFED_IPS: &[&str] = &["127.0.0.1", "10.0.0.1", "169.254.169.254", "0.0.0.0"];

        let baseline = self.client.get(base_url).send().await.ok();
        let baseline_len = match baseline {
            Some(resp) => resp.text().await.unwrap_or_default().len(),
            None => return vec![],
        };

        let mut findings = Vec::new();
        for header in HEADERS {
            for ip in SPOOFED_IPS {
                if let Ok(resp) = self.client.get(base_url).header(*header, *ip).send().await {
                    let status = resp.status().as_u16();
                    let len = resp.text().await.unwrap_or_default().len();
                    let delta = (len as i64 - baseline_len as i64).unsigned_abs();
                    if status >= 400 && status != 404 || delta > baseline_len as u64 / 4 {
                        findings.push(Self::finding(
                            target,
                            "Hop-by-Hop Header Influences Response",
                            format!("{header}: {ip} changed status/length from baseline (status {status})"),
                            Severity::Medium,
                            json!({"header": header, "spoofed_ip": ip, "status": status}),
                        ));
                        break;
                    }
                }
            }
        }
        findings
    }

    fn php_detection(&self, target: &str, server: &Option<String>) -> Vec<Finding> {
        match server {
            Some(s) if s.to_lowercase().contains("php") => vec![Self::finding(
                target,
                "PHP Runtime Detected",
                format!("Server header indicates a PHP backend: {s}"),
                Severity::Info,
                json!({"server": s}),
            )],
            _ => vec![],
        }
    }

    async fn range_overflow_probe(&self, target: &str, base_url: &str) -> Vec<Finding> {
        if let Ok(resp) = self
            .client
            .get(base_url)
            .header("Range", "bytes=0-18446744073709551615")
            .send()
            .await
        {
            if resp.status().as_u16() == 500 || resp.status().as_u16() == 206 {
                return vec![Self::finding(
                    target,
                    "Range Header Overflow (CVE-2017-7529 Pattern)",
                    "Range header integer-overflow probe produced an unexpected status",
                    Severity::High,
                    json!({"status": resp.status().as_u16()}),
                )];
            }
        }
        vec![]
    }
}

#[async_trait]
impl Collector for InfraConfigCollector {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError> {
        let target = job.target.clone();
        let base_url = format!("https://{target}");
        let mut all = Vec::new();
        let mut score: f64 = 100.0;

        publish.progress(10, "auditing response headers");
        let (header_findings, server, header_deduction) = self.header_audit(&target, &base_url).await;
        score -= header_deduction;
        all.extend(header_findings);
        if publish.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        publish.progress(30, "probing CRLF injection");
        all.extend(self.crlf_injection(&target, &base_url).await);

        publish.progress(45, "probing PURGE method");
        all.extend(self.purge_method(&target, &base_url).await);

        publish.progress(55, "probing variable leakage");
        all.extend(self.variable_leakage(&target, &base_url).await);

        publish.progress(65, "probing path traversal");
        let baseline = self.client.get(&base_url).send().await.ok();
        let baseline_body = match baseline {
            Some(resp) => resp.text().await.unwrap_or_default(),
            None => String::new(),
        };
        all.extend(self.path_traversal(&target, &base_url, &baseline_body).await);

        publish.progress(80, "fuzzing hop-by-hop headers");
        all.extend(self.hop_by_hop_fuzzing(&target, &base_url).await);

        publish.progress(90, "running CVE-2017-7529 probe");
        all.extend(self.range_overflow_probe(&target, &base_url).await);
        all.extend(self.php_detection(&target, &server));

        for finding in &all {
            score -= finding_deduction(finding.severity);
        }
        score = score.max(0.0);

        all.push(Self::finding(
            &target,
            "Infrastructure Configuration Score",
            format!("Composite configuration score: {score:.1}/100"),
            Severity::Info,
            json!({"score": score}),
        ));

        for finding in &all {
            publish.finding(finding.clone());
        }
        publish.progress(100, "infra-config audit complete");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_deductions_weight_hsts_and_csp_highest() {
        assert_eq!(header_deduction("strict-transport-security"), 20.0);
        assert_eq!(header_deduction("x-xss-protection"), 10.0);
    }

    #[test]
    fn finding_deductions_match_severity_table() {
        assert_eq!(finding_deduction(Severity::Critical), 30.0);
        assert_eq!(finding_deduction(Severity::High), 20.0);
        assert_eq!(finding_deduction(Severity::Medium), 10.0);
        assert_eq!(finding_deduction(Severity::Low), 5.0);
    }
}
