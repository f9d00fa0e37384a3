//! C5 — Exposure Collector.
//!
//! Phase sequence, wordlists and the path-classifier table are grounded on
//! `examples/original_source/backend/app/collectors/web_recon.py`
//! (`DORK_PATTERNS`, `common_prefixes`, the endpoint/VCS/config path lists and
//! their severity markers). The request-dedup set and the engine shape
//! (struct + async `run`) follow
//! `frontend/phantom-xdr-core/src/endpoint_protection.rs`.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reconwatch_types::{Capability, Finding, Job, Severity};
use reqwest::Client;
use serde_json::json;

use crate::{Collector, CollectorError, Publisher};

const DNS_TIMEOUT: Duration = Duration::from_secs(2);
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sensitive-file / dork categories (spec.md §4.5 step 1). Each category
/// expands to `site:{domain} ...` queries; we only need the category tags and
/// extensions downstream, so the generator keeps them grouped rather than as
/// one flat list of format strings.
const DORK_EXTENSIONS: &[(&str, &str)] = &[
    ("env", "sensitive"), ("config", "sensitive"), ("key", "sensitive"), ("pem", "sensitive"),
    ("p12", "sensitive"), ("pfx", "sensitive"), ("cer", "sensitive"), ("jks", "sensitive"),
    ("sql", "database"), ("db", "database"), ("sqlite", "database"), ("mdb", "database"), ("accdb", "database"),
    ("bak", "backup"), ("backup", "backup"), ("old", "backup"), ("zip", "backup"), ("rar", "backup"),
    ("pdf", "document"), ("doc", "document"), ("docx", "document"), ("xls", "document"), ("xlsx", "document"),
    ("log", "log"), ("conf", "config"), ("ini", "config"), ("xml", "config"), ("yaml", "config"), ("yml", "config"),
];

const DORK_PHRASES: &[&str] = &[
    r#"site:{domain} "API_KEY" OR "api_key" OR "apikey""#,
    r#"site:{domain} "SECRET" OR "secret_key" OR "secret""#,
    r#"site:{domain} "password" filetype:txt"#,
    r#"site:{domain} "aws_access_key" OR "aws_secret""#,
    r#"site:{domain} "github_token" OR "gitlab_token""#,
    r#"site:{domain} inurl:admin"#,
    r#"site:{domain} inurl:login"#,
    r#"site:{domain} inurl:wp-admin"#,
    r#"site:{domain} inurl:phpmyadmin"#,
    r#"site:{domain} intitle:"admin login""#,
    r#"site:{domain} inurl:api"#,
    r#"site:{domain} inurl:graphql"#,
    r#"site:{domain} inurl:swagger"#,
    r#"site:{domain} inurl:.git"#,
    r#"site:{domain} "git clone""#,
    r#"site:{domain} inurl:config"#,
    r#"site:{domain} intitle:"index of""#,
    r#"site:{domain} intitle:"directory listing""#,
    r#"site:{domain} intitle:"parent directory""#,
];

/// Subdomain wordlist (spec.md §4.5 step 2, ~95 entries).
const SUBDOMAIN_PREFIXES: &[&str] = &[
    "www", "mail", "email", "webmail", "smtp", "pop", "imap", "ftp", "sftp", "ssh", "vpn", "remote", "secure",
    "ns1", "ns2", "dns", "mx", "mx1", "mx2", "server", "servers", "host", "hosting",
    "dev", "development", "staging", "stage", "test", "testing", "qa", "prod", "production", "preprod",
    "api", "api1", "api2", "apis", "rest", "graphql", "cdn", "static", "assets", "media", "files", "download",
    "upload", "storage", "backup", "backups",
    "app", "apps", "application", "portal", "dashboard", "admin", "administrator", "panel", "cpanel", "whm",
    "blog", "blogs", "forum", "forums", "wiki", "docs", "documentation", "help", "support", "status", "monitor",
    "jenkins", "gitlab", "github", "git", "svn", "hg", "ci", "cd", "deploy", "deployment",
    "mobile", "m", "wap", "old", "new", "legacy", "shop", "store", "payment", "pay", "billing",
    "auth", "login", "signin", "account", "accounts",
];

/// Endpoint paths (spec.md §4.5 step 3) and the classifier table from it.
const ENDPOINT_PATHS: &[&str] = &[
    "/.git/config", "/.git/HEAD", "/.git/index",
    "/.svn/entries", "/.svn/wc.db", "/.hg/requires",
    "/.env", "/.env.local", "/.env.production",
    "/config.php", "/config.inc.php", "/configuration.php",
    "/web.config", "/.htaccess", "/.htpasswd",
    "/admin", "/administrator", "/wp-admin", "/wp-login.php",
    "/login", "/signin", "/auth", "/dashboard",
    "/phpmyadmin", "/pma", "/adminer.php", "/cpanel", "/whm", "/plesk",
    "/api", "/api/v1", "/api/v2", "/graphql",
    "/swagger", "/swagger.json", "/swagger.yaml", "/openapi.json", "/openapi.yaml",
    "/docs", "/documentation", "/api-docs",
    "/phpinfo.php", "/info.php", "/test.php", "/server-status", "/server-info",
    "/.well-known/security.txt", "/security.txt",
    "/robots.txt", "/sitemap.xml", "/sitemap.txt",
    "/backup", "/backups", "/old", "/archive", "/dump", "/sql", "/database",
    "/.DS_Store", "/Thumbs.db",
];

fn classify_endpoint(path: &str) -> Severity {
    if path.starts_with("/.git") || path.starts_with("/.svn") || path.starts_with("/.hg") {
        Severity::Critical
    } else if path.ends_with(".env") || path.contains("htpasswd") || path.contains("web.config") {
        Severity::Critical
    } else if path.contains("admin") || path.contains("login") || path.contains("phpmyadmin")
        || path.contains("cpanel") || path.contains("whm") || path.contains("plesk")
    {
        Severity::High
    } else if path.contains("phpinfo") || path.contains("info.php") || path.contains("test.php")
        || path.contains("server-status") || path.contains("server-info")
    {
        Severity::High
    } else if path == "/robots.txt" || path == "/sitemap.xml" || path == "/sitemap.txt"
        || path.contains("security.txt")
    {
        Severity::Info
    } else if path.contains("backup") || path.contains("archive") || path.contains("dump")
        || path.contains("sql") || path.contains("database")
    {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Sensitive-file extensions (spec.md §4.5 step 4).
const SENSITIVE_FILES: &[&str] = &[
    "/.env", "/.env.bak", "/app.key", "/private.key", "/server.pem", "/id_rsa",
    "/dump.sql", "/backup.sql", "/database.sql",
    "/debug.log", "/error.log", "/access.log",
    "/site.bak", "/www.bak", "/backup.tar.gz", "/backup.zip",
    "/.gitignore", "/.dockerignore",
];

fn sensitive_severity(path: &str) -> Severity {
    if path.ends_with(".env") || path.ends_with(".key") || path.ends_with(".pem") {
        Severity::Critical
    } else if path.ends_with(".sql") {
        Severity::Critical
    } else {
        Severity::High
    }
}

/// VCS directory markers (spec.md §4.5 step 5).
const VCS_INDICATORS: &[(&str, &str)] = &[
    ("/.git/config", "git"), ("/.git/HEAD", "git"), ("/.git/index", "git"), ("/.git/logs/HEAD", "git"),
    ("/.svn/entries", "svn"), ("/.svn/wc.db", "svn"),
    ("/.hg/requires", "hg"), ("/.hg/hgrc", "hg"),
    ("/.bzr/README", "bzr"), ("/_darcs/README", "darcs"),
];

/// Known admin-panel paths (spec.md §4.5 step 6).
const ADMIN_PANELS: &[&str] = &[
    "/admin", "/administrator", "/wp-admin", "/wp-login.php", "/phpmyadmin", "/pma",
    "/cpanel", "/whm", "/plesk", "/adminer.php", "/manager/html",
];

const LOGIN_INDICATORS: &[&str] = &["username", "password", "log in", "sign in", "admin panel"];

/// Config paths and body markers (spec.md §4.5 step 7).
const CONFIG_PATHS: &[&str] = &[
    "/config.php", "/config.inc.php", "/configuration.php", "/web.config",
    "/app.config", "/settings.py", "/.env", "/config.yaml", "/config.yml", "/application.properties",
];

const CONFIG_MARKERS: &[&str] =
    &["password", "secret", "api_key", "database", "db_", "host", "port"];

/// Dedups every probed URL within a run, mirroring the Bloom-filter-backed
/// `_seen_urls` set in the source collector — a plain `HashSet` is exact and
/// the per-run URL count never approaches Bloom-filter territory.
#[derive(Default)]
struct SeenUrls(Mutex<HashSet<String>>);

impl SeenUrls {
    fn insert(&self, url: &str) -> bool {
        self.0.lock().unwrap().insert(url.to_string())
    }
}

pub struct ExposureCollector {
    client: Client,
}

impl Default for ExposureCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureCollector {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("static client config");
        Self { client }
    }

    fn finding(
        target: &str,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        risk_score: f64,
        evidence: serde_json::Value,
        recommendations: Vec<String>,
    ) -> Finding {
        let evidence_map = match evidence {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            capability: Capability::ExposureDiscovery,
            severity,
            risk_score,
            title: title.into(),
            description: description.into(),
            evidence: evidence_map,
            affected_assets: vec![target.to_string()],
            recommendations,
            discovered_at: Utc::now(),
            target: target.to_string(),
        }
    }

    async fn resolve(&self, host: &str) -> bool {
        tokio::time::timeout(DNS_TIMEOUT, tokio::net::lookup_host((host, 443)))
            .await
            .map(|r| r.map(|mut it| it.next().is_some()).unwrap_or(false))
            .unwrap_or(false)
    }

    async fn probe(&self, url: &str) -> Option<(u16, String)> {
        let resp = self.client.get(url).send().await.ok()?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Some((status, body))
    }

    async fn dork_generation(&self, target: &str, publish: &Publisher) -> Vec<Finding> {
        let mut queries: Vec<String> = DORK_EXTENSIONS
            .iter()
            .map(|(ext, _)| format!("site:{target} filetype:{ext}"))
            .collect();
        queries.extend(DORK_PHRASES.iter().map(|p| p.replace("{domain}", target)));

        publish.progress(5, format!("generated {} dork queries", queries.len()));
        vec![Self::finding(
            target,
            "Generated Search Engine Dork Queries",
            format!("{} dork queries generated for manual review", queries.len()),
            Severity::Info,
            0.0,
            json!({"query_count": queries.len(), "sample": queries.iter().take(5).collect::<Vec<_>>()}),
            vec![],
        )]
    }

    async fn subdomain_enumeration(
        &self,
        target: &str,
        seen: &SeenUrls,
        publish: &Publisher,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut resolved = Vec::new();
        for prefix in SUBDOMAIN_PREFIXES {
            let subdomain = format!("{prefix}.{target}");
            if self.resolve(&subdomain).await {
                resolved.push(subdomain);
            }
        }
        publish.progress(10, format!("{} of {} subdomains resolved", resolved.len(), SUBDOMAIN_PREFIXES.len()));

        for subdomain in resolved {
            let https_url = format!("https://{subdomain}");
            let http_url = format!("http://{subdomain}");
            if !seen.insert(&https_url) {
                continue;
            }
            let https_ok = self.probe(&https_url).await.is_some();
            let http_ok = if https_ok { false } else { seen.insert(&http_url) && self.probe(&http_url).await.is_some() };
            if https_ok || http_ok {
                let severity = if https_ok { Severity::Info } else { Severity::Medium };
                findings.push(Self::finding(
                    target,
                    format!("Discovered Live Subdomain: {subdomain}"),
                    format!("{subdomain} responds over {}", if https_ok { "HTTPS" } else { "HTTP only" }),
                    severity,
                    if https_ok { 10.0 } else { 45.0 },
                    json!({"subdomain": subdomain, "https": https_ok, "http_only": http_ok}),
                    if https_ok { vec![] } else { vec!["Redirect HTTP traffic to HTTPS".to_string()] },
                ));
            }
        }
        findings
    }

    async fn endpoint_probing(&self, target: &str, seen: &SeenUrls, publish: &Publisher) -> Vec<Finding> {
        let mut findings = Vec::new();
        for path in ENDPOINT_PATHS {
            for scheme in ["https", "http"] {
                let url = format!("{scheme}://{target}{path}");
                if !seen.insert(&url) {
                    continue;
                }
                if let Some((status, _)) = self.probe(&url).await {
                    if (200..400).contains(&status) {
                        let severity = classify_endpoint(path);
                        findings.push(Self::finding(
                            target,
                            format!("Exposed Endpoint: {path}"),
                            format!("{url} returned HTTP {status}"),
                            severity,
                            severity_score(severity),
                            json!({"path": path, "url": url, "status": status}),
                            vec!["Restrict or remove access to this endpoint".to_string()],
                        ));
                        break;
                    }
                }
            }
        }
        publish.progress(30, format!("{} exposed endpoints found", findings.len()));
        findings
    }

    async fn sensitive_file_detection(&self, target: &str, seen: &SeenUrls, publish: &Publisher) -> Vec<Finding> {
        let mut findings = Vec::new();
        for path in SENSITIVE_FILES {
            let url = format!("https://{target}{path}");
            if !seen.insert(&url) {
                continue;
            }
            if let Some((status, _)) = self.probe(&url).await {
                if status == 200 {
                    let severity = sensitive_severity(path);
                    findings.push(Self::finding(
                        target,
                        format!("Sensitive File Exposed: {path}"),
                        format!("{url} is publicly accessible"),
                        severity,
                        severity_score(severity),
                        json!({"path": path, "url": url}),
                        vec!["Remove or restrict access to this file".to_string()],
                    ));
                }
            }
        }
        publish.progress(50, format!("{} sensitive files found", findings.len()));
        findings
    }

    async fn source_code_exposure(&self, target: &str, seen: &SeenUrls, publish: &Publisher) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (path, vcs_type) in VCS_INDICATORS {
            for scheme in ["https", "http"] {
                let url = format!("{scheme}://{target}{path}");
                if !seen.insert(&url) {
                    continue;
                }
                if let Some((status, body)) = self.probe(&url).await {
                    if status == 200 {
                        findings.push(Self::finding(
                            target,
                            format!("Exposed {vcs_type} Repository"),
                            format!("{url} exposed a live {vcs_type} repository ({} bytes)", body.len()),
                            Severity::Critical,
                            90.0,
                            json!({"vcs_type": vcs_type, "path": path, "url": url, "content_length": body.len()}),
                            vec!["Remove VCS metadata from the public webroot".to_string()],
                        ));
                        break;
                    }
                }
            }
        }
        publish.progress(65, format!("{} VCS exposures found", findings.len()));
        findings
    }

    async fn admin_panel_discovery(&self, target: &str, seen: &SeenUrls, publish: &Publisher) -> Vec<Finding> {
        let mut findings = Vec::new();
        for path in ADMIN_PANELS {
            let url = format!("https://{target}{path}");
            if !seen.insert(&url) {
                continue;
            }
            if let Some((status, body)) = self.probe(&url).await {
                let login_indicator = LOGIN_INDICATORS.iter().any(|m| body.to_lowercase().contains(m));
                if matches!(status, 200 | 301 | 302 | 401 | 403) || login_indicator {
                    findings.push(Self::finding(
                        target,
                        format!("Admin Panel Discovered: {path}"),
                        format!("{url} returned HTTP {status}"),
                        Severity::High,
                        75.0,
                        json!({"path": path, "url": url, "status": status}),
                        vec!["Restrict admin panel access to a trusted network".to_string()],
                    ));
                }
            }
        }
        publish.progress(85, format!("{} admin panels found", findings.len()));
        findings
    }

    async fn config_file_detection(&self, target: &str, seen: &SeenUrls, publish: &Publisher) -> Vec<Finding> {
        let mut findings = Vec::new();
        for path in CONFIG_PATHS {
            let url = format!("https://{target}{path}");
            if !seen.insert(&url) {
                continue;
            }
            if let Some((status, body)) = self.probe(&url).await {
                if status == 200 {
                    let lower = body.to_lowercase();
                    let is_config = CONFIG_MARKERS.iter().any(|m| lower.contains(m))
                        || path.ends_with(".env") || path.ends_with(".config") || path.ends_with(".conf");
                    if is_config {
                        findings.push(Self::finding(
                            target,
                            format!("Configuration File Exposed: {path}"),
                            format!("{url} exposes configuration data"),
                            Severity::Critical,
                            90.0,
                            json!({"path": path, "url": url, "preview": body.chars().take(200).collect::<String>()}),
                            vec!["Remove configuration files from the public webroot".to_string()],
                        ));
                    }
                }
            }
        }
        publish.progress(95, format!("{} config files found", findings.len()));
        findings
    }
}

fn severity_score(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 95.0,
        Severity::High => 75.0,
        Severity::Medium => 50.0,
        Severity::Low => 25.0,
        Severity::Info => 5.0,
    }
}

#[async_trait]
impl Collector for ExposureCollector {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError> {
        let target = job.target.clone();
        let seen = SeenUrls::default();
        let mut all = Vec::new();

        for finding in self.dork_generation(&target, publish).await {
            publish.finding(finding);
        }
        if publish.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let phases: Vec<Vec<Finding>> = vec![
            self.subdomain_enumeration(&target, &seen, publish).await,
            self.endpoint_probing(&target, &seen, publish).await,
            self.sensitive_file_detection(&target, &seen, publish).await,
            self.source_code_exposure(&target, &seen, publish).await,
            self.admin_panel_discovery(&target, &seen, publish).await,
            self.config_file_detection(&target, &seen, publish).await,
        ];

        for phase in phases {
            if publish.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }
            for finding in phase {
                publish.finding(finding.clone());
                all.push(finding);
            }
        }

        publish.progress(100, "exposure scan complete");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_paths_classify_critical() {
        assert_eq!(classify_endpoint("/.git/config"), Severity::Critical);
        assert_eq!(classify_endpoint("/.svn/entries"), Severity::Critical);
    }

    #[test]
    fn debug_endpoints_classify_high() {
        assert_eq!(classify_endpoint("/phpinfo.php"), Severity::High);
        assert_eq!(classify_endpoint("/server-status"), Severity::High);
    }

    #[test]
    fn informational_paths_classify_info() {
        assert_eq!(classify_endpoint("/robots.txt"), Severity::Info);
        assert_eq!(classify_endpoint("/sitemap.xml"), Severity::Info);
    }

    #[test]
    fn admin_paths_classify_high() {
        assert_eq!(classify_endpoint("/admin"), Severity::High);
        assert_eq!(classify_endpoint("/wp-admin"), Severity::High);
    }

    #[test]
    fn seen_urls_dedupe_within_a_run() {
        let seen = SeenUrls::default();
        assert!(seen.insert("https://example.com/.git/config"));
        assert!(!seen.insert("https://example.com/.git/config"));
    }
}
