//! C9 — Dark-Web Pipeline.
//!
//! State machine (`Init -> Discover -> DBFallback? -> Plan -> Crawl ->
//! Finalize`), per-phase behavior and progress-report formula are grounded
//! on spec.md §4.9 directly; the discovery engines, entity extraction and
//! URL database are in `discovery.rs`, `crawl.rs` and `url_database.rs`,
//! each grounded on the matching
//! `examples/original_source/backend/app/collectors/darkwatch_modules/crawlers/`
//! module. The `Collector` integration follows
//! `reconwatch_collectors::Collector`'s async-trait shape.

pub mod crawl;
pub mod discovery;
pub mod url_database;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use md5::Md5;
use reconwatch_collectors::{Collector, CollectorError, Publisher};
use reconwatch_graph::DomainGraph;
use reconwatch_types::{
    BrandMention, Capability, CrawlJob, ExtractedEntityType, Finding, GraphEdge, GraphEntity, Job, OnionSite,
    Severity, ThreatLevel,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::discovery::{build_tor_client, AhmiaEngine, DiscoveryResult, OnionLandEngine, Tor66Engine};
use crate::url_database::UrlDatabase;

const DEFAULT_MAX_URLS: usize = 50;
const DEFAULT_WORKER_THREADS: usize = 8;
const DEFAULT_DEPTH: i32 = 1;
const DEFAULT_CRAWL_TIMEOUT: Duration = Duration::from_secs(600);
const PER_URL_TIMEOUT: Duration = Duration::from_secs(120);
const DB_FALLBACK_LIMIT: usize = 10;

/// `site_id = truncated SHA-256 of onion URL` (spec.md §3): a pure function
/// of the lowercased URL, so the same onion address always resolves to the
/// same site id, in the same run or across runs.
fn site_id_for(url: &str) -> String {
    let digest = Sha256::digest(url.to_lowercase().as_bytes());
    hex::encode(digest).chars().take(32).collect()
}

/// Collapses incidental whitespace before hashing so two fetches of the same
/// page text (differing only in formatting) still hash identically.
fn normalize_body(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// `content_hash = SHA-256 of normalized text` (spec.md §3).
fn content_hash_for(body: &str) -> String {
    hex::encode(Sha256::digest(normalize_body(body).as_bytes()))
}

fn threat_finding(
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
        id: Uuid::new_v4().to_string(),
        capability: Capability::DarkWebIntelligence,
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

fn severity_for_threat(level: ThreatLevel) -> Severity {
    match level {
        ThreatLevel::Critical => Severity::Critical,
        ThreatLevel::High => Severity::High,
        ThreatLevel::Medium => Severity::Medium,
        ThreatLevel::Low => Severity::Low,
        ThreatLevel::Info => Severity::Info,
    }
}

/// Inserts `site` into the persisted site map (spec.md §4.9.4 step 10),
/// wiring `linked_sites` both ways against any existing site sharing its
/// `content_hash`, and returns those clone ids.
fn persist_site(sites: &DashMap<String, OnionSite>, site: &mut OnionSite) -> Vec<String> {
    let clones: Vec<String> =
        sites.iter().filter(|e| e.value().content_hash == site.content_hash).map(|e| e.key().clone()).collect();
    site.linked_sites = clones.clone();
    for id in &clones {
        if let Some(mut existing) = sites.get_mut(id) {
            if !existing.linked_sites.contains(&site.site_id) {
                existing.linked_sites.push(site.site_id.clone());
            }
        }
    }
    sites.insert(site.site_id.clone(), site.clone());
    clones
}

pub struct DarkWebPipeline {
    url_db: UrlDatabase,
    graph: Arc<DomainGraph>,
    /// The `sites` HashMap named in spec.md §4.9.4 step 10, keyed by
    /// `site_id` — the persisted half of the site network, queried by
    /// [`DarkWebPipeline::find_clones`] (spec.md §8).
    sites: Arc<DashMap<String, OnionSite>>,
    socks_proxy: String,
}

impl DarkWebPipeline {
    pub fn new(graph: Arc<DomainGraph>, socks_proxy: impl Into<String>) -> Self {
        Self { url_db: UrlDatabase::new(), graph, sites: Arc::new(DashMap::new()), socks_proxy: socks_proxy.into() }
    }

    /// ∀ site s with content_hash=h≠h': returns {s' : s'.content_hash=h ∧
    /// s'.id≠s.id} (spec.md §8's clone-detection property).
    pub fn find_clones(&self, site_id: &str) -> Vec<OnionSite> {
        let Some(site) = self.sites.get(site_id) else { return Vec::new() };
        let hash = site.content_hash.clone();
        drop(site);
        self.sites
            .iter()
            .filter(|e| e.value().content_hash == hash && e.key() != site_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get_site(&self, site_id: &str) -> Option<OnionSite> {
        self.sites.get(site_id).map(|e| e.value().clone())
    }

    /// 4.9.1 Discovery: one worker per engine, keywords from the
    /// comma-separated target.
    async fn discover(&self, target: &str, publish: &Publisher) -> anyhow::Result<Vec<String>> {
        let client = build_tor_client(&self.socks_proxy)?;
        let keywords: Vec<&str> = target.split(',').map(|k| k.trim()).filter(|k| !k.is_empty()).collect();

        let mut engine_results: Vec<DiscoveryResult> = Vec::new();
        for keyword in &keywords {
            let (ahmia, tor66, onionland) = tokio::join!(
                AhmiaEngine::search(&client, keyword),
                Tor66Engine::search(&client, keyword),
                OnionLandEngine::search(&client, keyword),
            );
            for result in [ahmia, tor66, onionland] {
                publish.finding(threat_finding(
                    target,
                    format!("Discovery Engine {}: {} URLs", result.engine, result.urls.len()),
                    format!("{} returned {} candidate onion URLs for keyword(s) {:?}", result.engine, result.urls.len(), keywords),
                    Severity::Info,
                    0.0,
                    serde_json::json!({"engine": result.engine, "count": result.urls.len()}),
                ));
                engine_results.push(result);
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();
        for result in engine_results {
            for url in result.urls {
                let lower = url.to_lowercase();
                if (lower.ends_with(".onion") || lower.contains(".onion/")) && seen.insert(lower.clone()) {
                    urls.push(lower);
                }
            }
        }

        self.url_db.batch_save(&urls, "discovery", "onion", None);
        Ok(urls)
    }

    /// 4.9.2 DBFallback: used when discovery returns nothing.
    fn db_fallback(&self) -> Vec<String> {
        self.url_db.select(None, None, DB_FALLBACK_LIMIT).into_iter().map(|r| r.url).collect()
    }

    /// 4.9.4 Crawl: bounded-parallel fetch + categorize + extract, processed
    /// as a priority queue of [`CrawlJob`]s seeded from `urls` at `depth`.
    /// Each page's outbound `.onion` links are re-enqueued with
    /// `priority = 10 - depth` and `depth - 1` (step 7), recursing only
    /// while `depth > 0`; one `crawl_batch` call handles one depth level at
    /// a time so the worker pool still bounds in-flight fetches.
    #[allow(clippy::too_many_arguments)]
    async fn crawl(
        &self,
        target: &str,
        urls: Vec<String>,
        worker_threads: usize,
        depth: i32,
        crawl_timeout: Duration,
        publish: &Publisher,
    ) -> (Vec<OnionSite>, Vec<Finding>) {
        let client = build_tor_client(&self.socks_proxy).unwrap_or_default();
        let url_filter = Arc::new(crawl::UrlFilter::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let total_planned = urls.len();

        let sites_out = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let findings = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        let parent_of: Arc<DashMap<String, String>> = Arc::new(DashMap::new());

        let mut queue: BinaryHeap<Reverse<CrawlJob>> = BinaryHeap::new();
        let seed_time = Utc::now();
        for url in urls {
            queue.push(Reverse(CrawlJob {
                job_id: target.to_string(),
                target_url: url,
                priority: 0,
                scheduled_at: seed_time,
                depth,
                extract_entities: true,
            }));
        }

        let deadline = tokio::time::Instant::now() + crawl_timeout;

        loop {
            if queue.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }

            let mut depth_by_url: HashMap<String, i32> = HashMap::new();
            let mut round_urls = Vec::new();
            while let Some(Reverse(job)) = queue.pop() {
                if url_filter.check_and_insert(&job.target_url) {
                    depth_by_url.insert(job.target_url.clone(), job.depth);
                    round_urls.push(job.target_url);
                }
            }
            if round_urls.is_empty() {
                continue;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            let depth_by_url = Arc::new(depth_by_url);
            let sites_cb = sites_out.clone();
            let findings_cb = findings.clone();
            let done_cb = done.clone();
            let target_owned = target.to_string();
            let graph = self.graph.clone();
            let sites_map = self.sites.clone();
            let url_db_handle = &self.url_db;
            let next_jobs: Arc<parking_lot::Mutex<Vec<CrawlJob>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let next_jobs_cb = next_jobs.clone();
            let parent_of_cb = parent_of.clone();

            crawl::crawl_batch(client.clone(), round_urls, worker_threads, PER_URL_TIMEOUT, remaining, cancelled.clone(), move |url, page| {
                let n = done_cb.fetch_add(1, Ordering::Relaxed) + 1;
                let pct = 30 + ((n as f64 / total_planned.max(1) as f64) * 60.0).floor().min(60.0) as u8;
                publish.progress(pct, format!("crawled {n}"));

                url_db_handle.update_status(&url, page.is_some());
                let Some(page) = page else { return };

                let job_depth = *depth_by_url.get(&url).unwrap_or(&0);

                let entities = crawl::extract_entities(&page.body, &url);
                let (category, keywords_matched) = crawl::classify_category(&page.body);
                let risk = crawl::risk_score(category, &entities, keywords_matched.len());
                let threat_level = crawl::threat_level_for(risk);
                let language = crawl::detect_language(&page.body);

                let site_id = site_id_for(&url);
                let content_hash = content_hash_for(&page.body);
                let now = Utc::now();
                let mut site = OnionSite {
                    site_id: site_id.clone(),
                    url: url.clone(),
                    category,
                    threat_level,
                    language,
                    content_hash,
                    linked_sites: vec![],
                    extracted_entities: entities.clone(),
                    keywords_matched: keywords_matched.clone(),
                    risk_score: risk,
                    first_seen: now,
                    last_seen: now,
                    is_online: true,
                    page_count: 1,
                };
                let clones = persist_site(&sites_map, &mut site);

                if !keywords_matched.is_empty() {
                    findings_cb.lock().push(threat_finding(
                        &target_owned,
                        format!("Keyword Match on {url}"),
                        format!("Matched keywords: {}", keywords_matched.join(", ")),
                        severity_for_threat(threat_level),
                        risk * 100.0,
                        serde_json::json!({"url": url, "keywords": keywords_matched, "category": category}),
                    ));
                }
                for entity in &entities {
                    let (sev, score) = match entity.entity_type {
                        ExtractedEntityType::Email => (Severity::Medium, 65.0),
                        ExtractedEntityType::CreditCard => (Severity::High, 85.0),
                        _ => continue,
                    };
                    findings_cb.lock().push(threat_finding(
                        &target_owned,
                        format!("Extracted {:?} on {url}", entity.entity_type),
                        format!("Found {:?} with context: {}", entity.entity_type, entity.context),
                        sev,
                        score,
                        serde_json::json!({"url": url, "value": entity.value}),
                    ));
                }

                let entity_id = graph.save_entity(GraphEntity {
                    id: site_id.clone(),
                    entity_type: "onion_site".to_string(),
                    value: url.clone(),
                    severity: severity_for_threat(threat_level),
                    metadata: Default::default(),
                    discovered_at: now,
                    owner_user_id: None,
                });

                for clone_id in &clones {
                    let _ = graph.add_relationship(GraphEdge {
                        source_entity_id: entity_id.clone(),
                        target_entity_id: clone_id.clone(),
                        relation: "clone_of".to_string(),
                        weight: 1.0,
                        metadata: Default::default(),
                    });
                }
                if let Some(parent_id) = parent_of_cb.get(&url).map(|e| e.value().clone()) {
                    let _ = graph.add_relationship(GraphEdge {
                        source_entity_id: parent_id,
                        target_entity_id: entity_id.clone(),
                        relation: "links_to".to_string(),
                        weight: 1.0,
                        metadata: Default::default(),
                    });
                }

                if job_depth > 0 {
                    for link in extract_onion_links(&page.body) {
                        if link != url {
                            parent_of_cb.insert(link.clone(), entity_id.clone());
                            next_jobs_cb.lock().push(CrawlJob {
                                job_id: target_owned.clone(),
                                target_url: link,
                                priority: 10 - job_depth,
                                scheduled_at: Utc::now(),
                                depth: job_depth - 1,
                                extract_entities: true,
                            });
                        }
                    }
                }

                sites_cb.lock().push(site);
            })
            .await;

            for job in Arc::try_unwrap(next_jobs).map(|m| m.into_inner()).unwrap_or_default() {
                queue.push(Reverse(job));
            }
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
        }

        (
            Arc::try_unwrap(sites_out).map(|m| m.into_inner()).unwrap_or_default(),
            Arc::try_unwrap(findings).map(|m| m.into_inner()).unwrap_or_default(),
        )
    }

    /// 4.9.11: one `BrandMention` per matched keyword, id = md5(keyword|url|time)[:12].
    #[allow(dead_code)]
    fn brand_mention(keyword: &str, url: &str) -> BrandMention {
        let now = Utc::now();
        let digest = Md5::digest(format!("{keyword}|{url}|{}", now.timestamp()));
        let id: String = hex::encode(digest).chars().take(12).collect();
        BrandMention { mention_id: id, keyword: keyword.to_string(), url: url.to_string(), discovered_at: now }
    }
}

fn extract_onion_links(body: &str) -> Vec<String> {
    static ONION_LINK: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r#"https?://[a-z2-7]{16,56}\.onion[^\s"'<>]*"#).unwrap());
    ONION_LINK.find_iter(body).map(|m| m.as_str().to_string()).collect()
}

#[async_trait]
impl Collector for DarkWebPipeline {
    async fn run(&self, job: &Job, publish: &Publisher) -> Result<Vec<Finding>, CollectorError> {
        let target = job.target.clone();
        let config = &job.config;
        let max_urls = config.get("max_urls").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_URLS as u64) as usize;
        let worker_threads =
            config.get("worker_threads").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_WORKER_THREADS as u64) as usize;
        let depth = config.get("depth").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_DEPTH as i64) as i32;
        let crawl_timeout = config
            .get("crawl_timeout")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CRAWL_TIMEOUT);

        publish.progress(5, "discovering dark-web URLs");
        let discovered = self.discover(&target, publish).await.map_err(|e| CollectorError::Failed(e.to_string()))?;

        let mut all_findings = Vec::new();
        let urls_to_crawl: Vec<String> = if discovered.is_empty() {
            let fallback = self.db_fallback();
            if fallback.is_empty() {
                let finding = threat_finding(
                    &target,
                    "No URLs Discovered",
                    "Discovery engines returned no candidates and the URL database had no fallback entries",
                    Severity::Info,
                    0.0,
                    serde_json::json!({}),
                );
                publish.finding(finding.clone());
                publish.progress(100, "dark-web pipeline complete");
                return Ok(vec![finding]);
            }
            fallback
        } else {
            discovered
        };

        publish.progress(25, format!("planning crawl of {} URLs", urls_to_crawl.len().min(max_urls)));
        let plan: Vec<String> = urls_to_crawl.into_iter().take(max_urls).collect();
        let crawled_count = plan.len();

        if publish.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let (_sites, crawl_findings) = self.crawl(&target, plan, worker_threads.max(1), depth, crawl_timeout, publish).await;
        all_findings.extend(crawl_findings);

        if all_findings.is_empty() && crawled_count > 0 {
            all_findings.push(threat_finding(
                &target,
                format!("No Matches For {target}"),
                "URLs were crawled but none matched monitored keywords or entity patterns",
                Severity::Info,
                0.0,
                serde_json::json!({"crawled": crawled_count}),
            ));
        }

        for finding in &all_findings {
            publish.finding(finding.clone());
        }
        publish.progress(100, "dark-web pipeline complete");
        Ok(all_findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_discovered_urls_with_empty_db_yields_info_finding() {
        let finding = threat_finding("target", "No URLs Discovered", "none", Severity::Info, 0.0, serde_json::json!({}));
        assert_eq!(finding.title, "No URLs Discovered");
        assert_eq!(finding.severity, Severity::Info);
    }

    #[test]
    fn brand_mention_id_is_twelve_hex_characters() {
        let mention = DarkWebPipeline::brand_mention("ransomware", "http://abc.onion");
        assert_eq!(mention.mention_id.len(), 12);
    }

    #[test]
    fn extract_onion_links_finds_v3_addresses() {
        let body = "see http://abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwxyz234.onion/page for more";
        let links = extract_onion_links(body);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn site_id_is_a_pure_function_of_the_lowercased_url() {
        assert_eq!(site_id_for("http://Abc.onion/Page"), site_id_for("http://abc.onion/page"));
        assert_ne!(site_id_for("http://abc.onion"), site_id_for("http://def.onion"));
        assert_eq!(site_id_for("http://abc.onion").len(), 32);
    }

    #[test]
    fn content_hash_ignores_whitespace_differences() {
        assert_eq!(content_hash_for("hello   world"), content_hash_for("Hello world"));
        assert_ne!(content_hash_for("hello world"), content_hash_for("goodbye world"));
    }

    #[test]
    fn persist_site_links_clones_both_ways_and_find_clones_agrees() {
        let sites: DashMap<String, OnionSite> = DashMap::new();
        let now = Utc::now();
        let mut first = OnionSite {
            site_id: "a".to_string(),
            url: "http://a.onion".to_string(),
            category: reconwatch_types::OnionCategory::Unknown,
            threat_level: ThreatLevel::Info,
            language: "unknown".to_string(),
            content_hash: "deadbeef".to_string(),
            linked_sites: vec![],
            extracted_entities: vec![],
            keywords_matched: vec![],
            risk_score: 0.0,
            first_seen: now,
            last_seen: now,
            is_online: true,
            page_count: 1,
        };
        persist_site(&sites, &mut first);

        let mut second = first.clone();
        second.site_id = "b".to_string();
        second.url = "http://b.onion".to_string();
        second.linked_sites = vec![];
        let clones = persist_site(&sites, &mut second);

        assert_eq!(clones, vec!["a".to_string()]);
        assert_eq!(second.linked_sites, vec!["a".to_string()]);
        assert_eq!(sites.get("a").unwrap().linked_sites, vec!["b".to_string()]);

        let pipeline = DarkWebPipeline { url_db: UrlDatabase::new(), graph: Arc::new(DomainGraph::new()), sites: Arc::new(sites), socks_proxy: String::new() };
        let found = pipeline.find_clones("a");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].site_id, "b");
    }
}
