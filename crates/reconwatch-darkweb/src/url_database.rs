//! C9.6 — URL Database.
//!
//! Schema and operations are grounded on
//! `examples/original_source/backend/app/collectors/darkwatch_modules/crawlers/url_database.py`
//! (`URLDatabase`/`save`/`batch_save`/`select`/`update_status`/`update_categorie`).
//! `sqlite3` becomes an in-process `DashMap`-backed table here, the same
//! durability shape `reconwatch-storage`'s `MemoryStore` uses for C12.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: u64,
    pub url_type: String,
    pub url: String,
    pub title: Option<String>,
    pub baseurl: Option<String>,
    pub status: UrlStatus,
    pub count_status: u32,
    pub source: String,
    pub categorie: Option<String>,
    pub score_categorie: i32,
    pub keywords: Option<String>,
    pub score_keywords: i32,
    pub discovery_date: DateTime<Utc>,
    pub lastscan: Option<DateTime<Utc>>,
    pub full_match_categorie: Option<String>,
}

/// After this many consecutive failures `update_status` marks a URL offline.
const OFFLINE_THRESHOLD: u32 = 3;

#[derive(Default)]
pub struct UrlDatabase {
    by_url: DashMap<String, UrlRecord>,
    next_id: AtomicU64,
}

impl UrlDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_url(&self, url: &str) -> Option<UrlRecord> {
        self.by_url.get(url).map(|r| r.clone())
    }

    pub fn save(&self, url: &str, source: &str, url_type: &str, baseurl: Option<&str>) -> u64 {
        if let Some(existing) = self.by_url.get(url) {
            return existing.id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.by_url.insert(
            url.to_string(),
            UrlRecord {
                id,
                url_type: url_type.to_string(),
                url: url.to_string(),
                title: None,
                baseurl: baseurl.map(String::from),
                status: UrlStatus::Unknown,
                count_status: 0,
                source: source.to_string(),
                categorie: None,
                score_categorie: 0,
                keywords: None,
                score_keywords: 0,
                discovery_date: Utc::now(),
                lastscan: None,
                full_match_categorie: None,
            },
        );
        id
    }

    /// Filters already-present URLs with one pass before inserting the rest,
    /// mirroring the source's single `IN (...)` existence check.
    pub fn batch_save(&self, urls: &[String], source: &str, url_type: &str, baseurl: Option<&str>) -> usize {
        let mut inserted = 0;
        for url in urls {
            if self.by_url.contains_key(url) {
                continue;
            }
            self.save(url, source, url_type, baseurl);
            inserted += 1;
        }
        inserted
    }

    /// Excludes offline URLs, like the source's `select()`.
    pub fn select(&self, min_categorie: Option<i32>, min_keywords: Option<i32>, limit: usize) -> Vec<UrlRecord> {
        let mut results: Vec<UrlRecord> = self
            .by_url
            .iter()
            .filter(|r| r.status != UrlStatus::Offline)
            .filter(|r| min_categorie.map(|m| r.score_categorie >= m).unwrap_or(true))
            .filter(|r| min_keywords.map(|m| r.score_keywords >= m).unwrap_or(true))
            .map(|r| r.clone())
            .collect();
        results.sort_by_key(|r| r.id);
        results.truncate(limit);
        results
    }

    pub fn update_status(&self, url: &str, http_ok: bool) {
        if let Some(mut record) = self.by_url.get_mut(url) {
            record.lastscan = Some(Utc::now());
            if http_ok {
                record.status = UrlStatus::Online;
                record.count_status = 0;
            } else {
                record.count_status += 1;
                if record.count_status >= OFFLINE_THRESHOLD {
                    record.status = UrlStatus::Offline;
                }
            }
        }
    }

    pub fn update_categorie(
        &self,
        url: &str,
        categorie: &str,
        title: Option<&str>,
        full_match: bool,
        score_categorie: i32,
        score_keywords: i32,
        full_match_keywords: Option<&str>,
    ) {
        if let Some(mut record) = self.by_url.get_mut(url) {
            record.categorie = Some(categorie.to_string());
            if let Some(title) = title {
                record.title = Some(title.to_string());
            }
            record.score_categorie = score_categorie;
            record.score_keywords = score_keywords;
            record.full_match_categorie = if full_match { Some(categorie.to_string()) } else { None };
            record.keywords = full_match_keywords.map(String::from);
        }
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_save_skips_already_present_urls() {
        let db = UrlDatabase::new();
        db.save("http://a.onion", "ahmia", "onion", None);
        let inserted = db.batch_save(
            &["http://a.onion".to_string(), "http://b.onion".to_string()],
            "tor66",
            "onion",
            None,
        );
        assert_eq!(inserted, 1);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn three_consecutive_failures_marks_offline() {
        let db = UrlDatabase::new();
        db.save("http://a.onion", "ahmia", "onion", None);
        db.update_status("http://a.onion", false);
        db.update_status("http://a.onion", false);
        assert_ne!(db.select_url("http://a.onion").unwrap().status, UrlStatus::Offline);
        db.update_status("http://a.onion", false);
        assert_eq!(db.select_url("http://a.onion").unwrap().status, UrlStatus::Offline);
    }

    #[test]
    fn select_excludes_offline_urls() {
        let db = UrlDatabase::new();
        db.save("http://a.onion", "ahmia", "onion", None);
        db.save("http://b.onion", "ahmia", "onion", None);
        for _ in 0..3 {
            db.update_status("http://a.onion", false);
        }
        let results = db.select(None, None, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "http://b.onion");
    }
}
