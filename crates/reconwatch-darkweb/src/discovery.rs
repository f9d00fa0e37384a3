//! C9.1 — Discovery engines (Ahmia, Tor66, OnionLand).
//!
//! Engine endpoints, user-agent pool and per-engine result parsing are
//! grounded on
//! `examples/original_source/backend/app/collectors/darkwatch_modules/crawlers/discovery_engines/onionsearch.py`.
//! HTML result extraction uses `regex` in place of the source's
//! BeautifulSoup parser, since no HTML-parsing crate appears anywhere in the
//! teacher corpus, while `regex` is already a workspace dependency.

use std::time::Duration;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;

const DESKTOP_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0",
    "Mozilla/5.0 (Android 10; Mobile; rv:91.0) Gecko/91.0 Firefox/91.0",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/54.0.2840.99 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/54.0.2840.99 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_1) AppleWebKit/602.2.14 (KHTML, like Gecko) Version/10.0.1 Safari/602.2.14",
];

const AHMIA_BASE: &str = "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion";
const TOR66_BASE: &str = "http://tor66sewebgixwhcqfnp5inzp5x5uohhdy3kvtnyfxc2e5mxiuh34iid.onion";
const ONIONLAND_BASE: &str = "http://3bbad7fauom4d6sgppalyqddsqbf5u5p56b5k5uk2zxsy3d6ey2jobad.onion";

const MAX_RETRIES: u32 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOR66_PAGES: u32 = 30;
const MAX_ONIONLAND_PAGES: u32 = 100;

fn random_user_agent() -> &'static str {
    DESKTOP_AGENTS.choose(&mut rand::thread_rng()).copied().unwrap_or(DESKTOP_AGENTS[0])
}

/// Exponential backoff retry wrapper around a single GET, shared by every
/// engine: attempt, then 2 retries with doubling delay on connection errors.
async fn get_with_retry(client: &Client, url: &str) -> Option<String> {
    let mut delay = Duration::from_millis(500);
    for attempt in 0..=MAX_RETRIES {
        match client.get(url).header("User-Agent", random_user_agent()).send().await {
            Ok(resp) => return resp.text().await.ok(),
            Err(_) if attempt < MAX_RETRIES => {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(_) => return None,
        }
    }
    None
}

pub fn build_tor_client(socks_proxy: &str) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .proxy(reqwest::Proxy::all(socks_proxy)?)
        .build()?)
}

static AHMIA_CSRF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"name="([a-zA-Z0-9_]+)"\s+value="([^"]*)""#).unwrap());
static AHMIA_RESULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"redirect_url=([^&"'\s]+)"#).unwrap());

static TOR66_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"Onion sites found\s*:\s*(\d+)").unwrap());
static TOR66_RESULT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<a href="(https?://[a-z2-7]{16,56}\.onion[^"]*)""#).unwrap());

static ONIONLAND_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"About\s+(\d+)\s+result").unwrap());
static ONIONLAND_RESULT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[?&]l=([^&"'\s]+)"#).unwrap());

pub struct DiscoveryResult {
    pub engine: &'static str,
    pub urls: Vec<String>,
}

pub struct AhmiaEngine;
pub struct Tor66Engine;
pub struct OnionLandEngine;

impl AhmiaEngine {
    pub async fn search(client: &Client, keyword: &str) -> DiscoveryResult {
        let mut urls = Vec::new();
        if let Some(home) = get_with_retry(client, AHMIA_BASE).await {
            let csrf: Vec<(String, String)> = AHMIA_CSRF
                .captures_iter(&home)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .collect();
            let csrf_qs: String =
                csrf.iter().map(|(k, v)| format!("&{}={}", k, urlencoding::encode(v))).collect();
            let url = format!("{AHMIA_BASE}/search/?q={}{csrf_qs}", urlencoding::encode(keyword));
            if let Some(body) = get_with_retry(client, &url).await {
                for cap in AHMIA_RESULT.captures_iter(&body) {
                    if let Ok(decoded) = urlencoding::decode(&cap[1]) {
                        urls.push(decoded.into_owned());
                    }
                }
            }
        }
        DiscoveryResult { engine: "ahmia", urls }
    }
}

impl Tor66Engine {
    pub async fn search(client: &Client, keyword: &str) -> DiscoveryResult {
        let mut urls = Vec::new();
        let first_url = format!("{TOR66_BASE}/search?q={}&sorttype=rel&page=1", urlencoding::encode(keyword));
        let Some(first_page) = get_with_retry(client, &first_url).await else {
            return DiscoveryResult { engine: "tor66", urls };
        };
        let total: u32 = TOR66_COUNT
            .captures(&first_page)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);
        let pages = (total.div_ceil(10)).clamp(1, MAX_TOR66_PAGES);

        for result in TOR66_RESULT.captures_iter(&first_page) {
            if !result[1].contains("/serviceinfo/") {
                urls.push(result[1].to_string());
            }
        }

        for page in 2..=pages {
            let url = format!("{TOR66_BASE}/search?q={}&sorttype=rel&page={page}", urlencoding::encode(keyword));
            if let Some(body) = get_with_retry(client, &url).await {
                for result in TOR66_RESULT.captures_iter(&body) {
                    if !result[1].contains("/serviceinfo/") {
                        urls.push(result[1].to_string());
                    }
                }
            }
        }
        DiscoveryResult { engine: "tor66", urls }
    }
}

impl OnionLandEngine {
    pub async fn search(client: &Client, keyword: &str) -> DiscoveryResult {
        let mut urls = Vec::new();
        let first_url = format!("{ONIONLAND_BASE}/search?q={}&page=1", urlencoding::encode(keyword));
        let Some(first_page) = get_with_retry(client, &first_url).await else {
            return DiscoveryResult { engine: "onionland", urls };
        };
        let total: u32 = ONIONLAND_COUNT.captures(&first_page).and_then(|c| c[1].parse().ok()).unwrap_or(0);
        let pages = (total.div_ceil(10)).clamp(1, MAX_ONIONLAND_PAGES);

        for page in 1..=pages {
            let body = if page == 1 {
                Some(first_page.clone())
            } else {
                let url = format!("{ONIONLAND_BASE}/search?q={}&page={page}", urlencoding::encode(keyword));
                get_with_retry(client, &url).await
            };
            if let Some(body) = body {
                for cap in ONIONLAND_RESULT.captures_iter(&body) {
                    if let Ok(once) = urlencoding::decode(&cap[1]) {
                        if let Ok(twice) = urlencoding::decode(&once) {
                            urls.push(twice.into_owned());
                        }
                    }
                }
            }
        }
        DiscoveryResult { engine: "onionland", urls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tor66_count_regex_extracts_total() {
        let body = "Onion sites found : 42 across this query";
        let total: u32 = TOR66_COUNT.captures(body).and_then(|c| c[1].parse().ok()).unwrap();
        assert_eq!(total, 42);
    }

    #[test]
    fn tor66_result_regex_filters_serviceinfo_links() {
        let body = r#"<hr><b><a href="http://abc234567234567a.onion/page">x</a></b><b><a href="http://abc234567234567a.onion/serviceinfo/x">y</a></b>"#;
        let found: Vec<&str> = TOR66_RESULT.captures_iter(body).map(|c| c.get(1).unwrap().as_str()).collect();
        assert_eq!(found.len(), 2);
        let kept: Vec<&&str> = found.iter().filter(|u| !u.contains("/serviceinfo/")).collect();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn onionland_count_regex_extracts_total() {
        let body = "About 250 result(s) found";
        let total: u32 = ONIONLAND_COUNT.captures(body).and_then(|c| c[1].parse().ok()).unwrap();
        assert_eq!(total, 250);
    }

    #[test]
    fn ahmia_csrf_fields_extracted_from_hidden_inputs() {
        let home = r#"<input type="hidden" name="csrf_token" value="abc123">"#;
        let fields: Vec<(String, String)> =
            AHMIA_CSRF.captures_iter(home).map(|c| (c[1].to_string(), c[2].to_string())).collect();
        assert_eq!(fields, vec![("csrf_token".to_string(), "abc123".to_string())]);
    }
}
