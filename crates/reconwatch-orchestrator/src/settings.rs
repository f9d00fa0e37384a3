//! Environment-driven configuration (spec.md §6 "Environment config").
//!
//! Grounded on `phantom-secop-core/src/datastore.rs`'s
//! `DataStoreConfig::default()` / `from_env()` pattern: a typed struct with a
//! `Default` impl for local/test use and an `from_env()` that overlays
//! whatever environment variables are actually set.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub tor_proxy_host: String,
    pub tor_proxy_port: u16,
    pub tor_proxy_type: String,
    pub tor_timeout: Duration,
    pub tor_required: bool,

    pub darkweb_batch_size: usize,
    pub darkweb_default_crawl_limit: usize,
    pub darkweb_max_workers: usize,
    pub darkweb_crawl_timeout: Duration,
    pub darkweb_discovery_timeout: Duration,

    pub onionsearch_timeout: Duration,
    pub onionsearch_max_pages: u32,

    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tor_proxy_host: "127.0.0.1".to_string(),
            tor_proxy_port: 9050,
            tor_proxy_type: "socks5".to_string(),
            tor_timeout: Duration::from_secs(30),
            tor_required: false,
            darkweb_batch_size: 50,
            darkweb_default_crawl_limit: 50,
            darkweb_max_workers: 8,
            darkweb_crawl_timeout: Duration::from_secs(600),
            darkweb_discovery_timeout: Duration::from_secs(60),
            onionsearch_timeout: Duration::from_secs(30),
            onionsearch_max_pages: 30,
            queue_capacity: 10_000,
        }
    }
}

impl Settings {
    /// Overlays whatever of spec.md §6's environment variables are present
    /// on top of the defaults; unset variables keep the default.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("TOR_PROXY_HOST") {
            settings.tor_proxy_host = v;
        }
        if let Some(v) = env_u16("TOR_PROXY_PORT") {
            settings.tor_proxy_port = v;
        }
        if let Ok(v) = std::env::var("TOR_PROXY_TYPE") {
            settings.tor_proxy_type = v;
        }
        if let Some(v) = env_secs("TOR_TIMEOUT") {
            settings.tor_timeout = v;
        }
        if let Some(v) = env_bool("TOR_REQUIRED") {
            settings.tor_required = v;
        }
        if let Some(v) = env_usize("DARKWEB_BATCH_SIZE") {
            settings.darkweb_batch_size = v;
        }
        if let Some(v) = env_usize("DARKWEB_DEFAULT_CRAWL_LIMIT") {
            settings.darkweb_default_crawl_limit = v;
        }
        if let Some(v) = env_usize("DARKWEB_MAX_WORKERS") {
            settings.darkweb_max_workers = v;
        }
        if let Some(v) = env_secs("DARKWEB_CRAWL_TIMEOUT") {
            settings.darkweb_crawl_timeout = v;
        }
        if let Some(v) = env_secs("DARKWEB_DISCOVERY_TIMEOUT") {
            settings.darkweb_discovery_timeout = v;
        }
        if let Some(v) = env_secs("ONIONSEARCH_TIMEOUT") {
            settings.onionsearch_timeout = v;
        }
        if let Some(v) = std::env::var("ONIONSEARCH_MAX_PAGES").ok().and_then(|s| s.parse().ok()) {
            settings.onionsearch_max_pages = v;
        }
        settings
    }

    pub fn socks_proxy_url(&self) -> String {
        format!("{}://{}:{}", self.tor_proxy_type, self.tor_proxy_host, self.tor_proxy_port)
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_secs)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_point_at_local_tor_proxy() {
        let settings = Settings::default();
        assert_eq!(settings.socks_proxy_url(), "socks5://127.0.0.1:9050");
        assert!(!settings.tor_required);
    }
}
