//! Proxy rotation for upstream requests.
//!
//! The video platform throttles repeated traffic from one address; rotating
//! through a pool of proxies spreads the load. Proxies that keep failing sit
//! out a cooldown window before they are tried again. An empty pool means
//! direct connections.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Proxy URLs (e.g. "http://host:port", "socks5://host:port").
    pub proxies: Vec<String>,
    /// Consecutive failures before a proxy is benched.
    pub max_failures: u32,
    /// How long a benched proxy sits out.
    pub cooldown_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            max_failures: 3,
            cooldown_secs: 1800,
        }
    }
}

struct ProxyEntry {
    url: String,
    failures: u32,
    benched_until: Option<Instant>,
}

/// Round-robin proxy pool with failure tracking.
pub struct ProxyPool {
    entries: Mutex<(usize, Vec<ProxyEntry>)>,
    max_failures: u32,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new(settings: ProxySettings) -> Self {
        let entries = settings
            .proxies
            .into_iter()
            .map(|url| ProxyEntry {
                url,
                failures: 0,
                benched_until: None,
            })
            .collect::<Vec<_>>();

        if !entries.is_empty() {
            info!("Proxy pool loaded with {} proxies", entries.len());
        }

        Self {
            entries: Mutex::new((0, entries)),
            max_failures: settings.max_failures,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }

    /// Empty pool: every request goes direct.
    pub fn disabled() -> Self {
        Self::new(ProxySettings::default())
    }

    /// Next usable proxy, round-robin, skipping benched entries. None when
    /// the pool is empty or everything is benched (callers go direct).
    pub fn next(&self) -> Option<String> {
        let mut guard = self.entries.lock().expect("proxy pool lock poisoned");
        let (cursor, entries) = &mut *guard;
        if entries.is_empty() {
            return None;
        }

        let now = Instant::now();
        let len = entries.len();
        for offset in 0..len {
            let idx = (*cursor + offset) % len;
            let entry = &mut entries[idx];

            if let Some(until) = entry.benched_until {
                if until > now {
                    continue;
                }
                entry.benched_until = None;
                entry.failures = 0;
            }

            *cursor = (idx + 1) % len;
            return Some(entry.url.clone());
        }

        None
    }

    /// Report a failed request through `url`.
    pub fn report_failure(&self, url: &str) {
        let mut guard = self.entries.lock().expect("proxy pool lock poisoned");
        let (_, entries) = &mut *guard;
        if let Some(entry) = entries.iter_mut().find(|e| e.url == url) {
            entry.failures += 1;
            if entry.failures >= self.max_failures {
                entry.benched_until = Some(Instant::now() + self.cooldown);
                warn!(
                    "Proxy {} benched for {:?} after {} failures",
                    url, self.cooldown, entry.failures
                );
            }
        }
    }

    /// Report a successful request through `url`; clears its failure count.
    pub fn report_success(&self, url: &str) {
        let mut guard = self.entries.lock().expect("proxy pool lock poisoned");
        let (_, entries) = &mut *guard;
        if let Some(entry) = entries.iter_mut().find(|e| e.url == url) {
            entry.failures = 0;
        }
    }
}
