//! TOML file configuration.
//!
//! Every field is optional; file values override CLI values during
//! resolution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub data_dir: Option<String>,
    pub media_dir: Option<String>,
    pub catalog_url: Option<String>,
    pub catalog_token: Option<String>,
    pub search_url: Option<String>,
    pub ffmpeg_bin: Option<String>,
    pub admins: Option<Vec<String>>,

    pub resolver: Option<ResolverConfig>,
    pub matcher: Option<MatcherConfig>,
    pub worker: Option<WorkerConfig>,
    pub limiter: Option<LimiterConfig>,
    pub proxy: Option<ProxyConfig>,
    pub quota: Option<QuotaConfig>,
    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatcherConfig {
    pub candidate_limit: Option<usize>,
    pub max_duration_delta_secs: Option<u32>,
    pub duration_weight: Option<f64>,
    pub text_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub download_timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimiterConfig {
    pub max_concurrent: Option<usize>,
    pub min_spacing_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub proxies: Option<Vec<String>>,
    pub max_failures: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaConfig {
    pub free_daily_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub wait_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }
}
