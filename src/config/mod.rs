mod file_config;

pub use file_config::FileConfig;

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::catalog::ResolverSettings;
use crate::fetcher::{LimiterSettings, ProxySettings, WorkerSettings};
use crate::ledger::QuotaSettings;
use crate::matcher::MatcherSettings;
use crate::pipeline::PipelineSettings;

/// CLI arguments that participate in config resolution. TOML values
/// override CLI values where present.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub catalog_url: Option<String>,
    pub catalog_token: Option<String>,
    pub search_url: Option<String>,
    pub ffmpeg_bin: Option<PathBuf>,
    pub admins: Vec<String>,
}

/// Catalog provider connection settings.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_sec: u64,
}

/// Search backend connection settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub base_url: String,
    pub timeout_sec: u64,
    pub download_timeout_sec: u64,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub media_dir: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub admins: Vec<String>,

    pub catalog: CatalogSettings,
    pub search: SearchSettings,
    pub resolver: ResolverSettings,
    pub matcher: MatcherSettings,
    pub worker: WorkerSettings,
    pub limiter: LimiterSettings,
    pub proxy: ProxySettings,
    pub quota: QuotaSettings,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present; feature
    /// sections fall back to their defaults field by field.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        if !data_dir.exists() {
            bail!("Data directory does not exist: {:?}", data_dir);
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .or_else(|| cli.media_dir.clone())
            .unwrap_or_else(|| data_dir.join("media"));

        let catalog_url = file
            .catalog_url
            .or_else(|| cli.catalog_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("catalog_url must be specified via --catalog-url or in config file")
            })?;

        let search_url = file
            .search_url
            .or_else(|| cli.search_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("search_url must be specified via --search-url or in config file")
            })?;

        let catalog_token = file.catalog_token.or_else(|| cli.catalog_token.clone());

        let ffmpeg_bin = file
            .ffmpeg_bin
            .map(PathBuf::from)
            .or_else(|| cli.ffmpeg_bin.clone())
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));

        let admins = file.admins.unwrap_or_else(|| cli.admins.clone());

        let resolver_file = file.resolver.unwrap_or_default();
        let resolver_defaults = ResolverSettings::default();
        let resolver = ResolverSettings {
            max_attempts: resolver_file
                .max_attempts
                .unwrap_or(resolver_defaults.max_attempts),
            initial_backoff_ms: resolver_file
                .initial_backoff_ms
                .unwrap_or(resolver_defaults.initial_backoff_ms),
            backoff_multiplier: resolver_file
                .backoff_multiplier
                .unwrap_or(resolver_defaults.backoff_multiplier),
        };

        let matcher_file = file.matcher.unwrap_or_default();
        let matcher_defaults = MatcherSettings::default();
        let matcher = MatcherSettings {
            candidate_limit: matcher_file
                .candidate_limit
                .unwrap_or(matcher_defaults.candidate_limit),
            max_duration_delta_secs: matcher_file
                .max_duration_delta_secs
                .unwrap_or(matcher_defaults.max_duration_delta_secs),
            duration_weight: matcher_file
                .duration_weight
                .unwrap_or(matcher_defaults.duration_weight),
            text_weight: matcher_file
                .text_weight
                .unwrap_or(matcher_defaults.text_weight),
        };

        let worker_file = file.worker.unwrap_or_default();
        let worker_defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            max_attempts: worker_file
                .max_attempts
                .unwrap_or(worker_defaults.max_attempts),
            initial_backoff_ms: worker_file
                .initial_backoff_ms
                .unwrap_or(worker_defaults.initial_backoff_ms),
            max_backoff_ms: worker_file
                .max_backoff_ms
                .unwrap_or(worker_defaults.max_backoff_ms),
            backoff_multiplier: worker_file
                .backoff_multiplier
                .unwrap_or(worker_defaults.backoff_multiplier),
        };
        let download_timeout_sec = worker_file.download_timeout_sec.unwrap_or(300);

        let limiter_file = file.limiter.unwrap_or_default();
        let limiter_defaults = LimiterSettings::default();
        let limiter = LimiterSettings {
            max_concurrent: limiter_file
                .max_concurrent
                .unwrap_or(limiter_defaults.max_concurrent),
            min_spacing_ms: limiter_file
                .min_spacing_ms
                .unwrap_or(limiter_defaults.min_spacing_ms),
        };

        let proxy_file = file.proxy.unwrap_or_default();
        let proxy_defaults = ProxySettings::default();
        let proxy = ProxySettings {
            proxies: proxy_file.proxies.unwrap_or_default(),
            max_failures: proxy_file
                .max_failures
                .unwrap_or(proxy_defaults.max_failures),
            cooldown_secs: proxy_file
                .cooldown_secs
                .unwrap_or(proxy_defaults.cooldown_secs),
        };

        let quota_file = file.quota.unwrap_or_default();
        let quota = QuotaSettings {
            free_daily_limit: quota_file
                .free_daily_limit
                .unwrap_or_else(|| QuotaSettings::default().free_daily_limit),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            wait_timeout_secs: pipeline_file
                .wait_timeout_secs
                .unwrap_or_else(|| PipelineSettings::default().wait_timeout_secs),
        };

        Ok(Self {
            data_dir,
            media_dir,
            ffmpeg_bin,
            admins,
            catalog: CatalogSettings {
                base_url: catalog_url,
                token: catalog_token,
                timeout_sec: 30,
            },
            search: SearchSettings {
                base_url: search_url,
                timeout_sec: 30,
                download_timeout_sec,
            },
            resolver,
            matcher,
            worker,
            limiter,
            proxy,
            quota,
            pipeline,
        })
    }
}
