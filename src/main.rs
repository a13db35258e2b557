use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunedrop::cache::SqliteArtifactCache;
use tunedrop::catalog::{HttpCatalogProvider, MetadataResolver};
use tunedrop::config::{AppConfig, CliConfig, FileConfig};
use tunedrop::fetcher::{
    FetchWorker, FfmpegTranscoder, HttpSourceDownloader, ProxyPool, UpstreamLimiter,
};
use tunedrop::ledger::{QuotaLedger, SqliteLedgerStore};
use tunedrop::matcher::{HttpSearchBackend, SourceMatcher};
use tunedrop::pipeline::DeliveryPipeline;
use tunedrop::storage::FsStorage;
use tunedrop::transport::{CommandEvent, CommandHandler};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path = PathBuf::from(s);
    let path = match path.canonicalize() {
        Ok(canonical) => canonical,
        // Not-yet-existing paths are allowed (media dir is created later).
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => path,
        Err(e) => return Err(e).with_context(|| format!("Error resolving path: {}", s)),
    };
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory for the SQLite databases (cache index and ledger).
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// Directory for produced audio files. Defaults to <data_dir>/media.
    #[clap(long, value_parser = parse_path)]
    pub media_dir: Option<PathBuf>,

    /// Path to a TOML config file; file values override CLI values.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Base URL of the catalog metadata provider.
    #[clap(long)]
    pub catalog_url: Option<String>,

    /// Bearer token for the catalog provider. Also read from
    /// CATALOG_TOKEN.
    #[clap(long, env = "CATALOG_TOKEN")]
    pub catalog_token: Option<String>,

    /// Base URL of the video-search backend.
    #[clap(long)]
    pub search_url: Option<String>,

    /// Path to the ffmpeg binary.
    #[clap(long, value_parser = parse_path)]
    pub ffmpeg_bin: Option<PathBuf>,

    /// User ids allowed to run admin commands. Repeatable.
    #[clap(long = "admin")]
    pub admins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "tunedrop {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };

    let cli_config = CliConfig {
        data_dir: cli_args.data_dir,
        media_dir: cli_args.media_dir,
        catalog_url: cli_args.catalog_url,
        catalog_token: cli_args.catalog_token,
        search_url: cli_args.search_url,
        ffmpeg_bin: cli_args.ffmpeg_bin,
        admins: cli_args.admins,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening stores in {:?}...", config.data_dir);
    let cache = Arc::new(SqliteArtifactCache::new(&config.data_dir.join("cache.db"))?);
    let ledger_store = Arc::new(SqliteLedgerStore::new(&config.data_dir.join("ledger.db"))?);
    let storage = Arc::new(FsStorage::new(config.media_dir.clone())?);

    let provider = Arc::new(HttpCatalogProvider::new(
        config.catalog.base_url.clone(),
        config.catalog.token.clone(),
        config.catalog.timeout_sec,
    ));
    let resolver = Arc::new(MetadataResolver::new(provider, config.resolver.clone()));

    let backend = Arc::new(HttpSearchBackend::new(
        config.search.base_url.clone(),
        config.search.timeout_sec,
    ));
    let matcher = Arc::new(SourceMatcher::new(backend, config.matcher.clone()));

    let limiter = Arc::new(UpstreamLimiter::new(config.limiter.clone()));
    let proxies = Arc::new(ProxyPool::new(config.proxy.clone()));
    let downloader = Arc::new(HttpSourceDownloader::new(
        config.search.base_url.clone(),
        config.search.download_timeout_sec,
    ));
    let transcoder = Arc::new(FfmpegTranscoder::new(config.ffmpeg_bin.clone()));
    let worker = Arc::new(FetchWorker::new(
        downloader,
        transcoder,
        storage,
        limiter,
        proxies,
        config.worker.clone(),
    ));

    let ledger = Arc::new(QuotaLedger::new(ledger_store, config.quota.clone()));
    let pipeline = Arc::new(DeliveryPipeline::new(
        resolver,
        matcher,
        worker,
        cache,
        ledger.clone(),
        config.pipeline.clone(),
    ));

    let admins: HashSet<String> = config.admins.iter().cloned().collect();
    if admins.is_empty() {
        warn!("No admin users configured; premium grants are unavailable");
    }
    let handler = Arc::new(CommandHandler::new(pipeline, ledger, admins));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .context("Failed to install shutdown handler")?;
    }

    info!("Ready; reading command events from stdin");
    run_event_loop(handler, shutdown).await
}

/// Minimal transport adapter: one JSON command event per stdin line, one
/// JSON reply per stdout line. A real chat frontend speaks the same
/// event/reply contract.
async fn run_event_loop(
    handler: Arc<CommandHandler>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut workers = tokio::task::JoinSet::new();
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel::<String>(64);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let event: CommandEvent = match serde_json::from_str(&line) {
                            Ok(event) => event,
                            Err(e) => {
                                error!("Unparseable command event: {}", e);
                                continue;
                            }
                        };
                        // Each event runs concurrently; slow productions
                        // must not block unrelated requests.
                        let handler = handler.clone();
                        let reply_tx = reply_tx.clone();
                        workers.spawn(async move {
                            let reply = handler.handle(event).await;
                            if let Ok(json) = serde_json::to_string(&reply) {
                                let _ = reply_tx.send(json).await;
                            }
                        });
                    }
                    Ok(None) => {
                        info!("Input closed, draining in-flight requests");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            Some(json) = reply_rx.recv() => {
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = shutdown.cancelled() => {
                info!("Stopping event loop");
                break;
            }
        }
    }

    // Flush whatever is still in flight.
    drop(reply_tx);
    while workers.join_next().await.is_some() {}
    while let Some(json) = reply_rx.recv().await {
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}
