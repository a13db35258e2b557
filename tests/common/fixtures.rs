//! Fake collaborators and a harness builder.
//!
//! The catalog, search backend, downloader, and transcoder are scripted
//! in-memory stand-ins; stores run on in-memory SQLite; storage writes to a
//! temp dir. Downloader and search invocations are counted so tests can
//! assert how much work actually ran.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use tunedrop::cache::SqliteArtifactCache;
use tunedrop::catalog::{
    CatalogProvider, CollectionKind, MetadataResolver, RawCollection, RawTrack, ResolverSettings,
};
use tunedrop::error::PipelineError;
use tunedrop::fetcher::{
    EncodeProfile, FetchError, FetchWorker, LimiterSettings, ProxyPool, SourceDownloader,
    Transcoder, UpstreamLimiter, WorkerSettings,
};
use tunedrop::ledger::{QuotaLedger, QuotaSettings, SqliteLedgerStore};
use tunedrop::matcher::{MatchCandidate, MatcherSettings, SearchBackend, SourceMatcher};
use tunedrop::pipeline::{DeliveryPipeline, PipelineSettings};
use tunedrop::storage::FsStorage;
use tunedrop::transport::CommandHandler;

/// In-memory catalog.
pub struct FakeCatalog {
    tracks: HashMap<String, RawTrack>,
    collections: HashMap<String, RawCollection>,
}

#[async_trait]
impl CatalogProvider for FakeCatalog {
    async fn lookup_track(&self, catalog_id: &str) -> Result<RawTrack, PipelineError> {
        self.tracks
            .get(catalog_id)
            .cloned()
            .ok_or(PipelineError::NotFound)
    }

    async fn lookup_collection(
        &self,
        catalog_id: &str,
        _kind: CollectionKind,
    ) -> Result<RawCollection, PipelineError> {
        self.collections
            .get(catalog_id)
            .cloned()
            .ok_or(PipelineError::NotFound)
    }
}

/// Search backend returning one perfectly matching candidate per query,
/// counting invocations.
pub struct FakeSearch {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn search(
        &self,
        query: &str,
        _limit: usize,
    ) -> Result<Vec<MatchCandidate>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![MatchCandidate {
            source_id: format!("src:{}", query),
            title: query.to_string(),
            // All fixture tracks are 200s; candidates match exactly.
            duration_secs: 200,
        }])
    }
}

/// Downloader that writes fixed bytes after an optional delay, counting
/// invocations. Can be scripted to fail.
pub struct CountingDownloader {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail: bool,
}

#[async_trait]
impl SourceDownloader for CountingDownloader {
    async fn download(
        &self,
        _candidate: &MatchCandidate,
        dest: &Path,
        _proxy: Option<&str>,
    ) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(FetchError::Fatal("scripted failure".to_string()));
        }
        tokio::fs::write(dest, b"downloaded source audio")
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        Ok(23)
    }
}

/// Transcoder that just copies bytes through.
pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        src: &Path,
        dest: &Path,
        _profile: &EncodeProfile,
    ) -> anyhow::Result<()> {
        tokio::fs::copy(src, dest).await?;
        Ok(())
    }
}

/// Knobs for building a test harness.
pub struct HarnessConfig {
    pub free_daily_limit: u32,
    pub wait_timeout_secs: u64,
    pub download_delay: Duration,
    pub download_fails: bool,
    pub admins: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: 10,
            wait_timeout_secs: 60,
            download_delay: Duration::ZERO,
            download_fails: false,
            admins: vec!["admin".to_string()],
        }
    }
}

/// A fully wired pipeline over fakes.
pub struct Harness {
    pub pipeline: Arc<DeliveryPipeline>,
    pub handler: CommandHandler,
    pub ledger: Arc<QuotaLedger>,
    pub downloads: Arc<CountingDownloader>,
    pub searches: Arc<FakeSearch>,
    // Keeps the media directory alive for the duration of the test.
    _dir: TempDir,
}

/// Standard fixture content: track T1 "Song A" by "Artist X" (200s), tracks
/// T2/T3 by the same artist, album AL1 containing T1..T3, playlist PL1
/// containing T1 and T2.
pub fn build_harness(config: HarnessConfig) -> Harness {
    let dir = TempDir::new().unwrap();

    let mut tracks = HashMap::new();
    for (id, title) in [("T1", "Song A"), ("T2", "Song B"), ("T3", "Song C")] {
        tracks.insert(
            id.to_string(),
            RawTrack {
                id: id.to_string(),
                title: title.to_string(),
                artist: "Artist X".to_string(),
                duration_secs: 200,
                album: Some("Album One".to_string()),
                position: None,
            },
        );
    }

    let member = |id: &str, pos: u32| {
        let mut t = tracks[id].clone();
        t.position = Some(pos);
        t
    };
    let mut collections = HashMap::new();
    collections.insert(
        "AL1".to_string(),
        RawCollection {
            id: "AL1".to_string(),
            name: "Album One".to_string(),
            tracks: vec![member("T1", 1), member("T2", 2), member("T3", 3)],
        },
    );
    collections.insert(
        "PL1".to_string(),
        RawCollection {
            id: "PL1".to_string(),
            name: "Playlist One".to_string(),
            tracks: vec![member("T1", 1), member("T2", 2)],
        },
    );

    let resolver = Arc::new(MetadataResolver::new(
        Arc::new(FakeCatalog {
            tracks,
            collections,
        }),
        ResolverSettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            backoff_multiplier: 1.0,
        },
    ));

    let searches = Arc::new(FakeSearch {
        calls: AtomicUsize::new(0),
    });
    let matcher = Arc::new(SourceMatcher::new(
        searches.clone(),
        MatcherSettings::default(),
    ));

    let downloads = Arc::new(CountingDownloader {
        calls: AtomicUsize::new(0),
        delay: config.download_delay,
        fail: config.download_fails,
    });
    let worker = Arc::new(FetchWorker::new(
        downloads.clone(),
        Arc::new(CopyTranscoder),
        Arc::new(FsStorage::new(dir.path().join("media")).unwrap()),
        Arc::new(UpstreamLimiter::new(LimiterSettings {
            max_concurrent: 8,
            min_spacing_ms: 0,
        })),
        Arc::new(ProxyPool::disabled()),
        WorkerSettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 1.0,
        },
    ));

    let cache = Arc::new(SqliteArtifactCache::in_memory().unwrap());
    let ledger = Arc::new(QuotaLedger::new(
        Arc::new(SqliteLedgerStore::in_memory().unwrap()),
        QuotaSettings {
            free_daily_limit: config.free_daily_limit,
        },
    ));

    let pipeline = Arc::new(DeliveryPipeline::new(
        resolver,
        matcher,
        worker,
        cache,
        ledger.clone(),
        PipelineSettings {
            wait_timeout_secs: config.wait_timeout_secs,
        },
    ));

    let handler = CommandHandler::new(
        pipeline.clone(),
        ledger.clone(),
        config.admins.iter().cloned().collect::<HashSet<_>>(),
    );

    Harness {
        pipeline,
        handler,
        ledger,
        downloads,
        searches,
        _dir: dir,
    }
}

pub fn default_harness() -> Harness {
    build_harness(HarnessConfig::default())
}
