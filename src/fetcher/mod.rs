//! Fetch-and-transcode worker.
//!
//! Downloads a matched source and re-encodes it to the requested tier.
//! Transient download failures are retried a bounded number of times with
//! backoff; transcoding is deterministic and never retried. On success the
//! encoded bytes are persisted to durable storage first, and registration
//! in the cache index happens strictly afterwards, so a crash mid-production
//! cannot leave an index entry pointing at missing bytes.

mod downloader;
mod limiter;
mod proxy;
mod transcode;

pub use downloader::{FetchError, HttpSourceDownloader, SourceDownloader};
pub use limiter::{LimiterSettings, UpstreamLimiter, UpstreamPermit};
pub use proxy::{ProxyPool, ProxySettings};
pub use transcode::{EncodeProfile, FfmpegTranscoder, Transcoder};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::cache::{Artifact, CacheKey};
use crate::catalog::TrackIdentity;
use crate::error::PipelineError;
use crate::ledger::QualityTier;
use crate::matcher::MatchCandidate;
use crate::storage::DurableStorage;

/// Retry behavior for source downloads.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Total download attempts (first try included).
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl WorkerSettings {
    fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        let jitter = rand::rng().random_range(0.8..1.2);
        Duration::from_millis((capped * jitter) as u64)
    }
}

/// Produces audio artifacts from matched sources.
pub struct FetchWorker {
    downloader: Arc<dyn SourceDownloader>,
    transcoder: Arc<dyn Transcoder>,
    storage: Arc<dyn DurableStorage>,
    limiter: Arc<UpstreamLimiter>,
    proxies: Arc<ProxyPool>,
    settings: WorkerSettings,
}

impl FetchWorker {
    pub fn new(
        downloader: Arc<dyn SourceDownloader>,
        transcoder: Arc<dyn Transcoder>,
        storage: Arc<dyn DurableStorage>,
        limiter: Arc<UpstreamLimiter>,
        proxies: Arc<ProxyPool>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            downloader,
            transcoder,
            storage,
            limiter,
            proxies,
            settings,
        }
    }

    /// Download `candidate`, transcode to `tier`, persist, and return the
    /// resulting artifact. Exactly one stored object per successful call.
    pub async fn produce(
        &self,
        candidate: &MatchCandidate,
        identity: &TrackIdentity,
        tier: QualityTier,
    ) -> Result<Artifact, PipelineError> {
        let work_dir = tempfile::tempdir()
            .map_err(|e| PipelineError::internal(format!("temp dir: {}", e)))?;
        let raw_path = work_dir.path().join("source.raw");
        let encoded_path = work_dir.path().join("encoded.mp3");

        self.download_with_retry(candidate, &raw_path).await?;

        let profile = EncodeProfile::for_tier(tier);
        self.transcoder
            .transcode(&raw_path, &encoded_path, &profile)
            .await
            .map_err(|e| {
                warn!("Transcode of source {} failed: {:#}", candidate.source_id, e);
                PipelineError::TranscodeFailed(format!("{:#}", e))
            })?;

        let byte_size = tokio::fs::metadata(&encoded_path)
            .await
            .map_err(|e| PipelineError::internal(format!("encoded output missing: {}", e)))?
            .len();

        // Bytes land in durable storage before anyone registers the key.
        let location = self
            .storage
            .store(&encoded_path)
            .await
            .map_err(PipelineError::internal)?;

        info!(
            "Produced {} artifact for '{}' ({} bytes) from source {}",
            tier.as_str(),
            identity.label(),
            byte_size,
            candidate.source_id
        );

        Ok(Artifact {
            key: CacheKey::derive(identity, tier),
            location,
            byte_size,
            duration_secs: identity.duration_secs,
            tier,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    async fn download_with_retry(
        &self,
        candidate: &MatchCandidate,
        dest: &std::path::Path,
    ) -> Result<(), PipelineError> {
        let mut last_error = String::new();

        for attempt in 0..self.settings.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.settings.backoff(attempt - 1)).await;
            }

            let proxy = self.proxies.next();
            let permit = self.limiter.acquire().await;
            let result = self
                .downloader
                .download(candidate, dest, proxy.as_deref())
                .await;
            drop(permit);

            match result {
                Ok(bytes) => {
                    if let Some(proxy) = proxy {
                        self.proxies.report_success(&proxy);
                    }
                    info!(
                        "Downloaded source {} ({} bytes, attempt {})",
                        candidate.source_id,
                        bytes,
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(FetchError::Fatal(detail)) => {
                    warn!("Source {} fetch failed fatally: {}", candidate.source_id, detail);
                    return Err(PipelineError::FetchFailed(detail));
                }
                Err(FetchError::Transient(detail)) => {
                    if let Some(proxy) = proxy {
                        self.proxies.report_failure(&proxy);
                    }
                    warn!(
                        "Source {} fetch attempt {}/{} failed: {}",
                        candidate.source_id,
                        attempt + 1,
                        self.settings.max_attempts,
                        detail
                    );
                    last_error = detail;
                }
            }
        }

        Err(PipelineError::FetchFailed(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::storage::FsStorage;

    struct ScriptedDownloader {
        calls: AtomicU32,
        transient_failures: u32,
        fatal: bool,
    }

    #[async_trait]
    impl SourceDownloader for ScriptedDownloader {
        async fn download(
            &self,
            _candidate: &MatchCandidate,
            dest: &Path,
            _proxy: Option<&str>,
        ) -> Result<u64, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(FetchError::Fatal("gone".to_string()));
            }
            if n < self.transient_failures {
                return Err(FetchError::Transient("reset".to_string()));
            }
            tokio::fs::write(dest, b"raw source bytes")
                .await
                .map_err(|e| FetchError::Transient(e.to_string()))?;
            Ok(16)
        }
    }

    struct CopyTranscoder;

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

    struct FailingTranscoder;

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn transcode(
            &self,
            _src: &Path,
            _dest: &Path,
            _profile: &EncodeProfile,
        ) -> anyhow::Result<()> {
            anyhow::bail!("codec blew up")
        }
    }

    fn identity() -> TrackIdentity {
        TrackIdentity {
            catalog_id: "T1".to_string(),
            title: "song a".to_string(),
            artist: "artist x".to_string(),
            duration_secs: 200,
            album: None,
            ordinal: None,
        }
    }

    fn candidate() -> MatchCandidate {
        MatchCandidate {
            source_id: "V1".to_string(),
            title: "artist x song a".to_string(),
            duration_secs: 200,
        }
    }

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 1.0,
        }
    }

    fn worker(
        downloader: Arc<ScriptedDownloader>,
        transcoder: Arc<dyn Transcoder>,
        dir: &Path,
    ) -> FetchWorker {
        FetchWorker::new(
            downloader,
            transcoder,
            Arc::new(FsStorage::new(dir.join("media")).unwrap()),
            Arc::new(UpstreamLimiter::new(LimiterSettings {
                max_concurrent: 4,
                min_spacing_ms: 0,
            })),
            Arc::new(ProxyPool::disabled()),
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn test_produce_success() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(ScriptedDownloader {
            calls: AtomicU32::new(0),
            transient_failures: 0,
            fatal: false,
        });
        let worker = worker(downloader.clone(), Arc::new(CopyTranscoder), dir.path());

        let artifact = worker
            .produce(&candidate(), &identity(), QualityTier::Standard)
            .await
            .unwrap();

        assert_eq!(artifact.tier, QualityTier::Standard);
        assert_eq!(artifact.byte_size, 16);
        assert_eq!(
            artifact.key,
            CacheKey::derive(&identity(), QualityTier::Standard)
        );
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(ScriptedDownloader {
            calls: AtomicU32::new(0),
            transient_failures: 2,
            fatal: false,
        });
        let worker = worker(downloader.clone(), Arc::new(CopyTranscoder), dir.path());

        assert!(worker
            .produce(&candidate(), &identity(), QualityTier::High)
            .await
            .is_ok());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_fetch_failed() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(ScriptedDownloader {
            calls: AtomicU32::new(0),
            transient_failures: 10,
            fatal: false,
        });
        let worker = worker(downloader.clone(), Arc::new(CopyTranscoder), dir.path());

        let err = worker
            .produce(&candidate(), &identity(), QualityTier::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailed(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(ScriptedDownloader {
            calls: AtomicU32::new(0),
            transient_failures: 0,
            fatal: true,
        });
        let worker = worker(downloader.clone(), Arc::new(CopyTranscoder), dir.path());

        let err = worker
            .produce(&candidate(), &identity(), QualityTier::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailed(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transcode_failure_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(ScriptedDownloader {
            calls: AtomicU32::new(0),
            transient_failures: 0,
            fatal: false,
        });
        let worker = worker(downloader.clone(), Arc::new(FailingTranscoder), dir.path());

        let err = worker
            .produce(&candidate(), &identity(), QualityTier::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TranscodeFailed(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }
}
