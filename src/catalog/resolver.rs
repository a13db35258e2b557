//! Metadata resolver with normalization and bounded retry.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::PipelineError;

use super::normalize::normalize_text;
use super::{CatalogProvider, CollectionKind, RawTrack, TrackIdentity};

/// Retry behavior for catalog lookups.
///
/// Only [`PipelineError::UpstreamUnavailable`] is retried; a missing entry
/// is a final answer.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Total attempts per lookup (first try included).
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

/// Resolves catalog identifiers into canonical [`TrackIdentity`] values.
pub struct MetadataResolver {
    provider: Arc<dyn CatalogProvider>,
    settings: ResolverSettings,
}

impl MetadataResolver {
    pub fn new(provider: Arc<dyn CatalogProvider>, settings: ResolverSettings) -> Self {
        Self { provider, settings }
    }

    /// Resolve a single track identifier.
    pub async fn resolve(&self, catalog_id: &str) -> Result<TrackIdentity, PipelineError> {
        let raw = self
            .with_retry(|| self.provider.lookup_track(catalog_id))
            .await?;
        Ok(Self::canonicalize(raw))
    }

    /// Resolve an album or playlist into its member track identities, in
    /// catalog order with 1-based ordinals.
    pub async fn resolve_collection(
        &self,
        catalog_id: &str,
        kind: CollectionKind,
    ) -> Result<Vec<TrackIdentity>, PipelineError> {
        let collection = self
            .with_retry(|| self.provider.lookup_collection(catalog_id, kind))
            .await?;

        debug!(
            "Resolved {} '{}' with {} tracks",
            kind.as_str(),
            collection.name,
            collection.tracks.len()
        );

        Ok(collection
            .tracks
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let ordinal = raw.position.unwrap_or(i as u32 + 1);
                let mut identity = Self::canonicalize(raw);
                identity.ordinal = Some(ordinal);
                identity
            })
            .collect())
    }

    fn canonicalize(raw: RawTrack) -> TrackIdentity {
        TrackIdentity {
            catalog_id: raw.id,
            title: normalize_text(&raw.title),
            artist: normalize_text(&raw.artist),
            duration_secs: raw.duration_secs,
            album: raw.album,
            ordinal: raw.position,
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let mut backoff_ms = self.settings.initial_backoff_ms as f64;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(PipelineError::UpstreamUnavailable(detail)) => {
                    if attempt >= self.settings.max_attempts {
                        return Err(PipelineError::UpstreamUnavailable(detail));
                    }
                    // Jitter spreads out herds of concurrent lookups.
                    let jitter = rand::rng().random_range(0.8..1.2);
                    let wait = Duration::from_millis((backoff_ms * jitter) as u64);
                    warn!(
                        "Catalog lookup attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.settings.max_attempts, detail, wait
                    );
                    tokio::time::sleep(wait).await;
                    backoff_ms *= self.settings.backoff_multiplier;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
