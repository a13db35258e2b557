//! Pipeline coordination.
//!
//! Drives each request through authorization, cache lookup, singleflight
//! production, and consumption accounting. Bulk requests fan out one
//! independent run per member track and report per-track outcomes.

mod singleflight;

pub use singleflight::{await_outcome, Flight, FlightSlot, FlightTable};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{Artifact, ArtifactCache, CacheKey, CacheWrite};
use crate::catalog::{CollectionKind, MetadataResolver, TrackIdentity};
use crate::error::PipelineError;
use crate::fetcher::FetchWorker;
use crate::ledger::{QualityTier, QuotaLedger};
use crate::matcher::SourceMatcher;

/// Coordinator knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// How long a caller waits on an in-flight production before getting a
    /// timeout. The production itself keeps running in the background and
    /// still populates the cache.
    pub wait_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 300,
        }
    }
}

/// A completed delivery: the artifact plus the identity it was produced for.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub identity: TrackIdentity,
    pub artifact: Artifact,
    /// True when an earlier production was reused.
    pub from_cache: bool,
}

/// Per-track outcome within a bulk request.
#[derive(Debug)]
pub struct TrackOutcome {
    pub identity: TrackIdentity,
    pub outcome: Result<Delivery, PipelineError>,
}

/// Result of an album/playlist request; partial failure is per-track, never
/// all-or-nothing.
#[derive(Debug)]
pub struct BulkDelivery {
    pub kind: CollectionKind,
    pub tracks: Vec<TrackOutcome>,
}

impl BulkDelivery {
    pub fn delivered_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.outcome.is_ok()).count()
    }
}

type ProductionOutcome = Result<Artifact, PipelineError>;

/// Orchestrates resolution, matching, production, caching, and quota
/// accounting for every request.
pub struct DeliveryPipeline {
    resolver: Arc<MetadataResolver>,
    matcher: Arc<SourceMatcher>,
    worker: Arc<FetchWorker>,
    cache: Arc<dyn ArtifactCache>,
    ledger: Arc<QuotaLedger>,
    flights: FlightTable<ProductionOutcome>,
    settings: PipelineSettings,
}

impl DeliveryPipeline {
    pub fn new(
        resolver: Arc<MetadataResolver>,
        matcher: Arc<SourceMatcher>,
        worker: Arc<FetchWorker>,
        cache: Arc<dyn ArtifactCache>,
        ledger: Arc<QuotaLedger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            matcher,
            worker,
            cache,
            ledger,
            flights: FlightTable::new(),
            settings,
        }
    }

    /// Deliver a single track to a user.
    ///
    /// Authorization comes first: a denied request never touches the
    /// catalog, the cache, or the search backend. Consumption is recorded
    /// only once the artifact is in hand.
    pub async fn request_track(
        &self,
        user_id: &str,
        catalog_id: &str,
        requested_tier: QualityTier,
    ) -> Result<Delivery, PipelineError> {
        debug!("Request from {} for track {}: authorizing", user_id, catalog_id);
        let authorized = self.ledger.authorize(user_id, requested_tier, false)?;

        let identity = self.resolver.resolve(catalog_id).await?;
        let delivery = self
            .deliver(identity, authorized.effective_tier)
            .await
            .map_err(|e| {
                debug!("Request from {} for track {} failed: {}", user_id, catalog_id, e);
                e
            })?;

        self.ledger
            .commit_delivery(user_id, authorized.reservation)?;
        info!(
            "Delivered '{}' to {} at {} ({})",
            delivery.identity.label(),
            user_id,
            delivery.artifact.tier.as_str(),
            if delivery.from_cache { "cache hit" } else { "produced" }
        );
        Ok(delivery)
    }

    /// Deliver every track of an album or playlist. Premium only; each
    /// member runs its own pipeline and reports its own outcome.
    pub async fn request_collection(
        &self,
        user_id: &str,
        catalog_id: &str,
        kind: CollectionKind,
        requested_tier: QualityTier,
    ) -> Result<BulkDelivery, PipelineError> {
        debug!(
            "Bulk request from {} for {} {}: authorizing",
            user_id,
            kind.as_str(),
            catalog_id
        );
        let authorized = self.ledger.authorize(user_id, requested_tier, true)?;
        let tier = authorized.effective_tier;

        let identities = self.resolver.resolve_collection(catalog_id, kind).await?;

        let runs = identities.into_iter().map(|identity| async move {
            let outcome = self.deliver(identity.clone(), tier).await;
            let outcome = match outcome {
                Ok(delivery) => self
                    .ledger
                    .commit_delivery(user_id, None)
                    .map(|_| delivery),
                Err(e) => Err(e),
            };
            TrackOutcome { identity, outcome }
        });
        let tracks = futures::future::join_all(runs).await;

        let bulk = BulkDelivery { kind, tracks };
        info!(
            "Bulk {} {} for {}: {}/{} tracks delivered",
            kind.as_str(),
            catalog_id,
            user_id,
            bulk.delivered_count(),
            bulk.tracks.len()
        );
        Ok(bulk)
    }

    /// Cache-or-produce for one (track, tier) pair.
    async fn deliver(
        &self,
        identity: TrackIdentity,
        tier: QualityTier,
    ) -> Result<Delivery, PipelineError> {
        let key = CacheKey::derive(&identity, tier);

        if let Some(artifact) = self.cache.get(&key).map_err(PipelineError::internal)? {
            debug!("Cache hit for '{}' at {}", identity.label(), tier.as_str());
            return Ok(Delivery {
                identity,
                artifact,
                from_cache: true,
            });
        }

        debug!(
            "Cache miss for '{}' at {}: joining flight {}",
            identity.label(),
            tier.as_str(),
            key
        );

        let rx = match self.flights.join(key.as_str()) {
            Flight::Leader(slot, rx) => {
                self.spawn_production(slot, identity.clone(), tier);
                rx
            }
            Flight::Waiter(rx) => rx,
        };

        let wait = Duration::from_secs(self.settings.wait_timeout_secs);
        let artifact = match tokio::time::timeout(wait, await_outcome(rx)).await {
            Ok(outcome) => outcome??,
            Err(_) => {
                // The production keeps running detached and will still
                // populate the cache for the next request.
                warn!(
                    "Gave up waiting on '{}' after {:?}; production continues",
                    identity.label(),
                    wait
                );
                return Err(PipelineError::Timeout);
            }
        };

        Ok(Delivery {
            identity,
            artifact,
            from_cache: false,
        })
    }

    /// Run match + produce + register on a detached task so the flight
    /// outlives any caller that stops waiting.
    fn spawn_production(
        &self,
        slot: FlightSlot<ProductionOutcome>,
        identity: TrackIdentity,
        tier: QualityTier,
    ) {
        let matcher = self.matcher.clone();
        let worker = self.worker.clone();
        let cache = self.cache.clone();

        tokio::spawn(async move {
            let outcome = Self::produce_and_register(matcher, worker, cache, &identity, tier).await;
            if let Err(e) = &outcome {
                warn!("Production for '{}' failed: {}", identity.label(), e);
            }
            slot.complete(outcome);
        });
    }

    async fn produce_and_register(
        matcher: Arc<SourceMatcher>,
        worker: Arc<FetchWorker>,
        cache: Arc<dyn ArtifactCache>,
        identity: &TrackIdentity,
        tier: QualityTier,
    ) -> ProductionOutcome {
        // A flight that finished between our miss and taking the lead has
        // already populated the cache; don't produce twice.
        let key = CacheKey::derive(identity, tier);
        if let Some(existing) = cache.get(&key).map_err(PipelineError::internal)? {
            return Ok(existing);
        }

        let candidate = matcher.find_source(identity).await?;
        let artifact = worker.produce(&candidate, identity, tier).await?;

        // Registration strictly after the bytes are durable. A concurrent
        // first writer wins; their artifact is the one everyone shares.
        match cache.put(&artifact).map_err(PipelineError::internal)? {
            CacheWrite::Inserted => Ok(artifact),
            CacheWrite::AlreadyExists => {
                let existing = cache
                    .get(&artifact.key)
                    .map_err(PipelineError::internal)?
                    .ok_or_else(|| {
                        PipelineError::Internal("registered artifact vanished".to_string())
                    })?;
                Ok(existing)
            }
        }
    }
}
