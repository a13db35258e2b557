//! Catalog metadata resolution.
//!
//! Turns opaque catalog identifiers into canonical track identities with
//! normalized title/artist fields, so equivalent entries converge on the
//! same cache key.

mod http_provider;
mod normalize;
mod resolver;

pub use http_provider::HttpCatalogProvider;
pub use normalize::normalize_text;
pub use resolver::{MetadataResolver, ResolverSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Canonical identity of a track, as resolved from the catalog.
///
/// Title and artist are normalized (see [`normalize_text`]). Immutable once
/// resolved; the cache key is derived from these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackIdentity {
    /// Catalog-assigned identifier.
    pub catalog_id: String,
    /// Normalized track title.
    pub title: String,
    /// Normalized primary artist name.
    pub artist: String,
    /// Track duration in seconds.
    pub duration_secs: u32,
    /// Album name, if the catalog reports one.
    pub album: Option<String>,
    /// 1-based position within the requested album/playlist, for bulk
    /// requests.
    pub ordinal: Option<u32>,
}

impl TrackIdentity {
    /// Display label used in captions and logs ("Artist - Title").
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Kind of multi-track catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Album,
    Playlist,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Album => "album",
            CollectionKind::Playlist => "playlist",
        }
    }
}

/// Raw track metadata as returned by the catalog provider, before
/// normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_secs: u32,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// Raw collection metadata (album or playlist) with its member tracks in
/// catalog order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCollection {
    pub id: String,
    pub name: String,
    pub tracks: Vec<RawTrack>,
}

/// Catalog metadata provider boundary.
///
/// Implementations must report a missing or region-restricted entry as
/// [`PipelineError::NotFound`] and an unreachable provider as
/// [`PipelineError::UpstreamUnavailable`]; the resolver handles bounded
/// retries on the latter.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch raw metadata for a single track.
    async fn lookup_track(&self, catalog_id: &str) -> Result<RawTrack, PipelineError>;

    /// Fetch raw metadata for an album or playlist including member tracks.
    async fn lookup_collection(
        &self,
        catalog_id: &str,
        kind: CollectionKind,
    ) -> Result<RawCollection, PipelineError>;
}
