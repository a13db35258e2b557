//! Source matching against the video-search backend.
//!
//! A wrong match silently delivers the wrong song, so candidate selection is
//! a pure, deterministic function over injected candidates: the duration
//! filter is hard, the weighted score is tunable configuration, and all of
//! it is unit-testable without network I/O.

mod http_backend;

pub use http_backend::HttpSearchBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::catalog::TrackIdentity;
use crate::error::PipelineError;

/// A search result from the video platform. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchCandidate {
    /// Source-platform identifier of the video.
    pub source_id: String,
    /// Candidate title as reported by the platform.
    pub title: String,
    /// Reported duration in seconds.
    pub duration_secs: u32,
}

/// Search backend boundary (`search(query) -> candidates`).
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MatchCandidate>, PipelineError>;
}

/// Tunable scoring policy.
///
/// The weights are configuration rather than constants: mis-tuned matching
/// delivers the wrong song, and operators need to adjust without a rebuild.
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    /// How many candidates to retrieve per query.
    pub candidate_limit: usize,
    /// Hard filter: candidates whose duration differs from the track by
    /// more than this are rejected outright.
    pub max_duration_delta_secs: u32,
    /// Weight of duration closeness in the combined score.
    pub duration_weight: f64,
    /// Weight of title/artist text similarity in the combined score.
    pub text_weight: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            candidate_limit: 5,
            max_duration_delta_secs: 5,
            duration_weight: 0.4,
            text_weight: 0.6,
        }
    }
}

/// Selects the best source candidate for a track.
pub struct SourceMatcher {
    backend: Arc<dyn SearchBackend>,
    settings: MatcherSettings,
}

impl SourceMatcher {
    pub fn new(backend: Arc<dyn SearchBackend>, settings: MatcherSettings) -> Self {
        Self { backend, settings }
    }

    /// Query the search backend and pick the best candidate.
    ///
    /// Returns [`PipelineError::NoMatch`] when no candidate passes the
    /// duration filter.
    pub async fn find_source(
        &self,
        identity: &TrackIdentity,
    ) -> Result<MatchCandidate, PipelineError> {
        let query = format!("{} {}", identity.artist, identity.title);
        let candidates = self
            .backend
            .search(&query, self.settings.candidate_limit)
            .await?;

        debug!(
            "Search for '{}' returned {} candidates",
            query,
            candidates.len()
        );

        select_candidate(identity, &candidates, &self.settings)
            .map(|(candidate, score)| {
                debug!(
                    "Matched '{}' to source {} (score {:.3})",
                    identity.label(),
                    candidate.source_id,
                    score
                );
                candidate
            })
            .ok_or(PipelineError::NoMatch)
    }
}

/// Pick the highest-scoring candidate, or None if all fail the duration
/// filter. Pure and deterministic; ties keep the earlier candidate.
pub fn select_candidate(
    identity: &TrackIdentity,
    candidates: &[MatchCandidate],
    settings: &MatcherSettings,
) -> Option<(MatchCandidate, f64)> {
    let mut best: Option<(MatchCandidate, f64)> = None;

    for candidate in candidates {
        let delta = candidate.duration_secs.abs_diff(identity.duration_secs);
        if delta > settings.max_duration_delta_secs {
            continue;
        }

        let score = score_candidate(identity, candidate, delta, settings);
        match &best {
            Some((_, best_score)) if *best_score >= score => {}
            _ => best = Some((candidate.clone(), score)),
        }
    }

    best
}

fn score_candidate(
    identity: &TrackIdentity,
    candidate: &MatchCandidate,
    duration_delta: u32,
    settings: &MatcherSettings,
) -> f64 {
    // 1.0 at an exact duration match, falling linearly to 0.0 at the edge
    // of the accepted window.
    let duration_closeness = if settings.max_duration_delta_secs == 0 {
        1.0
    } else {
        1.0 - duration_delta as f64 / settings.max_duration_delta_secs as f64
    };

    let wanted = format!("{} {}", identity.artist, identity.title);
    let text = text_similarity(&wanted, &candidate.title)
        .max(text_similarity(&identity.title, &candidate.title));

    settings.duration_weight * duration_closeness + settings.text_weight * text
}

/// Normalized edit-distance similarity in [0, 1]; 1.0 means identical after
/// lowercasing.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
}

/// Edit distance over chars, two-row variant.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev_row: Vec<usize> = (0..=b_len).collect();
    let mut curr_row: Vec<usize> = vec![0; b_len + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = if a_char == b_char { 0 } else { 1 };
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_len]
}
