//! Error taxonomy for the delivery pipeline.
//!
//! Every failure a request can surface is one of these categories. The
//! variants are cloneable so a single production failure can be shared with
//! every request waiting on the same artifact.

use thiserror::Error;

/// Failure categories surfaced by the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The catalog entry does not exist or is not accessible.
    #[error("catalog entry not found")]
    NotFound,

    /// The catalog provider could not be reached after bounded retries.
    #[error("catalog provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No source candidate passed the duration filter.
    #[error("no acceptable source found")]
    NoMatch,

    /// Downloading the matched source failed after bounded retries.
    #[error("source fetch failed: {0}")]
    FetchFailed(String),

    /// Re-encoding the downloaded source failed.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// The user's daily delivery cap is exhausted.
    #[error("daily quota exceeded")]
    QuotaExceeded,

    /// The operation requires a premium entitlement.
    #[error("premium tier required")]
    TierRequired,

    /// The caller stopped waiting; production may still complete in the
    /// background.
    #[error("timed out waiting for delivery")]
    Timeout,

    /// Unexpected internal failure (storage, persistence, poisoned state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Fixed user-facing message for this category.
    ///
    /// Raw upstream detail stays in the logs; none of it crosses into text
    /// shown to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::NotFound => "That track could not be found in the catalog.",
            PipelineError::UpstreamUnavailable(_) => {
                "The catalog is temporarily unavailable. Please try again later."
            }
            PipelineError::NoMatch => "No matching audio source was found for that track.",
            PipelineError::FetchFailed(_) => "The audio source could not be downloaded.",
            PipelineError::TranscodeFailed(_) => "The audio could not be converted.",
            PipelineError::QuotaExceeded => {
                "You have reached your daily download limit. Upgrade to premium for unlimited downloads."
            }
            PipelineError::TierRequired => {
                "Album and playlist downloads are a premium feature."
            }
            PipelineError::Timeout => {
                "This is taking longer than expected. The track is still being prepared, try again in a minute."
            }
            PipelineError::Internal(_) => "Something went wrong. Please try again.",
        }
    }

    /// Whether this failure was a policy denial rather than a processing
    /// failure. Denials are never retried.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            PipelineError::QuotaExceeded | PipelineError::TierRequired
        )
    }

    /// Convenience constructor for internal failures from any error value.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials() {
        assert!(PipelineError::QuotaExceeded.is_denial());
        assert!(PipelineError::TierRequired.is_denial());
        assert!(!PipelineError::NotFound.is_denial());
        assert!(!PipelineError::Timeout.is_denial());
    }

    #[test]
    fn test_user_messages_contain_no_upstream_detail() {
        let err = PipelineError::FetchFailed("connection reset by 10.0.0.3".to_string());
        assert!(!err.user_message().contains("10.0.0.3"));

        let err = PipelineError::UpstreamUnavailable("dns lookup failed".to_string());
        assert!(!err.user_message().contains("dns"));
    }

    #[test]
    fn test_clone_preserves_category() {
        let err = PipelineError::FetchFailed("boom".to_string());
        assert_eq!(err.clone(), err);
    }
}
