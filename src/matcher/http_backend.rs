//! HTTP client for the external video-search backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PipelineError;

use super::{MatchCandidate, SearchBackend};

/// HTTP-backed search client.
///
/// The backend answers `GET /search?q=...&limit=N` with a JSON array of
/// candidates.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchBackend {
    pub fn new(base_url: String, timeout_sec: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();

        Self { client, base_url }
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MatchCandidate>, PipelineError> {
        let url = format!(
            "{}/search?q={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "search answered {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("bad payload: {}", e)))
    }
}
