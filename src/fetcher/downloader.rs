//! Source media download client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::matcher::MatchCandidate;

/// Download failure, split by whether another attempt could help.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// Network-shaped failure; worth retrying.
    Transient(String),
    /// The source is gone or rejected us permanently; retrying is pointless.
    Fatal(String),
}

/// Media download boundary.
#[async_trait]
pub trait SourceDownloader: Send + Sync {
    /// Download the candidate's audio stream into `dest`, optionally via a
    /// proxy. Returns the number of bytes written.
    async fn download(
        &self,
        candidate: &MatchCandidate,
        dest: &Path,
        proxy: Option<&str>,
    ) -> Result<u64, FetchError>;
}

/// Streams media from the search backend's media endpoint.
pub struct HttpSourceDownloader {
    base_url: String,
    timeout: Duration,
}

impl HttpSourceDownloader {
    pub fn new(base_url: String, timeout_sec: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_sec),
        }
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| FetchError::Fatal(format!("bad proxy url: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| FetchError::Fatal(format!("client build: {}", e)))
    }
}

#[async_trait]
impl SourceDownloader for HttpSourceDownloader {
    async fn download(
        &self,
        candidate: &MatchCandidate,
        dest: &Path,
        proxy: Option<&str>,
    ) -> Result<u64, FetchError> {
        let client = self.build_client(proxy)?;
        let url = format!(
            "{}/sources/{}/audio",
            self.base_url,
            urlencoding::encode(&candidate.source_id)
        );

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(FetchError::Fatal(format!("source answered {}", status)));
        }
        if !status.is_success() {
            // 429/5xx and friends: upstream pushing back, try again later.
            return Err(FetchError::Transient(format!("source answered {}", status)));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::Transient(format!("create {:?}: {}", dest, e)))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transient(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Transient(format!("write {:?}: {}", dest, e)))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Transient(format!("flush {:?}: {}", dest, e)))?;

        Ok(written)
    }
}
