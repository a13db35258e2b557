//! HTTP client for the external catalog provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::PipelineError;

use super::{CatalogProvider, CollectionKind, RawCollection, RawTrack};

/// HTTP-backed catalog provider.
///
/// Credentials are passed as a bearer token; the catalog service is expected
/// to answer 404 for unknown ids and 451 for region-restricted entries.
pub struct HttpCatalogProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCatalogProvider {
    pub fn new(base_url: String, token: Option<String>, timeout_sec: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            client,
            base_url,
            token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, PipelineError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
                Err(PipelineError::NotFound)
            }
            status if status.is_success() => {
                debug!("Catalog GET {} -> {}", url, status);
                response
                    .json()
                    .await
                    .map_err(|e| PipelineError::UpstreamUnavailable(format!("bad payload: {}", e)))
            }
            status => Err(PipelineError::UpstreamUnavailable(format!(
                "catalog answered {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalogProvider {
    async fn lookup_track(&self, catalog_id: &str) -> Result<RawTrack, PipelineError> {
        let url = format!(
            "{}/tracks/{}",
            self.base_url,
            urlencoding::encode(catalog_id)
        );
        self.get_json(&url).await
    }

    async fn lookup_collection(
        &self,
        catalog_id: &str,
        kind: CollectionKind,
    ) -> Result<RawCollection, PipelineError> {
        let url = format!(
            "{}/{}s/{}",
            self.base_url,
            kind.as_str(),
            urlencoding::encode(catalog_id)
        );
        self.get_json(&url).await
    }
}
