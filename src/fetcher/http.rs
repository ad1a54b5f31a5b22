//! reqwest-backed transport
//!
//! Sends one GET per call and reports status and body as-is. Retrying,
//! classification and budget accounting happen above this layer.

use super::shared_resources::global_http_client;
use super::{RawResponse, Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

/// HTTP transport for the transport API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
    base_url: String,
}

impl HttpTransport {
    /// Transport using the shared global client
    ///
    /// # Arguments
    /// * `base_url` - API root (e.g., "http://transport.opendata.ch/v1")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(global_http_client(), base_url)
    }

    /// Transport using a caller-provided client
    pub fn with_client(client: Arc<Client>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// API root without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let url = self.url(endpoint);
        debug!("Making GET request to: {} with {} params", url, params.len());

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(status, bytes = body.len(), "Received response");
        Ok(RawResponse { status, body })
    }
}
