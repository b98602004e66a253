use super::{KeywordRequest, KeywordRow, ResearchBackend};
use crate::error::{Error, Result};
use crate::invoker::UpstreamError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct SummaryRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    rows: Vec<KeywordRow>,
}

/// Research service reached over HTTP
///
/// `POST {base_url}/v1/url-summaries` and `POST {base_url}/v1/keywords`.
/// Status codes are mapped onto [`UpstreamError`] so the invoker can tell
/// transient failures from rejections.
pub struct HttpResearchBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpResearchBackend {
    /// Create a backend
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<R, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling research service");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else if e.is_connect() {
                UpstreamError::ConnectionReset(format!("cannot reach {}", self.base_url))
            } else {
                UpstreamError::ConnectionReset("request failed".to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            // Response bodies are never forwarded to callers
            return Err(UpstreamError::from_status(status.as_u16()));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("{} returned malformed JSON: {}", path, e)))
    }
}

#[async_trait]
impl ResearchBackend for HttpResearchBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn summarize_url(&self, url: &str) -> std::result::Result<String, UpstreamError> {
        let response: SummaryResponse = self
            .post("/v1/url-summaries", &SummaryRequest { url })
            .await?;
        Ok(response.summary)
    }

    async fn generate_keywords(
        &self,
        request: &KeywordRequest,
    ) -> std::result::Result<Vec<KeywordRow>, UpstreamError> {
        let response: KeywordResponse = self.post("/v1/keywords", request).await?;
        Ok(response.rows)
    }
}
