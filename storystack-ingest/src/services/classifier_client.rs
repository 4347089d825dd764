//! Classification service client
//!
//! Wire protocol (JSON, camelCase):
//! - `POST {base}/tags`: immediate request, answers with `results`
//! - `POST {base}/tags/batch`: deferred request, answers with `batchId`
//! - `GET {base}/tags/batch/{batchId}`: `status` plus `results` once completed
//!
//! Requests are paced client-side by a token bucket so a large import
//! does not trip the service's own throttling.

use crate::config::ClassifierSettings;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const USER_AGENT: &str = concat!("storystack-ingest/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Classification client errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Response was well-formed JSON but carried neither results nor a batch id
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClassifierError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ClassifierError::RateLimited(_))
    }

    /// Worth polling again
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Network(_) | ClassifierError::RateLimited(_) => true,
            ClassifierError::Api(status, _) => *status >= 500,
            _ => false,
        }
    }
}

/// Which endpoint a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Immediate,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequestItem {
    pub asset_id: Uuid,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TagRequest<'a> {
    items: &'a [TagRequestItem],
}

/// Per-item error reported inside an otherwise successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagResultError {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResult {
    pub asset_id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TagResultError>,
}

impl TagResult {
    pub fn tagged(asset_id: Uuid, tags: Vec<String>) -> Self {
        Self {
            asset_id,
            tags,
            error: None,
        }
    }

    pub fn failed(asset_id: Uuid, code: &str, message: Option<&str>) -> Self {
        Self {
            asset_id,
            tags: Vec::new(),
            error: Some(TagResultError {
                code: code.to_string(),
                message: message.map(str::to_string),
            }),
        }
    }
}

/// Body of a classify response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TagResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// What a classify response means for the caller
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Results(Vec<TagResult>),
    Deferred(String),
}

impl DispatchResponse {
    pub fn immediate(results: Vec<TagResult>) -> Self {
        Self {
            results: Some(results),
            batch_id: None,
        }
    }

    pub fn deferred(batch_id: impl Into<String>) -> Self {
        Self {
            results: None,
            batch_id: Some(batch_id.into()),
        }
    }

    /// Results win over a batch id; neither is a protocol error
    pub fn into_outcome(self) -> Result<DispatchOutcome, ClassifierError> {
        if let Some(results) = self.results {
            return Ok(DispatchOutcome::Results(results));
        }
        match self.batch_id {
            Some(batch_id) if !batch_id.trim().is_empty() => Ok(DispatchOutcome::Deferred(batch_id)),
            _ => Err(ClassifierError::Protocol(
                "response carried neither results nor a batch id".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub status: BatchStatus,
    #[serde(default)]
    pub results: Option<Vec<TagResult>>,
}

impl PollResponse {
    pub fn pending() -> Self {
        Self {
            status: BatchStatus::Pending,
            results: None,
        }
    }

    pub fn completed(results: Vec<TagResult>) -> Self {
        Self {
            status: BatchStatus::Completed,
            results: Some(results),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: BatchStatus::Failed,
            results: None,
        }
    }
}

/// Remote image classification
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(
        &self,
        items: &[TagRequestItem],
        mode: DispatchMode,
    ) -> Result<DispatchResponse, ClassifierError>;

    async fn poll(&self, batch_id: &str) -> Result<PollResponse, ClassifierError>;
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP implementation of [`ClassificationService`]
pub struct HttpClassificationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: DirectRateLimiter,
}

impl HttpClassificationClient {
    pub fn new(settings: &ClassifierSettings) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn endpoint(&self, mode: DispatchMode) -> String {
        match mode {
            DispatchMode::Immediate => format!("{}/tags", self.base_url),
            DispatchMode::Deferred => format!("{}/tags/batch", self.base_url),
        }
    }

    pub fn poll_url(&self, batch_id: &str) -> String {
        format!("{}/tags/batch/{}", self.base_url, batch_id)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClassifierError> {
        self.rate_limiter.until_ready().await;

        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ClassificationService for HttpClassificationClient {
    async fn classify(
        &self,
        items: &[TagRequestItem],
        mode: DispatchMode,
    ) -> Result<DispatchResponse, ClassifierError> {
        tracing::debug!(count = items.len(), ?mode, "Sending classification request");
        let request = self
            .client
            .post(self.endpoint(mode))
            .json(&TagRequest { items });
        self.send(request).await
    }

    async fn poll(&self, batch_id: &str) -> Result<PollResponse, ClassifierError> {
        tracing::trace!(batch_id, "Polling classification batch");
        self.send(self.client.get(self.poll_url(batch_id))).await
    }
}
