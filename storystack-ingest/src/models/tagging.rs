//! Auto-tag request and failure types

use crate::services::{ClassifierError, TagResultError};
use serde::Serialize;
use storystack_common::AutoTagStatus;
use thiserror::Error;
use uuid::Uuid;

/// Per-item error code the service uses for throttled items
pub const RATE_LIMITED_CODE: &str = "rate_limited";

/// Asset handed to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct TagTarget {
    pub asset_id: Uuid,
    /// Publicly fetchable image URL
    pub image_url: String,
    pub current_status: AutoTagStatus,
}

/// Who asked for tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTrigger {
    /// Import side effect; skips rate-limit-suppressed assets
    Automatic,
    /// Explicit user retry; clears suppression
    User,
}

/// Path chosen for a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPath {
    Immediate,
    Deferred,
}

impl DispatchPath {
    /// Fewer than `threshold` images go immediate; threshold and above defer
    pub fn for_count(count: usize, threshold: usize) -> Self {
        if count < threshold {
            DispatchPath::Immediate
        } else {
            DispatchPath::Deferred
        }
    }
}

/// Why an asset ended up `failed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum TagFailure {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Service-reported error for this item or request
    #[error("Service error: {0}")]
    Service(String),

    /// Deferred batch resolved as failed
    #[error("Batch failed")]
    BatchFailed,

    /// Evicted after the polling ceiling
    #[error("Batch still pending after {0} polls")]
    PollExhausted(u32),

    /// Completed response carried no result for this asset
    #[error("No result returned for asset")]
    MissingResult,

    /// Outcome could not be persisted; the record keeps its previous status
    #[error("Could not persist outcome: {0}")]
    Persist(String),
}

impl TagFailure {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TagFailure::RateLimited(_))
    }
}

impl From<&ClassifierError> for TagFailure {
    fn from(err: &ClassifierError) -> Self {
        match err {
            ClassifierError::RateLimited(msg) => TagFailure::RateLimited(msg.clone()),
            ClassifierError::Network(msg) => TagFailure::Transport(msg.clone()),
            ClassifierError::Api(status, msg) => TagFailure::Service(format!("{}: {}", status, msg)),
            ClassifierError::Parse(msg) | ClassifierError::Protocol(msg) => {
                TagFailure::Protocol(msg.clone())
            }
        }
    }
}

impl From<&TagResultError> for TagFailure {
    fn from(err: &TagResultError) -> Self {
        let message = err.message.clone().unwrap_or_default();
        if err.code == RATE_LIMITED_CODE {
            TagFailure::RateLimited(message)
        } else if message.is_empty() {
            TagFailure::Service(err.code.clone())
        } else {
            TagFailure::Service(format!("{}: {}", err.code, message))
        }
    }
}
