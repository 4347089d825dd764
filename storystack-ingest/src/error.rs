//! Error types for storystack-ingest

use crate::services::{ClassifierError, NormalizeError};
use storystack_common::TransitionError;
use thiserror::Error;

/// Ingest error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Store, configuration or I/O failure
    #[error(transparent)]
    Common(#[from] storystack_common::Error),

    /// Image could not be normalized for upload
    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    /// Classification service failure
    #[error("Classification failed: {0}")]
    Classifier(#[from] ClassifierError),

    /// Auto-tag status change outside the allowed transitions
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Requested asset is not held locally or in the store
    #[error("Unknown asset: {0}")]
    UnknownAsset(uuid::Uuid),
}

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;
