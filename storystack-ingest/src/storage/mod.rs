//! Blob storage for uploaded images

pub mod local;

pub use local::LocalBlobStore;

use async_trait::async_trait;
use storystack_common::Result;
use uuid::Uuid;

/// Where uploaded image bytes live
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`, replacing anything already there
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// URL the classification service can fetch `path` from
    fn public_url(&self, path: &str) -> String;
}

/// Blob path for a new import: `{owner}/{collection}/{uuid}.{ext}`
pub fn asset_storage_path(owner_id: Uuid, collection_id: Uuid, extension: &str) -> String {
    format!("{}/{}/{}.{}", owner_id, collection_id, Uuid::new_v4(), extension)
}
