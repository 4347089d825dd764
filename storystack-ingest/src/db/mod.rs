//! Asset record persistence

pub mod assets;

pub use assets::{AssetStore, SqliteAssetStore, StoreCapabilities};
