//! Data models for the ingest core

pub mod asset;
pub mod import_batch;
pub mod poll_entry;
pub mod tagging;

pub use asset::{Asset, AssetPatch, NewAsset, IMPORT_SOURCE};
pub use import_batch::{
    DuplicateDecision, FailureStage, ImportBatch, ImportProgress, ItemFailure, PreparedImage,
    ProgressSnapshot, RawPick,
};
pub use poll_entry::PollEntry;
pub use tagging::{DispatchPath, TagFailure, TagTarget, TagTrigger};
