//! # StoryStack Common Library
//!
//! Shared code for the StoryStack ingest crates:
//! - Error type and result alias
//! - Bootstrap configuration (TOML + environment + OS defaults)
//! - Event types and the EventBus that pushes state updates to the UI
//! - SQLite bootstrap and schema introspection

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use events::{EventBus, IngestEvent};
pub use models::{AutoTagStatus, TransitionError};
