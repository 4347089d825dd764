//! Ingest services
//!
//! Import side: file scanner, image normalizer, fingerprinter, duplicate
//! detector, import pipeline. Tagging side: classifier client, tagging
//! registry, dispatcher, batch poller, status reconciler. The asset
//! shadow and editor cover the locally held copies the UI renders.

pub mod asset_editor;
pub mod asset_shadow;
pub mod auto_tag_dispatcher;
pub mod batch_poller;
pub mod classifier_client;
pub mod duplicate_detector;
pub mod file_scanner;
pub mod fingerprinter;
pub mod image_normalizer;
pub mod import_pipeline;
pub mod status_reconciler;
pub mod tagging_registry;

pub use asset_editor::AssetEditor;
pub use asset_shadow::{AssetShadow, StagedChange};
pub use auto_tag_dispatcher::{AutoTagDispatcher, DispatchReport};
pub use batch_poller::{BatchPoller, Clock, PollTickReport, SystemClock};
pub use classifier_client::{
    BatchStatus, ClassificationService, ClassifierError, DispatchMode, DispatchOutcome,
    DispatchResponse, HttpClassificationClient, PollResponse, TagRequestItem, TagResult,
    TagResultError,
};
pub use duplicate_detector::DuplicateDetector;
pub use file_scanner::{FileScanner, ScanError};
pub use fingerprinter::Fingerprinter;
pub use image_normalizer::{ImageNormalizer, NormalizeError, NormalizedImage};
pub use import_pipeline::{ImportPipeline, ImportReport, ImportRequest, ImportStage, IMPORT_FAILURE_MESSAGE};
pub use status_reconciler::{ReconcileSummary, StatusReconciler, TagOutcome};
pub use tagging_registry::TaggingRegistry;
