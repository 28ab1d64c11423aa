//! Data models for the FoodFilter scan core.
//!
//! This module contains the data structures that flow through the pipeline:
//! - [`DetectionEvent`]: A decoded barcode as emitted by the camera decoder
//! - [`IngredientRecord`]: Product name and ingredient text returned by a lookup
//! - [`MatchVerdict`]: The result of evaluating ingredients against restrictions
//! - [`ScanOutcome`]: The single persisted record of a completed scan cycle
//! - [`RestrictionSet`]: The user's case-insensitive dietary restrictions
//! - [`AppConfig`]: Settings loaded from `foodfilter.yaml`
//!
//! # Architecture Note
//!
//! Events, records and verdicts are immutable once built. Outcomes and settings derive
//! `Serialize`/`Deserialize` for the activity history and the YAML configuration.

pub mod restrictions;
pub mod scan;
pub mod settings;

pub use restrictions::{RestrictionSet, STANDARD_RESTRICTIONS};
pub use scan::{DetectionEvent, IngredientRecord, MatchVerdict, ScanOutcome};
pub use settings::{
    AppConfig, LoggingSettings, ProfileSettings, ScannerSettings, StorageSettings,
};
