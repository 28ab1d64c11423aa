// FoodFilter - debounced barcode scanning with dietary-restriction matching
//
// This is the library crate containing the scan arbitration pipeline and its data types.
// The binary crate (main.rs) drives it from stdin for terminal use.

pub mod arbiter;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use crate::arbiter::{ArbiterConfig, ArbiterError, ArbiterHandle, CycleMachine, ScanArbiter};
pub use crate::config::ConfigManager;
pub use crate::metrics::ScanMetrics;
pub use crate::models::{
    AppConfig, DetectionEvent, IngredientRecord, MatchVerdict, RestrictionSet, ScanOutcome,
};
pub use crate::services::{LookupClient, LookupError, PersistError, RecordSink, match_ingredients};
pub use crate::state::{ScanPhase, ScannerState, StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
