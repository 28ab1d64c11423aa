// State management module
//
// This module provides the StateManager which holds the scanner's presentational state
// with thread-safe access using Arc<RwLock<T>> and emits change events for observers.

use crate::models::MatchVerdict;
use crate::services::LookupError;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What the presentation layer should show
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanPhase {
    /// Armed and waiting for a barcode
    #[default]
    Scanning,

    /// A barcode locked the scanner; the lookup is running
    Detected { code: String },

    /// Lookup succeeded and nothing is restricted
    Matched {
        code: String,
        product_name: String,
        verdict: MatchVerdict,
    },

    /// Lookup succeeded and at least one ingredient is restricted
    Restricted {
        code: String,
        product_name: String,
        verdict: MatchVerdict,
    },

    /// Lookup failed
    Error { code: String, error: LookupError },
}

impl ScanPhase {
    /// Short machine-friendly name of the phase
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Detected { .. } => "detected",
            Self::Matched { .. } => "matched",
            Self::Restricted { .. } => "restricted",
            Self::Error { .. } => "error",
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Scanning => None,
            Self::Detected { code }
            | Self::Matched { code, .. }
            | Self::Restricted { code, .. }
            | Self::Error { code, .. } => Some(code),
        }
    }

    pub fn verdict(&self) -> Option<&MatchVerdict> {
        match self {
            Self::Matched { verdict, .. } | Self::Restricted { verdict, .. } => Some(verdict),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LookupError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// User-visible text for the phase
    pub fn message(&self) -> String {
        match self {
            Self::Scanning => "Scanning for Barcode...".to_string(),
            Self::Detected { code } => format!("Scanned Barcode: {}", code),
            Self::Matched { verdict, .. } | Self::Restricted { verdict, .. } => verdict.summary(),
            Self::Error { error, .. } => error.to_string(),
        }
    }
}

/// Presentational snapshot of the scanner
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScannerState {
    pub phase: ScanPhase,

    /// Token of the cycle shown by `phase`, if any
    pub cycle: Option<u64>,

    /// Outcomes the record sink has accepted
    pub scans_completed: usize,

    /// Most recent persistence failure, cleared by the next successful save
    pub last_persist_error: Option<String>,

    pub restriction_count: usize,
}

/// Change events emitted when state is modified
///
/// These events are emitted to notify interested parties (primarily the presentation
/// layer) about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Scanner re-armed and is looking for a barcode
    Scanning,

    /// A barcode opened a new cycle
    BarcodeDetected { code: String },

    /// Lookup and matching finished
    ScanResolved {
        code: String,
        product_name: String,
        verdict: MatchVerdict,
    },

    /// Lookup failed for the current cycle
    LookupFailed { code: String, error: LookupError },

    /// The record sink stored an outcome
    RecordPersisted { id: Uuid },

    /// The record sink rejected an outcome
    PersistFailed { message: String },

    /// The restriction set used for future cycles changed
    RestrictionsChanged { count: usize },

    /// An explicit reset was applied
    StateReset,
}

/// Thread-safe presentational state with event emission
///
/// The scan arbiter task is the only writer; any number of readers can take snapshots
/// or subscribe to [`StateChange`] events.
///
/// # Usage
///
/// - [`snapshot()`](Self::snapshot) / [`read()`](Self::read) for reading state
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// # Related Types
///
/// - [`ScanPhase`]: Current phase with its verdict or error
/// - [`crate::arbiter::ScanArbiter`]: Drives all updates
pub struct StateManager {
    /// The scanner state protected by RwLock for thread-safe access
    state: Arc<RwLock<ScannerState>>,

    /// Broadcast channel for emitting state change events
    /// Multiple subscribers can listen for state changes
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Create a new StateManager with the given broadcast buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        let (state_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(ScannerState::default())),
            state_tx,
        }
    }

    /// Get a copy of the current state
    pub fn snapshot(&self) -> ScannerState {
        self.read(ScannerState::clone)
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let phase = state_manager.read(|state| state.phase.label());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ScannerState) -> R,
    {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Apply a mutation, then emit one event per detected change
    pub(crate) fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut ScannerState),
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    fn emit(&self, change: StateChange, changes: &mut Vec<StateChange>) {
        let _ = self.state_tx.send(change.clone());
        changes.push(change);
    }

    fn detect_changes(old: &ScannerState, new: &ScannerState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.phase != new.phase {
            changes.push(match &new.phase {
                ScanPhase::Scanning => StateChange::Scanning,
                ScanPhase::Detected { code } => StateChange::BarcodeDetected { code: code.clone() },
                ScanPhase::Matched {
                    code,
                    product_name,
                    verdict,
                }
                | ScanPhase::Restricted {
                    code,
                    product_name,
                    verdict,
                } => StateChange::ScanResolved {
                    code: code.clone(),
                    product_name: product_name.clone(),
                    verdict: verdict.clone(),
                },
                ScanPhase::Error { code, error } => StateChange::LookupFailed {
                    code: code.clone(),
                    error: error.clone(),
                },
            });
        }

        if old.restriction_count != new.restriction_count {
            changes.push(StateChange::RestrictionsChanged {
                count: new.restriction_count,
            });
        }

        changes
    }

    // Transitions driven by the arbiter

    pub(crate) fn barcode_detected(&self, cycle: u64, code: String) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = ScanPhase::Detected { code };
            state.cycle = Some(cycle);
        })
    }

    pub(crate) fn scan_resolved(
        &self,
        code: String,
        product_name: String,
        verdict: MatchVerdict,
    ) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = if verdict.is_safe {
                ScanPhase::Matched {
                    code,
                    product_name,
                    verdict,
                }
            } else {
                ScanPhase::Restricted {
                    code,
                    product_name,
                    verdict,
                }
            };
        })
    }

    pub(crate) fn lookup_failed(&self, code: String, error: LookupError) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = ScanPhase::Error { code, error };
        })
    }

    /// Back to scanning after the cooldown
    pub(crate) fn rearm(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = ScanPhase::Scanning;
            state.cycle = None;
        })
    }

    /// Back to scanning after an explicit reset
    pub(crate) fn reset_scan(&self) -> Vec<StateChange> {
        let mut changes = self.rearm();
        self.emit(StateChange::StateReset, &mut changes);
        changes
    }

    pub(crate) fn record_persisted(&self, id: Uuid) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.scans_completed += 1;
            state.last_persist_error = None;
        });
        self.emit(StateChange::RecordPersisted { id }, &mut changes);
        changes
    }

    pub(crate) fn persist_failed(&self, message: String) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.last_persist_error = Some(message.clone());
        });
        self.emit(StateChange::PersistFailed { message }, &mut changes);
        changes
    }

    pub(crate) fn set_restriction_count(&self, count: usize) -> Vec<StateChange> {
        self.update(|state| {
            state.restriction_count = count;
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across tasks
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("state", &self.snapshot())
            .field("subscribers", &self.state_tx.receiver_count())
            .finish()
    }
}
