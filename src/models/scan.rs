use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A barcode value reported by the external decoder.
///
/// The decoder may emit these at frame rate, so the same physical label usually
/// produces a burst of events. They are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub code: String,
    pub observed_at: DateTime<Utc>,
}

impl DetectionEvent {
    /// Create an event observed now
    pub fn new(code: impl Into<String>) -> Self {
        Self::at(code, Utc::now())
    }

    /// Create an event with an explicit observation time
    pub fn at(code: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            observed_at,
        }
    }
}

/// Product data returned by a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientRecord {
    pub product_name: String,
    pub ingredients_text: String,
}

impl IngredientRecord {
    pub fn new(product_name: impl Into<String>, ingredients_text: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            ingredients_text: ingredients_text.into(),
        }
    }

    /// True when the record carries no usable ingredient text
    pub fn has_no_ingredients(&self) -> bool {
        self.ingredients_text.trim().is_empty()
    }
}

/// Result of matching an ingredient list against a restriction set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchVerdict {
    pub is_safe: bool,
    /// Offending ingredient segments, trimmed, in their original order and casing
    pub flagged_ingredients: Vec<String>,
}

impl MatchVerdict {
    /// A verdict with nothing flagged
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            flagged_ingredients: Vec::new(),
        }
    }

    pub(crate) fn from_flagged(flagged_ingredients: Vec<String>) -> Self {
        Self {
            is_safe: flagged_ingredients.is_empty(),
            flagged_ingredients,
        }
    }

    /// Get the user-facing summary for this verdict
    pub fn summary(&self) -> String {
        if self.is_safe {
            "Good News: Product doesn't have any restricted ingredients.".to_string()
        } else {
            format!(
                "Warning: This product contains {}",
                self.flagged_ingredients.join(", ")
            )
        }
    }
}

/// The persisted result of one completed scan cycle.
///
/// Built exactly once per resolved cycle and handed to a
/// [`RecordSink`](crate::services::RecordSink); the arbiter keeps no copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub id: Uuid,
    pub product_name: String,
    pub ingredients_text: String,
    pub is_safe: bool,
    pub observed_at: DateTime<Utc>,
}

impl ScanOutcome {
    pub fn new(record: IngredientRecord, is_safe: bool, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_name: record.product_name,
            ingredients_text: record.ingredients_text,
            is_safe,
            observed_at,
        }
    }
}
