//! Services module - matching logic and the pipeline's collaborator boundaries.
//!
//! Everything here is framework-agnostic: no arbitration state, no presentation code.
//!
//! # Components
//!
//! - [`match_ingredients`]: The pure dietary matcher. Splits an ingredient list on commas
//!   and flags every segment containing a restriction (case-insensitive substring match).
//!
//! - [`LookupClient`]: Contract for resolving a barcode into an [`IngredientRecord`].
//!   [`CatalogLookupClient`] implements it over a directory of product API documents.
//!
//! - [`RecordSink`]: Contract for persisting a [`ScanOutcome`]. [`JsonlRecordSink`] appends
//!   to an activity file; [`MemoryRecordSink`] keeps outcomes in memory.
//!
//! # Usage Example
//!
//! ```ignore
//! use foodfilter::services::{CatalogLookupClient, LookupClient, match_ingredients};
//!
//! let client = CatalogLookupClient::new("FoodFilter Data/catalog");
//! let record = client.fetch("0123456789012").await?;
//! let verdict = match_ingredients(&record.ingredients_text, &restrictions);
//! ```
//!
//! [`IngredientRecord`]: crate::models::IngredientRecord
//! [`ScanOutcome`]: crate::models::ScanOutcome

pub mod lookup;
pub mod matching;
pub mod records;

pub use lookup::{CatalogLookupClient, LookupClient, LookupError, parse_product_response};
pub use matching::match_ingredients;
pub use records::{
    ActivityFilter, JsonlRecordSink, MemoryRecordSink, PersistError, RecordSink, filter_activity,
    load_activity,
};
