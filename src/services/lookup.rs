use crate::models::IngredientRecord;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::io::ErrorKind;
use thiserror::Error;

/// Product name used when a document carries none
pub const UNKNOWN_PRODUCT: &str = "Unknown product";

/// Errors a product lookup can end with.
///
/// The display strings are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Invalid barcode.")]
    InvalidCode,

    #[error("Network error: {0}")]
    NetworkFailure(String),

    #[error("No ingredients found for this product.")]
    NoIngredientsFound,

    #[error("Error parsing product data.")]
    MalformedResponse,
}

/// Resolves a barcode into a product's ingredient list.
///
/// One call per invocation: implementations must not retry internally. The arbiter
/// keeps at most one call outstanding per scan cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn fetch(&self, code: &str) -> Result<IngredientRecord, LookupError>;
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    #[serde(default)]
    status: Option<i64>,
    product: Option<ProductDocument>,
}

#[derive(Debug, Deserialize)]
struct ProductDocument {
    product_name: Option<String>,
    ingredients_text: Option<String>,

    /// Remaining fields in document order, searched for localized ingredient text
    #[serde(flatten)]
    extra: IndexMap<String, serde_json::Value>,
}

impl ProductDocument {
    fn ingredients(&self) -> Option<&str> {
        if let Some(text) = self.ingredients_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(text);
        }

        self.extra
            .iter()
            .filter(|(key, _)| key.starts_with("ingredients_text_"))
            .filter_map(|(_, value)| value.as_str())
            .find(|text| !text.trim().is_empty())
    }
}

/// Parse a product API document into an [`IngredientRecord`].
///
/// Expected shape: `{"status": 1, "product": {"product_name": .., "ingredients_text": ..}}`.
/// When `ingredients_text` is blank, the first non-blank `ingredients_text_<lang>`
/// field is used.
pub fn parse_product_response(body: &[u8]) -> Result<IngredientRecord, LookupError> {
    let response: ProductResponse = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Malformed product document: {}", e);
        LookupError::MalformedResponse
    })?;

    if response.status == Some(0) {
        return Err(LookupError::NoIngredientsFound);
    }

    let product = response.product.ok_or(LookupError::NoIngredientsFound)?;
    let ingredients = product
        .ingredients()
        .ok_or(LookupError::NoIngredientsFound)?
        .to_string();

    let product_name = product
        .product_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string());

    Ok(IngredientRecord::new(product_name, ingredients))
}

/// Lookup client backed by a directory of product documents.
///
/// Each product lives in `<catalog_dir>/<code>.json` in the product API response shape,
/// so a catalog can be filled from saved API responses.
///
/// # Fields
///
/// - `code_pattern`: Barcodes accepted as file stems
///   - Pattern: `^[A-Za-z0-9._-]+$`, and the code must not start with a dot
pub struct CatalogLookupClient {
    catalog_dir: Utf8PathBuf,
    code_pattern: Regex,
}

impl CatalogLookupClient {
    pub fn new<P: AsRef<Utf8Path>>(catalog_dir: P) -> Self {
        Self {
            catalog_dir: catalog_dir.as_ref().to_path_buf(),
            code_pattern: Regex::new(r"^[A-Za-z0-9._-]+$").expect("Invalid barcode regex"),
        }
    }

    pub fn catalog_dir(&self) -> &Utf8Path {
        &self.catalog_dir
    }

    /// Check that a code can be used as a catalog key
    pub fn is_valid_code(&self, code: &str) -> bool {
        !code.starts_with('.') && self.code_pattern.is_match(code)
    }

    /// Path of the document for a code
    pub fn document_path(&self, code: &str) -> Utf8PathBuf {
        self.catalog_dir.join(format!("{}.json", code))
    }
}

#[async_trait]
impl LookupClient for CatalogLookupClient {
    async fn fetch(&self, code: &str) -> Result<IngredientRecord, LookupError> {
        if !self.is_valid_code(code) {
            tracing::warn!("Rejected barcode {:?}", code);
            return Err(LookupError::InvalidCode);
        }

        let path = self.document_path(code);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No catalog document for {}", code);
                return Err(LookupError::NoIngredientsFound);
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path, e);
                return Err(LookupError::NetworkFailure(e.to_string()));
            }
        };

        let record = parse_product_response(&body)?;
        tracing::debug!("Catalog hit for {}: {}", code, record.product_name);
        Ok(record)
    }
}
