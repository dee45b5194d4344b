//! Core domain types for dataflow.

use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, Result};

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// A product record, as carried by one line of a source file.
///
/// Every field defaults when absent so that structurally incomplete lines
/// still decode; completeness is enforced by [`Product::validate`] on the
/// store's create path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    /// Product identifier, must be non-zero.
    pub id: u32,
    pub title: String,
    /// Unit price, must be positive.
    pub price: f64,
    pub category: String,
    pub brand: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Product {
    /// Check the required fields, reporting only the first violation.
    ///
    /// Order: id, title, price, category, brand.
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(DataflowError::validation("ID must be greater than 0."));
        }
        if self.title.is_empty() {
            return Err(DataflowError::validation("Title must not be empty."));
        }
        // NaN fails this check too.
        if !(self.price > 0.0) {
            return Err(DataflowError::validation("Price must be greater than zero."));
        }
        if self.category.is_empty() {
            return Err(DataflowError::validation("Category must not be empty."));
        }
        if self.brand.is_empty() {
            return Err(DataflowError::validation("Brand must not be empty."));
        }
        Ok(())
    }
}
