//! ============================================================================
//! Item Rows - Per-line received quantity entry
//! ============================================================================
//! A row is a read-only view over one line item. Operator input is parsed
//! here and handed back to the owning session as a `RowEdit`; rows never
//! mutate state themselves.
//! ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{LineItem, RowStatus, VerifyError};

/// Sheet columns that appear in item lists but are not products
pub const NON_PRODUCT_FIELDS: &[&str] = &["Pincode", "C/nee Number", "C/nee No", "Vendor No"];

/// Parse operator input for a received quantity.
/// Empty input leaves the quantity unset; anything else must be a
/// non-negative integer.
pub fn parse_received(input: &str) -> Result<Option<u32>, VerifyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed.parse::<u32>().map(Some).map_err(|_| {
        VerifyError::Validation(format!(
            "'{}' is not a valid quantity (enter a whole number, 0 or more)",
            trimmed
        ))
    })
}

/// Edit produced by a row for its parent to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEdit {
    pub name: String,
    pub received: Option<u32>,
}

/// View of one line item at its display position
#[derive(Debug, Clone, Copy)]
pub struct ItemRow<'a> {
    position: usize,
    item: &'a LineItem,
}

impl<'a> ItemRow<'a> {
    pub fn new(position: usize, item: &'a LineItem) -> Self {
        Self { position, item }
    }

    /// Zero-based position in fetch-response order
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &'a str {
        &self.item.name
    }

    pub fn sent(&self) -> u32 {
        self.item.sent
    }

    pub fn received(&self) -> Option<u32> {
        self.item.received
    }

    pub fn previously_recorded(&self) -> Option<u32> {
        self.item.previously_recorded
    }

    pub fn status(&self) -> RowStatus {
        self.item.status()
    }

    pub fn is_mismatch(&self) -> bool {
        self.status().is_mismatch()
    }

    /// Parse `input` into an edit for this row
    pub fn edit(&self, input: &str) -> Result<RowEdit, VerifyError> {
        Ok(RowEdit {
            name: self.item.name.clone(),
            received: parse_received(input)?,
        })
    }
}

impl fmt::Display for ItemRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let received = self
            .item
            .received
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{:>3}. {:<28} sent {:>5}  received {:>5}  [{}]",
            self.position + 1,
            self.item.name,
            self.item.sent,
            received,
            self.status()
        )
    }
}

/// Optional pruning of fetched items before they become rows
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFilter {
    /// Item names to drop (case-insensitive)
    pub excluded: Vec<String>,
    /// Drop items the backend lists with nothing sent
    pub drop_zero_sent: bool,
}

impl ItemFilter {
    /// Filter matching the non-product sheet columns, dropping zero lines
    pub fn non_product_fields() -> Self {
        Self {
            excluded: NON_PRODUCT_FIELDS.iter().map(|s| s.to_string()).collect(),
            drop_zero_sent: true,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.excluded.is_empty() && !self.drop_zero_sent
    }

    pub fn keeps(&self, item: &LineItem) -> bool {
        if self.drop_zero_sent && item.sent == 0 {
            return false;
        }
        let name = item.name.trim();
        !self.excluded.iter().any(|x| x.trim().eq_ignore_ascii_case(name))
    }

    pub fn apply(&self, items: Vec<LineItem>) -> Vec<LineItem> {
        if self.is_noop() {
            return items;
        }
        items.into_iter().filter(|item| self.keeps(item)).collect()
    }
}
