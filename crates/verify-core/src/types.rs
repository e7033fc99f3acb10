//! ============================================================================
//! Core Types for Delivery Verification
//! ============================================================================
//! Data model shared by the session, the backend client and front ends:
//! line items, customer details, the confirmation payload, session phases
//! and the error taxonomy.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// One expected line item of a delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    /// Quantity the backend says was sent (authoritative)
    pub sent: u32,
    /// Quantity the operator counted; unset until entered
    #[serde(default)]
    pub received: Option<u32>,
    /// Quantity already on record at the backend, shown for reference only
    #[serde(default)]
    pub previously_recorded: Option<u32>,
}

impl LineItem {
    pub fn new(name: impl Into<String>, sent: u32) -> Self {
        Self {
            name: name.into(),
            sent,
            received: None,
            previously_recorded: None,
        }
    }

    /// `None` while the received quantity is unset
    pub fn is_match(&self) -> Option<bool> {
        self.received.map(|received| received == self.sent)
    }

    pub fn status(&self) -> RowStatus {
        match self.received {
            None => RowStatus::Pending,
            Some(r) if r == self.sent => RowStatus::Match,
            Some(r) if r < self.sent => RowStatus::Shortage,
            Some(_) => RowStatus::Excess,
        }
    }
}

/// Match status of a single row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Pending,
    Match,
    Shortage,
    Excess,
}

impl RowStatus {
    pub fn is_mismatch(self) -> bool {
        matches!(self, RowStatus::Shortage | RowStatus::Excess)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RowStatus::Pending => "pending",
            RowStatus::Match => "match",
            RowStatus::Shortage => "shortage",
            RowStatus::Excess => "excess",
        };
        f.write_str(label)
    }
}

/// Customer and line items for one request ID, as fetched from the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerDetails {
    pub cid: String,
    pub name: String,
    pub project: String,
    pub address: String,
    pub items: Vec<LineItem>,
}

impl CustomerDetails {
    /// Reject payloads the session cannot work with: no items, or
    /// duplicate item names.
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.items.is_empty() {
            return Err(VerifyError::Fetch(format!(
                "No line items found for request '{}'",
                self.cid
            )));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.name.as_str()) {
                return Err(VerifyError::Fetch(format!(
                    "Malformed response: duplicate item '{}'",
                    item.name
                )));
            }
        }

        Ok(())
    }
}

/// Body of `POST /api/confirm-delivery/`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub cid: String,
    pub received: BTreeMap<String, u32>,
}

/// Count of rows by status, used for the pre-submit summary
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MismatchSummary {
    pub matched: usize,
    pub shortages: usize,
    pub excesses: usize,
    pub pending: usize,
}

impl MismatchSummary {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a LineItem>) -> Self {
        let mut summary = Self::default();
        for item in items {
            match item.status() {
                RowStatus::Pending => summary.pending += 1,
                RowStatus::Match => summary.matched += 1,
                RowStatus::Shortage => summary.shortages += 1,
                RowStatus::Excess => summary.excesses += 1,
            }
        }
        summary
    }

    pub fn mismatched(&self) -> usize {
        self.shortages + self.excesses
    }

    pub fn has_mismatch(&self) -> bool {
        self.mismatched() > 0
    }
}

/// Session lifecycle phase, exposed for UI synchronization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Submitting,
    Done,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Submitting => "submitting",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        f.write_str(label)
    }
}

/// Error types for delivery verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not load delivery: {0}")]
    Fetch(String),

    #[error("{0}")]
    Validation(String),

    #[error("Confirmation failed: {0}")]
    Submit(String),

    #[error("Proof upload failed: {0}")]
    Upload(String),

    #[error("Proof capture error: {0}")]
    Capture(String),

    #[error("A {0} request is already in flight")]
    RequestInFlight(String),

    #[error("Cannot {action} while the session is {phase}")]
    InvalidState { phase: Phase, action: String },
}

impl VerifyError {
    /// Configuration problems end the session; nothing the operator types
    /// will fix them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VerifyError::Configuration(_))
    }

    /// Whether repeating the same user action can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifyError::Fetch(_) | VerifyError::Submit(_) | VerifyError::Upload(_)
        )
    }

    pub(crate) fn invalid_state(phase: Phase, action: &str) -> Self {
        VerifyError::InvalidState {
            phase,
            action: action.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, sent: u32, received: Option<u32>) -> LineItem {
        LineItem {
            received,
            ..LineItem::new(name, sent)
        }
    }

    #[test]
    fn test_row_status() {
        assert_eq!(item("Pipe", 10, None).status(), RowStatus::Pending);
        assert_eq!(item("Pipe", 10, Some(10)).status(), RowStatus::Match);
        assert_eq!(item("Pipe", 10, Some(7)).status(), RowStatus::Shortage);
        assert_eq!(item("Pipe", 10, Some(12)).status(), RowStatus::Excess);
        assert_eq!(item("Pipe", 10, None).is_match(), None);
        assert_eq!(item("Pipe", 0, Some(0)).is_match(), Some(true));
    }

    #[test]
    fn test_summary_counts() {
        let items = vec![
            item("A", 1, Some(1)),
            item("B", 5, Some(3)),
            item("C", 2, Some(4)),
            item("D", 2, None),
        ];
        let summary = MismatchSummary::from_items(&items);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.shortages, 1);
        assert_eq!(summary.excesses, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.mismatched(), 2);
        assert!(summary.has_mismatch());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let mut details = CustomerDetails {
            cid: "FA4492".into(),
            name: "Acme".into(),
            project: "Tower".into(),
            address: "".into(),
            items: vec![LineItem::new("Pipe", 10), LineItem::new("Pipe", 3)],
        };
        assert!(matches!(details.validate(), Err(VerifyError::Fetch(_))));

        details.items.clear();
        assert!(matches!(details.validate(), Err(VerifyError::Fetch(_))));

        details.items.push(LineItem::new("Pipe", 10));
        assert!(details.validate().is_ok());
    }

    #[test]
    fn test_confirmation_wire_format() {
        let mut received = BTreeMap::new();
        received.insert("Pipe".to_string(), 10);
        let body = ConfirmationRequest {
            cid: "FA4492".into(),
            received,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "cid": "FA4492", "received": { "Pipe": 10 } })
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(VerifyError::Configuration("missing".into()).is_fatal());
        assert!(!VerifyError::Fetch("x".into()).is_fatal());
        assert!(VerifyError::Submit("x".into()).is_retryable());
        assert!(!VerifyError::Validation("x".into()).is_retryable());
        assert_eq!(
            VerifyError::invalid_state(Phase::Loading, "submit").to_string(),
            "Cannot submit while the session is loading"
        );
    }
}
