//! ============================================================================
//! VERIFY-CORE: Delivery verification workflow
//! ============================================================================
//! This crate handles all non-visual logic for confirming a delivery:
//! - Fetching expected line items for a request ID
//! - Recording received quantities per item and tracking mismatches
//! - Optional proof video capture when quantities disagree
//! - Submitting the confirmation (and proof) to the delivery backend
//! ============================================================================

pub mod backend;
pub mod capture;
pub mod config;
pub mod item_row;
pub mod route;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use backend::{DeliveryBackend, HttpBackend};
pub use capture::{CaptureLimits, ProofCapture, ProofVideo, VideoFormat};
pub use config::{AppConfig, BackendConfig};
pub use item_row::{parse_received, ItemFilter, ItemRow, RowEdit};
pub use route::Route;
pub use session::{LoadTicket, SubmitOutcome, SubmitTicket, UploadStatus, VerificationSession};
