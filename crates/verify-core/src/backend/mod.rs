//! ============================================================================
//! Backend Module - Delivery service client interface
//! ============================================================================
//! The delivery backend is an external HTTP service. Sessions talk to it
//! through `DeliveryBackend` so front ends and tests can swap transports:
//! - HttpBackend: reqwest client for the REST endpoints
//! ============================================================================

mod http;

use async_trait::async_trait;

use crate::capture::ProofVideo;
use crate::types::{ConfirmationRequest, CustomerDetails, VerifyError};

pub use http::{HttpBackend, CONFIRM_DELIVERY_PATH, CUSTOMER_DETAILS_PATH, UPLOAD_PROOF_PATH};

/// Operations the verification workflow needs from the backend.
/// Each call is a single attempt; implementations report failures with the
/// matching `VerifyError` kind (`Fetch`, `Submit`, `Upload`).
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Customer descriptors and expected line items for a request ID
    async fn fetch_details(&self, request_id: &str) -> Result<CustomerDetails, VerifyError>;

    /// Record the operator's received quantities
    async fn confirm_delivery(
        &self,
        confirmation: &ConfirmationRequest,
    ) -> Result<(), VerifyError>;

    /// Upload a proof clip for a confirmed request
    async fn upload_proof(&self, cid: &str, video: &ProofVideo) -> Result<(), VerifyError>;
}
