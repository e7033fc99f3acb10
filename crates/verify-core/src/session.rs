//! ============================================================================
//! Verification Session - Fetch / edit / submit workflow
//! ============================================================================
//! Owns all state for one request ID:
//!
//! ```text
//! Idle ──begin_load──▶ Loading ──ok──▶ Ready ──begin_submit──▶ Submitting ──ok──▶ Done
//!                         │                ▲                        │
//!                         └──err──▶ Error ─┘ (after submit only)  ◀─┘ err
//! ```
//!
//! Loads are split into `begin_load` / `commit_load` so a front end can run
//! the fetch on its own task. Every load carries a ticket (request ID plus a
//! generation counter); a result whose ticket is no longer current is
//! dropped, so a slow response never overwrites a newer request.
//! ============================================================================

use std::collections::BTreeMap;

use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::backend::DeliveryBackend;
use crate::capture::{self, CaptureLimits, ProofCapture, ProofVideo, VideoFormat};
use crate::config::AppConfig;
use crate::item_row::{ItemFilter, ItemRow};
use crate::types::{
    ConfirmationRequest, CustomerDetails, MismatchSummary, Phase, RowStatus, VerifyError,
};

/// Proof of an issued load; hand it back to `commit_load` with the result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    request_id: String,
    generation: u64,
}

impl LoadTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Everything needed to perform one submission
#[derive(Debug, Clone)]
pub struct SubmitTicket {
    pub confirmation: ConfirmationRequest,
    /// Present only when a row mismatches and a clip was captured
    pub proof: Option<ProofVideo>,
}

/// What happened to the proof clip after a successful confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    NotRequired,
    Uploaded { file_name: String },
    Failed(VerifyError),
}

/// Result of a completed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub cid: String,
    pub summary: MismatchSummary,
    pub upload: UploadStatus,
}

/// State machine for verifying one delivery
pub struct VerificationSession {
    phase: Phase,
    request_id: Option<String>,
    generation: u64,
    details: Option<CustomerDetails>,
    filter: ItemFilter,
    capture: ProofCapture,
    last_error: Option<VerifyError>,
    outcome: Option<SubmitOutcome>,
}

impl VerificationSession {
    pub fn new(filter: ItemFilter, limits: CaptureLimits) -> Self {
        Self {
            phase: Phase::Idle,
            request_id: None,
            generation: 0,
            details: None,
            filter,
            capture: ProofCapture::new(limits),
            last_error: None,
            outcome: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.item_filter.clone(), config.capture_limits)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn details(&self) -> Option<&CustomerDetails> {
        self.details.as_ref()
    }

    pub fn last_error(&self) -> Option<&VerifyError> {
        self.last_error.as_ref()
    }

    pub fn outcome(&self) -> Option<&SubmitOutcome> {
        self.outcome.as_ref()
    }

    /// The fetch control is disabled while a load is outstanding
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    /// The submit control is disabled while a confirmation is outstanding
    pub fn is_submitting(&self) -> bool {
        self.phase == Phase::Submitting
    }

    /// Rows in fetch-response order
    pub fn rows(&self) -> impl Iterator<Item = ItemRow<'_>> + '_ {
        self.details
            .iter()
            .flat_map(|d| d.items.iter())
            .enumerate()
            .map(|(position, item)| ItemRow::new(position, item))
    }

    pub fn row(&self, name: &str) -> Option<ItemRow<'_>> {
        self.rows().find(|row| row.name() == name)
    }

    pub fn summary(&self) -> MismatchSummary {
        MismatchSummary::from_items(self.details.iter().flat_map(|d| d.items.iter()))
    }

    pub fn has_mismatch(&self) -> bool {
        self.summary().has_mismatch()
    }

    /// Names of rows still waiting for a received quantity
    pub fn pending_items(&self) -> Vec<&str> {
        self.rows()
            .filter(|row| row.received().is_none())
            .map(|row| row.name())
            .collect()
    }

    /// Rows and edits survive a failed submission
    fn has_rows(&self) -> bool {
        self.details.is_some()
    }

    fn can_edit(&self) -> bool {
        self.phase == Phase::Ready || (self.phase == Phase::Error && self.has_rows())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Start loading `request_id`. A different ID supersedes any outstanding
    /// load; the same ID while it is still loading is refused.
    pub fn begin_load(&mut self, request_id: &str) -> Result<LoadTicket, VerifyError> {
        let request_id = request_id.trim();
        if request_id.is_empty() {
            return Err(VerifyError::Validation("Enter a request ID".into()));
        }
        if self.phase == Phase::Submitting {
            return Err(VerifyError::invalid_state(self.phase, "load a new request"));
        }
        if self.phase == Phase::Loading && self.request_id.as_deref() == Some(request_id) {
            return Err(VerifyError::RequestInFlight("fetch".into()));
        }

        if self.phase == Phase::Loading {
            debug!(
                "Superseding load of {:?} with {}",
                self.request_id, request_id
            );
        }

        self.generation += 1;
        self.request_id = Some(request_id.to_string());
        self.details = None;
        self.capture.discard();
        self.last_error = None;
        self.outcome = None;
        self.phase = Phase::Loading;

        info!("Loading request {} (generation {})", request_id, self.generation);
        Ok(LoadTicket {
            request_id: request_id.to_string(),
            generation: self.generation,
        })
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.phase == Phase::Loading
            && ticket.generation == self.generation
            && self.request_id.as_deref() == Some(ticket.request_id.as_str())
    }

    /// Apply a fetch result. Returns `false` when the ticket is stale and
    /// the result was discarded.
    pub fn commit_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<CustomerDetails, VerifyError>,
    ) -> bool {
        if !self.is_current(&ticket) {
            warn!(
                "Discarding stale load for {} (generation {}, current {})",
                ticket.request_id, ticket.generation, self.generation
            );
            return false;
        }

        let outcome = result.and_then(|mut details| {
            details.items = self.filter.apply(std::mem::take(&mut details.items));
            for item in &mut details.items {
                item.received = None;
            }
            details.validate()?;
            Ok(details)
        });

        match outcome {
            Ok(details) => {
                info!(
                    "Request {} ready: {} items for {}",
                    ticket.request_id,
                    details.items.len(),
                    details.name
                );
                self.details = Some(details);
                self.phase = Phase::Ready;
            }
            Err(err) => {
                let err = match err {
                    VerifyError::Configuration(_) | VerifyError::Fetch(_) => err,
                    other => VerifyError::Fetch(other.to_string()),
                };
                warn!("Load of {} failed: {}", ticket.request_id, err);
                self.details = None;
                self.last_error = Some(err);
                self.phase = Phase::Error;
            }
        }
        true
    }

    /// Fetch `request_id` through `backend` and apply the result
    pub async fn load(
        &mut self,
        backend: &dyn DeliveryBackend,
        request_id: &str,
    ) -> Result<(), VerifyError> {
        let ticket = self.begin_load(request_id)?;
        let result = backend.fetch_details(ticket.request_id()).await;
        self.commit_load(ticket, result);
        match &self.last_error {
            Some(err) if self.phase == Phase::Error => Err(err.clone()),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Record operator input for one row. Blank input clears the quantity.
    /// Editing after a failed submission returns the session to `Ready`.
    pub fn set_received(&mut self, name: &str, input: &str) -> Result<RowStatus, VerifyError> {
        if !self.can_edit() {
            return Err(VerifyError::invalid_state(self.phase, "edit quantities"));
        }

        let edit = self
            .row(name)
            .ok_or_else(|| VerifyError::Validation(format!("Unknown item '{}'", name)))?
            .edit(input)?;

        let item = self
            .details
            .as_mut()
            .and_then(|d| d.items.iter_mut().find(|i| i.name == edit.name))
            .ok_or_else(|| VerifyError::Validation(format!("Unknown item '{}'", name)))?;
        item.received = edit.received;
        let status = item.status();

        debug!("{} received {:?} -> {}", edit.name, edit.received, status);

        if self.phase == Phase::Error {
            self.last_error = None;
            self.phase = Phase::Ready;
        }
        Ok(status)
    }

    // ========================================================================
    // Proof capture
    // ========================================================================

    /// Capture controls are shown only while a row mismatches
    pub fn capture_available(&self) -> bool {
        self.phase == Phase::Ready && self.has_mismatch()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn proof(&self) -> Option<&ProofVideo> {
        self.capture.video()
    }

    pub fn set_capture_format(&mut self, format: VideoFormat) {
        self.capture.set_format(format);
    }

    pub fn start_capture(&mut self) -> Result<(), VerifyError> {
        if !self.capture_available() {
            return Err(VerifyError::Capture(
                "Proof capture is only available while a line is mismatched".into(),
            ));
        }
        self.capture.start()
    }

    pub fn push_capture_chunk(&mut self, chunk: &[u8]) -> Result<(), VerifyError> {
        self.capture.push_chunk(chunk)
    }

    pub fn stop_capture(&mut self) -> Result<&ProofVideo, VerifyError> {
        self.capture.stop()
    }

    pub fn cancel_capture(&mut self) {
        self.capture.cancel();
    }

    pub fn discard_proof(&mut self) {
        self.capture.discard();
    }

    /// Record a whole clip from `source`
    pub async fn record_proof<R>(&mut self, source: R) -> Result<&ProofVideo, VerifyError>
    where
        R: AsyncRead + Unpin,
    {
        if !self.capture_available() {
            return Err(VerifyError::Capture(
                "Proof capture is only available while a line is mismatched".into(),
            ));
        }
        capture::record_from(&mut self.capture, source).await
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate and move to `Submitting`. Fails without changing phase when
    /// any quantity is unset.
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, VerifyError> {
        if self.phase == Phase::Submitting {
            return Err(VerifyError::RequestInFlight("confirmation".into()));
        }
        if !self.can_edit() {
            return Err(VerifyError::invalid_state(self.phase, "submit"));
        }
        if self.capture.is_recording() {
            return Err(VerifyError::Capture(
                "Stop the recording before submitting".into(),
            ));
        }

        let pending = self.pending_items();
        if !pending.is_empty() {
            return Err(VerifyError::Validation(format!(
                "Enter a received quantity for: {}",
                pending.join(", ")
            )));
        }

        let details = self
            .details
            .as_ref()
            .ok_or_else(|| VerifyError::invalid_state(self.phase, "submit"))?;

        let received: BTreeMap<String, u32> = details
            .items
            .iter()
            .filter_map(|item| item.received.map(|r| (item.name.clone(), r)))
            .collect();
        let confirmation = ConfirmationRequest {
            cid: details.cid.clone(),
            received,
        };

        let proof = if self.has_mismatch() {
            self.capture.video().cloned()
        } else {
            None
        };

        info!(
            "Submitting {} ({} items, proof: {})",
            confirmation.cid,
            confirmation.received.len(),
            proof.is_some()
        );
        self.last_error = None;
        self.phase = Phase::Submitting;
        Ok(SubmitTicket { confirmation, proof })
    }

    /// Confirmation failed: keep rows and edits for a retry
    pub fn fail_submit(&mut self, err: VerifyError) -> VerifyError {
        let err = match err {
            VerifyError::Configuration(_) | VerifyError::Submit(_) => err,
            other => VerifyError::Submit(other.to_string()),
        };
        warn!("Submission failed: {}", err);
        self.last_error = Some(err.clone());
        self.phase = Phase::Error;
        err
    }

    /// Confirmation succeeded; the upload result never blocks completion
    pub fn complete_submit(&mut self, cid: &str, upload: UploadStatus) -> SubmitOutcome {
        if let UploadStatus::Failed(err) = &upload {
            warn!("Delivery {} confirmed but proof upload failed: {}", cid, err);
        }
        let outcome = SubmitOutcome {
            cid: cid.to_string(),
            summary: self.summary(),
            upload,
        };
        info!("Delivery {} verified", cid);
        self.outcome = Some(outcome.clone());
        self.phase = Phase::Done;
        outcome
    }

    /// Send the confirmation, then (only after it succeeds) the proof clip
    pub async fn submit(
        &mut self,
        backend: &dyn DeliveryBackend,
    ) -> Result<SubmitOutcome, VerifyError> {
        let ticket = self.begin_submit()?;
        let cid = ticket.confirmation.cid.clone();

        if let Err(err) = backend.confirm_delivery(&ticket.confirmation).await {
            return Err(self.fail_submit(err));
        }

        let upload = match &ticket.proof {
            None => UploadStatus::NotRequired,
            Some(video) => match backend.upload_proof(&cid, video).await {
                Ok(()) => UploadStatus::Uploaded {
                    file_name: video.file_name(&cid),
                },
                Err(err) => UploadStatus::Failed(match err {
                    VerifyError::Upload(_) => err,
                    other => VerifyError::Upload(other.to_string()),
                }),
            },
        };

        Ok(self.complete_submit(&cid, upload))
    }

    /// Abandon the session; any outstanding load becomes stale
    pub fn reset(&mut self) {
        debug!("Resetting session");
        self.generation += 1;
        self.phase = Phase::Idle;
        self.request_id = None;
        self.details = None;
        self.capture.discard();
        self.last_error = None;
        self.outcome = None;
    }
}

impl Default for VerificationSession {
    fn default() -> Self {
        Self::new(ItemFilter::default(), CaptureLimits::default())
    }
}
