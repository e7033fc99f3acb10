//! ============================================================================
//! HTTP Backend - REST client for the delivery service
//! ============================================================================
//! Handles the three backend endpoints:
//! - GET customer details for a request ID
//! - POST the delivery confirmation as JSON
//! - POST the proof clip as multipart form data
//! ============================================================================

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::DeliveryBackend;
use crate::capture::ProofVideo;
use crate::config::BackendConfig;
use crate::types::{ConfirmationRequest, CustomerDetails, LineItem, VerifyError};

pub const CUSTOMER_DETAILS_PATH: &str = "api/customer-details/";
pub const CONFIRM_DELIVERY_PATH: &str = "api/confirm-delivery/";
pub const UPLOAD_PROOF_PATH: &str = "api/upload-proof-video/";

/// Fallback for descriptive fields the backend leaves out
const UNKNOWN: &str = "Unknown";

/// Delivery backend over HTTP
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                VerifyError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

#[async_trait]
impl DeliveryBackend for HttpBackend {
    async fn fetch_details(&self, request_id: &str) -> Result<CustomerDetails, VerifyError> {
        let url = self.config.endpoint(CUSTOMER_DETAILS_PATH)?;
        info!("Fetching delivery details for {}", request_id);

        let response = self
            .client
            .get(url)
            .query(&[("cid", request_id)])
            .send()
            .await
            .map_err(|e| VerifyError::Fetch(format!("Failed to reach backend: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VerifyError::Fetch(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(VerifyError::Fetch(error_message(status, &body)));
        }

        let payload: DetailsPayload = serde_json::from_str(&body)
            .map_err(|e| VerifyError::Fetch(format!("Malformed response: {}", e)))?;

        let details = payload.into_details(request_id);
        debug!(
            "Fetched {} items for {} ({})",
            details.items.len(),
            details.cid,
            details.name
        );
        Ok(details)
    }

    async fn confirm_delivery(
        &self,
        confirmation: &ConfirmationRequest,
    ) -> Result<(), VerifyError> {
        let url = self.config.endpoint(CONFIRM_DELIVERY_PATH)?;
        info!(
            "Confirming delivery {} ({} items)",
            confirmation.cid,
            confirmation.received.len()
        );

        let response = self
            .client
            .post(url)
            .json(confirmation)
            .send()
            .await
            .map_err(|e| VerifyError::Submit(format!("Failed to reach backend: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::Submit(error_message(status, &body)));
        }

        info!("Delivery {} confirmed", confirmation.cid);
        Ok(())
    }

    async fn upload_proof(&self, cid: &str, video: &ProofVideo) -> Result<(), VerifyError> {
        let url = self.config.endpoint(UPLOAD_PROOF_PATH)?;
        let file_name = video.file_name(cid);
        info!("Uploading proof {} ({} bytes)", file_name, video.len());

        let part = Part::bytes(video.bytes.clone())
            .file_name(file_name.clone())
            .mime_str(&video.format.content_type)
            .map_err(|e| VerifyError::Upload(format!("Invalid content type: {}", e)))?;
        let form = Form::new().part("file", part).text("cid", cid.to_string());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VerifyError::Upload(format!("Failed to reach backend: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::Upload(error_message(status, &body)));
        }

        info!("Uploaded proof {}", file_name);
        Ok(())
    }
}

/// Prefer the backend's `{error}` message; otherwise describe the status
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        if !err.error.trim().is_empty() {
            return err.error;
        }
    }
    match status {
        StatusCode::NOT_FOUND => "Request ID not found".to_string(),
        _ => format!("Backend returned {}", status),
    }
}

// ============================================================================
// Backend API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct DetailsPayload {
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    address: Option<String>,
    items: Vec<ItemPayload>,
}

impl DetailsPayload {
    fn into_details(self, request_id: &str) -> CustomerDetails {
        CustomerDetails {
            cid: self.cid.unwrap_or_else(|| request_id.to_string()),
            name: self.name.unwrap_or_else(|| UNKNOWN.to_string()),
            project: self.project.unwrap_or_else(|| UNKNOWN.to_string()),
            address: self.address.unwrap_or_default(),
            items: self
                .items
                .into_iter()
                .map(|item| LineItem {
                    name: item.name,
                    sent: item.sent,
                    received: None,
                    previously_recorded: item.received,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    name: String,
    sent: u32,
    #[serde(default)]
    received: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ProofCapture, VideoFormat};
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Captured {
        method: String,
        url: String,
        content_type: Option<String>,
        body: Vec<u8>,
    }

    /// Serve the given `(status, body)` responses in order on a loopback port
    fn serve(responses: Vec<(u16, &'static str)>) -> (HttpBackend, mpsc::Receiver<Captured>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            for (status, body) in responses {
                let mut request = match server.recv() {
                    Ok(r) => r,
                    Err(_) => return,
                };
                let mut buf = Vec::new();
                let _ = request.as_reader().read_to_end(&mut buf);
                let content_type = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Content-Type"))
                    .map(|h| h.value.as_str().to_string());
                let _ = tx.send(Captured {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    content_type,
                    body: buf,
                });
                let _ = request.respond(
                    tiny_http::Response::from_string(body).with_status_code(status),
                );
            }
        });

        let base = format!("http://127.0.0.1:{}", port);
        let config = BackendConfig::new(&base, Duration::from_secs(5)).unwrap();
        (HttpBackend::new(config).unwrap(), rx)
    }

    /// Accept requests on a loopback port and never answer them
    fn serve_silent(timeout: Duration) -> HttpBackend {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();

        std::thread::spawn(move || {
            let mut held = Vec::new();
            while let Ok(request) = server.recv() {
                held.push(request);
            }
        });

        let base = format!("http://127.0.0.1:{}", port);
        HttpBackend::new(BackendConfig::new(&base, timeout).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_details() {
        let (backend, rx) = serve(vec![(
            200,
            r#"{"cid":"FA4492","name":"Acme Builders","project":"Tower B","address":"12 Dock Rd",
               "items":[{"name":"Pipe","sent":10,"received":4},{"name":"Valve","sent":2}]}"#,
        )]);

        let details = backend.fetch_details("FA4492").await.unwrap();
        assert_eq!(details.cid, "FA4492");
        assert_eq!(details.project, "Tower B");
        let names: Vec<_> = details.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Pipe", "Valve"]);
        assert!(details.items.iter().all(|i| i.received.is_none()));
        assert_eq!(details.items[0].previously_recorded, Some(4));

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/api/customer-details/?cid=FA4492");
    }

    #[tokio::test]
    async fn test_fetch_defaults_missing_descriptors() {
        let (backend, _rx) = serve(vec![(200, r#"{"items":[{"name":"Pipe","sent":1}]}"#)]);
        let details = backend.fetch_details("AB1").await.unwrap();
        assert_eq!(details.cid, "AB1");
        assert_eq!(details.name, "Unknown");
        assert_eq!(details.project, "Unknown");
        assert_eq!(details.address, "");
    }

    #[tokio::test]
    async fn test_fetch_error_body() {
        let (backend, _rx) = serve(vec![(400, r#"{"error":"CID not provided"}"#)]);
        let err = backend.fetch_details("").await.unwrap_err();
        assert_eq!(err, VerifyError::Fetch("CID not provided".into()));
    }

    #[tokio::test]
    async fn test_fetch_not_found_without_body() {
        let (backend, _rx) = serve(vec![(404, "")]);
        let err = backend.fetch_details("NOPE").await.unwrap_err();
        assert_eq!(err, VerifyError::Fetch("Request ID not found".into()));
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload() {
        let (backend, _rx) =
            serve(vec![(200, r#"{"cid":"X","items":[{"name":"Pipe","sent":-3}]}"#)]);
        let err = backend.fetch_details("X").await.unwrap_err();
        assert!(matches!(err, VerifyError::Fetch(msg) if msg.starts_with("Malformed response")));
    }

    #[tokio::test]
    async fn test_confirm_delivery_posts_json() {
        let (backend, rx) = serve(vec![(200, r#"{"status":"ok"}"#)]);
        let mut received = BTreeMap::new();
        received.insert("Pipe".to_string(), 10);
        let confirmation = ConfirmationRequest {
            cid: "FA4492".into(),
            received,
        };

        backend.confirm_delivery(&confirmation).await.unwrap();

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/api/confirm-delivery/");
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body, serde_json::json!({ "cid": "FA4492", "received": { "Pipe": 10 } }));
    }

    #[tokio::test]
    async fn test_confirm_failure_is_submit_error() {
        let (backend, _rx) = serve(vec![(500, "oops")]);
        let confirmation = ConfirmationRequest {
            cid: "FA4492".into(),
            received: BTreeMap::new(),
        };
        let err = backend.confirm_delivery(&confirmation).await.unwrap_err();
        assert!(matches!(err, VerifyError::Submit(_)));
    }

    #[tokio::test]
    async fn test_upload_proof_multipart() {
        let (backend, rx) = serve(vec![(200, "{}"), (502, "")]);
        let mut capture = ProofCapture::default();
        capture.set_format(VideoFormat::mp4());
        capture.start().unwrap();
        capture.push_chunk(b"fake-video-bytes").unwrap();
        let video = capture.stop().unwrap().clone();

        backend.upload_proof("FA4492", &video).await.unwrap();

        let req = rx.recv().unwrap();
        assert_eq!(req.url, "/api/upload-proof-video/");
        assert!(req.content_type.unwrap().starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&req.body);
        assert!(body.contains(r#"filename="FA4492_proof.mp4""#));
        assert!(body.contains(r#"name="cid""#));
        assert!(body.contains("fake-video-bytes"));

        let err = backend.upload_proof("FA4492", &video).await.unwrap_err();
        assert!(matches!(err, VerifyError::Upload(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let config = BackendConfig::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let backend = HttpBackend::new(config).unwrap();
        let err = backend.fetch_details("FA4492").await.unwrap_err();
        assert!(matches!(err, VerifyError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_request_error() {
        let backend = serve_silent(Duration::from_secs(1));

        let err = backend.fetch_details("FA4492").await.unwrap_err();
        assert!(matches!(err, VerifyError::Fetch(_)));

        let confirmation = ConfirmationRequest {
            cid: "FA4492".into(),
            received: BTreeMap::new(),
        };
        let err = backend.confirm_delivery(&confirmation).await.unwrap_err();
        assert!(matches!(err, VerifyError::Submit(_)));
        assert!(err.is_retryable());
    }
}
