//! ============================================================================
//! Proof Capture - Optional video evidence for mismatched deliveries
//! ============================================================================
//! Records one proof clip at a time:
//! - start / push_chunk / stop produce a single blob
//! - a new recording replaces the previous clip on stop
//! - size and duration caps abort runaway recordings
//! ============================================================================

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::types::VerifyError;

/// Default size cap for a proof clip (50 MiB)
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Default duration cap for a proof clip (3 minutes)
pub const DEFAULT_MAX_DURATION_SECS: u64 = 180;

/// Read size when streaming a clip from a source
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Limits applied while recording.
///
/// `max_duration` is wall-clock time between `start` and `stop`, so it only
/// bounds live sources. A clip streamed from a file is bounded by
/// `max_bytes` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub max_bytes: usize,
    pub max_duration: Duration,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_duration: Duration::from_secs(DEFAULT_MAX_DURATION_SECS),
        }
    }
}

/// Container format of a proof clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub extension: String,
    pub content_type: String,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self::mp4()
    }
}

impl VideoFormat {
    pub fn mp4() -> Self {
        Self {
            extension: "mp4".to_string(),
            content_type: "video/mp4".to_string(),
        }
    }

    /// Guess the format from a file extension, falling back to mp4
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        let content_type = match ext.as_str() {
            "webm" => "video/webm",
            "mov" => "video/quicktime",
            "mkv" => "video/x-matroska",
            "mp4" | "m4v" => "video/mp4",
            _ => return Self::mp4(),
        };
        Self {
            extension: ext,
            content_type: content_type.to_string(),
        }
    }
}

/// A finished proof clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofVideo {
    pub bytes: Vec<u8>,
    pub format: VideoFormat,
    pub captured_at: DateTime<Utc>,
    /// Wall-clock recording time (read time for streamed sources)
    pub duration: Duration,
}

impl ProofVideo {
    /// Upload file name for a request ID: `{cid}_proof.{ext}`
    pub fn file_name(&self, cid: &str) -> String {
        format!("{}_proof.{}", cid, self.format.extension)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

struct Recording {
    started: Instant,
    buffer: Vec<u8>,
}

/// Recorder holding at most one in-progress recording and one finished clip
pub struct ProofCapture {
    limits: CaptureLimits,
    format: VideoFormat,
    recording: Option<Recording>,
    video: Option<ProofVideo>,
}

impl ProofCapture {
    pub fn new(limits: CaptureLimits) -> Self {
        Self {
            limits,
            format: VideoFormat::default(),
            recording: None,
            video: None,
        }
    }

    pub fn limits(&self) -> CaptureLimits {
        self.limits
    }

    /// Set the container format for the next recording
    pub fn set_format(&mut self, format: VideoFormat) {
        self.format = format;
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn video(&self) -> Option<&ProofVideo> {
        self.video.as_ref()
    }

    pub fn start(&mut self) -> Result<(), VerifyError> {
        if self.recording.is_some() {
            return Err(VerifyError::Capture("Already recording".into()));
        }
        info!("Starting proof capture ({})", self.format.extension);
        self.recording = Some(Recording {
            started: Instant::now(),
            buffer: Vec::new(),
        });
        Ok(())
    }

    /// Append captured bytes. Exceeding a limit aborts the recording and
    /// keeps any previously finished clip.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), VerifyError> {
        let limits = self.limits;
        let (buffered, elapsed) = match self.recording.as_ref() {
            Some(r) => (r.buffer.len(), r.started.elapsed()),
            None => return Err(VerifyError::Capture("Not recording".into())),
        };

        if buffered + chunk.len() > limits.max_bytes {
            self.recording = None;
            warn!("Proof capture aborted: exceeded {} bytes", limits.max_bytes);
            return Err(VerifyError::Capture(format!(
                "Recording exceeds the {} MB limit",
                limits.max_bytes / (1024 * 1024)
            )));
        }
        if elapsed > limits.max_duration {
            self.recording = None;
            warn!(
                "Proof capture aborted: exceeded {}s",
                limits.max_duration.as_secs()
            );
            return Err(VerifyError::Capture(format!(
                "Recording exceeds the {}s limit",
                limits.max_duration.as_secs()
            )));
        }

        if let Some(recording) = self.recording.as_mut() {
            recording.buffer.extend_from_slice(chunk);
        }
        Ok(())
    }

    /// Finish the recording; the new clip replaces any earlier one.
    /// A recording that outlived `max_duration` is rejected and the earlier
    /// clip is kept.
    pub fn stop(&mut self) -> Result<&ProofVideo, VerifyError> {
        let recording = self
            .recording
            .take()
            .ok_or_else(|| VerifyError::Capture("Not recording".into()))?;

        if recording.buffer.is_empty() {
            return Err(VerifyError::Capture("Recording is empty".into()));
        }

        let duration = recording.started.elapsed();
        if duration > self.limits.max_duration {
            warn!(
                "Proof capture rejected on stop: ran {:.1}s, limit {}s",
                duration.as_secs_f32(),
                self.limits.max_duration.as_secs()
            );
            return Err(VerifyError::Capture(format!(
                "Recording exceeds the {}s limit",
                self.limits.max_duration.as_secs()
            )));
        }

        let video = ProofVideo {
            bytes: recording.buffer,
            format: self.format.clone(),
            captured_at: Utc::now(),
            duration,
        };
        info!(
            "Proof capture finished: {} bytes in {:.1}s",
            video.len(),
            video.duration.as_secs_f32()
        );
        let video = self.video.insert(video);
        Ok(&*video)
    }

    /// Abort an in-progress recording, keeping any earlier clip
    pub fn cancel(&mut self) {
        if self.recording.take().is_some() {
            debug!("Proof capture cancelled");
        }
    }

    /// Drop the finished clip and any recording in progress
    pub fn discard(&mut self) {
        self.recording = None;
        self.video = None;
    }
}

impl Default for ProofCapture {
    fn default() -> Self {
        Self::new(CaptureLimits::default())
    }
}

/// Record a whole clip from an async source (camera pipe, clip file)
pub async fn record_from<R>(
    capture: &mut ProofCapture,
    mut source: R,
) -> Result<&ProofVideo, VerifyError>
where
    R: AsyncRead + Unpin,
{
    capture.start()?;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                capture.cancel();
                return Err(VerifyError::Capture(format!("Failed to read video: {}", e)));
            }
        };
        if n == 0 {
            break;
        }
        capture.push_chunk(&buf[..n])?;
    }
    capture.stop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_push_stop() {
        let mut capture = ProofCapture::default();
        capture.start().unwrap();
        assert!(capture.is_recording());
        capture.push_chunk(b"abc").unwrap();
        capture.push_chunk(b"def").unwrap();
        let video = capture.stop().unwrap();
        assert_eq!(video.bytes, b"abcdef");
        assert_eq!(video.file_name("FA4492"), "FA4492_proof.mp4");
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_new_clip_replaces_old() {
        let mut capture = ProofCapture::default();
        capture.start().unwrap();
        capture.push_chunk(b"first").unwrap();
        capture.stop().unwrap();

        capture.start().unwrap();
        capture.push_chunk(b"second").unwrap();
        capture.stop().unwrap();

        assert_eq!(capture.video().unwrap().bytes, b"second");
    }

    #[test]
    fn test_misuse_is_reported() {
        let mut capture = ProofCapture::default();
        assert!(matches!(capture.push_chunk(b"x"), Err(VerifyError::Capture(_))));
        assert!(matches!(capture.stop(), Err(VerifyError::Capture(_))));

        capture.start().unwrap();
        assert!(matches!(capture.start(), Err(VerifyError::Capture(_))));
        assert!(matches!(capture.stop(), Err(VerifyError::Capture(_))));
        assert!(capture.video().is_none());
    }

    #[test]
    fn test_size_limit_aborts_and_keeps_previous() {
        let mut capture = ProofCapture::new(CaptureLimits {
            max_bytes: 4,
            max_duration: Duration::from_secs(60),
        });
        capture.start().unwrap();
        capture.push_chunk(b"ok").unwrap();
        capture.stop().unwrap();

        capture.start().unwrap();
        capture.push_chunk(b"abc").unwrap();
        assert!(matches!(capture.push_chunk(b"de"), Err(VerifyError::Capture(_))));
        assert!(!capture.is_recording());
        assert_eq!(capture.video().unwrap().bytes, b"ok");
    }

    #[test]
    fn test_duration_limit() {
        let mut capture = ProofCapture::new(CaptureLimits {
            max_bytes: DEFAULT_MAX_BYTES,
            max_duration: Duration::ZERO,
        });
        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(capture.push_chunk(b"x"), Err(VerifyError::Capture(_))));
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_duration_limit_checked_on_stop() {
        let mut capture = ProofCapture::new(CaptureLimits {
            max_bytes: DEFAULT_MAX_BYTES,
            max_duration: Duration::from_millis(10),
        });
        capture.start().unwrap();
        capture.push_chunk(b"first").unwrap();
        capture.stop().unwrap();

        capture.start().unwrap();
        capture.push_chunk(b"x").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(capture.stop(), Err(VerifyError::Capture(_))));
        assert!(!capture.is_recording());
        assert_eq!(capture.video().unwrap().bytes, b"first");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(VideoFormat::from_extension("WEBM").content_type, "video/webm");
        assert_eq!(VideoFormat::from_extension(".mov").extension, "mov");
        assert_eq!(VideoFormat::from_extension("gif"), VideoFormat::mp4());
    }

    #[tokio::test]
    async fn test_record_from_reader() {
        let data = vec![7u8; READ_CHUNK_SIZE * 2 + 10];
        let mut capture = ProofCapture::default();
        let video = record_from(&mut capture, data.as_slice()).await.unwrap();
        assert_eq!(video.len(), data.len());
    }

    #[tokio::test]
    async fn test_record_from_empty_reader() {
        let mut capture = ProofCapture::default();
        let result = record_from(&mut capture, &b""[..]).await;
        assert!(matches!(result, Err(VerifyError::Capture(_))));
        assert!(!capture.is_recording());
    }
}
