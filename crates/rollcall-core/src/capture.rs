//! Capability traits for camera capture and embedding extraction.
//!
//! Both are implemented outside this crate: the daemon ships
//! external-process implementations, tests use scripted mocks. The traits
//! are synchronous because the capture pipeline runs on a dedicated OS
//! thread behind an async handle.

use crate::frame::Frame;
use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding provider not ready: {0}")]
    NotReady(String),
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Exclusive handle on a camera-like frame source.
///
/// `open` acquires the device, `capture` produces one grayscale frame,
/// `close` releases the device. The session controller owns the source for
/// the whole Initializing→Active→Ending span.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), CaptureError>;
    fn capture(&mut self) -> Result<Frame, CaptureError>;
    fn close(&mut self);
}

/// Black-box face embedding extractor.
///
/// Given a frame, returns a fixed-length embedding for the most prominent
/// face, or `None` when no face is found. Extraction may take non-trivial
/// wall time per frame.
pub trait EmbeddingProvider: Send {
    /// Verify the provider is usable (model loaded, helper reachable).
    fn ensure_ready(&mut self) -> Result<(), ProviderError>;

    fn extract(&mut self, frame: &Frame) -> Result<Option<Embedding>, ProviderError>;
}
