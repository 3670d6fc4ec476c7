//! Frame source and embedding provider backed by external commands.
//!
//! The daemon stays model-agnostic: a capture command writes one binary PGM
//! frame to stdout, an extract command reads a PGM frame on stdin and writes
//! a JSON float array (or `null` when no face is found) to stdout. Both run
//! via `sh -c` so configs can use pipelines and arguments freely.

use rollcall_core::{CaptureError, Embedding, EmbeddingProvider, Frame, FrameSource, ProviderError};
use std::io::Write;
use std::process::{Command, Stdio};

/// Exit code an external capture command uses to signal a denied camera.
const EXIT_PERMISSION_DENIED: i32 = 13;

pub struct ExternalFrameSource {
    command: String,
    open: bool,
}

impl ExternalFrameSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            open: false,
        }
    }
}

impl FrameSource for ExternalFrameSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.command.trim().is_empty() {
            return Err(CaptureError::DeviceUnavailable(
                "no capture command configured".to_string(),
            ));
        }
        self.open = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::CaptureFailed(
                "frame source not open".to_string(),
            ));
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CaptureError::CaptureFailed(format!("spawn failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if output.status.code() == Some(EXIT_PERMISSION_DENIED) {
                return Err(CaptureError::PermissionDenied(stderr));
            }
            return Err(CaptureError::CaptureFailed(format!(
                "capture command exited with {}: {stderr}",
                output.status
            )));
        }

        Frame::from_pgm(&output.stdout)
            .map_err(|e| CaptureError::CaptureFailed(format!("bad frame from capture: {e}")))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

pub struct ExternalEmbeddingProvider {
    command: String,
}

impl ExternalEmbeddingProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl EmbeddingProvider for ExternalEmbeddingProvider {
    fn ensure_ready(&mut self) -> Result<(), ProviderError> {
        if self.command.trim().is_empty() {
            return Err(ProviderError::NotReady(
                "no extract command configured".to_string(),
            ));
        }
        Ok(())
    }

    fn extract(&mut self, frame: &Frame) -> Result<Option<Embedding>, ProviderError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::ExtractionFailed(format!("spawn failed: {e}")))?;

        // stdin is piped above, so take() cannot fail here.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&frame.to_pgm())
                .map_err(|e| ProviderError::ExtractionFailed(format!("write frame: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ProviderError::ExtractionFailed(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProviderError::ExtractionFailed(format!(
                "extract command exited with {}: {stderr}",
                output.status
            )));
        }

        let values: Option<Vec<f32>> = serde_json::from_slice(&output.stdout)
            .map_err(|e| ProviderError::ExtractionFailed(format!("bad embedding JSON: {e}")))?;
        Ok(values.map(Embedding::new))
    }
}
