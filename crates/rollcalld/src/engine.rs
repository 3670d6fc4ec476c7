use rollcall_core::{CaptureError, Embedding, EmbeddingProvider, FrameSource, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Open {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Warm up the embedding provider and open the frame source.
    pub async fn open(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Open { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture one frame and extract an embedding from it.
    /// `Ok(None)` means the frame contained no usable face.
    pub async fn capture(&self) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the frame source. Safe to call when already closed.
    pub async fn close(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Close { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the capture engine on a dedicated OS thread.
///
/// Frame capture and embedding extraction are blocking work that must not
/// stall the async runtime, so both live behind an mpsc request loop. The
/// frame source stays closed until a session opens it.
pub fn spawn_engine<F, P>(mut source: F, mut provider: P) -> EngineHandle
where
    F: FrameSource + 'static,
    P: EmbeddingProvider + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Open { reply } => {
                        let result = run_open(&mut source, &mut provider);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Capture { reply } => {
                        let result = run_capture(&mut source, &mut provider);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Close { reply } => {
                        source.close();
                        tracing::debug!("frame source closed");
                        let _ = reply.send(());
                    }
                }
            }
            source.close();
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn run_open<F: FrameSource, P: EmbeddingProvider>(
    source: &mut F,
    provider: &mut P,
) -> Result<(), EngineError> {
    provider.ensure_ready()?;
    source.open()?;
    tracing::info!("frame source opened");
    Ok(())
}

fn run_capture<F: FrameSource, P: EmbeddingProvider>(
    source: &mut F,
    provider: &mut P,
) -> Result<Option<Embedding>, EngineError> {
    let frame = source.capture()?;
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        brightness = frame.avg_brightness(),
        "frame captured"
    );
    let embedding = provider.extract(&frame)?;
    if embedding.is_none() {
        tracing::debug!("no face in frame");
    }
    Ok(embedding)
}
