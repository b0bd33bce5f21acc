//! Analyzer runtime: one OS thread owns the backend, async callers talk to it
//! over a channel.

use crate::error::EngineError;
use likeness_core::{AnalysisError, BoundingBox, FaceAnalysis, FaceBackend};
use likeness_hw::Frame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum EngineRequest {
    Analyze {
        bytes: Arc<Vec<u8>>,
        reply: oneshot::Sender<Result<Option<FaceAnalysis>, EngineError>>,
    },
    Detect {
        frame: Frame,
        reply: oneshot::Sender<Result<Option<BoundingBox>, EngineError>>,
    },
}

/// Clone-safe handle to the analyzer thread.
#[derive(Clone)]
pub struct Analyzer {
    tx: mpsc::Sender<EngineRequest>,
}

impl Analyzer {
    /// Spawn the analyzer thread around an already built backend.
    ///
    /// The thread exits once every handle has been dropped.
    pub fn spawn(mut backend: Box<dyn FaceBackend>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

        std::thread::Builder::new()
            .name("likeness-engine".into())
            .spawn(move || {
                tracing::info!("engine thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Analyze { bytes, reply } => {
                            let result = guarded("analyze", || run_analyze(backend.as_mut(), &bytes));
                            let _ = reply.send(result);
                        }
                        EngineRequest::Detect { frame, reply } => {
                            // The live loop moved on; nobody wants this answer.
                            if reply.is_closed() {
                                tracing::debug!(seq = frame.sequence, "skipping stale detect request");
                                continue;
                            }
                            let result = guarded("detect", || run_detect(backend.as_mut(), &frame));
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!("engine thread exiting");
            })?;

        Ok(Self { tx })
    }

    /// The analyzer thread is gone; every request would fail.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle whose thread has already exited.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Full analysis of an encoded image. `Ok(None)` when no face is found.
    pub async fn analyze(&self, bytes: Arc<Vec<u8>>) -> Result<Option<FaceAnalysis>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { bytes, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detection pass on a live frame.
    pub async fn detect(&self, frame: Frame) -> Result<Option<BoundingBox>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Run one backend call, turning a panic into an analysis error so the
/// thread keeps serving requests.
fn guarded<T>(op: &'static str, f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(op, panic = %message, "backend panicked");
        Err(AnalysisError::InferenceFailed(format!("{op} panicked: {message}")).into())
    })
}

fn run_analyze(backend: &mut dyn FaceBackend, bytes: &[u8]) -> Result<Option<FaceAnalysis>, EngineError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::Decode(e.to_string()))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(AnalysisError::ZeroDimensions.into());
    }

    let start = std::time::Instant::now();
    let analysis = backend.analyze(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        face = analysis.is_some(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "analysis finished"
    );
    Ok(analysis)
}

fn run_detect(backend: &mut dyn FaceBackend, frame: &Frame) -> Result<Option<BoundingBox>, EngineError> {
    let image = frame.to_rgb_image()?;
    Ok(backend.detect(&image)?)
}
