//! Model loading: one process-wide load shared by every caller.

use crate::engine::Analyzer;
use crate::error::LoadError;
use async_trait::async_trait;
use likeness_core::{http_client, FaceBackend, ModelKind, ModelSource, OnnxBackend, DEFAULT_FETCH_TIMEOUT};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Builds a face backend, however long that takes.
#[async_trait]
pub trait BackendLoader: Send + Sync + 'static {
    async fn load(&self) -> Result<Box<dyn FaceBackend>, LoadError>;
}

/// Fetches the five ONNX models from a [`ModelSource`] and builds an [`OnnxBackend`].
pub struct OnnxLoader {
    source: ModelSource,
    intra_threads: usize,
    fetch_timeout: Duration,
}

impl OnnxLoader {
    pub fn new(source: ModelSource, intra_threads: usize) -> Self {
        Self { source, intra_threads, fetch_timeout: DEFAULT_FETCH_TIMEOUT }
    }

    /// Limit on each remote model download.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

#[async_trait]
impl BackendLoader for OnnxLoader {
    async fn load(&self) -> Result<Box<dyn FaceBackend>, LoadError> {
        tracing::info!(source = %self.source, timeout_s = self.fetch_timeout.as_secs(), "fetching face models");

        let client = http_client(self.fetch_timeout)?;
        let (detector, landmarks, recognition, expression, age_gender) = tokio::try_join!(
            self.source.fetch(&client, ModelKind::Detector),
            self.source.fetch(&client, ModelKind::Landmarks),
            self.source.fetch(&client, ModelKind::Recognition),
            self.source.fetch(&client, ModelKind::Expression),
            self.source.fetch(&client, ModelKind::AgeGender),
        )?;

        let models = HashMap::from([
            (ModelKind::Detector, detector),
            (ModelKind::Landmarks, landmarks),
            (ModelKind::Recognition, recognition),
            (ModelKind::Expression, expression),
            (ModelKind::AgeGender, age_gender),
        ]);

        let threads = self.intra_threads;
        let backend = tokio::task::spawn_blocking(move || OnnxBackend::from_models(models, threads))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??;

        Ok(Box::new(backend))
    }
}

/// Observable lifecycle of the [`ModelLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

type LoadResult = Result<Analyzer, LoadError>;

const ENGINE_GONE: &str = "analyzer thread exited";

enum Slot {
    Uninitialized,
    Loading(watch::Receiver<Option<LoadResult>>),
    Ready(Analyzer),
    Failed(LoadError),
}

struct Inner {
    backend: Box<dyn BackendLoader>,
    slot: Mutex<Slot>,
}

/// Idempotent, single-flight model initialization.
///
/// Concurrent callers of [`ensure_loaded`](Self::ensure_loaded) share one load.
/// A failed load leaves the loader in `Failed`; the next call starts a fresh
/// attempt. The load itself runs on its own task, so dropping a caller does
/// not abandon it.
#[derive(Clone)]
pub struct ModelLoader {
    inner: Arc<Inner>,
}

impl ModelLoader {
    pub fn new(backend: impl BackendLoader) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Box::new(backend),
                slot: Mutex::new(Slot::Uninitialized),
            }),
        }
    }

    pub fn state(&self) -> LoadState {
        match &*lock(&self.inner.slot) {
            Slot::Uninitialized => LoadState::Uninitialized,
            Slot::Loading(_) => LoadState::Loading,
            Slot::Ready(analyzer) if analyzer.is_closed() => LoadState::Failed(ENGINE_GONE.into()),
            Slot::Ready(_) => LoadState::Ready,
            Slot::Failed(e) => LoadState::Failed(e.to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*lock(&self.inner.slot), Slot::Ready(analyzer) if !analyzer.is_closed())
    }

    /// Load the models if needed and return the analyzer handle.
    pub async fn ensure_loaded(&self) -> Result<Analyzer, LoadError> {
        let mut rx = {
            let mut slot = lock(&self.inner.slot);
            match &*slot {
                Slot::Ready(analyzer) if !analyzer.is_closed() => return Ok(analyzer.clone()),
                Slot::Loading(rx) => rx.clone(),
                Slot::Ready(_) | Slot::Uninitialized | Slot::Failed(_) => {
                    if matches!(&*slot, Slot::Ready(_)) {
                        tracing::warn!("{ENGINE_GONE}; reloading models");
                    }
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Loading(rx.clone());
                    tokio::spawn(run_load(Arc::clone(&self.inner), tx));
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(done) => done.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            // The load task died without reporting; let the next call retry.
            let err = LoadError::Task("model load was interrupted".into());
            let mut slot = lock(&self.inner.slot);
            if matches!(&*slot, Slot::Loading(_)) {
                *slot = Slot::Failed(err.clone());
            }
            Err(err)
        })
    }
}

async fn run_load(inner: Arc<Inner>, tx: watch::Sender<Option<LoadResult>>) {
    tracing::info!("loading face models");
    let start = std::time::Instant::now();

    let result = match inner.backend.load().await {
        Ok(backend) => Analyzer::spawn(backend).map_err(|e| LoadError::Task(format!("failed to spawn engine: {e}"))),
        Err(e) => Err(e),
    };

    {
        let mut slot = lock(&inner.slot);
        *slot = match &result {
            Ok(analyzer) => {
                tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "face models ready");
                Slot::Ready(analyzer.clone())
            }
            Err(e) => {
                tracing::warn!(error = %e, "face model load failed");
                Slot::Failed(e.clone())
            }
        };
    }

    // No receivers left is fine; the slot already holds the outcome.
    let _ = tx.send(Some(result));
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
