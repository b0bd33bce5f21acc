use crate::session::Slot;
use likeness_core::{AnalysisError, ModelError};
use likeness_hw::{CameraError, FrameError};
use std::sync::Arc;
use thiserror::Error;

/// Model initialization failed. Cloned to every caller waiting on the same load.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("{0}")]
    Model(Arc<ModelError>),
    #[error("model loader task failed: {0}")]
    Task(String),
}

impl From<ModelError> for LoadError {
    fn from(e: ModelError) -> Self {
        LoadError::Model(Arc::new(e))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// A live capture session ended without an image.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] CameraError),
    #[error("failed to encode captured frame: {0}")]
    Encode(String),
    #[error("capture session ended unexpectedly")]
    Aborted,
}

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("model loading failed: {0}")]
    Load(#[from] LoadError),
    #[error("camera error: {0}")]
    Camera(#[from] CaptureError),
    #[error("no face detected in the {} image", join_slots(.0))]
    NoFaceDetected(Vec<Slot>),
    #[error("analysis failed: {0}")]
    Analysis(#[from] EngineError),
    #[error("{0}")]
    Validation(String),
}

impl From<CameraError> for DemoError {
    fn from(e: CameraError) -> Self {
        DemoError::Camera(CaptureError::Device(e))
    }
}

fn join_slots(slots: &[Slot]) -> String {
    slots.iter().map(Slot::to_string).collect::<Vec<_>>().join(" and ")
}
