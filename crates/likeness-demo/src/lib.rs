//! likeness-demo — the face comparison demo flow.
//!
//! Model loading, the analyzer thread, live camera capture with auto-capture,
//! and the two-slot comparison session that ties them together.

pub mod config;
pub mod engine;
pub mod error;
pub mod live;
pub mod loader;
pub mod report;
pub mod session;

pub use config::{Config, ConfigError};
pub use engine::Analyzer;
pub use error::{CaptureError, DemoError, EngineError, LoadError};
pub use live::{
    CaptureController, CaptureMode, CaptureOutcome, DetectionSample, LiveCapture, LiveFeedback, LiveSettings,
    QualityBand, TickDecision, TickInput,
};
pub use loader::{BackendLoader, LoadState, ModelLoader, OnnxLoader};
pub use report::{ComparisonReport, ImageSummary};
pub use session::{DemoSession, Slot, SlotImage};
