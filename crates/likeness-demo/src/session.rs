//! The demo flow: two image slots, camera capture into either one, and a
//! comparison of the pair.

use crate::engine::Analyzer;
use crate::error::{DemoError, EngineError};
use crate::live::{CaptureMode, CaptureOutcome, LiveCapture, LiveFeedback, LiveSettings};
use crate::loader::{LoadState, ModelLoader};
use crate::report::ComparisonReport;
use base64::Engine as _;
use likeness_core::{ComparisonResult, FaceAnalysis};
use likeness_hw::CameraProvider;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Reference,
    Comparison,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::Reference, Slot::Comparison];
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Reference => f.write_str("reference"),
            Slot::Comparison => f.write_str("comparison"),
        }
    }
}

/// An encoded image held in a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotImage {
    bytes: Arc<Vec<u8>>,
    mime: &'static str,
}

impl SlotImage {
    pub fn new(bytes: Vec<u8>, mime: &'static str) -> Self {
        Self { bytes: Arc::new(bytes), mime }
    }

    /// Accept bytes in any format the decoder recognises.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, DemoError> {
        let format = image::guess_format(&bytes)
            .map_err(|_| DemoError::Validation("file is not a recognised image format".into()))?;
        Ok(Self::new(bytes, format.to_mime_type()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }

    pub fn mime(&self) -> &str {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:<mime>;base64,...`
    pub fn data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.bytes.as_slice());
        format!("data:{};base64,{encoded}", self.mime)
    }
}

struct CameraSession {
    slot: Slot,
    capture: LiveCapture,
}

/// State of the comparison page.
///
/// At most one camera session is open at a time and it belongs to one slot.
pub struct DemoSession {
    loader: ModelLoader,
    camera: Arc<dyn CameraProvider>,
    settings: LiveSettings,
    reference: Option<SlotImage>,
    comparison: Option<SlotImage>,
    result: Option<ComparisonReport>,
    camera_session: Option<CameraSession>,
    rng: StdRng,
}

impl DemoSession {
    pub fn new(loader: ModelLoader, camera: Arc<dyn CameraProvider>, settings: LiveSettings) -> Self {
        Self {
            loader,
            camera,
            settings,
            reference: None,
            comparison: None,
            result: None,
            camera_session: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the jitter of the illustrative structure summary.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn image(&self, slot: Slot) -> Option<&SlotImage> {
        match slot {
            Slot::Reference => self.reference.as_ref(),
            Slot::Comparison => self.comparison.as_ref(),
        }
    }

    pub fn result(&self) -> Option<&ComparisonReport> {
        self.result.as_ref()
    }

    pub fn model_state(&self) -> LoadState {
        self.loader.state()
    }

    /// Both slots are filled and the models have not failed to load.
    pub fn can_compare(&self) -> bool {
        self.reference.is_some()
            && self.comparison.is_some()
            && !matches!(self.loader.state(), LoadState::Failed(_))
    }

    /// Start loading the models without waiting for a comparison.
    pub async fn load_models(&self) -> Result<(), DemoError> {
        self.loader.ensure_loaded().await?;
        Ok(())
    }

    pub fn set_image(&mut self, slot: Slot, image: SlotImage) {
        tracing::debug!(%slot, bytes = image.len(), mime = image.mime(), "slot filled");
        match slot {
            Slot::Reference => self.reference = Some(image),
            Slot::Comparison => self.comparison = Some(image),
        }
    }

    /// Read an image file into a slot.
    pub async fn load_file(&mut self, slot: Slot, path: impl AsRef<Path>) -> Result<(), DemoError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DemoError::Validation(format!("cannot read {}: {e}", path.display())))?;
        let image = SlotImage::from_encoded(bytes)
            .map_err(|_| DemoError::Validation(format!("{} is not a recognised image", path.display())))?;
        self.set_image(slot, image);
        Ok(())
    }

    /// Open the camera for `slot`, closing any other camera session first.
    pub async fn open_camera(&mut self, slot: Slot) -> Result<(), DemoError> {
        self.close_camera().await;
        let analyzer = self.loader.ensure_loaded().await?;
        let capture = LiveCapture::start(self.camera.as_ref(), analyzer, self.settings)?;
        self.camera_session = Some(CameraSession { slot, capture });
        Ok(())
    }

    /// Which slot, if any, currently owns the camera.
    pub fn camera_slot(&self) -> Option<Slot> {
        self.camera_session.as_ref().map(|s| s.slot)
    }

    pub fn camera_feedback(&self) -> Option<watch::Receiver<LiveFeedback>> {
        self.camera_session.as_ref().map(|s| s.capture.feedback())
    }

    /// Manual capture of the current frame.
    pub fn capture_now(&self) -> Result<(), DemoError> {
        let session = self
            .camera_session
            .as_ref()
            .ok_or_else(|| DemoError::Validation("no camera is open".into()))?;
        session.capture.capture();
        Ok(())
    }

    /// Ask the open camera session to stop without capturing; pair with
    /// [`await_camera`](Self::await_camera).
    pub fn cancel_camera(&self) {
        if let Some(session) = &self.camera_session {
            session.capture.cancel();
        }
    }

    /// Stop the camera without capturing. No-op if none is open.
    pub async fn close_camera(&mut self) {
        if let Some(session) = self.camera_session.take() {
            tracing::info!(slot = %session.slot, "closing camera");
            session.capture.stop().await;
        }
    }

    /// Wait for the open camera session to end. A captured image goes into the
    /// session's slot; `Ok(None)` means it was cancelled.
    pub async fn await_camera(&mut self) -> Result<Option<CaptureMode>, DemoError> {
        let session = self
            .camera_session
            .take()
            .ok_or_else(|| DemoError::Validation("no camera is open".into()))?;

        match session.capture.finish().await? {
            CaptureOutcome::Captured { image, mode } => {
                tracing::info!(slot = %session.slot, ?mode, bytes = image.len(), "camera capture stored");
                self.set_image(session.slot, image);
                Ok(Some(mode))
            }
            CaptureOutcome::Cancelled => Ok(None),
        }
    }

    /// Analyse both slots and score them.
    ///
    /// Any previous result is cleared first. Slot images are left untouched
    /// whatever the outcome.
    pub async fn compare(&mut self) -> Result<&ComparisonReport, DemoError> {
        self.result = None;

        let (Some(reference), Some(comparison)) = (self.reference.clone(), self.comparison.clone()) else {
            return Err(DemoError::Validation(
                "please upload or capture both images before comparing".into(),
            ));
        };

        let analyzer = self.loader.ensure_loaded().await?;
        let (reference, comparison) = analyze_pair(&analyzer, &reference, &comparison).await?;

        let result = ComparisonResult::from_analyses(reference, comparison)
            .map_err(|e| EngineError::Analysis(e.into()))?;
        tracing::info!(
            similarity = result.similarity_percent,
            distance = result.distance,
            is_match = result.is_match,
            "comparison finished"
        );

        let report = ComparisonReport::new(result, &mut self.rng);
        Ok(self.result.insert(report))
    }

    /// Clear both slots and the result, and close any open camera.
    pub async fn reset(&mut self) {
        self.close_camera().await;
        self.reference = None;
        self.comparison = None;
        self.result = None;
        tracing::debug!("demo session reset");
    }
}

/// Both analyses complete before either is looked at.
async fn analyze_pair(
    analyzer: &Analyzer,
    reference: &SlotImage,
    comparison: &SlotImage,
) -> Result<(FaceAnalysis, FaceAnalysis), DemoError> {
    let (reference, comparison) = tokio::join!(
        analyzer.analyze(reference.shared_bytes()),
        analyzer.analyze(comparison.shared_bytes()),
    );

    match (reference?, comparison?) {
        (Some(reference), Some(comparison)) => Ok((reference, comparison)),
        (reference, comparison) => {
            let missing: Vec<Slot> = Slot::BOTH
                .into_iter()
                .zip([reference.is_none(), comparison.is_none()])
                .filter_map(|(slot, missing)| missing.then_some(slot))
                .collect();
            tracing::warn!(?missing, "no face detected");
            Err(DemoError::NoFaceDetected(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(2, 2)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(Slot::Reference.to_string(), "reference");
        assert_eq!(Slot::Comparison.to_string(), "comparison");
    }

    #[test]
    fn test_slot_image_detects_format() {
        let image = SlotImage::from_encoded(png()).unwrap();
        assert_eq!(image.mime(), "image/png");
        assert!(image.data_url().starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn test_slot_image_rejects_non_image() {
        let err = SlotImage::from_encoded(b"hello, world".to_vec()).unwrap_err();
        assert!(matches!(err, DemoError::Validation(_)));
    }

    #[test]
    fn test_data_url_round_trip() {
        let image = SlotImage::new(vec![1, 2, 3], "image/jpeg");
        assert_eq!(image.data_url(), "data:image/jpeg;base64,AQID");
    }
}
