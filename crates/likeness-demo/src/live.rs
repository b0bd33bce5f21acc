//! Live capture: periodic face detection on a camera stream with
//! quality-gated auto-capture.
//!
//! [`CaptureController`] holds the per-tick decision logic and knows nothing
//! about cameras or time. [`LiveCapture`] drives it from a self-scheduling
//! loop: sample, decide, sleep, repeat. A tick never starts before the
//! previous detection has resolved or been abandoned.

use crate::engine::Analyzer;
use crate::error::{CaptureError, EngineError};
use crate::session::SlotImage;
use likeness_core::BoundingBox;
use likeness_hw::{CameraError, CameraProvider, CameraStream, Frame, LightingEstimate};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Quality at or above which a detection is "excellent" and may auto-capture.
pub const EXCELLENT_QUALITY: u8 = 85;
/// Quality at or above which a detection is "good".
pub const GOOD_QUALITY: u8 = 70;

/// Colour band of the detection box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Excellent,
    Good,
    #[default]
    Poor,
}

impl QualityBand {
    pub fn from_score(quality: u8) -> Self {
        if quality >= EXCELLENT_QUALITY {
            QualityBand::Excellent
        } else if quality >= GOOD_QUALITY {
            QualityBand::Good
        } else {
            QualityBand::Poor
        }
    }
}

/// Detector confidence (0–1) as a 0–100 quality score.
///
/// Truncated, so a score never reaches a band the raw confidence is below.
/// The epsilon absorbs f32 error on exact values such as 0.7.
pub fn quality_score(confidence: f32) -> u8 {
    (confidence * 100.0 + 1e-4).floor().clamp(0.0, 100.0) as u8
}

/// One live detection result; superseded by the next tick.
#[derive(Debug, Clone)]
pub struct DetectionSample {
    pub bbox: BoundingBox,
    pub landmarks: Option<[(f32, f32); 5]>,
    pub quality_score: u8,
    pub timestamp: Instant,
}

impl DetectionSample {
    pub fn new(bbox: BoundingBox, timestamp: Instant) -> Self {
        Self {
            landmarks: bbox.landmarks,
            quality_score: quality_score(bbox.confidence),
            bbox,
            timestamp,
        }
    }

    pub fn band(&self) -> QualityBand {
        QualityBand::from_score(self.quality_score)
    }
}

/// What one tick observed.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub detection: Option<BoundingBox>,
    pub lighting: LightingEstimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Continue,
    /// Quality and lighting qualified; capture is scheduled for a later tick.
    ArmAutoCapture,
    /// Take the current frame now.
    CaptureNow,
    /// The face was lost while a capture was armed.
    AutoCaptureCancelled,
}

/// Per-tick auto-capture state machine.
#[derive(Debug, Clone)]
pub struct CaptureController {
    quality: u8,
    good_streak: u32,
    auto_capturing: bool,
    fired_this_streak: bool,
    armed_ticks: u32,
    delay_ticks: u32,
}

impl CaptureController {
    /// `delay_ticks` is how many further ticks an armed capture waits; at least one.
    pub fn new(delay_ticks: u32) -> Self {
        Self {
            quality: 0,
            good_streak: 0,
            auto_capturing: false,
            fired_this_streak: false,
            armed_ticks: 0,
            delay_ticks: delay_ticks.max(1),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn good_streak(&self) -> u32 {
        self.good_streak
    }

    pub fn is_auto_capturing(&self) -> bool {
        self.auto_capturing
    }

    pub fn tick(&mut self, input: &TickInput) -> TickDecision {
        let Some(detection) = &input.detection else {
            self.quality = 0;
            self.reset_streak();
            if self.auto_capturing {
                self.auto_capturing = false;
                return TickDecision::AutoCaptureCancelled;
            }
            return TickDecision::Continue;
        };

        self.quality = quality_score(detection.confidence);
        let qualifies = self.quality >= EXCELLENT_QUALITY && input.lighting.is_good();
        if qualifies {
            self.good_streak += 1;
        } else {
            self.reset_streak();
        }

        if self.auto_capturing {
            self.armed_ticks += 1;
            if self.armed_ticks >= self.delay_ticks {
                self.auto_capturing = false;
                return TickDecision::CaptureNow;
            }
            return TickDecision::Continue;
        }

        if qualifies && !self.fired_this_streak {
            self.auto_capturing = true;
            self.fired_this_streak = true;
            self.armed_ticks = 0;
            return TickDecision::ArmAutoCapture;
        }

        TickDecision::Continue
    }

    fn reset_streak(&mut self) {
        self.good_streak = 0;
        self.fired_this_streak = false;
    }
}

/// Timing of the live loop.
#[derive(Debug, Clone, Copy)]
pub struct LiveSettings {
    pub sample_interval: Duration,
    pub auto_capture_delay: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(100),
            auto_capture_delay: Duration::from_millis(100),
        }
    }
}

impl LiveSettings {
    /// Auto-capture delay rounded up to whole ticks.
    pub fn delay_ticks(&self) -> u32 {
        let interval = self.sample_interval.as_millis().max(1);
        let ticks = self.auto_capture_delay.as_millis().div_ceil(interval);
        ticks.clamp(1, u32::MAX as u128) as u32
    }
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, Default)]
pub struct LiveFeedback {
    pub sample: Option<DetectionSample>,
    pub quality: u8,
    pub band: QualityBand,
    pub lighting: Option<LightingEstimate>,
    pub auto_capturing: bool,
    pub ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Manual,
    Auto,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Captured { image: SlotImage, mode: CaptureMode },
    Cancelled,
}

enum Command {
    Capture,
    Cancel,
}

/// A running camera session. The camera is released when the session ends,
/// whichever way it ends.
pub struct LiveCapture {
    commands: mpsc::Sender<Command>,
    feedback: watch::Receiver<LiveFeedback>,
    task: JoinHandle<Result<CaptureOutcome, CaptureError>>,
}

impl LiveCapture {
    /// Open the camera and start sampling. Must be called inside a Tokio runtime.
    pub fn start(
        provider: &dyn CameraProvider,
        analyzer: Analyzer,
        settings: LiveSettings,
    ) -> Result<Self, CameraError> {
        let stream = CameraStream::start(provider)?;
        tracing::info!(
            interval_ms = settings.sample_interval.as_millis() as u64,
            delay_ticks = settings.delay_ticks(),
            "live capture started"
        );

        let (commands, rx) = mpsc::channel(4);
        let (feedback_tx, feedback) = watch::channel(LiveFeedback::default());
        let task = tokio::spawn(run(stream, analyzer, settings, rx, feedback_tx));

        Ok(Self { commands, feedback, task })
    }

    /// Take the current frame immediately.
    pub fn capture(&self) {
        self.send(Command::Capture);
    }

    /// Stop without capturing.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.try_send(command) {
            tracing::debug!(error = %e, "live capture command dropped");
        }
    }

    pub fn feedback(&self) -> watch::Receiver<LiveFeedback> {
        self.feedback.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn finish(self) -> Result<CaptureOutcome, CaptureError> {
        // The sender stays alive until the task ends; a closed channel reads as cancel.
        let Self { commands, task, .. } = self;
        let result = task.await;
        drop(commands);
        result.map_err(|e| {
            tracing::warn!(error = %e, "live capture task failed");
            CaptureError::Aborted
        })?
    }

    /// Cancel and wait for the camera to be released.
    pub async fn stop(self) {
        self.cancel();
        if let Err(e) = self.finish().await {
            tracing::debug!(error = %e, "live capture ended with error during stop");
        }
    }
}

async fn run(
    stream: CameraStream,
    analyzer: Analyzer,
    settings: LiveSettings,
    mut commands: mpsc::Receiver<Command>,
    feedback: watch::Sender<LiveFeedback>,
) -> Result<CaptureOutcome, CaptureError> {
    let mut controller = CaptureController::new(settings.delay_ticks());
    let mut ticks = 0u64;

    let result = loop {
        match stream.current_frame() {
            Err(e) => break Err(e.into()),
            Ok(None) => {}
            Ok(Some(frame)) => {
                let lighting = frame.lighting();
                let detected = tokio::select! {
                    command = commands.recv() => {
                        match on_command(command, &stream) {
                            Ok(Some(outcome)) => break Ok(outcome),
                            Ok(None) => continue,
                            Err(e) => break Err(e),
                        }
                    }
                    detected = analyzer.detect(frame.clone()) => detected,
                };

                let detection = match detected {
                    Ok(detection) => detection,
                    Err(EngineError::ChannelClosed) => break Err(CaptureError::Aborted),
                    Err(e) => {
                        tracing::warn!(error = %e, "live detection failed; treating as no face");
                        None
                    }
                };

                ticks += 1;
                let input = TickInput { detection, lighting };
                let decision = controller.tick(&input);
                let sample = input.detection.map(|bbox| DetectionSample::new(bbox, frame.timestamp));

                tracing::debug!(
                    tick = ticks,
                    quality = controller.quality(),
                    brightness = lighting.brightness,
                    streak = controller.good_streak(),
                    ?decision,
                    "live tick"
                );

                feedback.send_replace(LiveFeedback {
                    band: QualityBand::from_score(controller.quality()),
                    quality: controller.quality(),
                    sample,
                    lighting: Some(lighting),
                    auto_capturing: controller.is_auto_capturing(),
                    ticks,
                });

                match decision {
                    TickDecision::CaptureNow => match encode_jpeg(&frame) {
                        Ok(image) => {
                            tracing::info!(quality = controller.quality(), "auto-capture taken");
                            break Ok(CaptureOutcome::Captured { image, mode: CaptureMode::Auto });
                        }
                        Err(e) => break Err(e),
                    },
                    TickDecision::ArmAutoCapture => tracing::info!("auto-capture armed"),
                    TickDecision::AutoCaptureCancelled => tracing::info!("face lost, auto-capture cancelled"),
                    TickDecision::Continue => {}
                }
            }
        }

        tokio::select! {
            command = commands.recv() => match on_command(command, &stream) {
                Ok(Some(outcome)) => break Ok(outcome),
                Ok(None) => {}
                Err(e) => break Err(e),
            },
            _ = tokio::time::sleep(settings.sample_interval) => {}
        }
    };

    release(stream).await;
    result
}

/// `Some` when the command ends the session.
fn on_command(command: Option<Command>, stream: &CameraStream) -> Result<Option<CaptureOutcome>, CaptureError> {
    match command {
        None | Some(Command::Cancel) => {
            tracing::info!("live capture cancelled");
            Ok(Some(CaptureOutcome::Cancelled))
        }
        Some(Command::Capture) => match stream.current_frame()? {
            Some(frame) => {
                let image = encode_jpeg(&frame)?;
                tracing::info!(seq = frame.sequence, "manual capture taken");
                Ok(Some(CaptureOutcome::Captured { image, mode: CaptureMode::Manual }))
            }
            None => {
                tracing::warn!("manual capture requested before the first frame; ignoring");
                Ok(None)
            }
        },
    }
}

async fn release(stream: CameraStream) {
    // Joining the worker may wait on one in-flight buffer.
    if tokio::task::spawn_blocking(move || stream.stop()).await.is_err() {
        tracing::warn!("camera release task failed");
    }
}

/// Encode a frame the way a browser canvas would export it.
pub fn encode_jpeg(frame: &Frame) -> Result<SlotImage, CaptureError> {
    let image = frame.to_rgb_image().map_err(|e| CaptureError::Encode(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(SlotImage::new(out.into_inner(), "image/jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(confidence: f32) -> Option<BoundingBox> {
        Some(BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 60.0,
            confidence,
            landmarks: None,
        })
    }

    fn tick(controller: &mut CaptureController, detection: Option<BoundingBox>, brightness: f32) -> TickDecision {
        controller.tick(&TickInput {
            detection,
            lighting: LightingEstimate::from_brightness(brightness),
        })
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(QualityBand::from_score(100), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(85), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(84), QualityBand::Good);
        assert_eq!(QualityBand::from_score(70), QualityBand::Good);
        assert_eq!(QualityBand::from_score(69), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(0), QualityBand::Poor);

        // 84.6 and 84.9 are below the excellent threshold.
        assert_eq!(QualityBand::from_score(quality_score(0.846)), QualityBand::Good);
        assert_eq!(QualityBand::from_score(quality_score(0.849)), QualityBand::Good);
        assert_eq!(QualityBand::from_score(quality_score(0.85)), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(quality_score(0.699)), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(quality_score(0.7)), QualityBand::Good);
    }

    #[test]
    fn test_quality_score_scaling() {
        assert_eq!(quality_score(0.853), 85);
        assert_eq!(quality_score(0.846), 84);
        assert_eq!(quality_score(1.2), 100);
        assert_eq!(quality_score(-0.1), 0);
    }

    #[test]
    fn test_just_below_excellent_never_arms() {
        let mut c = CaptureController::new(1);
        for _ in 0..5 {
            assert_eq!(tick(&mut c, face(0.846), 128.0), TickDecision::Continue);
        }
        assert_eq!(c.quality(), 84);
        assert!(!c.is_auto_capturing());
    }

    #[test]
    fn test_arm_then_capture_on_next_tick() {
        let mut c = CaptureController::new(1);
        assert_eq!(tick(&mut c, face(0.9), 128.0), TickDecision::ArmAutoCapture);
        assert!(c.is_auto_capturing());
        assert_eq!(tick(&mut c, face(0.9), 128.0), TickDecision::CaptureNow);
        assert!(!c.is_auto_capturing());
    }

    #[test]
    fn test_no_arm_while_already_armed() {
        let mut c = CaptureController::new(3);
        assert_eq!(tick(&mut c, face(0.95), 128.0), TickDecision::ArmAutoCapture);
        assert_eq!(tick(&mut c, face(0.95), 128.0), TickDecision::Continue);
        assert_eq!(tick(&mut c, face(0.95), 128.0), TickDecision::Continue);
        assert_eq!(tick(&mut c, face(0.95), 128.0), TickDecision::CaptureNow);
    }

    #[test]
    fn test_fires_once_per_streak() {
        let mut c = CaptureController::new(1);
        let decisions: Vec<_> = (0..10).map(|_| tick(&mut c, face(0.9), 128.0)).collect();
        let fired = decisions.iter().filter(|d| **d == TickDecision::CaptureNow).count();
        assert_eq!(fired, 1);
        assert_eq!(c.good_streak(), 10);

        // A broken streak allows a new capture.
        tick(&mut c, face(0.5), 128.0);
        assert_eq!(tick(&mut c, face(0.9), 128.0), TickDecision::ArmAutoCapture);
    }

    #[test]
    fn test_poor_lighting_blocks_auto_capture() {
        let mut c = CaptureController::new(1);
        assert_eq!(tick(&mut c, face(0.99), 30.0), TickDecision::Continue);
        assert_eq!(tick(&mut c, face(0.99), 240.0), TickDecision::Continue);
        assert_eq!(c.quality(), 99);
        assert_eq!(c.good_streak(), 0);
    }

    #[test]
    fn test_below_threshold_quality_does_not_arm() {
        let mut c = CaptureController::new(1);
        assert_eq!(tick(&mut c, face(0.84), 128.0), TickDecision::Continue);
        assert!(!c.is_auto_capturing());
    }

    #[test]
    fn test_face_lost_cancels_and_resets() {
        let mut c = CaptureController::new(2);
        assert_eq!(tick(&mut c, face(0.9), 128.0), TickDecision::ArmAutoCapture);
        assert_eq!(tick(&mut c, None, 128.0), TickDecision::AutoCaptureCancelled);
        assert_eq!(c.quality(), 0);
        assert_eq!(c.good_streak(), 0);
        assert!(!c.is_auto_capturing());
        assert_eq!(tick(&mut c, None, 128.0), TickDecision::Continue);
    }

    #[test]
    fn test_armed_capture_survives_quality_dip() {
        let mut c = CaptureController::new(1);
        assert_eq!(tick(&mut c, face(0.9), 128.0), TickDecision::ArmAutoCapture);
        assert_eq!(tick(&mut c, face(0.6), 128.0), TickDecision::CaptureNow);
    }

    #[test]
    fn test_delay_ticks() {
        let s = LiveSettings::default();
        assert_eq!(s.delay_ticks(), 1);

        let s = LiveSettings {
            sample_interval: Duration::from_millis(100),
            auto_capture_delay: Duration::from_millis(250),
        };
        assert_eq!(s.delay_ticks(), 3);

        let s = LiveSettings {
            sample_interval: Duration::from_millis(100),
            auto_capture_delay: Duration::ZERO,
        };
        assert_eq!(s.delay_ticks(), 1);
    }

    #[test]
    fn test_detection_sample() {
        let sample = DetectionSample::new(face(0.72).unwrap(), Instant::now());
        assert_eq!(sample.quality_score, 72);
        assert_eq!(sample.band(), QualityBand::Good);
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = Frame {
            data: vec![120; 8 * 8 * 3],
            width: 8,
            height: 8,
            timestamp: Instant::now(),
            sequence: 0,
        };
        let image = encode_jpeg(&frame).unwrap();
        assert_eq!(image.mime(), "image/jpeg");
        assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8]);
    }
}
