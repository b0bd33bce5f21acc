#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use likeness_core::{
    AnalysisError, BoundingBox, Embedding, Expressions, FaceAnalysis, FaceBackend, Gender, GenderLabel,
    Landmarks68, Point,
};
use likeness_demo::{BackendLoader, DemoSession, LiveSettings, LoadError, ModelLoader};
use likeness_hw::{CameraError, CameraProvider, Frame, FrameSource};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Knobs shared between a test and the fake backend it drives.
#[derive(Clone, Default)]
pub struct Script {
    /// Detector confidence reported for live frames; `None` means no face.
    pub live_confidence: Arc<Mutex<Option<f32>>>,
    pub detect_calls: Arc<AtomicUsize>,
    /// How long each live detection takes on the engine thread.
    pub detect_delay: Arc<Mutex<Duration>>,
}

impl Script {
    pub fn set_detect_delay(&self, delay: Duration) {
        *self.detect_delay.lock().unwrap() = delay;
    }

    pub fn set_live_confidence(&self, confidence: Option<f32>) {
        *self.live_confidence.lock().unwrap() = confidence;
    }
}

/// Backend that treats a black top-left pixel as "no face" and otherwise
/// derives the descriptor from that pixel's colour.
pub struct FakeBackend {
    script: Script,
}

fn face_box(confidence: f32) -> BoundingBox {
    BoundingBox {
        x: 1.0,
        y: 1.0,
        width: 4.0,
        height: 4.0,
        confidence,
        landmarks: None,
    }
}

fn landmarks() -> Landmarks68 {
    let points = (0..68)
        .map(|i| Point::new(40.0 + i as f32, 80.0 + (i % 17) as f32))
        .collect();
    Landmarks68::new(points).unwrap()
}

impl FaceBackend for FakeBackend {
    fn detect(&mut self, _image: &RgbImage) -> Result<Option<BoundingBox>, AnalysisError> {
        self.script.detect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.script.detect_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self.script.live_confidence.lock().unwrap().map(face_box))
    }

    fn analyze(&mut self, image: &RgbImage) -> Result<Option<FaceAnalysis>, AnalysisError> {
        let Rgb([r, g, b]) = *image.get_pixel(0, 0);
        if (r, g, b) == (0, 0, 0) {
            return Ok(None);
        }
        let v = [r as f32, g as f32, b as f32];
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(Some(FaceAnalysis {
            descriptor: Embedding {
                values: v.iter().map(|x| x / norm).collect(),
                model_version: Some("fake".into()),
            },
            landmarks: landmarks(),
            expressions: Expressions { neutral: 0.7, happy: 0.3, ..Default::default() },
            age: 30.0,
            gender: Gender { label: GenderLabel::Male, probability: 0.8 },
            detection: face_box(0.99),
        }))
    }
}

pub struct FakeLoader {
    pub script: Script,
    pub loads: Arc<AtomicUsize>,
    pub fail_first: usize,
}

#[async_trait]
impl BackendLoader for FakeLoader {
    async fn load(&self) -> Result<Box<dyn FaceBackend>, LoadError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if n < self.fail_first {
            return Err(LoadError::Task("model fetch refused".into()));
        }
        Ok(Box::new(FakeBackend { script: self.script.clone() }))
    }
}

/// Camera that only allows one open stream at a time, like a real device.
#[derive(Default)]
pub struct FakeCamera {
    pub in_use: Arc<AtomicBool>,
    pub opens: AtomicUsize,
    pub brightness: Mutex<u8>,
    pub deny: AtomicBool,
}

impl FakeCamera {
    pub fn lit(brightness: u8) -> Self {
        Self { brightness: Mutex::new(brightness), ..Default::default() }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl CameraProvider for FakeCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied("/dev/fake0".into()));
        }
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(CameraError::DeviceBusy);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            in_use: Arc::clone(&self.in_use),
            brightness: *self.brightness.lock().unwrap(),
        }))
    }
}

struct FakeSource {
    in_use: Arc<AtomicBool>,
    brightness: u8,
}

impl FrameSource for FakeSource {
    fn stream(&mut self, stop: &AtomicBool, publish: &mut dyn FnMut(Frame)) -> Result<(), CameraError> {
        let mut sequence = 0;
        while !stop.load(Ordering::SeqCst) {
            publish(Frame {
                data: vec![self.brightness; 8 * 8 * 3],
                width: 8,
                height: 8,
                timestamp: Instant::now(),
                sequence,
            });
            sequence += 1;
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

pub fn fast_settings() -> LiveSettings {
    LiveSettings {
        sample_interval: Duration::from_millis(5),
        auto_capture_delay: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub session: DemoSession,
    pub camera: Arc<FakeCamera>,
    pub script: Script,
    pub loads: Arc<AtomicUsize>,
}

pub fn harness_with(camera: FakeCamera, fail_first: usize) -> Harness {
    let script = Script::default();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = ModelLoader::new(FakeLoader {
        script: script.clone(),
        loads: Arc::clone(&loads),
        fail_first,
    });
    let camera = Arc::new(camera);
    let session = DemoSession::new(loader, camera.clone(), fast_settings()).with_seed(42);
    Harness { session, camera, script, loads }
}

pub fn grey_frame(sequence: u64) -> Frame {
    Frame {
        data: vec![128; 8 * 8 * 3],
        width: 8,
        height: 8,
        timestamp: Instant::now(),
        sequence,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeCamera::lit(128), 0)
}

/// Solid-colour PNG; black means "no face" to [`FakeBackend`].
pub fn solid_png(rgb: [u8; 3]) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(16, 16, Rgb(rgb))
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
