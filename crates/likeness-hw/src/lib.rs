//! likeness-hw — camera capture for live face sampling.
//!
//! V4L2 streaming on a worker thread, RGB conversion and per-frame lighting
//! estimation.

pub mod camera;
pub mod frame;
pub mod stream;

pub use camera::{list_devices, Camera, CameraError, DeviceInfo, PixelFormat, V4lCameraProvider};
pub use frame::{Frame, FrameError, Lighting, LightingEstimate};
pub use stream::{CameraProvider, CameraStream, FrameSource};
