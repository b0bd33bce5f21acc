//! Frame type, pixel format conversion and lighting estimation.

use image::RgbImage;

/// Lower bound (inclusive) of the "good" brightness band.
pub const GOOD_BRIGHTNESS_MIN: f32 = 70.0;
/// Upper bound (inclusive) of the "good" brightness band.
pub const GOOD_BRIGHTNESS_MAX: f32 = 220.0;

/// A captured RGB8 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Mean of (r + g + b) / 3 over all pixels, 0.0–255.0.
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return 0.0;
        }
        let total: u64 = self.data[..pixels * 3].iter().map(|&b| b as u64).sum();
        total as f32 / (pixels * 3) as f32
    }

    pub fn lighting(&self) -> LightingEstimate {
        LightingEstimate::from_brightness(self.avg_brightness())
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let expected = (self.width * self.height * 3) as usize;
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength { expected, actual: self.data.len() });
        }
        RgbImage::from_raw(self.width, self.height, self.data[..expected].to_vec())
            .ok_or(FrameError::InvalidLength { expected, actual: self.data.len() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lighting {
    Good,
    Poor,
}

/// Brightness of one frame and its classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingEstimate {
    pub brightness: f32,
    pub condition: Lighting,
}

impl LightingEstimate {
    pub fn from_brightness(brightness: f32) -> Self {
        let condition = if (GOOD_BRIGHTNESS_MIN..=GOOD_BRIGHTNESS_MAX).contains(&brightness) {
            Lighting::Good
        } else {
            Lighting::Poor
        };
        Self { brightness, condition }
    }

    pub fn is_good(&self) -> bool {
        self.condition == Lighting::Good
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Replicate an 8-bit grey channel into RGB8.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: grey.len() });
    }
    Ok(grey[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
