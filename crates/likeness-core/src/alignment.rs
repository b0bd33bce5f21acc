//! Face alignment and cropping.
//!
//! ArcFace input is produced by a 4-DOF similarity transform (scale,
//! rotation, translation) that maps the five detected points onto the
//! InsightFace 112×112 template. The attribute and landmark networks use
//! plain square crops around the detection box instead.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform parameters: dst = [a -b; b a] * src + [tx; ty].
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

/// Least-squares similarity transform from `src` points onto `dst` points.
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    // Normal equations for rows [sx, -sy, 1, 0] → dx and [sy, sx, 0, 1] → dy.
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, target) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * target;
            }
        }
    }

    match solve_4x4(ata, atb) {
        Some([a, b, tx, ty]) => Similarity { a, b, tx, ty },
        None => Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 },
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear RGB sample; out-of-bounds reads are black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && xi < w && yi >= 0 && yi < h {
            let p = image.get_pixel(xi as u32, yi as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warp `image` by the inverse of `t` into an `out_size`² output.
fn warp_similarity(image: &RgbImage, t: Similarity, out_size: u32) -> RgbImage {
    let det = t.a * t.a + t.b * t.b;
    if det < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = t.a / det;
    let ib = t.b / det;

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - t.tx;
        let dy = oy as f32 - t.ty;
        sample(image, ia * dx + ib * dy, -ib * dx + ia * dy)
    })
}

/// Align a face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let t = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    warp_similarity(image, t, ALIGNED_SIZE)
}

/// Square region centred on the box, `expand` × its longer side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareCrop {
    pub x: f32,
    pub y: f32,
    pub side: f32,
}

impl SquareCrop {
    pub fn around(face: &BoundingBox, expand: f32) -> Self {
        let (cx, cy) = face.center();
        let side = face.width.max(face.height) * expand;
        Self { x: cx - side / 2.0, y: cy - side / 2.0, side }
    }

    /// Cut the region out of `image` (black outside the frame), resized to `size`².
    pub fn extract(&self, image: &RgbImage, size: u32) -> RgbImage {
        let inside = self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.side <= image.width() as f32
            && self.y + self.side <= image.height() as f32;
        let side = self.side.round() as u32;

        if inside && side > 0 {
            let window = imageops::crop_imm(image, self.x as u32, self.y as u32, side, side).to_image();
            return imageops::resize(&window, size, size, FilterType::Triangle);
        }

        let scale = self.side / size as f32;
        RgbImage::from_fn(size, size, |ox, oy| {
            let sx = self.x + (ox as f32 + 0.5) * scale - 0.5;
            let sy = self.y + (oy as f32 + 0.5) * scale - 0.5;
            sample(image, sx, sy)
        })
    }

    /// Map a crop-relative coordinate in [0, 1] back to image space.
    pub fn to_image(&self, u: f32, v: f32) -> (f32, f32) {
        (self.x + u * self.side, self.y + v * self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = estimate_similarity(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-2 && t.ty.abs() < 1e-2, "t = ({}, {})", t.tx, t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 0.01, "a = {}, expected ~0.5", t.a);
    }

    #[test]
    fn test_singular_system_falls_back_to_identity() {
        let t = estimate_similarity(&[(0.0, 0.0); 5], &REFERENCE_LANDMARKS_112);
        assert_eq!(t, Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 });
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (112, 112));
        assert_eq!(aligned.get_pixel(56, 56), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left eye should land near the template's left eye.
        let mut image = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&image, &src);
        let (rx, ry) = (REFERENCE_LANDMARKS_112[0].0.round() as u32, REFERENCE_LANDMARKS_112[0].1.round() as u32);
        let brightest = (rx - 1..=rx + 1)
            .flat_map(|x| (ry - 1..=ry + 1).map(move |y| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "expected bright patch near ({rx}, {ry}), max={brightest}");
    }

    #[test]
    fn test_square_crop_geometry() {
        let face = BoundingBox { x: 100.0, y: 50.0, width: 80.0, height: 100.0, confidence: 0.9, landmarks: None };
        let crop = SquareCrop::around(&face, 1.2);
        assert!((crop.side - 120.0).abs() < 1e-4);
        assert!((crop.x - 80.0).abs() < 1e-4 && (crop.y - 40.0).abs() < 1e-4);
        assert_eq!(crop.to_image(0.5, 0.5), (140.0, 100.0));
    }

    #[test]
    fn test_square_crop_out_of_bounds_is_black() {
        let image = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));
        let crop = SquareCrop { x: -50.0, y: -50.0, side: 100.0 };
        let out = crop.extract(&image, 10);
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(9, 9), &Rgb([200, 200, 200]));
    }
}
