//! Similarity-transform warps for face crops.
//!
//! Aligns detected faces to the canonical 112×112 ArcFace position using the
//! five InsightFace reference keypoints, and provides the square crop used by
//! the landmark estimator.

use crate::types::{Point, Rect};
use image::{Rgb, RgbImage};

/// ArcFace reference keypoints for a 112×112 output.
const REFERENCE_KEYPOINTS_112: [Point; 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub(crate) const ALIGNED_SIZE: u32 = 112;

/// 2×3 similarity matrix `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub(crate) type Similarity = [f32; 6];

/// Estimate a 4-DOF similarity transform (scale, rotation, translation)
/// from `src` to `dst` by least squares.
fn estimate_similarity_transform(src: &[Point; 5], dst: &[Point; 5]) -> Similarity {
    // Normal equations for A * [a, b, tx, ty]^T = B, two rows per point pair:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(&ata, &atb);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Warp `image` through a similarity transform into an `out_size` square.
///
/// Bilinear sampling; out-of-bounds pixels are black.
pub(crate) fn warp_similarity(image: &RgbImage, matrix: &Similarity, out_size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let mut output = RgbImage::new(out_size, out_size);

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;

    let (src_w, src_h) = (image.width() as i32, image.height() as i32);
    let sample = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            let Rgb([r, g, b]) = *image.get_pixel(x as u32, y as u32);
            [r as f32, g as f32, b as f32]
        } else {
            [0.0; 3]
        }
    };

    for (ox, oy, pixel) in output.enumerate_pixels_mut() {
        // src = M^-1 * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        for c in 0..3 {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            pixel.0[c] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}

/// Align a detected face to a canonical 112×112 crop from its five keypoints.
pub fn align_face(image: &RgbImage, keypoints: &[Point; 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(keypoints, &REFERENCE_KEYPOINTS_112);
    warp_similarity(image, &matrix, ALIGNED_SIZE)
}

/// Transform that maps a square of side `max(w, h) * expand`, centered on
/// `bounds`, onto an `out_size` square.
pub(crate) fn centered_square(bounds: &Rect, expand: f32, out_size: u32) -> Similarity {
    let cx = bounds.x + bounds.width / 2.0;
    let cy = bounds.y + bounds.height / 2.0;
    let side = bounds.width.max(bounds.height) * expand;
    let scale = if side > 0.0 { out_size as f32 / side } else { 1.0 };
    let half = out_size as f32 / 2.0;
    [scale, 0.0, half - scale * cx, 0.0, scale, half - scale * cy]
}

/// Map a point in warped space back into source space.
pub(crate) fn invert_point(matrix: &Similarity, (x, y): Point) -> Point {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return (x, y);
    }
    let dx = x - tx;
    let dy = y - ty;
    ((a * dx + b * dy) / det, (-b * dx + a * dy) / det)
}
