//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face into the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and a least-squares fit.

use image::GrayImage;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Side length of the aligned crop expected by the recognizer.
pub const ALIGNED_SIZE: u32 = 112;

/// Align a detected face to the canonical 112×112 crop.
///
/// Estimates the similarity transform from the detected landmarks to the
/// reference positions and warps the face region with bilinear sampling.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}

/// Estimate a 2×3 similarity transform (scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Overdetermined system A * [a, b, tx, ty]^T = B; for each pair
    // (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

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
            // Degenerate landmark geometry; identity keeps the warp sane.
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

/// Apply a 2×3 affine warp, producing a square grayscale output.
///
/// Samples the source with bilinear interpolation; out-of-bounds pixels
/// are filled with black.
fn warp_affine(image: &GrayImage, matrix: &[f32; 6], out_size: u32) -> GrayImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the 2x2 rotation/scale part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return GrayImage::new(out_size, out_size);
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let (src_w, src_h) = image.dimensions();
    let mut output = GrayImage::new(out_size, out_size);

    for oy in 0..out_size {
        for ox in 0..out_size {
            // Map output pixel back to source: src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i64, y: i64| -> f32 {
                if x >= 0 && y >= 0 && (x as u32) < src_w && (y as u32) < src_h {
                    image.get_pixel(x as u32, y as u32)[0] as f32
                } else {
                    0.0
                }
            };

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            output.put_pixel(ox, oy, image::Luma([val.round().clamp(0.0, 255.0) as u8]));
        }
    }

    output
}
