//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the anchor-free SCRFD model over a letterboxed 640×640 input,
//! decodes the three stride levels and merges detections with NMS.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept around to map
/// detections back into original image coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32], discovered by
    /// name at load time with a positional fallback.
    stride_indices: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in a grayscale image, returning bounding boxes sorted
    /// by descending confidence.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let mut result = nms(all_detections, NMS_IOU_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Letterbox-resize a grayscale image into the 640×640 NCHW input tensor.
///
/// Padding uses the normalization mean so padded pixels contribute 0 after
/// normalization. The single luma channel is replicated across R, G and B.
fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();

    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = (width as f32 * scale).round().max(1.0) as u32;
    let new_h = (height as f32 * scale).round().max(1.0) as u32;
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x_start = pad_x.floor() as u32;
    let pad_y_start = pad_y.floor() as u32;
    let size = INPUT_SIZE as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside = y >= pad_y_start
                && y < pad_y_start + new_h
                && x >= pad_x_start
                && x < pad_x_start + new_w;
            let pixel = if inside {
                resized.get_pixel(x - pad_x_start, y - pad_y_start)[0] as f32
            } else {
                NORM_MEAN
            };

            let normalized = (pixel - NORM_MEAN) / NORM_STD;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = normalized;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports either name tensors per stride ("score_8", "bbox_16",
/// "kps_32", ...) or use generic numeric names. When the named pattern is
/// present it is used; otherwise the standard positional layout applies:
/// [0-2] scores, [3-5] bboxes, [6-8] kps, each over strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping"
        );
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode detections for a single stride level back into image coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let anchor_idx = idx / ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid) as f32 * stride as f32;

        // bbox regression: offsets from the anchor center, in stride units
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[bbox_off] * stride as f32;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride as f32;

        let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

        let orig_x1 = unmap(x1, letterbox.pad_x);
        let orig_y1 = unmap(y1, letterbox.pad_y);
        let orig_x2 = unmap(x2, letterbox.pad_x);
        let orig_y2 = unmap(y2, letterbox.pad_y);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                let lx = anchor_cx + kps[kps_off + i * 2] * stride as f32;
                let ly = anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32;
                *lm = (unmap(lx, letterbox.pad_x), unmap(ly, letterbox.pad_y));
            }
            Some(lms)
        } else {
            None
        };

        detections.push(BoundingBox {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union of two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(30.0, 30.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_pair() {
        let detections = vec![
            bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            bbox(300.0, 300.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, NMS_IOU_THRESHOLD);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_leaves_disjoint_boxes_alone() {
        let detections = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(detections, NMS_IOU_THRESHOLD).len(), 2);
    }

    #[test]
    fn nms_empty_input() {
        assert!(nms(vec![], NMS_IOU_THRESHOLD).is_empty());
    }

    #[test]
    fn preprocess_shape_and_letterbox() {
        let image = GrayImage::from_pixel(320, 240, image::Luma([128]));
        let (tensor, letterbox) = preprocess(&image);

        assert_eq!(
            tensor.shape(),
            &[1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize]
        );
        // 320x240 scales by 2 to 640x480, padded vertically by 80 each side
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!(letterbox.pad_x.abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);
    }

    #[test]
    fn preprocess_pads_to_normalized_zero() {
        let image = GrayImage::from_pixel(640, 320, image::Luma([255]));
        let (tensor, _) = preprocess(&image);
        // Top rows of a wide image are padding
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
        // Center is real image data
        let center = tensor[[0, 0, 320, 320]];
        assert!((center - (255.0 - NORM_MEAN) / NORM_STD).abs() < 1e-6);
    }

    #[test]
    fn letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let new_w = (width * scale).round();
        let new_h = (height * scale).round();
        let letterbox = Letterbox {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let orig = (100.0f32, 50.0f32);
        let lb = (orig.0 * scale + letterbox.pad_x, orig.1 * scale + letterbox.pad_y);
        let recovered = (
            (lb.0 - letterbox.pad_x) / letterbox.scale,
            (lb.1 - letterbox.pad_y) / letterbox.scale,
        );

        assert!((recovered.0 - orig.0).abs() < 0.1);
        assert!((recovered.1 - orig.1).abs() < 0.1);
    }

    #[test]
    fn output_discovery_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (0, 3, 6));
        assert_eq!(indices[1], (1, 4, 7));
        assert_eq!(indices[2], (2, 5, 8));
    }

    #[test]
    fn output_discovery_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (2, 0, 1));
        assert_eq!(indices[1], (5, 3, 4));
        assert_eq!(indices[2], (8, 6, 7));
    }

    #[test]
    fn output_discovery_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(
            discover_output_indices(&names),
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        );
    }

    #[test]
    fn decode_stride_ignores_low_scores() {
        let grid = INPUT_SIZE as usize / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let scores = vec![0.0f32; anchors];
        let bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };

        assert!(decode_stride(&scores, &bboxes, &kps, 32, &letterbox).is_empty());
    }

    #[test]
    fn decode_stride_maps_anchor_back_to_image() {
        let grid = INPUT_SIZE as usize / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Anchor at grid cell (2, 1), first anchor slot, 1-stride-wide box
        let idx = (grid + 2) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let letterbox = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let dets = decode_stride(&scores, &bboxes, &kps, 32, &letterbox);

        assert_eq!(dets.len(), 1);
        // Anchor center (64, 32) in letterbox space, box spans ±32, /2 scale
        assert!((dets[0].x - 16.0).abs() < 1e-4);
        assert!((dets[0].y - 0.0).abs() < 1e-4);
        assert!((dets[0].width - 32.0).abs() < 1e-4);
        assert!((dets[0].height - 32.0).abs() < 1e-4);
    }
}
