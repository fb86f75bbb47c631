//! SCRFD face detector over decoded RGB frames.
//!
//! Letterboxes the frame to 640×640, runs the three-stride anchor head and
//! keeps the post-NMS detections, mapped back to frame coordinates.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::VisionError;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// One detected face in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: [(f32, f32); 5],
}

/// Frame ↔ letterboxed-input mapping.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
        }
    }

    fn to_frame(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// (score, bbox, kps) output positions for one stride.
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    /// `intra_threads` bounds ONNX Runtime's per-operator thread pool.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(VisionError::Model(format!(
                "detector needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }
        let outputs = discover_output_indices(&names);
        tracing::info!(path = %model_path.display(), ?outputs, intra_threads, "loaded SCRFD detector");

        Ok(Self {
            session,
            outputs,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Faces in `frame`, most confident first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| VisionError::Inference(format!("{what} stride {stride}: {e}")))
            };
            let head = StrideHead {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(head.decode(&letterbox, self.score_threshold));
        }

        Ok(nms(candidates, self.nms_threshold))
    }
}

/// Letterboxed, normalized NCHW input tensor.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let new_w = INPUT_SIZE - 2 * letterbox.pad_x;
    let new_h = INPUT_SIZE - 2 * letterbox.pad_y;
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    // Zeros are the normalized padding value.
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        if tx >= side || ty >= side {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

/// Map output names to stride slots. Exports either name tensors
/// `score_8`, `bbox_16`, `kps_32`, ... or number them, in which case the
/// conventional order is scores, then bboxes, then keypoints.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let lookup = |stride: usize| -> Option<StrideOutputs> {
        Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?))
    };

    match (lookup(STRIDES[0]), lookup(STRIDES[1]), lookup(STRIDES[2])) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => {
            tracing::debug!(?names, "unnamed detector outputs; using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

struct StrideHead<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideHead<'_> {
    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<Detection> {
        let grid = INPUT_SIZE as usize / self.stride;
        let step = self.stride as f32;
        let anchors = grid * grid * ANCHORS_PER_CELL;

        let mut out = Vec::new();
        for idx in 0..anchors.min(self.scores.len()) {
            let score = self.scores[idx];
            if score < threshold {
                continue;
            }
            let (Some(b), Some(k)) = (
                self.bboxes.get(idx * 4..idx * 4 + 4),
                self.kps.get(idx * 10..idx * 10 + 10),
            ) else {
                continue;
            };

            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.to_frame((ax - b[0] * step, ay - b[1] * step));
            let (x2, y2) = letterbox.to_frame((ax + b[2] * step, ay + b[3] * step));
            let landmarks = std::array::from_fn(|i| {
                letterbox.to_frame((ax + k[2 * i] * step, ay + k[2 * i + 1] * step))
            });

            out.push(Detection {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                score,
                landmarks,
            });
        }
        out
    }
}

/// Greedy non-maximum suppression; result is sorted by descending score.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        if kept.iter().all(|k| iou(k, &cand) <= iou_threshold) {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
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
    use image::Rgb;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection {
            x,
            y,
            width: w,
            height: h,
            score,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &det(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 50 overlap over 150 union
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = nms(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            DEFAULT_NMS_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_output_indices() {
        let named: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&named), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numbered: Vec<String> = (400..409).map(|i: u32| i.to_string()).collect();
        assert_eq!(discover_output_indices(&numbered), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 80));
        let (x, y) = lb.to_frame((100.0 * 2.0, 50.0 * 2.0 + 80.0));
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, lb.pad_y as usize + 10, 10]];
        assert!((inside - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-4);
    }

    #[test]
    fn test_decode_single_anchor() {
        // One confident anchor in the first stride-32 cell pair, all offsets 1.
        let grid = 640 / 32;
        let n = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; n];
        scores[ANCHORS_PER_CELL * (grid + 1)] = 0.9; // cell (1, 1)
        let bboxes = vec![1.0; n * 4];
        let kps = vec![0.0; n * 10];
        let head = StrideHead {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let lb = Letterbox::fit(640, 640);
        let dets = head.decode(&lb, DEFAULT_SCORE_THRESHOLD);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(d.landmarks[2], (32.0, 32.0));
    }
}
