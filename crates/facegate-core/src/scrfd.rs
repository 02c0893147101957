//! SCRFD face detector via ONNX Runtime.
//!
//! SCRFD (Sample and Computation Redistribution for Efficient Face Detection)
//! with 3-stride anchor-free decoding and NMS post-processing. Coordinates
//! are returned in the space of the image passed to [`Scrfd::detect`].

use crate::detector::{open_session, DetectorError, DetectorOptions, ModelLoadError};
use crate::types::{FaceRegion, Point, Rect};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_MODEL: &str = "scrfd";

/// Letterbox placement of the source image inside the square input.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

pub(crate) struct Scrfd {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32], discovered at load.
    stride_indices: [StrideOutputIndices; 3],
}

impl Scrfd {
    pub(crate) fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let session = open_session(SCRFD_MODEL, path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 9 {
            return Err(ModelLoadError::Invalid {
                model: SCRFD_MODEL,
                reason: format!(
                    "requires 9 outputs (3 strides × score/bbox/kps), got {}",
                    output_names.len()
                ),
            });
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, returning regions with keypoints sorted by confidence.
    pub(crate) fn detect(
        &mut self,
        image: &RgbImage,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        let input_size = options.input_size as usize;
        let (input, letterbox) = preprocess(image, input_size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                input_size,
                &letterbox,
                options.score_threshold,
            ));
        }

        let mut result = nms(all_detections, options.nms_threshold);
        sort_by_confidence(&mut result);
        Ok(result)
    }
}

/// Letterbox an RGB image into a square NCHW tensor, normalized to the SCRFD
/// input distribution. Padding uses the mean, which normalizes to 0.0.
fn preprocess(image: &RgbImage, input_size: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let scale = (input_size as f32 / width).min(input_size as f32 / height);

    let new_w = ((width * scale).round() as usize).clamp(1, input_size);
    let new_h = ((height * scale).round() as usize).clamp(1, input_size);
    let pad_x = (input_size - new_w) as f32 / 2.0;
    let pad_y = (input_size - new_h) as f32 / 2.0;

    let resized = if new_w == image.width() as usize && new_h == image.height() as usize {
        image.clone()
    } else {
        imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle)
    };

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x_start;
        let ty = y as usize + pad_y_start;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (
        tensor,
        LetterboxInfo {
            scale,
            pad_x: pad_x_start as f32,
            pad_y: pad_y_start as f32,
        },
    )
}

/// Discover output tensor ordering by name.
///
/// Exports may name tensors `score_8`, `bbox_16`, `kps_32`, ... or use generic
/// numeric names. Falls back to the standard positional ordering:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };
    let lookup = |stride: usize| -> Option<StrideOutputIndices> {
        Some((
            find("score", stride)?,
            find("bbox", stride)?,
            find("kps", stride)?,
        ))
    };

    match (
        lookup(SCRFD_STRIDES[0]),
        lookup(SCRFD_STRIDES[1]),
        lookup(SCRFD_STRIDES[2]),
    ) {
        (Some(s8), Some(s16), Some(s32)) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [s8, s16, s32]
        }
        _ => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unletterbox = |x: f32, y: f32| -> Point {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * s;
        let anchor_cy = (anchor_idx / grid) as f32 * s;

        // bbox: [left, top, right, bottom] distances in stride units
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = unletterbox(
            anchor_cx - bboxes[bbox_off] * s,
            anchor_cy - bboxes[bbox_off + 1] * s,
        );
        let (x2, y2) = unletterbox(
            anchor_cx + bboxes[bbox_off + 2] * s,
            anchor_cy + bboxes[bbox_off + 3] * s,
        );

        let kps_off = idx * 10;
        let keypoints = (kps_off + 9 < kps.len()).then(|| {
            std::array::from_fn(|i| {
                unletterbox(
                    anchor_cx + kps[kps_off + i * 2] * s,
                    anchor_cy + kps[kps_off + i * 2 + 1] * s,
                )
            })
        });

        let mut region = FaceRegion::new(Rect::new(x1, y1, x2 - x1, y2 - y1), score);
        region.keypoints = keypoints;
        detections.push(region);
    }

    detections
}

fn sort_by_confidence(regions: &mut [FaceRegion]) {
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    sort_by_confidence(&mut detections);

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in detections {
        if keep
            .iter()
            .all(|k| k.bounds.iou(&candidate.bounds) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}
