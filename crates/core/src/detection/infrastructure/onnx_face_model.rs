//! YOLO-face model on ONNX Runtime via `ort`.
//!
//! Handles letterbox preprocessing, inference on tokio's blocking pool,
//! confidence filtering and NMS post-processing.
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::detection::domain::face_model::{EstimateFlags, FaceModel, ModelLoader};
use crate::shared::detection::Detection;
use crate::shared::frame::Frame;
use crate::BoxError;

use super::model_resolver::{self, ModelSource};

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Letterbox padding value (YOLO convention: 114 gray).
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Loads [`OnnxFaceModel`] from a resolved model file.
pub struct OnnxModelLoader {
    source: ModelSource,
    confidence: f64,
}

impl OnnxModelLoader {
    pub fn new(source: ModelSource, confidence: f64) -> Self {
        Self { source, confidence }
    }
}

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load(&mut self) -> Result<Box<dyn FaceModel>, BoxError> {
        let source = self.source.clone();
        let confidence = self.confidence;

        let model = tokio::task::spawn_blocking(move || -> Result<OnnxFaceModel, BoxError> {
            let path = model_resolver::resolve(
                &source,
                Some(Box::new(|downloaded: u64, total: u64| {
                    if total > 0 {
                        log::debug!("Model download: {downloaded}/{total} bytes");
                    }
                })),
            )?;
            OnnxFaceModel::from_file(&path, confidence)
        })
        .await??;

        Ok(Box::new(model))
    }
}

/// Face detector backed by a shared ONNX Runtime session.
pub struct OnnxFaceModel {
    session: Arc<Mutex<ort::session::Session>>,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceModel {
    /// The input resolution is read from the model's input shape (NCHW),
    /// falling back to 640 when it is dynamic.
    pub fn from_file(model_path: &Path, confidence: f64) -> Result<Self, BoxError> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded face model {} (input {input_size}x{input_size})",
            model_path.display()
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            confidence,
            input_size,
        })
    }
}

#[async_trait]
impl FaceModel for OnnxFaceModel {
    async fn estimate(
        &mut self,
        frame: &Frame,
        flags: EstimateFlags,
    ) -> Result<Vec<Detection>, BoxError> {
        let (input, letterbox) = letterbox(frame, self.input_size)?;

        let session = Arc::clone(&self.session);
        let (shape, data) =
            tokio::task::spawn_blocking(move || -> Result<(Vec<usize>, Vec<f32>), BoxError> {
                let mut session = session
                    .lock()
                    .map_err(|_| BoxError::from("face model session poisoned"))?;
                run_session(&mut session, input)
            })
            .await??;

        let mut candidates = decode_predictions(&shape, &data, self.confidence, &letterbox)?;
        let kept = nms(&mut candidates, NMS_IOU_THRESH);

        if flags.flip_horizontal {
            Ok(kept.iter().map(|d| d.mirrored(frame.width())).collect())
        } else {
            Ok(kept)
        }
    }
}

fn run_session(
    session: &mut ort::session::Session,
    input: ndarray::Array4<f32>,
) -> Result<(Vec<usize>, Vec<f32>), BoxError> {
    let input_value = ort::value::Tensor::from_array(input)?;
    let outputs = session.run(ort::inputs![input_value])?;
    if outputs.len() == 0 {
        return Err("face model produced no outputs".into());
    }
    let tensor = outputs[0].try_extract_array::<f32>()?;
    Ok((tensor.shape().to_vec(), tensor.iter().copied().collect()))
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Mapping from model-input pixels back to frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size` NCHW float32.
///
/// Only the first three channels are read, so RGBA frames lose alpha here.
fn letterbox(
    frame: &Frame,
    target_size: u32,
) -> Result<(ndarray::Array4<f32>, Letterbox), BoxError> {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let mut tensor = ndarray::Array4::<f32>::from_elem(
        (1, 3, target_size as usize, target_size as usize),
        PAD_VALUE,
    );

    let src = frame
        .as_ndarray()
        .map_err(|e| format!("malformed frame {}: {e}", frame.index()))?;
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbor resize into the padded region
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Ok((
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    ))
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// Parses raw YOLO output rows `[cx, cy, w, h, conf, ...]` into frame-space
/// detections above `confidence`.
///
/// Output may be `[1, features, detections]` (transposed) or
/// `[1, detections, features]`; the smaller axis is taken as features.
fn decode_predictions(
    shape: &[usize],
    data: &[f32],
    confidence: f64,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, BoxError> {
    if shape.len() != 3 {
        return Err(format!("Unexpected face model output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Err(format!("Face model output too small for shape {shape:?}").into());
    }

    let feature = |det: usize, feat: usize| -> f64 {
        let idx = if transposed {
            feat * num_dets + det
        } else {
            det * num_feats + feat
        };
        data[idx] as f64
    };

    let mut detections = Vec::new();
    for i in 0..num_dets {
        let conf = feature(i, 4);
        if conf < confidence {
            continue;
        }
        let (cx, cy, w, h) = (feature(i, 0), feature(i, 1), feature(i, 2), feature(i, 3));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        detections.push(Detection::from_corners(x1, y1, x2, y2).with_score(conf as f32));
    }
    Ok(detections)
}

/// Greedy NMS: sort by score descending, suppress overlapping boxes.
fn nms(dets: &mut [Detection], iou_thresh: f64) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in dets.iter() {
        if keep.iter().all(|k| k.iou(det) <= iou_thresh) {
            keep.push(det.clone());
        }
    }
    keep
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
