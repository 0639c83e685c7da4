//! Darknet/YOLO-style detector

use super::{DetectedObject, Detector, InferenceEngine, InputTensor, Labels, OutputTensor, TensorData};
use crate::config::DetectorConfig;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::roi::Roi;
use crate::utils::{non_max_suppression, resize_frame, rgb_to_chw};
use drivethru_core::BoundingBox;
use std::sync::Arc;
use tracing::debug;

/// YOLO detector over an arbitrary inference engine.
///
/// Input is the frame resized to `input_size`, planar float in `[0, 1]`.
/// Output rows are `[cx, cy, w, h, (objectness), class scores...]`, either
/// normalized or in input pixels; both layouts `[1, N, C]` and `[1, C, N]`
/// are accepted.
pub struct ClassicDetector {
    engine: Arc<dyn InferenceEngine>,
    input_size: (u32, u32),
    nms_threshold: f32,
    labels: Labels,
}

impl ClassicDetector {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: &DetectorConfig) -> Self {
        Self {
            engine,
            input_size: config.input_size,
            nms_threshold: config.nms_threshold,
            labels: Labels::from_config(config.labels.as_ref()),
        }
    }

    fn preprocess(&self, frame: &Frame) -> Result<InputTensor, VisionError> {
        let (w, h) = self.input_size;
        let resized = resize_frame(frame, w, h)?;
        Ok(InputTensor {
            shape: vec![1, 3, h as usize, w as usize],
            data: TensorData::F32(rgb_to_chw(&resized)),
        })
    }

    fn postprocess(
        &self,
        outputs: &[OutputTensor],
        frame: &Frame,
        confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let output = outputs
            .first()
            .ok_or_else(|| VisionError::Model("YOLO model produced no outputs".to_string()))?;

        let (a, b) = match output.shape.as_slice() {
            [.., a, b] => (*a, *b),
            _ => {
                return Err(VisionError::Model(format!(
                    "Unexpected YOLO output shape {:?}",
                    output.shape
                )))
            }
        };
        if a == 0 || b == 0 {
            return Ok(Vec::new());
        }

        // One axis holds 4 box values plus the class scores
        let row_width = |c: usize| c == self.labels.len() + 4 || c == self.labels.len() + 5;
        let (rows, cols, transposed) = if row_width(b) {
            (a, b, false)
        } else if row_width(a) || (a < b && a >= 5) {
            (b, a, true)
        } else {
            (a, b, false)
        };

        if cols < 5 {
            return Err(VisionError::Model(format!(
                "YOLO output rows too short ({} values)",
                cols
            )));
        }
        if output.data.len() < rows * cols {
            return Err(VisionError::Model(format!(
                "YOLO output holds {} values, shape {:?} needs {}",
                output.data.len(),
                output.shape,
                rows * cols
            )));
        }

        let class_offset = if cols == self.labels.len() + 5 { 5 } else { 4 };
        let value = |row: usize, col: usize| -> f32 {
            if transposed {
                output.data[col * rows + row]
            } else {
                output.data[row * cols + col]
            }
        };

        let (frame_w, frame_h) = (frame.width as f32, frame.height as f32);
        let (input_w, input_h) = (self.input_size.0 as f32, self.input_size.1 as f32);

        let mut detections = Vec::new();
        for row in 0..rows {
            let mut best_class = 0;
            let mut best_score = f32::MIN;
            for col in class_offset..cols {
                let score = value(row, col);
                if score > best_score {
                    best_score = score;
                    best_class = col - class_offset;
                }
            }

            if !best_score.is_finite() || best_score <= confidence {
                continue;
            }

            let (mut cx, mut cy, mut w, mut h) =
                (value(row, 0), value(row, 1), value(row, 2), value(row, 3));
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }

            // Pixel coordinates relative to the network input
            if cx.max(cy).max(w).max(h) > 2.0 {
                cx /= input_w;
                cy /= input_h;
                w /= input_w;
                h /= input_h;
            }

            let x_min = ((cx - w / 2.0) * frame_w).max(0.0);
            let y_min = ((cy - h / 2.0) * frame_h).max(0.0);
            let x_max = ((cx + w / 2.0) * frame_w).min(frame_w);
            let y_max = ((cy + h / 2.0) * frame_h).min(frame_h);
            if x_max <= x_min || y_max <= y_min {
                continue;
            }

            detections.push(DetectedObject {
                bbox: BoundingBox::from_corners(x_min, y_min, x_max, y_max),
                class_id: best_class,
                class_name: self.labels.name(best_class),
                confidence: best_score,
            });
        }

        Ok(non_max_suppression(detections, self.nms_threshold))
    }
}

impl Detector for ClassicDetector {
    fn name(&self) -> &str {
        "classic"
    }

    fn detect(
        &self,
        frame: &Frame,
        _roi: Option<&Roi>,
        confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let input = self.preprocess(frame)?;
        let outputs = self.engine.run(&input)?;
        let detections = self.postprocess(&outputs, frame, confidence)?;
        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }
}
