//! SSD-style detector for quantized edge-accelerator models

use super::{DetectedObject, Detector, InferenceEngine, InputTensor, Labels, OutputTensor, TensorData};
use crate::config::DetectorConfig;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::roi::Roi;
use crate::utils::resize_frame;
use drivethru_core::BoundingBox;
use std::sync::Arc;
use tracing::debug;

/// Detector for models with a built-in SSD postprocess.
///
/// Input is `[1, H, W, 3]` u8. Outputs are boxes `[N, 4]` as normalized
/// `(ymin, xmin, ymax, xmax)`, class ids `[N]`, scores `[N]` and optionally
/// the valid detection count. Outputs are matched by name when the names say
/// what they are, by position otherwise.
pub struct EdgeDetector {
    engine: Arc<dyn InferenceEngine>,
    input_size: (u32, u32),
    labels: Labels,
}

struct SsdOutputs<'a> {
    boxes: &'a OutputTensor,
    classes: &'a OutputTensor,
    scores: &'a OutputTensor,
    count: Option<&'a OutputTensor>,
}

impl EdgeDetector {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: &DetectorConfig) -> Self {
        Self {
            engine,
            input_size: config.input_size,
            labels: Labels::from_config(config.labels.as_ref()),
        }
    }

    fn preprocess(&self, frame: &Frame) -> Result<InputTensor, VisionError> {
        let (w, h) = self.input_size;
        let resized = resize_frame(frame, w, h)?;
        Ok(InputTensor {
            shape: vec![1, h as usize, w as usize, 3],
            data: TensorData::U8(resized.into_raw()),
        })
    }

    fn split_outputs(outputs: &[OutputTensor]) -> Result<SsdOutputs<'_>, VisionError> {
        let find = |needle: &str| {
            outputs
                .iter()
                .find(|o| o.name.to_ascii_lowercase().contains(needle))
        };

        if let (Some(boxes), Some(classes), Some(scores)) =
            (find("box"), find("class"), find("score"))
        {
            return Ok(SsdOutputs {
                boxes,
                classes,
                scores,
                count: find("num").or_else(|| find("count")),
            });
        }

        match outputs {
            [boxes, classes, scores, rest @ ..] => Ok(SsdOutputs {
                boxes,
                classes,
                scores,
                count: rest.first(),
            }),
            _ => Err(VisionError::Model(format!(
                "SSD model must produce at least 3 outputs, got {}",
                outputs.len()
            ))),
        }
    }

    fn postprocess(
        &self,
        outputs: &[OutputTensor],
        frame: &Frame,
        confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let ssd = Self::split_outputs(outputs)?;

        let mut n = ssd
            .scores
            .data
            .len()
            .min(ssd.classes.data.len())
            .min(ssd.boxes.data.len() / 4);
        if let Some(count) = ssd.count.and_then(|c| c.data.first()) {
            if count.is_finite() && *count >= 0.0 {
                n = n.min(*count as usize);
            }
        }

        let (frame_w, frame_h) = (frame.width as f32, frame.height as f32);
        let mut detections = Vec::new();
        for i in 0..n {
            let score = ssd.scores.data[i];
            if !score.is_finite() || score <= confidence {
                continue;
            }

            let class_raw = ssd.classes.data[i];
            if !class_raw.is_finite() || class_raw < 0.0 {
                continue;
            }
            let class_id = class_raw as usize;

            let b = &ssd.boxes.data[i * 4..i * 4 + 4];
            let (ymin, xmin, ymax, xmax) = (
                b[0].clamp(0.0, 1.0),
                b[1].clamp(0.0, 1.0),
                b[2].clamp(0.0, 1.0),
                b[3].clamp(0.0, 1.0),
            );

            detections.push(DetectedObject {
                bbox: BoundingBox::from_corners(
                    xmin * frame_w,
                    ymin * frame_h,
                    xmax * frame_w,
                    ymax * frame_h,
                ),
                class_id,
                class_name: self.labels.name(class_id),
                confidence: score,
            });
        }

        Ok(detections)
    }
}

impl Detector for EdgeDetector {
    fn name(&self) -> &str {
        "edge"
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
        debug!("SSD detected {} objects", detections.len());
        Ok(detections)
    }
}
