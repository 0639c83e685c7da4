//! ONNX Runtime inference engine

use super::{InferenceEngine, InputTensor, OutputTensor, TensorData};
use crate::error::VisionError;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

pub struct OnnxEngine {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
}

impl OnnxEngine {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::Model(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .map_err(|e| VisionError::Ort(format!("Failed to load model: {}", e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| VisionError::Model("Model declares no inputs".to_string()))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "ONNX model loaded from {:?} (input {}, {} outputs)",
            model_path,
            input_name,
            output_names.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_names,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn run(&self, input: &InputTensor) -> Result<Vec<OutputTensor>, VisionError> {
        let shape: Vec<i64> = input.shape.iter().map(|&d| d as i64).collect();
        let value = match &input.data {
            TensorData::F32(data) => {
                Value::from_array((shape.as_slice(), data.clone().into_boxed_slice()))?.into_dyn()
            }
            TensorData::U8(data) => {
                Value::from_array((shape.as_slice(), data.clone().into_boxed_slice()))?.into_dyn()
            }
        };

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![self.input_name.as_str() => value])?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let Some(output) = outputs.get(name.as_str()) else {
                continue;
            };
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            tensors.push(OutputTensor::new(
                name.clone(),
                shape.iter().map(|&d| d.max(0) as usize).collect(),
                data.to_vec(),
            ));
        }

        debug!("ONNX inference produced {} outputs", tensors.len());
        Ok(tensors)
    }
}
