//! ONNX Runtime evaluator for exported regressors and classifiers.
//!
//! Input is a single `[1, n_features]` f32 tensor. Regressors read the first
//! output; classifiers read class probabilities from the last output.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::error::{InferenceError, ModelLoadError};
use crate::models::{Classifier, Regressor, argmax};

/// A loaded ONNX model. `Session::run` needs exclusive access, so the
/// session sits behind a mutex for use from the rayon pool.
pub struct OnnxModel {
    session: Mutex<Session>,
    input_name: String,
    n_features: usize,
    n_classes: usize,
}

impl OnnxModel {
    /// Load a model from `path`. `n_classes` is 1 for regressors.
    pub fn load(path: &Path, n_features: usize, n_classes: usize) -> Result<Self, ModelLoadError> {
        let artifact = path.display().to_string();
        let session = Session::builder()
            .map_err(|e| onnx_error(&artifact, e))?
            .commit_from_file(path)
            .map_err(|e| onnx_error(&artifact, e))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| ModelLoadError::invalid(&artifact, "model has no inputs"))?;

        info!(model = %artifact, n_features, n_classes, "loaded ONNX model");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            n_features,
            n_classes,
        })
    }

    fn run(&self, features: &[f64], output: Output) -> Result<Vec<f32>, InferenceError> {
        if features.len() != self.n_features {
            return Err(InferenceError::Arity {
                expected: self.n_features,
                got: features.len(),
            });
        }
        let input: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        let shape = [1_i64, self.n_features as i64];
        let tensor = Tensor::from_array((shape, input.into_boxed_slice())).map_err(runtime)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Runtime("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(runtime)?;

        let index = match output {
            Output::First => 0,
            Output::Last => outputs.len().saturating_sub(1),
        };
        let (_, data) = outputs[index].try_extract_tensor::<f32>().map_err(runtime)?;
        Ok(data.to_vec())
    }
}

fn onnx_error(artifact: &str, e: impl fmt::Display) -> ModelLoadError {
    ModelLoadError::Onnx {
        artifact: artifact.to_string(),
        detail: e.to_string(),
    }
}

fn runtime(e: impl fmt::Display) -> InferenceError {
    InferenceError::Runtime(e.to_string())
}

#[derive(Clone, Copy)]
enum Output {
    First,
    Last,
}

impl Regressor for OnnxModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError> {
        let data = self.run(features, Output::First)?;
        data.first()
            .map(|v| f64::from(*v))
            .ok_or_else(|| InferenceError::Runtime("empty output tensor".into()))
    }
}

impl Classifier for OnnxModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_class(&self, features: &[f64]) -> Result<usize, InferenceError> {
        let data = self.run(features, Output::Last)?;
        if data.len() != self.n_classes {
            return Err(InferenceError::Runtime(format!(
                "expected {} class probabilities, got {}",
                self.n_classes,
                data.len()
            )));
        }
        let probs: Vec<f64> = data.iter().map(|v| f64::from(*v)).collect();
        Ok(argmax(&probs))
    }
}
