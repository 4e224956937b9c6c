use std::path::PathBuf;

use billscope_core::FeatureSchemaError;
use thiserror::Error;

/// A model artifact or the bundle manifest could not be loaded.
///
/// Fatal: the run aborts before any institution is processed.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("{artifact} not found in {dir}")]
    Missing { artifact: String, dir: PathBuf },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {artifact}: {detail}")]
    Invalid { artifact: String, detail: String },

    #[error("ONNX runtime error in {artifact}: {detail}")]
    Onnx { artifact: String, detail: String },
}

impl ModelLoadError {
    pub(crate) fn invalid(artifact: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Invalid {
            artifact: artifact.into(),
            detail: detail.into(),
        }
    }
}

/// A single model evaluation failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("model expects {expected} features, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("{model} produced a non-finite output")]
    NonFinite { model: &'static str },

    #[error("class index {index} has no equity label")]
    UnknownClass { index: usize },

    #[error("runtime: {0}")]
    Runtime(String),
}

/// Run-level failure of impact prediction.
#[derive(Debug, Error)]
pub enum ImpactError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// A feature vector does not match the bundle schema. Never padded or
    /// truncated; the whole run stops.
    #[error(transparent)]
    SchemaMismatch(FeatureSchemaError),

    /// Row-scoped: the pipeline records it and continues.
    #[error("inference failed for {institution_id}: {source}")]
    Inference {
        institution_id: String,
        source: InferenceError,
    },
}
