//! Impact inference: feature reconstruction, the four-model ensemble, and
//! equity-aware aggregation.

pub mod aggregate;
pub mod ensemble;
mod error;
pub mod features;
pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
mod pipeline;
pub mod preprocessing;

pub use aggregate::{Aggregation, ImpactFilters, aggregate, filter_institutions};
pub use ensemble::{Manifest, ModelBundle, ModelSlot};
pub use error::{ImpactError, InferenceError, ModelLoadError};
pub use features::{FeatureSchema, FeatureTerm, FeatureVector};
pub use models::{Classifier, Regressor};
pub use pipeline::{ImpactReport, predict_impact};
