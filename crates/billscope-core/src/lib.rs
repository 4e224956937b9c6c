pub mod config;
pub mod error;
pub mod institution;
pub mod policy;
pub mod prediction;
pub mod schema;

pub use config::{
    ConfigError, EquityOverrideConfig, ExtractionConfig, ImpactConfig, LlmConfig, PipelineConfig,
};
pub use error::{FeatureSchemaError, RowError, RowErrorReason, Stage};
pub use institution::{InstitutionRecord, canonical_column};
pub use policy::{ExtractionMethod, PolicyField, PolicyParameters, normalize_institution_type};
pub use prediction::{
    BatchSummary, EquityOverride, EquityRiskClass, PredictionResult, RawPrediction,
};
pub use schema::impact;
