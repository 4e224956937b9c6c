use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A feature vector could not be built for an institution, or does not
/// match the schema recorded with the trained models.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum FeatureSchemaError {
    #[error("institution {institution_id}: missing required column '{column}'")]
    MissingColumn {
        institution_id: String,
        column: String,
    },

    #[error("institution {institution_id}: {column} value '{value}' was not seen at training time")]
    UnknownCategory {
        institution_id: String,
        column: String,
        value: String,
    },

    #[error("feature vector for {institution_id} does not match the model schema: {detail}")]
    Mismatch {
        institution_id: String,
        detail: String,
    },
}

impl FeatureSchemaError {
    pub fn institution_id(&self) -> &str {
        match self {
            Self::MissingColumn { institution_id, .. }
            | Self::UnknownCategory { institution_id, .. }
            | Self::Mismatch { institution_id, .. } => institution_id,
        }
    }
}

/// Pipeline stage at which a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Features,
    Inference,
    Aggregation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Features => "features",
            Self::Inference => "inference",
            Self::Aggregation => "aggregation",
        })
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum RowErrorReason {
    #[error(transparent)]
    Schema(#[from] FeatureSchemaError),

    #[error("duplicate institution_id")]
    DuplicateId,

    #[error("inference failed: {0}")]
    Inference(String),
}

/// A row-scoped failure. Collected per run, never raised.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("institution {institution_id} skipped at {stage}: {reason}")]
pub struct RowError {
    pub institution_id: String,
    pub stage: Stage,
    pub reason: RowErrorReason,
}

impl RowError {
    pub fn new(institution_id: impl Into<String>, stage: Stage, reason: impl Into<RowErrorReason>) -> Self {
        Self {
            institution_id: institution_id.into(),
            stage,
            reason: reason.into(),
        }
    }

    pub fn schema(stage: Stage, err: FeatureSchemaError) -> Self {
        Self::new(err.institution_id().to_string(), stage, err)
    }
}
