//! Encoders, scaler and flag thresholds persisted with the trained models.

use std::collections::BTreeMap;
use std::fmt;

use billscope_core::{InstitutionRecord, normalize_institution_type};
use serde::{Deserialize, Serialize};

use crate::error::ModelLoadError;

/// Categorical institution columns the models were trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Categorical {
    State,
    InstitutionType,
}

impl Categorical {
    pub const ALL: [Categorical; 2] = [Self::State, Self::InstitutionType];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::InstitutionType => "institution_type",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Raw (trimmed) value of this column for an institution.
    pub fn raw_value<'a>(&self, institution: &'a InstitutionRecord) -> &'a str {
        match self {
            Self::State => institution.state.trim(),
            Self::InstitutionType => institution.institution_type.trim(),
        }
    }

    /// Canonical value: upper-case state code, canonical type tag.
    pub fn canonical_value(&self, institution: &InstitutionRecord) -> String {
        match self {
            Self::State => institution.state.trim().to_ascii_uppercase(),
            Self::InstitutionType => normalize_institution_type(&institution.institution_type),
        }
    }
}

impl fmt::Display for Categorical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label encoder: a value's code is its index in the sorted class list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self, ModelLoadError> {
        if classes.is_empty() {
            return Err(ModelLoadError::invalid("label encoder", "no classes"));
        }
        if !classes.windows(2).all(|w| w[0] < w[1]) {
            return Err(ModelLoadError::invalid(
                "label encoder",
                "classes must be sorted and unique",
            ));
        }
        Ok(Self { classes })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, value: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(value)).ok()
    }
}

/// Standard scaler over the full feature vector: `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn identity(n_features: usize) -> Self {
        Self {
            mean: vec![0.0; n_features],
            scale: vec![1.0; n_features],
        }
    }

    pub(crate) fn validate(&self, n_features: usize) -> Result<(), ModelLoadError> {
        if self.mean.len() != n_features || self.scale.len() != n_features {
            return Err(ModelLoadError::invalid(
                "scaler",
                format!(
                    "expected {n_features} means and scales, got {} and {}",
                    self.mean.len(),
                    self.scale.len()
                ),
            ));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err(ModelLoadError::invalid("scaler", "non-finite parameter"));
        }
        Ok(())
    }

    pub fn transform(&self, values: &mut [f64]) {
        for ((v, mean), scale) in values.iter_mut().zip(&self.mean).zip(&self.scale) {
            // Constant training columns have zero scale.
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            *v = (*v - mean) / scale;
        }
    }
}

/// Thresholds behind the binary risk flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagThresholds {
    /// High-risk requires `pct_low_income` above this...
    pub high_risk_low_income_pct: f64,
    /// ...and `grad_rate` below this.
    pub high_risk_grad_rate_pct: f64,
    pub minority_serving_pct: f64,
    pub small_enrollment: f64,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            high_risk_low_income_pct: 50.0,
            high_risk_grad_rate_pct: 50.0,
            minority_serving_pct: 50.0,
            small_enrollment: 2_000.0,
        }
    }
}

/// Everything applied to raw values between policy/institution input and
/// the model: encoders, scaler, flag thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessing {
    pub encoders: BTreeMap<Categorical, LabelEncoder>,
    pub scaler: StandardScaler,
    pub flags: FlagThresholds,
}

impl Preprocessing {
    pub fn encoder(&self, column: Categorical) -> Option<&LabelEncoder> {
        self.encoders.get(&column)
    }
}
