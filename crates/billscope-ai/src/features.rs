//! Feature vector construction.
//!
//! A [`FeatureSchema`] is the ordered list of feature names recorded with the
//! trained models. Each name parses into a [`FeatureTerm`] describing where its
//! value comes from:
//!
//! - `funding_change_pct`, `min_wage_change`, ...: policy parameters, null as 0
//! - `enrollment`, `baseline_tuition`, ...: institution columns (aliases resolved)
//! - `high_risk_institution`, `minority_serving`, `small_enrollment`: binary flags
//! - `state_encoded`, `institution_type_encoded`: label-encoded categoricals
//! - `institution_type_is_public`: one-hot indicators
//! - `a_x_b`: product of two terms, computed from unscaled values
//!
//! The scaler, when present, is applied to the whole vector after assembly.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use billscope_core::{
    FeatureSchemaError, InstitutionRecord, PolicyField, PolicyParameters, canonical_column,
};

use crate::error::ModelLoadError;
use crate::preprocessing::{Categorical, FlagThresholds, Preprocessing};

// ── Terms ──

/// Binary indicator derived from institution columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    HighRiskInstitution,
    MinorityServing,
    SmallEnrollment,
}

impl FlagKind {
    pub const ALL: [FlagKind; 3] = [
        Self::HighRiskInstitution,
        Self::MinorityServing,
        Self::SmallEnrollment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighRiskInstitution => "high_risk_institution",
            Self::MinorityServing => "minority_serving",
            Self::SmallEnrollment => "small_enrollment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Master-table columns the flag reads.
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            Self::HighRiskInstitution => &["pct_low_income", "grad_rate"],
            Self::MinorityServing => &["pct_minority"],
            Self::SmallEnrollment => &["enrollment"],
        }
    }

    fn evaluate(
        &self,
        thresholds: &FlagThresholds,
        institution: &InstitutionRecord,
    ) -> Result<bool, FeatureSchemaError> {
        let col = |name: &str| column(institution, name);
        Ok(match self {
            Self::HighRiskInstitution => {
                col("pct_low_income")? > thresholds.high_risk_low_income_pct
                    && col("grad_rate")? < thresholds.high_risk_grad_rate_pct
            }
            Self::MinorityServing => col("pct_minority")? > thresholds.minority_serving_pct,
            Self::SmallEnrollment => col("enrollment")? < thresholds.small_enrollment,
        })
    }
}

/// Where one feature's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureTerm {
    Policy(PolicyField),
    Column(String),
    Flag(FlagKind),
    Encoded(Categorical),
    Indicator(Categorical, String),
    Interaction(Box<FeatureTerm>, Box<FeatureTerm>),
}

impl FeatureTerm {
    /// Parse a training-time feature name.
    pub fn parse(name: &str) -> Self {
        if let Some((left, right)) = name.split_once("_x_") {
            return Self::Interaction(Box::new(Self::parse(left)), Box::new(Self::parse(right)));
        }
        if let Some(cat) = name.strip_suffix("_encoded").and_then(Categorical::from_name) {
            return Self::Encoded(cat);
        }
        for cat in Categorical::ALL {
            if let Some(value) = name
                .strip_prefix(cat.as_str())
                .and_then(|rest| rest.strip_prefix("_is_"))
            {
                return Self::Indicator(cat, value.to_string());
            }
        }
        if let Some(flag) = FlagKind::from_name(name) {
            return Self::Flag(flag);
        }
        if let Some(field) = PolicyField::from_name(name) {
            return Self::Policy(field);
        }
        Self::Column(name.to_string())
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Policy(_) => {}
            Self::Column(name) => {
                out.insert(canonical_column(name).to_string());
            }
            Self::Flag(flag) => out.extend(flag.inputs().iter().map(|c| c.to_string())),
            Self::Encoded(cat) | Self::Indicator(cat, _) => {
                out.insert(cat.as_str().to_string());
            }
            Self::Interaction(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
        }
    }

    fn categoricals(&self, out: &mut Vec<Categorical>) {
        match self {
            Self::Encoded(cat) => out.push(*cat),
            Self::Interaction(a, b) => {
                a.categoricals(out);
                b.categoricals(out);
            }
            _ => {}
        }
    }

    fn evaluate(
        &self,
        params: &PolicyParameters,
        institution: &InstitutionRecord,
        pre: &Preprocessing,
    ) -> Result<f64, FeatureSchemaError> {
        match self {
            Self::Policy(field) => Ok(params.field(*field).unwrap_or(0.0)),
            Self::Column(name) => column(institution, name),
            Self::Flag(flag) => Ok(indicator(flag.evaluate(&pre.flags, institution)?)),
            Self::Encoded(cat) => encode(pre, *cat, institution),
            Self::Indicator(cat, value) => {
                Ok(indicator(cat.canonical_value(institution).eq_ignore_ascii_case(value)))
            }
            Self::Interaction(a, b) => {
                Ok(a.evaluate(params, institution, pre)? * b.evaluate(params, institution, pre)?)
            }
        }
    }
}

impl fmt::Display for FeatureTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(field) => f.write_str(field.as_str()),
            Self::Column(name) => f.write_str(name),
            Self::Flag(flag) => f.write_str(flag.as_str()),
            Self::Encoded(cat) => write!(f, "{cat}_encoded"),
            Self::Indicator(cat, value) => write!(f, "{cat}_is_{value}"),
            Self::Interaction(a, b) => write!(f, "{a}_x_{b}"),
        }
    }
}

fn indicator(on: bool) -> f64 {
    if on { 1.0 } else { 0.0 }
}

fn column(institution: &InstitutionRecord, name: &str) -> Result<f64, FeatureSchemaError> {
    institution
        .numeric(name)
        .filter(|v| v.is_finite())
        .ok_or_else(|| FeatureSchemaError::MissingColumn {
            institution_id: institution.institution_id.clone(),
            column: canonical_column(name).to_string(),
        })
}

/// Raw trimmed value first, then the canonical form.
fn encode(
    pre: &Preprocessing,
    cat: Categorical,
    institution: &InstitutionRecord,
) -> Result<f64, FeatureSchemaError> {
    let raw = cat.raw_value(institution);
    let unknown = || FeatureSchemaError::UnknownCategory {
        institution_id: institution.institution_id.clone(),
        column: cat.as_str().to_string(),
        value: raw.to_string(),
    };
    if raw.is_empty() {
        return Err(FeatureSchemaError::MissingColumn {
            institution_id: institution.institution_id.clone(),
            column: cat.as_str().to_string(),
        });
    }
    let encoder = pre.encoder(cat).ok_or_else(unknown)?;
    encoder
        .encode(raw)
        .or_else(|| encoder.encode(&cat.canonical_value(institution)))
        .map(|code| code as f64)
        .ok_or_else(unknown)
}

// ── Schema ──

/// Ordered feature names plus the preprocessing recorded at training time.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    names: Arc<[String]>,
    terms: Vec<FeatureTerm>,
    preprocessing: Preprocessing,
}

impl FeatureSchema {
    /// Parse every feature name and check the preprocessing covers them.
    pub fn new(names: Vec<String>, preprocessing: Preprocessing) -> Result<Self, ModelLoadError> {
        if names.is_empty() {
            return Err(ModelLoadError::invalid("feature schema", "no features"));
        }
        let mut seen = BTreeSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ModelLoadError::invalid(
                    "feature schema",
                    format!("duplicate feature '{name}'"),
                ));
            }
        }
        preprocessing.scaler.validate(names.len())?;

        let terms: Vec<FeatureTerm> = names.iter().map(|n| FeatureTerm::parse(n)).collect();
        for term in &terms {
            let mut cats = Vec::new();
            term.categoricals(&mut cats);
            if let Some(cat) = cats.into_iter().find(|c| preprocessing.encoder(*c).is_none()) {
                return Err(ModelLoadError::invalid(
                    "feature schema",
                    format!("feature '{term}' has no encoder for {cat}"),
                ));
            }
        }

        Ok(Self {
            names: names.into(),
            terms,
            preprocessing,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn terms(&self) -> &[FeatureTerm] {
        &self.terms
    }

    pub fn preprocessing(&self) -> &Preprocessing {
        &self.preprocessing
    }

    /// Master-table columns the schema reads, canonical names, sorted.
    pub fn required_columns(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        for term in &self.terms {
            term.collect_columns(&mut out);
        }
        out.into_iter().collect()
    }

    /// Required columns absent from a table's column list. Aliases in
    /// `present` are resolved before comparing.
    pub fn validate_columns<S: AsRef<str>>(&self, present: &[S]) -> Vec<String> {
        let present: BTreeSet<&str> = present
            .iter()
            .map(|c| canonical_column(c.as_ref()))
            .collect();
        self.required_columns()
            .into_iter()
            .filter(|c| !present.contains(c.as_str()))
            .collect()
    }

    /// Assemble, then scale, the feature vector for one institution.
    pub fn build(
        &self,
        params: &PolicyParameters,
        institution: &InstitutionRecord,
    ) -> Result<FeatureVector, FeatureSchemaError> {
        let mut values = self
            .terms
            .iter()
            .map(|t| t.evaluate(params, institution, &self.preprocessing))
            .collect::<Result<Vec<f64>, _>>()?;
        self.preprocessing.scaler.transform(&mut values);
        Ok(FeatureVector {
            institution_id: institution.institution_id.clone(),
            names: Arc::clone(&self.names),
            values,
        })
    }
}

/// Build the feature vector for `institution` under `schema`.
pub fn build(
    params: &PolicyParameters,
    institution: &InstitutionRecord,
    schema: &FeatureSchema,
) -> Result<FeatureVector, FeatureSchemaError> {
    schema.build(params, institution)
}

// ── Vector ──

/// Ordered feature values for one institution, carrying the names they
/// were built against.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    institution_id: String,
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Pair names with values. Lengths must agree.
    pub fn new(
        institution_id: impl Into<String>,
        names: impl Into<Arc<[String]>>,
        values: Vec<f64>,
    ) -> Result<Self, FeatureSchemaError> {
        let institution_id = institution_id.into();
        let names = names.into();
        if names.len() != values.len() {
            return Err(FeatureSchemaError::Mismatch {
                institution_id,
                detail: format!("{} names for {} values", names.len(), values.len()),
            });
        }
        Ok(Self {
            institution_id,
            names,
            values,
        })
    }

    pub fn institution_id(&self) -> &str {
        &self.institution_id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Check the vector against a schema: same names, same order.
    pub fn check(&self, schema: &FeatureSchema) -> Result<(), FeatureSchemaError> {
        if Arc::ptr_eq(&self.names, &schema.names) {
            return Ok(());
        }
        let mismatch = |detail: String| FeatureSchemaError::Mismatch {
            institution_id: self.institution_id.clone(),
            detail,
        };
        if self.names.len() != schema.len() {
            return Err(mismatch(format!(
                "expected {} features, got {}",
                schema.len(),
                self.names.len()
            )));
        }
        if let Some((i, (got, want))) = self
            .names
            .iter()
            .zip(schema.names())
            .enumerate()
            .find(|(_, (got, want))| got != want)
        {
            return Err(mismatch(format!("feature {i} is '{got}', expected '{want}'")));
        }
        Ok(())
    }
}
