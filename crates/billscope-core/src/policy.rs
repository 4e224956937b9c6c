//! Policy parameters extracted from a bill.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical institution-type tags.
pub const PUBLIC: &str = "public";
pub const PRIVATE: &str = "private";
pub const COMMUNITY: &str = "community";

/// How a [`PolicyParameters`] record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    /// Rule engine only.
    #[serde(rename = "rule")]
    Rule,
    /// The rule engine found nothing numeric; every value came from the language model.
    #[serde(rename = "llm")]
    Llm,
    /// Rule values, with null fields filled by the language model.
    #[serde(rename = "rule+llm")]
    RuleLlm,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Llm => "llm",
            Self::RuleLlm => "rule+llm",
        }
    }

    /// Whether an external language-model call contributed to the record.
    pub fn used_external_service(&self) -> bool {
        !matches!(self, Self::Rule)
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four quantitative provisions a bill can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyField {
    FundingChangePct,
    MinWageChange,
    ChildcareSubsidy,
    TuitionCapPct,
}

impl PolicyField {
    pub const ALL: [PolicyField; 4] = [
        Self::FundingChangePct,
        Self::MinWageChange,
        Self::ChildcareSubsidy,
        Self::TuitionCapPct,
    ];

    /// Column name used in the training-time feature schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FundingChangePct => "funding_change_pct",
            Self::MinWageChange => "min_wage_change",
            Self::ChildcareSubsidy => "childcare_subsidy",
            Self::TuitionCapPct => "tuition_cap_pct",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for PolicyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured, confidence-scored representation of a bill's quantitative provisions.
///
/// Created once per run and shared read-only by every per-institution step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyParameters {
    /// Signed percentage change in state funding (negative = cut).
    pub funding_change_pct: Option<f64>,
    /// Minimum-wage delta in dollars per hour.
    pub min_wage_change: Option<f64>,
    /// Childcare subsidy in dollars per year.
    pub childcare_subsidy: Option<f64>,
    /// Cap on tuition increases, in percent.
    pub tuition_cap_pct: Option<f64>,
    /// Canonical institution-type tags. Empty means every type is affected.
    pub affected_institution_types: BTreeSet<String>,
    /// Extraction reliability in `[0, 1]`.
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
    /// Leading slice of the normalized bill text, for summaries.
    #[serde(default)]
    pub text_sample: String,
}

impl Default for PolicyParameters {
    fn default() -> Self {
        Self::empty()
    }
}

impl PolicyParameters {
    /// Zero-confidence record with every optional field null.
    pub fn empty() -> Self {
        Self {
            funding_change_pct: None,
            min_wage_change: None,
            childcare_subsidy: None,
            tuition_cap_pct: None,
            affected_institution_types: BTreeSet::new(),
            confidence: 0.0,
            extraction_method: ExtractionMethod::Rule,
            text_sample: String::new(),
        }
    }

    /// Set the confidence, clamped to `[0, 1]`.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn field(&self, field: PolicyField) -> Option<f64> {
        match field {
            PolicyField::FundingChangePct => self.funding_change_pct,
            PolicyField::MinWageChange => self.min_wage_change,
            PolicyField::ChildcareSubsidy => self.childcare_subsidy,
            PolicyField::TuitionCapPct => self.tuition_cap_pct,
        }
    }

    pub fn set_field(&mut self, field: PolicyField, value: Option<f64>) {
        match field {
            PolicyField::FundingChangePct => self.funding_change_pct = value,
            PolicyField::MinWageChange => self.min_wage_change = value,
            PolicyField::ChildcareSubsidy => self.childcare_subsidy = value,
            PolicyField::TuitionCapPct => self.tuition_cap_pct = value,
        }
    }

    /// Number of non-null numeric provisions.
    pub fn numeric_field_count(&self) -> usize {
        PolicyField::ALL
            .iter()
            .filter(|f| self.field(**f).is_some())
            .count()
    }

    /// Whether an institution of the given (raw) type falls under this bill.
    pub fn applies_to(&self, institution_type: &str) -> bool {
        self.affected_institution_types.is_empty()
            || self
                .affected_institution_types
                .contains(&normalize_institution_type(institution_type))
    }
}

/// Clamp a confidence score into `[0, 1]`; NaN becomes zero.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Map a free-form institution type onto a canonical tag.
///
/// "Community College" → `community`, "Private nonprofit" → `private`,
/// "State university" → `public`. Anything else is lowercased and trimmed.
pub fn normalize_institution_type(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    if lower.contains("community") || lower.contains("2-year") || lower.contains("two-year") {
        COMMUNITY.to_string()
    } else if lower.contains("private") {
        PRIVATE.to_string()
    } else if lower.contains("public") || lower.starts_with("state") {
        PUBLIC.to_string()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_zero_confidence_and_null_fields() {
        let p = PolicyParameters::empty();
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.numeric_field_count(), 0);
        assert!(p.affected_institution_types.is_empty());
        assert_eq!(p.extraction_method, ExtractionMethod::Rule);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(PolicyParameters::empty().with_confidence(1.7).confidence, 1.0);
        assert_eq!(PolicyParameters::empty().with_confidence(-0.2).confidence, 0.0);
        assert_eq!(PolicyParameters::empty().with_confidence(f64::NAN).confidence, 0.0);
    }

    #[test]
    fn extraction_method_serializes_as_tags() {
        assert_eq!(serde_json::to_string(&ExtractionMethod::Rule).unwrap(), "\"rule\"");
        assert_eq!(serde_json::to_string(&ExtractionMethod::Llm).unwrap(), "\"llm\"");
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::RuleLlm).unwrap(),
            "\"rule+llm\""
        );
        assert!(ExtractionMethod::RuleLlm.used_external_service());
        assert!(!ExtractionMethod::Rule.used_external_service());
    }

    #[test]
    fn normalizes_institution_types() {
        assert_eq!(normalize_institution_type("Community College"), COMMUNITY);
        assert_eq!(normalize_institution_type(" Private nonprofit "), PRIVATE);
        assert_eq!(normalize_institution_type("PUBLIC"), PUBLIC);
        assert_eq!(normalize_institution_type("State university"), PUBLIC);
        assert_eq!(normalize_institution_type("Tribal"), "tribal");
    }

    #[test]
    fn empty_type_set_applies_to_everything() {
        let p = PolicyParameters::empty();
        assert!(p.applies_to("private"));
        assert!(p.applies_to("community"));
    }

    #[test]
    fn type_set_restricts_applicability() {
        let mut p = PolicyParameters::empty();
        p.affected_institution_types.insert(PUBLIC.to_string());
        assert!(p.applies_to("Public"));
        assert!(!p.applies_to("Private for-profit"));
    }

    #[test]
    fn policy_field_names_round_trip() {
        for field in PolicyField::ALL {
            assert_eq!(PolicyField::from_name(field.as_str()), Some(field));
        }
        assert_eq!(PolicyField::from_name("enrollment"), None);
    }
}
