//! Institution records from the external master table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::policy::normalize_institution_type;

/// Identity columns every master table must provide.
pub const IDENTITY_COLUMNS: &[&str] = &["institution_id", "state", "institution_type"];

/// Numeric columns with a dedicated field on [`InstitutionRecord`].
pub const NUMERIC_COLUMNS: &[&str] = &[
    "enrollment",
    "net_price",
    "grad_rate",
    "pct_low_income",
    "pct_minority",
    "affordability_gap",
];

/// Resolve training-time column aliases to master-table column names.
///
/// The trained models call tuition `baseline_tuition` and graduation rate
/// `baseline_grad_rate`; the master table stores them as `net_price` and
/// `grad_rate`.
pub fn canonical_column(name: &str) -> &str {
    match name {
        "baseline_tuition" => "net_price",
        "baseline_grad_rate" => "grad_rate",
        other => other,
    }
}

/// One row of the institution master table. Read-only input.
///
/// Numeric fields are optional: a null cell is treated as a missing column
/// for that row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    pub institution_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: String,
    pub institution_type: String,
    pub enrollment: Option<f64>,
    pub net_price: Option<f64>,
    pub grad_rate: Option<f64>,
    pub pct_low_income: Option<f64>,
    pub pct_minority: Option<f64>,
    pub affordability_gap: Option<f64>,
    /// Any further numeric baseline columns, keyed by column name.
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl InstitutionRecord {
    pub fn new(
        institution_id: impl Into<String>,
        state: impl Into<String>,
        institution_type: impl Into<String>,
    ) -> Self {
        Self {
            institution_id: institution_id.into(),
            name: None,
            state: state.into(),
            institution_type: institution_type.into(),
            enrollment: None,
            net_price: None,
            grad_rate: None,
            pct_low_income: None,
            pct_minority: None,
            affordability_gap: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set a numeric column by name (aliases allowed). Unknown names land in `attributes`.
    pub fn with_column(mut self, column: &str, value: f64) -> Self {
        self.set_numeric(column, Some(value));
        self
    }

    pub fn set_numeric(&mut self, column: &str, value: Option<f64>) {
        let slot = match canonical_column(column) {
            "enrollment" => &mut self.enrollment,
            "net_price" => &mut self.net_price,
            "grad_rate" => &mut self.grad_rate,
            "pct_low_income" => &mut self.pct_low_income,
            "pct_minority" => &mut self.pct_minority,
            "affordability_gap" => &mut self.affordability_gap,
            other => {
                match value {
                    Some(v) => self.attributes.insert(other.to_string(), v),
                    None => self.attributes.remove(other),
                };
                return;
            }
        };
        *slot = value;
    }

    /// Look up a numeric column by name (aliases allowed).
    pub fn numeric(&self, column: &str) -> Option<f64> {
        match canonical_column(column) {
            "enrollment" => self.enrollment,
            "net_price" => self.net_price,
            "grad_rate" => self.grad_rate,
            "pct_low_income" => self.pct_low_income,
            "pct_minority" => self.pct_minority,
            "affordability_gap" => self.affordability_gap,
            other => self.attributes.get(other).copied(),
        }
    }

    /// Canonical type tag (`public`, `private`, `community`, ...).
    pub fn institution_kind(&self) -> String {
        normalize_institution_type(&self.institution_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_master_columns() {
        let rec = InstitutionRecord::new("100", "CA", "public")
            .with_column("baseline_tuition", 9_500.0)
            .with_column("grad_rate", 61.0);
        assert_eq!(rec.net_price, Some(9_500.0));
        assert_eq!(rec.numeric("net_price"), Some(9_500.0));
        assert_eq!(rec.numeric("baseline_grad_rate"), Some(61.0));
    }

    #[test]
    fn unknown_columns_go_to_attributes() {
        let rec = InstitutionRecord::new("100", "CA", "public").with_column("endowment_per_fte", 12.5);
        assert_eq!(rec.numeric("endowment_per_fte"), Some(12.5));
        assert!(rec.numeric("state_appropriation").is_none());
    }

    #[test]
    fn clearing_a_column() {
        let mut rec = InstitutionRecord::new("100", "CA", "public").with_column("enrollment", 10.0);
        rec.set_numeric("enrollment", None);
        assert!(rec.enrollment.is_none());
    }

    #[test]
    fn kind_is_normalized() {
        let rec = InstitutionRecord::new("7", "TX", "Community College");
        assert_eq!(rec.institution_kind(), "community");
    }
}
