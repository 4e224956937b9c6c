//! Turn raw model outputs into per-institution impact figures.

use std::collections::{BTreeSet, HashMap, HashSet};

use billscope_core::{
    BatchSummary, EquityOverride, EquityRiskClass, FeatureSchemaError, ImpactConfig,
    InstitutionRecord, PolicyParameters, PredictionResult, RawPrediction, RowError, Stage,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Caller-side filters applied on top of the bill's institution types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactFilters {
    /// Upper-case state codes. Empty means every state.
    #[serde(default)]
    pub states: BTreeSet<String>,
}

impl ImpactFilters {
    pub fn states<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            states: states
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn admits_state(&self, state: &str) -> bool {
        self.states.is_empty() || self.states.contains(&state.trim().to_ascii_uppercase())
    }

    /// Bill type criteria plus the caller's state filter.
    pub fn admits(&self, params: &PolicyParameters, institution: &InstitutionRecord) -> bool {
        params.applies_to(&institution.institution_type) && self.admits_state(&institution.state)
    }
}

/// Institutions the bill applies to, in input order.
pub fn filter_institutions<'a>(
    params: &PolicyParameters,
    institutions: &'a [InstitutionRecord],
    filters: &ImpactFilters,
) -> Vec<&'a InstitutionRecord> {
    institutions
        .iter()
        .filter(|i| filters.admits(params, i))
        .collect()
}

/// Hourly wage used for the hours-to-cover-gap figure.
pub fn hourly_wage(params: &PolicyParameters, config: &ImpactConfig) -> f64 {
    (config.default_hourly_wage + params.min_wage_change.unwrap_or(0.0)).max(1.0)
}

/// Results, summary, and rows that could not be aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub results: Vec<PredictionResult>,
    pub summary: BatchSummary,
    pub errors: Vec<RowError>,
}

/// Join raw predictions with their institutions and derive impact figures.
///
/// Institutions outside the bill's types or the caller's states are
/// dropped along with their predictions. Output follows the order of
/// `raw`. Predictions without any institution record, and institutions
/// lacking `net_price` or `enrollment`, become aggregation-stage row errors.
pub fn aggregate(
    params: &PolicyParameters,
    institutions: &[&InstitutionRecord],
    raw: &[RawPrediction],
    filters: &ImpactFilters,
    config: &ImpactConfig,
) -> Aggregation {
    let mut by_id: HashMap<&str, &InstitutionRecord> = HashMap::with_capacity(institutions.len());
    let mut excluded: HashSet<&str> = HashSet::new();
    for institution in institutions {
        let id = institution.institution_id.as_str();
        if filters.admits(params, institution) {
            by_id.entry(id).or_insert(*institution);
        } else {
            excluded.insert(id);
        }
    }
    let wage = hourly_wage(params, config);

    let mut results = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    for prediction in raw {
        let id = prediction.institution_id.as_str();
        let outcome = match by_id.get(id) {
            Some(institution) => derive(institution, prediction, wage, config),
            None if excluded.contains(id) => {
                debug!(institution = %id, "prediction outside the bill's criteria dropped");
                continue;
            }
            None => Err(FeatureSchemaError::Mismatch {
                institution_id: prediction.institution_id.clone(),
                detail: "prediction has no institution record".into(),
            }),
        };
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => errors.push(RowError::schema(Stage::Aggregation, e)),
        }
    }

    let summary = BatchSummary::from_results(&results, errors.len());
    Aggregation {
        results,
        summary,
        errors,
    }
}

fn derive(
    institution: &InstitutionRecord,
    raw: &RawPrediction,
    wage: f64,
    config: &ImpactConfig,
) -> Result<PredictionResult, FeatureSchemaError> {
    let required = |column: &str, value: Option<f64>| {
        value.filter(|v| v.is_finite()).ok_or_else(|| FeatureSchemaError::MissingColumn {
            institution_id: institution.institution_id.clone(),
            column: column.to_string(),
        })
    };
    let baseline_tuition = required("net_price", institution.net_price)?;
    let enrollment = required("enrollment", institution.enrollment)?;

    let tuition_change_dollars = raw.tuition_change_pct * baseline_tuition / 100.0;
    // Float-to-int casts saturate; negative enrollment clamps to zero.
    let students_affected = (enrollment * raw.enrollment_change_pct.abs() / 100.0).round() as u64;
    let gap = institution.affordability_gap.unwrap_or(0.0);
    let hours_to_cover_gap = ((gap + tuition_change_dollars) / wage).max(0.0);

    let equity_override = escalation(institution, raw, config);
    let equity_risk_class = equity_override.as_ref().map_or(raw.equity_class, |o| o.to);

    Ok(PredictionResult {
        institution_id: institution.institution_id.clone(),
        name: institution.name.clone(),
        state: institution.state.clone(),
        institution_type: institution.institution_type.clone(),
        tuition_change_pct: raw.tuition_change_pct,
        tuition_change_dollars,
        enrollment_change_pct: raw.enrollment_change_pct,
        students_affected,
        grad_rate_change: raw.grad_rate_change,
        equity_risk_class,
        hours_to_cover_gap,
        pct_low_income: institution.pct_low_income,
        pct_minority: institution.pct_minority,
        equity_override,
    })
}

/// Vulnerable institutions facing a material tuition increase are
/// escalated to High whatever the classifier said.
fn escalation(
    institution: &InstitutionRecord,
    raw: &RawPrediction,
    config: &ImpactConfig,
) -> Option<EquityOverride> {
    let rule = &config.equity_override;
    let pct_low_income = institution.pct_low_income?;
    let escalate = raw.equity_class < EquityRiskClass::High
        && pct_low_income > rule.vulnerability_pct
        && raw.tuition_change_pct > rule.material_tuition_increase_pct;
    if !escalate {
        return None;
    }
    debug!(
        institution = %institution.institution_id,
        from = %raw.equity_class,
        pct_low_income,
        tuition_change_pct = raw.tuition_change_pct,
        "equity class escalated to High"
    );
    Some(EquityOverride {
        from: raw.equity_class,
        to: EquityRiskClass::High,
        pct_low_income,
        tuition_change_pct: raw.tuition_change_pct,
    })
}

#[cfg(test)]
mod tests {
    use billscope_core::{RowErrorReason, impact};

    use super::*;

    fn college(id: &str, state: &str, kind: &str) -> InstitutionRecord {
        InstitutionRecord::new(id, state, kind)
            .with_column("enrollment", 12_000.0)
            .with_column("net_price", 10_000.0)
            .with_column("pct_low_income", 40.0)
            .with_column("pct_minority", 55.0)
            .with_column("affordability_gap", 1_500.0)
    }

    fn raw(id: &str, tuition_pct: f64, class: EquityRiskClass) -> RawPrediction {
        RawPrediction {
            institution_id: id.to_string(),
            tuition_change_pct: tuition_pct,
            enrollment_change_pct: -2.5,
            grad_rate_change: -0.4,
            equity_class: class,
        }
    }

    fn public_only() -> PolicyParameters {
        let mut p = PolicyParameters::empty();
        p.affected_institution_types.insert("public".into());
        p
    }

    #[test]
    fn filters_by_type_and_state() {
        let rows = vec![
            college("1", "CA", "Public"),
            college("2", "CA", "Private nonprofit"),
            college("3", "ny", "public"),
            college("4", "TX", "Community College"),
        ];
        let ids = |v: Vec<&InstitutionRecord>| {
            v.iter().map(|i| i.institution_id.clone()).collect::<Vec<_>>()
        };
        let none = ImpactFilters::default();
        assert_eq!(ids(filter_institutions(&public_only(), &rows, &none)), ["1", "3"]);
        assert_eq!(
            ids(filter_institutions(&PolicyParameters::empty(), &rows, &none)),
            ["1", "2", "3", "4"]
        );
        let ny = ImpactFilters::states(["NY"]);
        assert_eq!(ids(filter_institutions(&public_only(), &rows, &ny)), ["3"]);
    }

    #[test]
    fn derives_dollars_students_and_hours() {
        let inst = college("1", "CA", "public");
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&inst],
            &[raw("1", 4.0, EquityRiskClass::Low)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        assert!(out.errors.is_empty());
        let r = &out.results[0];
        assert_eq!(r.tuition_change_dollars, 400.0);
        assert_eq!(r.students_affected, 300);
        // (1500 + 400) / 15
        assert!((r.hours_to_cover_gap - 1_900.0 / 15.0).abs() < 1e-9);
        assert_eq!(r.equity_risk_class, EquityRiskClass::Low);
        assert!(r.equity_override.is_none());
        assert_eq!(out.summary.total_institutions, 1);
        assert_eq!(out.summary.total_students_affected, 300);
    }

    #[test]
    fn wage_includes_minimum_wage_change_and_floors() {
        let config = ImpactConfig::default();
        let mut p = PolicyParameters::empty();
        assert_eq!(hourly_wage(&p, &config), 15.0);
        p.min_wage_change = Some(2.0);
        assert_eq!(hourly_wage(&p, &config), 17.0);
        p.min_wage_change = Some(-40.0);
        assert_eq!(hourly_wage(&p, &config), 1.0);
    }

    #[test]
    fn hours_never_negative() {
        let mut inst = college("1", "CA", "public");
        inst.affordability_gap = None;
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&inst],
            &[raw("1", -8.0, EquityRiskClass::Low)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        assert_eq!(out.results[0].hours_to_cover_gap, 0.0);
        assert_eq!(out.results[0].tuition_change_dollars, -800.0);
    }

    #[test]
    fn vulnerable_institution_is_escalated() {
        let inst = college("1", "CA", "public").with_column("pct_low_income", 80.0);
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&inst],
            &[raw("1", 6.0, EquityRiskClass::Medium)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        let r = &out.results[0];
        assert_eq!(r.equity_risk_class, EquityRiskClass::High);
        let o = r.equity_override.as_ref().unwrap();
        assert_eq!(o.from, EquityRiskClass::Medium);
        assert_eq!(out.summary.overrides, 1);
        assert_eq!(out.summary.count(EquityRiskClass::High), 1);
    }

    #[test]
    fn aggregate_applies_type_and_state_filters() {
        let public = college("1", "CA", "public");
        let private = college("2", "CA", "Private nonprofit");
        let elsewhere = college("3", "NY", "public");
        let predictions = [
            raw("1", 3.0, EquityRiskClass::Low),
            raw("2", 3.0, EquityRiskClass::Low),
            raw("3", 3.0, EquityRiskClass::Low),
        ];

        let out = aggregate(
            &public_only(),
            &[&public, &private, &elsewhere],
            &predictions,
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        let ids: Vec<&str> = out.results.iter().map(|r| r.institution_id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert!(out.errors.is_empty());
        assert_eq!(out.summary.total_institutions, 2);

        let out = aggregate(
            &public_only(),
            &[&public, &private, &elsewhere],
            &predictions,
            &ImpactFilters::states(["ca"]),
            &ImpactConfig::default(),
        );
        let ids: Vec<&str> = out.results.iter().map(|r| r.institution_id.as_str()).collect();
        assert_eq!(ids, ["1"]);
        assert_eq!(out.summary.skipped, 0);
    }

    #[test]
    fn prediction_without_institution_is_a_row_error() {
        let inst = college("1", "CA", "public");
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&inst],
            &[raw("9", 3.0, EquityRiskClass::Low)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        assert!(out.results.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].institution_id, "9");
        assert_eq!(out.errors[0].stage, Stage::Aggregation);
    }

    #[test]
    fn escalation_needs_both_conditions() {
        let config = ImpactConfig::default();
        let poor = college("1", "CA", "public").with_column("pct_low_income", 80.0);
        let modest = raw("1", 5.0, EquityRiskClass::Low);
        assert!(escalation(&poor, &modest, &config).is_none());

        let comfortable = college("2", "CA", "public");
        let steep = raw("2", 12.0, EquityRiskClass::Low);
        assert!(escalation(&comfortable, &steep, &config).is_none());

        let already_high = raw("1", 12.0, EquityRiskClass::High);
        assert!(escalation(&poor, &already_high, &config).is_none());
    }

    #[test]
    fn missing_baseline_is_a_row_error() {
        let mut broken = college("1", "CA", "public");
        broken.net_price = None;
        let ok = college("2", "CA", "public");
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&broken, &ok],
            &[raw("1", 3.0, EquityRiskClass::Low), raw("2", 3.0, EquityRiskClass::Low)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].institution_id, "2");
        assert_eq!(out.errors.len(), 1);
        let err = &out.errors[0];
        assert_eq!(err.stage, Stage::Aggregation);
        assert!(matches!(
            &err.reason,
            RowErrorReason::Schema(FeatureSchemaError::MissingColumn { column, .. }) if column == "net_price"
        ));
        assert_eq!(out.summary.skipped, 1);
    }

    #[test]
    fn results_convert_to_arrow() {
        let inst = college("1", "CA", "public");
        let out = aggregate(
            &PolicyParameters::empty(),
            &[&inst],
            &[raw("1", 2.0, EquityRiskClass::Medium)],
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        );
        let batch = impact::predictions_to_batch(&out.results).unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    proptest::proptest! {
        #[test]
        fn derived_figures_stay_in_range(
            tuition_pct in -60.0f64..60.0,
            enrollment_pct in -100.0f64..100.0,
            gap in 0.0f64..20_000.0,
            wage_change in -30.0f64..30.0,
        ) {
            let inst = college("1", "CA", "public").with_column("affordability_gap", gap);
            let mut params = PolicyParameters::empty();
            params.min_wage_change = Some(wage_change);
            let mut prediction = raw("1", tuition_pct, EquityRiskClass::Low);
            prediction.enrollment_change_pct = enrollment_pct;

            let out = aggregate(
                &params,
                &[&inst],
                &[prediction],
                &ImpactFilters::default(),
                &ImpactConfig::default(),
            );
            let row = &out.results[0];
            proptest::prop_assert!(row.hours_to_cover_gap >= 0.0);
            proptest::prop_assert!(row.students_affected <= 12_000);
            if row.equity_override.is_some() {
                proptest::prop_assert_eq!(row.equity_risk_class, EquityRiskClass::High);
            }
            proptest::prop_assert_eq!(
                row.tuition_change_dollars.signum(),
                (tuition_pct * 10_000.0 / 100.0).signum()
            );
        }
    }
}
