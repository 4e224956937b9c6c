//! End-to-end impact prediction for one bill over the institution table.

use std::collections::HashSet;

use billscope_core::{
    BatchSummary, ImpactConfig, InstitutionRecord, PolicyParameters, PredictionResult,
    RawPrediction, RowError, RowErrorReason, Stage,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{ImpactFilters, aggregate};
use crate::ensemble::ModelBundle;
use crate::error::ImpactError;

/// Everything one prediction run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactReport {
    /// One row per successfully processed institution, in input order.
    pub results: Vec<PredictionResult>,
    pub summary: BatchSummary,
    /// Rows dropped along the way, with the stage and reason.
    pub skipped: Vec<RowError>,
}

impl ImpactReport {
    pub fn into_parts(self) -> (Vec<PredictionResult>, BatchSummary) {
        (self.results, self.summary)
    }
}

/// Predict the impact of `params` on every matching institution.
///
/// Per-institution failures are collected in [`ImpactReport::skipped`];
/// only a feature vector that disagrees with the bundle schema aborts the run.
pub fn predict_impact(
    params: &PolicyParameters,
    institutions: &[InstitutionRecord],
    models: &ModelBundle,
    filters: &ImpactFilters,
    config: &ImpactConfig,
) -> Result<ImpactReport, ImpactError> {
    // Only admitted rows take part in duplicate detection.
    let (selected, mut skipped) = dedupe(
        institutions
            .iter()
            .filter(|i| filters.admits(params, i)),
    );

    if selected.is_empty() {
        info!(
            institutions = institutions.len(),
            "no institutions match the bill's criteria"
        );
        let summary = BatchSummary::from_results(&[], skipped.len());
        return Ok(ImpactReport {
            results: Vec::new(),
            summary,
            skipped,
        });
    }
    warn_absent_columns(models, &selected);

    // Feature building and inference per institution; collect keeps input order.
    let schema = models.schema();
    let outcomes = selected
        .par_iter()
        .map(|institution| -> Result<Result<RawPrediction, RowError>, ImpactError> {
            let vector = match schema.build(params, institution) {
                Ok(v) => v,
                Err(e) => return Ok(Err(RowError::schema(Stage::Features, e))),
            };
            match models.run(&vector) {
                Ok(raw) => Ok(Ok(raw)),
                Err(ImpactError::Inference {
                    institution_id,
                    source,
                }) => Ok(Err(RowError::new(
                    institution_id,
                    Stage::Inference,
                    RowErrorReason::Inference(source.to_string()),
                ))),
                Err(fatal) => Err(fatal),
            }
        })
        .collect::<Result<Vec<_>, ImpactError>>()?;

    let mut predicted = Vec::with_capacity(outcomes.len());
    let mut raw = Vec::with_capacity(outcomes.len());
    for (institution, outcome) in selected.iter().zip(outcomes) {
        match outcome {
            Ok(prediction) => {
                predicted.push(*institution);
                raw.push(prediction);
            }
            Err(row) => {
                warn!(
                    institution = %row.institution_id,
                    stage = %row.stage,
                    reason = %row.reason,
                    "institution skipped"
                );
                skipped.push(row);
            }
        }
    }

    let aggregation = aggregate(params, &predicted, &raw, filters, config);
    for row in &aggregation.errors {
        warn!(institution = %row.institution_id, reason = %row.reason, "institution skipped");
    }
    skipped.extend(aggregation.errors);
    let results = aggregation.results;
    let summary = BatchSummary::from_results(&results, skipped.len());

    info!(
        selected = selected.len(),
        predicted = results.len(),
        skipped = skipped.len(),
        overrides = summary.overrides,
        "impact prediction complete"
    );
    Ok(ImpactReport {
        results,
        summary,
        skipped,
    })
}

/// Keep the first record per `institution_id`; later ones become input errors.
fn dedupe<'a>(
    institutions: impl Iterator<Item = &'a InstitutionRecord>,
) -> (Vec<&'a InstitutionRecord>, Vec<RowError>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();
    for institution in institutions {
        if seen.insert(institution.institution_id.as_str()) {
            unique.push(institution);
        } else {
            warn!(institution = %institution.institution_id, "duplicate institution_id");
            duplicates.push(RowError::new(
                institution.institution_id.clone(),
                Stage::Input,
                RowErrorReason::DuplicateId,
            ));
        }
    }
    (unique, duplicates)
}

/// Log schema columns no selected institution carries. Each row still
/// fails on its own at the feature stage.
fn warn_absent_columns(models: &ModelBundle, selected: &[&InstitutionRecord]) {
    for column in models.schema().required_columns() {
        let absent = selected.iter().all(|i| match column.as_str() {
            "state" => i.state.trim().is_empty(),
            "institution_type" => i.institution_type.trim().is_empty(),
            other => i.numeric(other).is_none(),
        });
        if absent {
            warn!(column = %column, "required column absent for every institution");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use billscope_core::{EquityRiskClass, FeatureSchemaError};

    use super::*;

    fn bundle() -> ModelBundle {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/models");
        ModelBundle::load(&dir).unwrap()
    }

    fn college(id: &str, state: &str, kind: &str, pct_low_income: f64) -> InstitutionRecord {
        InstitutionRecord::new(id, state, kind)
            .with_column("enrollment", 8_000.0)
            .with_column("net_price", 12_000.0)
            .with_column("grad_rate", 58.0)
            .with_column("pct_low_income", pct_low_income)
            .with_column("pct_minority", 35.0)
            .with_column("affordability_gap", 2_000.0)
    }

    fn table() -> Vec<InstitutionRecord> {
        vec![
            college("100", "CA", "public", 20.0),
            college("200", "NY", "private", 45.0),
            college("300", "TX", "community", 45.0),
            college("400", "CA", "public", 80.0),
        ]
    }

    fn funding_cut(types: &[&str]) -> PolicyParameters {
        let mut p = PolicyParameters {
            funding_change_pct: Some(-10.0),
            ..PolicyParameters::empty()
        };
        p.affected_institution_types = types.iter().map(|t| t.to_string()).collect();
        p
    }

    fn ids(report: &ImpactReport) -> Vec<&str> {
        report.results.iter().map(|r| r.institution_id.as_str()).collect()
    }

    #[test]
    fn public_cut_reaches_only_public_institutions() {
        let report = predict_impact(
            &funding_cut(&["public"]),
            &table(),
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&report), ["100", "400"]);
        assert!(report.skipped.is_empty());
        let r = &report.results[0];
        assert!((r.tuition_change_pct - 6.0).abs() < 1e-9);
        assert!((r.tuition_change_dollars - 720.0).abs() < 1e-6);
        assert_eq!(r.students_affected, 240);
        assert_eq!(report.summary.total_institutions, 2);
    }

    #[test]
    fn unmatched_type_yields_empty_report() {
        let report = predict_impact(
            &funding_cut(&["tribal"]),
            &table(),
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary.total_institutions, 0);
        assert_eq!(
            report.summary.plain_language(),
            "No institutions match this bill's criteria."
        );
    }

    #[test]
    fn state_filter_narrows_the_batch() {
        let report = predict_impact(
            &funding_cut(&[]),
            &table(),
            &bundle(),
            &ImpactFilters::states(["ca"]),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&report), ["100", "400"]);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let models = bundle();
        let params = funding_cut(&[]);
        let run = || {
            predict_impact(
                &params,
                &table(),
                &models,
                &ImpactFilters::default(),
                &ImpactConfig::default(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn vulnerable_medium_institution_is_escalated() {
        // Classifier says Medium at 65% low income; tuition rises 6%.
        let rows = vec![college("500", "CA", "public", 65.0)];
        let report = predict_impact(
            &funding_cut(&[]),
            &rows,
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        let r = &report.results[0];
        assert_eq!(r.equity_risk_class, EquityRiskClass::High);
        assert_eq!(
            r.equity_override.as_ref().map(|o| o.from),
            Some(EquityRiskClass::Medium)
        );
        assert_eq!(report.summary.overrides, 1);
    }

    #[test]
    fn missing_column_skips_only_that_row() {
        let mut rows = table();
        rows[1].pct_minority = None;
        let report = predict_impact(
            &funding_cut(&[]),
            &rows,
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&report), ["100", "300", "400"]);
        assert_eq!(report.skipped.len(), 1);
        let row = &report.skipped[0];
        assert_eq!(row.institution_id, "200");
        assert_eq!(row.stage, Stage::Features);
        assert!(matches!(
            &row.reason,
            RowErrorReason::Schema(FeatureSchemaError::MissingColumn { column, .. }) if column == "pct_minority"
        ));
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn unseen_state_skips_only_that_row() {
        let mut rows = table();
        rows.push(college("600", "WA", "public", 30.0));
        let report = predict_impact(
            &funding_cut(&[]),
            &rows,
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(report.results.len(), 4);
        assert!(matches!(
            report.skipped[0].reason,
            RowErrorReason::Schema(FeatureSchemaError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn duplicate_ids_keep_the_first_record() {
        let mut rows = table();
        rows.push(college("100", "CA", "public", 90.0));
        let report = predict_impact(
            &funding_cut(&[]),
            &rows,
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&report), ["100", "200", "300", "400"]);
        assert_eq!(report.results[0].pct_low_income, Some(20.0));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, Stage::Input);
        assert_eq!(report.skipped[0].reason, RowErrorReason::DuplicateId);
    }

    #[test]
    fn duplicates_outside_the_bill_are_not_reported() {
        let mut rows = table();
        rows.push(college("200", "NY", "private", 45.0));
        rows.push(college("400", "CA", "public", 10.0));
        let report = predict_impact(
            &funding_cut(&["public"]),
            &rows,
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&report), ["100", "400"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].institution_id, "400");
        assert_eq!(report.skipped[0].reason, RowErrorReason::DuplicateId);
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn into_parts_returns_results_and_summary() {
        let report = predict_impact(
            &funding_cut(&["public"]),
            &table(),
            &bundle(),
            &ImpactFilters::default(),
            &ImpactConfig::default(),
        )
        .unwrap();
        let (results, summary) = report.into_parts();
        assert_eq!(results.len(), summary.total_institutions);
        assert_eq!(summary.top_affected.len(), 2);
    }
}
