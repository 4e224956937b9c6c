//! Text cards for extraction and impact results.

use billscope_ai::ImpactReport;
use billscope_core::{BatchSummary, PolicyParameters};
use billscope_extract::{Extraction, ExtractionOutcome};

const MAX_SKIPPED: usize = 10;

// ── Public API ──

/// Print the extracted policy parameters as a vertical card.
pub fn print_extraction(extraction: &Extraction) {
    let params = extraction.params();
    let outcome = match &extraction.outcome {
        ExtractionOutcome::RuleOnly(_) => "rule only",
        ExtractionOutcome::RuleThenLlm(_) => "rule then llm",
        ExtractionOutcome::RuleOnlyLowConfidence(_) => "rule only (low confidence)",
    };

    println!("=== Policy Parameters ===");
    println!();
    println!("Extraction");
    row("outcome", outcome);
    row("method", params.extraction_method);
    row("confidence", format!("{:.2}", params.confidence));
    println!();

    print_parameters(params);

    if !extraction.warnings.is_empty() {
        println!("Warnings");
        for warning in &extraction.warnings {
            println!("  - {warning}");
        }
        println!();
    }

    if !extraction.external_calls.is_empty() {
        println!("External Calls");
        for call in &extraction.external_calls {
            let status = match (&call.error, call.succeeded) {
                (_, true) => "ok".to_string(),
                (Some(e), false) => format!("failed: {e}"),
                (None, false) => "failed".to_string(),
            };
            row(
                &call.service,
                format!(
                    "{} attempt(s), {} ms, {status}",
                    call.attempts, call.latency_ms
                ),
            );
        }
        println!();
    }
}

/// Print the batch summary, the most affected institutions, and skipped rows.
pub fn print_impact(report: &ImpactReport) {
    let summary = &report.summary;
    println!("=== Impact Summary ===");
    println!("{}", summary.plain_language());
    println!();

    if summary.total_institutions > 0 {
        print_overview(summary);
        print_equity(summary);
        print_top_affected(summary);
    }
    print_skipped(report);
}

// ── Section rendering ──

fn print_parameters(params: &PolicyParameters) {
    println!("Parameters");
    opt_row("funding_change_pct", params.funding_change_pct, "%");
    opt_row("min_wage_change", params.min_wage_change, " $/h");
    opt_row("childcare_subsidy", params.childcare_subsidy, " $/yr");
    opt_row("tuition_cap_pct", params.tuition_cap_pct, "%");
    let types = if params.affected_institution_types.is_empty() {
        "all".to_string()
    } else {
        params
            .affected_institution_types
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    row("institution_types", types);
    println!();
}

fn print_overview(summary: &BatchSummary) {
    let stats = &summary.overall;
    println!("Overview");
    row("institutions", summary.total_institutions);
    row("students_affected", summary.total_students_affected);
    row(
        "tuition_change_pct",
        format!(
            "mean {:+.2}  median {:+.2}",
            stats.mean_tuition_change_pct, stats.median_tuition_change_pct
        ),
    );
    row(
        "tuition_change_dollars",
        format!(
            "mean {:+.0}  median {:+.0}",
            stats.mean_tuition_change_dollars, stats.median_tuition_change_dollars
        ),
    );
    row(
        "enrollment_change_pct",
        format!(
            "mean {:+.2}  median {:+.2}",
            stats.mean_enrollment_change_pct, stats.median_enrollment_change_pct
        ),
    );
    row(
        "grad_rate_change",
        format!(
            "mean {:+.2}  median {:+.2}",
            stats.mean_grad_rate_change, stats.median_grad_rate_change
        ),
    );
    row("minority_serving", summary.minority_serving_affected);
    row("low_income_serving", summary.low_income_serving_affected);
    println!();
}

fn print_equity(summary: &BatchSummary) {
    println!("Equity Risk");
    for (class, group) in &summary.by_class {
        row(
            &class.to_string(),
            format!(
                "{} institutions, {} students",
                group.institutions, group.students_affected
            ),
        );
    }
    if summary.overrides > 0 {
        row("escalated", summary.overrides);
    }
    println!();
}

fn print_top_affected(summary: &BatchSummary) {
    if summary.top_affected.is_empty() {
        return;
    }
    println!("Top Affected");
    for entry in &summary.top_affected {
        let label = entry.name.as_deref().unwrap_or(&entry.institution_id);
        row(label, format!("{:+.0} $", entry.tuition_change_dollars));
    }
    println!();
}

fn print_skipped(report: &ImpactReport) {
    if report.skipped.is_empty() {
        return;
    }
    println!("Skipped ({})", report.skipped.len());
    for error in report.skipped.iter().take(MAX_SKIPPED) {
        println!("  - {error}");
    }
    if report.skipped.len() > MAX_SKIPPED {
        println!("  ... {} more", report.skipped.len() - MAX_SKIPPED);
    }
    println!();
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}

fn opt_row(label: &str, value: Option<f64>, unit: &str) {
    match value {
        Some(v) => row(label, format!("{v}{unit}")),
        None => row(label, "-"),
    }
}
