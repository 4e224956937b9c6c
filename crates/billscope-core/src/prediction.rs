//! Per-institution predictions and batch-level summaries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordinal vulnerability of an institution to a policy's impact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EquityRiskClass {
    Low,
    Medium,
    High,
}

impl EquityRiskClass {
    pub const ALL: [EquityRiskClass; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for EquityRiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRiskClass(pub String);

impl fmt::Display for UnknownRiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown equity risk class '{}'", self.0)
    }
}

impl std::error::Error for UnknownRiskClass {}

impl FromStr for EquityRiskClass {
    type Err = UnknownRiskClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(UnknownRiskClass(s.to_string())),
        }
    }
}

/// Raw outputs of the four-model ensemble for one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub institution_id: String,
    pub tuition_change_pct: f64,
    pub enrollment_change_pct: f64,
    pub grad_rate_change: f64,
    pub equity_class: EquityRiskClass,
}

/// Record of an equity classification escalated by the vulnerability rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityOverride {
    /// Class the classifier returned.
    pub from: EquityRiskClass,
    /// Class after escalation.
    pub to: EquityRiskClass,
    pub pct_low_income: f64,
    pub tuition_change_pct: f64,
}

/// Final per-institution impact row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub institution_id: String,
    pub name: Option<String>,
    pub state: String,
    pub institution_type: String,
    pub tuition_change_pct: f64,
    pub tuition_change_dollars: f64,
    pub enrollment_change_pct: f64,
    pub students_affected: u64,
    pub grad_rate_change: f64,
    pub equity_risk_class: EquityRiskClass,
    pub hours_to_cover_gap: f64,
    pub pct_low_income: Option<f64>,
    pub pct_minority: Option<f64>,
    pub equity_override: Option<EquityOverride>,
}

/// Mean and median of the predicted changes over a group of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub mean_tuition_change_pct: f64,
    pub median_tuition_change_pct: f64,
    pub mean_tuition_change_dollars: f64,
    pub median_tuition_change_dollars: f64,
    pub mean_enrollment_change_pct: f64,
    pub median_enrollment_change_pct: f64,
    pub mean_grad_rate_change: f64,
    pub median_grad_rate_change: f64,
}

impl ChangeStats {
    fn from_rows(rows: &[&PredictionResult]) -> Self {
        let column = |f: fn(&PredictionResult) -> f64| -> Vec<f64> {
            rows.iter().map(|r| f(r)).collect()
        };
        let tuition_pct = column(|r| r.tuition_change_pct);
        let tuition_dollars = column(|r| r.tuition_change_dollars);
        let enrollment = column(|r| r.enrollment_change_pct);
        let grad = column(|r| r.grad_rate_change);

        Self {
            mean_tuition_change_pct: mean(&tuition_pct),
            median_tuition_change_pct: median(&tuition_pct),
            mean_tuition_change_dollars: mean(&tuition_dollars),
            median_tuition_change_dollars: median(&tuition_dollars),
            mean_enrollment_change_pct: mean(&enrollment),
            median_enrollment_change_pct: median(&enrollment),
            mean_grad_rate_change: mean(&grad),
            median_grad_rate_change: median(&grad),
        }
    }
}

/// Aggregates for one equity risk class (or the whole batch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub institutions: usize,
    pub students_affected: u64,
    pub stats: ChangeStats,
}

impl GroupSummary {
    fn from_rows(rows: &[&PredictionResult]) -> Self {
        Self {
            institutions: rows.len(),
            students_affected: rows.iter().map(|r| r.students_affected).sum(),
            stats: ChangeStats::from_rows(rows),
        }
    }
}

/// An entry in the most-affected list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopAffected {
    pub institution_id: String,
    pub name: Option<String>,
    pub tuition_change_dollars: f64,
}

/// Number of rows kept in [`BatchSummary::top_affected`].
pub const TOP_AFFECTED_LIMIT: usize = 10;

/// Share above which an institution counts as minority- or low-income-serving.
pub const SERVING_THRESHOLD_PCT: f64 = 50.0;

/// Read-only summary derived from a completed result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_institutions: usize,
    pub total_students_affected: u64,
    pub overall: ChangeStats,
    pub by_class: BTreeMap<EquityRiskClass, GroupSummary>,
    /// Rows whose class was escalated by the vulnerability rule.
    pub overrides: usize,
    /// Institutions excluded by row-scoped errors.
    pub skipped: usize,
    pub minority_serving_affected: usize,
    pub low_income_serving_affected: usize,
    pub top_affected: Vec<TopAffected>,
}

impl BatchSummary {
    /// Summarize a result set. `skipped` is the number of row errors for the run.
    pub fn from_results(results: &[PredictionResult], skipped: usize) -> Self {
        let all: Vec<&PredictionResult> = results.iter().collect();

        let mut by_class = BTreeMap::new();
        for class in EquityRiskClass::ALL {
            let rows: Vec<&PredictionResult> = results
                .iter()
                .filter(|r| r.equity_risk_class == class)
                .collect();
            if !rows.is_empty() {
                by_class.insert(class, GroupSummary::from_rows(&rows));
            }
        }

        let serving = |pct: Option<f64>| pct.is_some_and(|p| p > SERVING_THRESHOLD_PCT);

        let mut ranked: Vec<&PredictionResult> = all.clone();
        // Stable sort keeps input order among ties.
        ranked.sort_by(|a, b| b.tuition_change_dollars.total_cmp(&a.tuition_change_dollars));
        let top_affected = ranked
            .into_iter()
            .take(TOP_AFFECTED_LIMIT)
            .map(|r| TopAffected {
                institution_id: r.institution_id.clone(),
                name: r.name.clone(),
                tuition_change_dollars: r.tuition_change_dollars,
            })
            .collect();

        Self {
            total_institutions: results.len(),
            total_students_affected: results.iter().map(|r| r.students_affected).sum(),
            overall: ChangeStats::from_rows(&all),
            by_class,
            overrides: results.iter().filter(|r| r.equity_override.is_some()).count(),
            skipped,
            minority_serving_affected: results.iter().filter(|r| serving(r.pct_minority)).count(),
            low_income_serving_affected: results
                .iter()
                .filter(|r| serving(r.pct_low_income))
                .count(),
            top_affected,
        }
    }

    /// Institutions classified at the given risk level.
    pub fn count(&self, class: EquityRiskClass) -> usize {
        self.by_class.get(&class).map_or(0, |g| g.institutions)
    }

    /// Template summary for non-specialist readers.
    pub fn plain_language(&self) -> String {
        if self.total_institutions == 0 {
            return "No institutions match this bill's criteria.".to_string();
        }
        let direction = if self.overall.mean_tuition_change_dollars >= 0.0 {
            "rise"
        } else {
            "fall"
        };
        format!(
            "This bill affects {} institutions and about {} students. \
             Average net price would {} by ${:.0}, and {} institutions face high equity risk.",
            self.total_institutions,
            self.total_students_affected,
            direction,
            self.overall.mean_tuition_change_dollars.abs(),
            self.count(EquityRiskClass::High),
        )
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
