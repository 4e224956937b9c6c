//! Rule-based extraction: sentence-scoped entity anchoring.
//!
//! Each sentence is scanned for category keywords (funding, minimum wage,
//! childcare, tuition cap) and numeric entities (money, percentages).
//! Entities are paired one-to-one with the nearest compatible keyword in
//! the same sentence; funding percentages take their sign from the nearest
//! directional verb. A keyword that never receives a number is a vague
//! mention; two different numbers for one category are a contradiction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use billscope_core::{ExtractionMethod, PolicyField, PolicyParameters};
use regex::Regex;

use crate::confidence;
use crate::patterns::{
    self, CATEGORY_KEYWORDS, DECREASE_VERB, INCREASE_VERB, INSTITUTION_TYPES, MONEY, MONEY_RANGE,
    PERCENT, SENTENCE_END, VAGUE_CHANGE,
};

/// Characters before the keyword/number pair still searched for a verb.
const DIRECTION_LOOKBACK: usize = 40;

/// Extra pairing distance when a clause break separates keyword and number.
const CLAUSE_BREAK_PENALTY: usize = 100;

static CLAUSE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),|\band\b|\bwhile\b|\bbut\b|\bwhereas\b").expect("valid clause regex")
});

/// What the rule engine found for one parameter category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CategoryEvidence {
    Absent,
    /// Keyword present, but no usable number was anchored to it.
    Vague,
    Numeric(f64),
    /// At least two distinct values. `first` is kept as the best estimate.
    Contradictory { first: f64, second: f64 },
}

/// Everything the rule engine observed in one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvidence {
    pub categories: BTreeMap<PolicyField, CategoryEvidence>,
    /// Qualitative change phrases ("substantial cuts") with no number attached.
    pub vague_cues: usize,
    pub institution_types: BTreeSet<String>,
}

impl RuleEvidence {
    pub fn category(&self, field: PolicyField) -> CategoryEvidence {
        self.categories
            .get(&field)
            .copied()
            .unwrap_or(CategoryEvidence::Absent)
    }

    pub fn value(&self, field: PolicyField) -> Option<f64> {
        match self.category(field) {
            CategoryEvidence::Numeric(v) | CategoryEvidence::Contradictory { first: v, .. } => {
                Some(v)
            }
            CategoryEvidence::Absent | CategoryEvidence::Vague => None,
        }
    }

    /// Categories with exactly one unambiguous value.
    pub fn numeric_fields(&self) -> Vec<PolicyField> {
        self.fields_where(|e| matches!(e, CategoryEvidence::Numeric(_)))
    }

    pub fn contradictory_fields(&self) -> Vec<PolicyField> {
        self.fields_where(|e| matches!(e, CategoryEvidence::Contradictory { .. }))
    }

    /// Vague category mentions plus qualitative change cues.
    pub fn vague_mentions(&self) -> usize {
        let vague = self.fields_where(|e| matches!(e, CategoryEvidence::Vague));
        vague.len() + self.vague_cues
    }

    fn fields_where(&self, pred: impl Fn(CategoryEvidence) -> bool) -> Vec<PolicyField> {
        PolicyField::ALL
            .into_iter()
            .filter(|f| pred(self.category(*f)))
            .collect()
    }

    /// Rule-only parameters, scored with [`confidence::score`].
    pub fn to_parameters(&self) -> PolicyParameters {
        let mut params = PolicyParameters::empty();
        for field in PolicyField::ALL {
            params.set_field(field, self.value(field));
        }
        params.affected_institution_types = self.institution_types.clone();
        params.extraction_method = ExtractionMethod::Rule;
        params.with_confidence(confidence::score(self))
    }
}

/// Scan normalized text and collect per-category evidence.
pub fn scan(text: &str) -> RuleEvidence {
    let mut values: BTreeMap<PolicyField, Vec<f64>> = BTreeMap::new();
    let mut mentioned: BTreeSet<PolicyField> = BTreeSet::new();

    for sentence in sentences(text) {
        scan_sentence(sentence, &mut values, &mut mentioned);
    }

    let mut categories = BTreeMap::new();
    for field in PolicyField::ALL {
        let distinct = distinct_values(values.get(&field).map_or(&[][..], Vec::as_slice));
        let evidence = match distinct.as_slice() {
            [] if mentioned.contains(&field) => CategoryEvidence::Vague,
            [] => CategoryEvidence::Absent,
            [v] => CategoryEvidence::Numeric(*v),
            [first, second, ..] => CategoryEvidence::Contradictory {
                first: *first,
                second: *second,
            },
        };
        categories.insert(field, evidence);
    }

    let institution_types = INSTITUTION_TYPES
        .iter()
        .filter(|t| t.regex.is_match(text))
        .map(|t| t.tag.to_string())
        .collect();

    RuleEvidence {
        categories,
        vague_cues: VAGUE_CHANGE.find_iter(text).count(),
        institution_types,
    }
}

/// Rule-only extraction of `text` (already normalized).
///
/// Empty or unparseable text yields zero confidence with every optional
/// field null.
pub fn extract(text: &str) -> PolicyParameters {
    scan(text).to_parameters()
}

/// Split on sentence and clause terminators, dropping empty pieces.
pub(crate) fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let piece = text[start..m.start() + 1].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        start = m.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn of(m: regex::Match<'_>) -> Self {
        Self {
            start: m.start(),
            end: m.end(),
        }
    }

    fn gap(&self, other: &Span) -> usize {
        if self.end <= other.start {
            other.start - self.end
        } else if other.end <= self.start {
            self.start - other.end
        } else {
            0
        }
    }

    fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy)]
struct Entity {
    value: f64,
    is_percent: bool,
    span: Span,
}

fn scan_sentence(
    sentence: &str,
    values: &mut BTreeMap<PolicyField, Vec<f64>>,
    mentioned: &mut BTreeSet<PolicyField>,
) {
    let keywords: Vec<(PolicyField, Span)> = CATEGORY_KEYWORDS
        .iter()
        .flat_map(|c| c.regex.find_iter(sentence).map(|m| (c.field, Span::of(m))))
        .collect();
    if keywords.is_empty() {
        return;
    }
    mentioned.extend(keywords.iter().map(|(f, _)| *f));

    let entities = entities(sentence);

    // Cheapest keyword/entity pairs first; each side is used at most once.
    let mut pairs: Vec<(usize, usize, usize)> = Vec::new();
    for (k, (field, kw_span)) in keywords.iter().enumerate() {
        for (e, entity) in entities.iter().enumerate() {
            if patterns::binds_to_percent(*field) != entity.is_percent {
                continue;
            }
            pairs.push((pairing_cost(sentence, kw_span, &entity.span), k, e));
        }
    }
    pairs.sort_unstable();

    let mut kw_used = vec![false; keywords.len()];
    let mut entity_used = vec![false; entities.len()];
    for (_, k, e) in pairs {
        if kw_used[k] || entity_used[e] {
            continue;
        }
        kw_used[k] = true;
        entity_used[e] = true;

        let (field, kw_span) = keywords[k];
        let entity = entities[e];
        let value = if field == PolicyField::FundingChangePct {
            match direction(sentence, &kw_span, &entity.span) {
                Some(sign) => sign * entity.value.abs(),
                // Undirected funding percentages stay vague.
                None => continue,
            }
        } else {
            entity.value
        };
        values.entry(field).or_default().push(value);
    }
}

fn entities(sentence: &str) -> Vec<Entity> {
    let mut out = Vec::new();

    let mut ranges = Vec::new();
    for caps in MONEY_RANGE.captures_iter(sentence) {
        let (Some(whole), Some(from), Some(to)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Some(from), Some(to)) = (
            patterns::parse_number(from.as_str()),
            patterns::parse_number(to.as_str()),
        ) else {
            continue;
        };
        let span = Span::of(whole);
        ranges.push(span);
        out.push(Entity {
            value: to - from,
            is_percent: false,
            span,
        });
    }

    for caps in MONEY.captures_iter(sentence) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let span = Span::of(whole);
        if ranges.iter().any(|r| r.contains(&span)) {
            continue;
        }
        let scale = caps.get(2).or(caps.get(3)).map(|m| m.as_str());
        if let Some(amount) = patterns::parse_number(digits.as_str()) {
            out.push(Entity {
                value: amount * patterns::money_multiplier(scale),
                is_percent: false,
                span,
            });
        }
    }

    for caps in PERCENT.captures_iter(sentence) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(pct) = patterns::parse_number(digits.as_str()) {
            out.push(Entity {
                value: pct,
                is_percent: true,
                span: Span::of(whole),
            });
        }
    }

    out
}

fn pairing_cost(sentence: &str, a: &Span, b: &Span) -> usize {
    let (lo, hi) = if a.end <= b.start {
        (a.end, b.start)
    } else if b.end <= a.start {
        (b.end, a.start)
    } else {
        return 0;
    };
    let gap = hi - lo;
    if CLAUSE_BREAK.is_match(&sentence[lo..hi]) {
        gap + CLAUSE_BREAK_PENALTY
    } else {
        gap
    }
}

/// Sign of the directional verb nearest the keyword, searched between the
/// keyword and the number (plus a short lookback).
fn direction(sentence: &str, keyword: &Span, entity: &Span) -> Option<f64> {
    let lo = keyword.start.min(entity.start).saturating_sub(DIRECTION_LOOKBACK);
    let hi = keyword.end.max(entity.end);

    let candidates = DECREASE_VERB
        .find_iter(sentence)
        .map(|m| (-1.0, Span::of(m)))
        .chain(INCREASE_VERB.find_iter(sentence).map(|m| (1.0, Span::of(m))));

    candidates
        .filter(|(_, span)| span.start >= lo && span.end <= hi)
        .min_by_key(|(_, span)| (span.gap(keyword), span.start))
        .map(|(sign, _)| sign)
}

fn distinct_values(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for v in values {
        if !out.iter().any(|seen| (seen - v).abs() < 1e-9) {
            out.push(*v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use billscope_core::policy::{COMMUNITY, PUBLIC};

    #[test]
    fn funding_cut_for_public_universities() {
        let p = extract("This bill reduces state funding for public universities by 10 percent.");
        assert_eq!(p.funding_change_pct, Some(-10.0));
        assert!(p.affected_institution_types.contains(PUBLIC));
        assert!(p.confidence >= 0.6, "confidence {}", p.confidence);
        assert_eq!(p.extraction_method, ExtractionMethod::Rule);
    }

    #[test]
    fn funding_increase_is_positive() {
        let p = extract("State appropriations to community colleges shall increase by 4%.");
        assert_eq!(p.funding_change_pct, Some(4.0));
        assert!(p.affected_institution_types.contains(COMMUNITY));
    }

    #[test]
    fn percent_before_keyword() {
        let p = extract("The act imposes a 7.5 percent cut in state funding.");
        assert_eq!(p.funding_change_pct, Some(-7.5));
    }

    #[test]
    fn funding_and_cap_in_one_sentence_bind_separately() {
        let p = extract(
            "This bill reduces state funding for public universities by 10 percent and caps tuition increases at 3 percent.",
        );
        assert_eq!(p.funding_change_pct, Some(-10.0));
        assert_eq!(p.tuition_cap_pct, Some(3.0));
    }

    #[test]
    fn wage_range_becomes_delta() {
        let p = extract("The minimum wage for student workers rises from $15.00 to $17.50 per hour.");
        assert_eq!(p.min_wage_change, Some(2.5));
    }

    #[test]
    fn childcare_subsidy_amount() {
        let p = extract("Student parents receive a childcare subsidy of $3,000 per year.");
        assert_eq!(p.childcare_subsidy, Some(3_000.0));
        assert!(p.funding_change_pct.is_none());
    }

    #[test]
    fn vague_text_scores_low_with_null_fields() {
        let p = extract("substantial cuts are expected");
        assert!(p.confidence < 0.3);
        assert_eq!(p.numeric_field_count(), 0);
        assert!(p.affected_institution_types.is_empty());
    }

    #[test]
    fn undirected_funding_percent_is_vague() {
        let e = scan("Funding is set at 95 percent of the prior year.");
        assert_eq!(e.category(PolicyField::FundingChangePct), CategoryEvidence::Vague);
    }

    #[test]
    fn conflicting_values_are_contradictory() {
        let e = scan(
            "Section 2 reduces state funding by 10 percent. Section 9 reduces state funding by 12 percent.",
        );
        assert_eq!(
            e.category(PolicyField::FundingChangePct),
            CategoryEvidence::Contradictory {
                first: -10.0,
                second: -12.0
            }
        );
        assert_eq!(e.value(PolicyField::FundingChangePct), Some(-10.0));
        assert_eq!(e.contradictory_fields(), vec![PolicyField::FundingChangePct]);
    }

    #[test]
    fn repeated_identical_value_is_not_contradictory() {
        let e = scan("Funding is reduced by 10 percent. Again, funding is reduced by 10 percent.");
        assert_eq!(
            e.category(PolicyField::FundingChangePct),
            CategoryEvidence::Numeric(-10.0)
        );
    }

    #[test]
    fn empty_text_is_zero_confidence() {
        let p = extract("");
        assert_eq!(p, PolicyParameters::empty());
    }

    #[test]
    fn sentence_split_ignores_decimal_points() {
        let parts = sentences("Raise it by $2.50 now. Then stop; done");
        assert_eq!(parts, vec!["Raise it by $2.50 now.", "Then stop;", "done"]);
    }
}
