//! Confidence scoring for rule-based extraction.

use billscope_core::PolicyField;
use billscope_core::policy::clamp_confidence;

use crate::rules::RuleEvidence;

/// Credit for an institution-type keyword, given only alongside a number.
pub const TYPE_KEYWORD_BONUS: f64 = 0.15;
pub const VAGUE_MENTION_BONUS: f64 = 0.05;
pub const VAGUE_BONUS_CAP: f64 = 0.20;
pub const CONTRADICTION_PENALTY: f64 = 0.15;

/// Credit for one unambiguous numeric match in a category.
pub fn field_weight(field: PolicyField) -> f64 {
    match field {
        PolicyField::FundingChangePct => 0.50,
        PolicyField::MinWageChange => 0.30,
        PolicyField::ChildcareSubsidy => 0.30,
        PolicyField::TuitionCapPct => 0.25,
    }
}

/// Score rule evidence into `[0, 1]`.
///
/// Non-decreasing in the number of unambiguous numeric categories. Text
/// with no numbers at all scores at most [`VAGUE_BONUS_CAP`].
pub fn score(evidence: &RuleEvidence) -> f64 {
    let numeric = evidence.numeric_fields();
    let mut total: f64 = numeric.iter().map(|f| field_weight(*f)).sum();

    if !numeric.is_empty() && !evidence.institution_types.is_empty() {
        total += TYPE_KEYWORD_BONUS;
    }

    total += (evidence.vague_mentions() as f64 * VAGUE_MENTION_BONUS).min(VAGUE_BONUS_CAP);
    total -= evidence.contradictory_fields().len() as f64 * CONTRADICTION_PENALTY;

    clamp_confidence(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::scan;
    use proptest::prelude::*;

    #[test]
    fn type_keyword_alone_earns_nothing() {
        let e = scan("This act concerns public universities.");
        assert_eq!(score(&e), 0.0);
    }

    #[test]
    fn vague_bonus_is_capped() {
        let e = scan(
            "Substantial cuts. Major reductions. Sharp increases. Dramatic changes. Deep cuts. Sweeping changes.",
        );
        assert_eq!(e.vague_cues, 6);
        assert!((score(&e) - VAGUE_BONUS_CAP).abs() < 1e-9);
    }

    #[test]
    fn contradiction_costs_confidence() {
        let clean = scan("Funding is reduced by 10 percent.");
        let conflicting = scan("Funding is reduced by 10 percent. Funding is reduced by 20 percent.");
        assert!(score(&conflicting) < score(&clean));
    }

    #[test]
    fn all_categories_clamp_to_one() {
        let e = scan(
            "Funding for public universities is cut by 10 percent. \
             The minimum wage rises by $2. \
             A childcare subsidy of $3,000 is created. \
             A tuition cap of 3 percent applies.",
        );
        assert_eq!(e.numeric_fields().len(), 4);
        assert_eq!(score(&e), 1.0);
    }

    /// Self-contained clauses, each anchoring at most one number.
    const CLAUSES: [&str; 4] = [
        "state funding is reduced by 10 percent",
        "childcare grants of $500 are created",
        "tuition increases are capped at 3 percent",
        "public universities are covered",
    ];

    const WAGE_CLAUSE: &str = "the minimum wage rises by $2";

    #[test]
    fn numeric_clause_in_the_same_sentence_adds_confidence() {
        let before = scan("State funding is reduced by 10 percent for public universities.");
        let after = scan(
            "State funding is reduced by 10 percent for public universities, \
             and the minimum wage rises by $2.",
        );
        assert_eq!(after.value(PolicyField::FundingChangePct), Some(-10.0));
        assert_eq!(after.value(PolicyField::MinWageChange), Some(2.0));
        assert!(score(&after) > score(&before));
    }

    proptest! {
        #[test]
        fn score_is_bounded_and_deterministic(text in "\\PC{0,300}") {
            let a = score(&scan(&text));
            let b = score(&scan(&text));
            prop_assert!((0.0..=1.0).contains(&a));
            prop_assert_eq!(a, b);
        }

        #[test]
        fn adding_a_numeric_match_never_lowers_confidence(text in "[a-z ]{0,200}") {
            let before = score(&scan(&text));
            let extended = format!("{text}. The minimum wage is raised by $2.");
            let after = score(&scan(&extended));
            prop_assert!(after >= before, "{} < {}", after, before);
        }

        #[test]
        fn numeric_clause_inside_a_sentence_never_lowers_confidence(
            clauses in proptest::sample::subsequence(CLAUSES.to_vec(), 0..=CLAUSES.len()),
            filler in proptest::collection::vec("[a-z]{1,12}( [a-z]{1,12}){0,3}", 0..3),
            at in any::<proptest::sample::Index>(),
        ) {
            let mut parts: Vec<String> = clauses.iter().map(|c| c.to_string()).collect();
            parts.extend(filler);
            let before = format!("{}.", parts.join(", and "));
            parts.insert(at.index(parts.len() + 1), WAGE_CLAUSE.to_string());
            let after = format!("{}.", parts.join(", and "));

            let before = score(&scan(&before));
            let after = score(&scan(&after));
            prop_assert!(after >= before, "{} < {}", after, before);
        }
    }
}
