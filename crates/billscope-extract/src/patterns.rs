//! Compiled patterns for the rule engine.
//!
//! Entities (money, percentages) and cue words (category keywords,
//! directional verbs, institution types) are matched separately and
//! joined per sentence by [`crate::rules`].

use std::sync::LazyLock;

use billscope_core::PolicyField;
use billscope_core::policy::{COMMUNITY, PRIVATE, PUBLIC};
use regex::Regex;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid extraction regex")
}

// ── Entities ──

/// `$1,200`, `$2.50`, `$2.5 million`, `$3B`.
pub(crate) static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\$\s?((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)(?:\s*(million|billion|thousand)\b|\s?([mbk])\b)?",
    )
});

/// `10 percent`, `4%`, `3.5 percentage points`, `2 per cent`.
pub(crate) static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)(\d+(?:\.\d+)?)\s*(?:%|percentage\s+points?\b|percent\b|per\s+cent\b)")
});

/// `from $15.00 to $17.00`: a change expressed as old and new values.
pub(crate) static MONEY_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\bfrom\s+\$\s?((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)\s+to\s+\$\s?((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)",
    )
});

/// Sentence and clause boundaries.
pub(crate) static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| compile(r"[.;!?](?:\s+|$)"));

// ── Category keywords ──

pub(crate) struct CategoryPattern {
    pub field: PolicyField,
    pub regex: Regex,
}

pub(crate) static CATEGORY_KEYWORDS: LazyLock<Vec<CategoryPattern>> = LazyLock::new(|| {
    vec![
        CategoryPattern {
            field: PolicyField::FundingChangePct,
            regex: compile(
                r"(?i)\b(?:funding|appropriations?|budget|allocations?|state\s+aid|operating\s+support)\b",
            ),
        },
        CategoryPattern {
            field: PolicyField::MinWageChange,
            regex: compile(r"(?i)\b(?:minimum|min\.?)\s+(?:hourly\s+)?wages?\b"),
        },
        CategoryPattern {
            field: PolicyField::ChildcareSubsidy,
            regex: compile(r"(?i)\bchild[\s-]?care\b"),
        },
        CategoryPattern {
            field: PolicyField::TuitionCapPct,
            regex: compile(
                r"(?i)\btuition\s+(?:increase\s+)?(?:caps?|ceilings?|limits?)\b|\b(?:caps?|ceilings?|limits?)\s+(?:on\s+)?(?:annual\s+)?tuition\b|\btuition\s+(?:increases?\s+)?(?:shall\s+be\s+|are\s+|is\s+)?(?:capped|limited)\b",
            ),
        },
    ]
});

/// Which entity kind a category binds to.
pub(crate) fn binds_to_percent(field: PolicyField) -> bool {
    matches!(
        field,
        PolicyField::FundingChangePct | PolicyField::TuitionCapPct
    )
}

// ── Direction ──

pub(crate) static DECREASE_VERB: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:cuts?|cutting|reduc\w*|decreas\w*|lower\w*|slash\w*|eliminat\w*|rescind\w*)\b")
});

pub(crate) static INCREASE_VERB: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:increas\w*|rais\w*|rises?|rising|boost\w*|expand\w*|adds?|adding|grow\w*)\b")
});

/// Qualitative change language with no number attached.
pub(crate) static VAGUE_CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(?:substantial|significant|modest|considerable|major|sharp|dramatic|deep|sweeping)\s+(?:cuts?|reductions?|increases?|changes?|investments?)\b",
    )
});

// ── Institution types ──

pub(crate) struct TypePattern {
    pub tag: &'static str,
    pub regex: Regex,
}

pub(crate) static INSTITUTION_TYPES: LazyLock<Vec<TypePattern>> = LazyLock::new(|| {
    vec![
        TypePattern {
            tag: PUBLIC,
            regex: compile(
                r"(?i)\bpublic\s+(?:universit(?:y|ies)|colleges?|institutions?|four-year)\b|\bstate\s+(?:universit(?:y|ies)|colleges?)\b",
            ),
        },
        TypePattern {
            tag: PRIVATE,
            regex: compile(
                r"(?i)\bprivate\s+(?:nonprofit\s+|non-profit\s+|for-profit\s+)?(?:universit(?:y|ies)|colleges?|institutions?)\b",
            ),
        },
        TypePattern {
            tag: COMMUNITY,
            regex: compile(
                r"(?i)\bcommunity\s+colleges?\b|\btwo-year\s+(?:colleges?|institutions?)\b",
            ),
        },
    ]
});

/// Parse a numeric capture, tolerating thousands separators.
pub(crate) fn parse_number(digits: &str) -> Option<f64> {
    digits.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Multiplier for a money scale word or suffix.
pub(crate) fn money_multiplier(scale: Option<&str>) -> f64 {
    match scale.map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "thousand" || s == "k" => 1_000.0,
        Some(s) if s == "million" || s == "m" => 1_000_000.0,
        Some(s) if s == "billion" || s == "b" => 1_000_000_000.0,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money_values(text: &str) -> Vec<f64> {
        MONEY
            .captures_iter(text)
            .map(|c| {
                let scale = c.get(2).or(c.get(3)).map(|m| m.as_str());
                parse_number(&c[1]).unwrap() * money_multiplier(scale)
            })
            .collect()
    }

    #[test]
    fn money_amounts_with_scales() {
        assert_eq!(money_values("a grant of $1,200 per year"), vec![1_200.0]);
        assert_eq!(money_values("$2.5 million"), vec![2_500_000.0]);
        assert_eq!(money_values("$3B and $40k"), vec![3_000_000_000.0, 40_000.0]);
        assert_eq!(money_values("raised by $2.00 per hour"), vec![2.0]);
    }

    #[test]
    fn percentages_in_several_forms() {
        let values: Vec<f64> = PERCENT
            .captures_iter("10 percent, 4%, 3.5 percentage points, 2 per cent")
            .map(|c| parse_number(&c[1]).unwrap())
            .collect();
        assert_eq!(values, vec![10.0, 4.0, 3.5, 2.0]);
    }

    #[test]
    fn money_range_captures_both_ends() {
        let caps = MONEY_RANGE
            .captures("raises the minimum wage from $15.00 to $17.50 per hour")
            .unwrap();
        assert_eq!(&caps[1], "15.00");
        assert_eq!(&caps[2], "17.50");
    }

    #[test]
    fn tuition_cap_phrasings() {
        let cap = &CATEGORY_KEYWORDS
            .iter()
            .find(|c| c.field == PolicyField::TuitionCapPct)
            .unwrap()
            .regex;
        assert!(cap.is_match("a tuition cap of 3 percent"));
        assert!(cap.is_match("caps tuition increases at 3%"));
        assert!(cap.is_match("tuition increases shall be limited to 2 percent"));
        assert!(!cap.is_match("tuition revenue"));
    }

    #[test]
    fn institution_type_phrasings() {
        let tags = |text: &str| -> Vec<&str> {
            INSTITUTION_TYPES
                .iter()
                .filter(|t| t.regex.is_match(text))
                .map(|t| t.tag)
                .collect()
        };
        assert_eq!(tags("funding for public universities"), vec![PUBLIC]);
        assert_eq!(tags("state colleges and community colleges"), vec![PUBLIC, COMMUNITY]);
        assert_eq!(tags("private nonprofit institutions"), vec![PRIVATE]);
        assert!(tags("all students").is_empty());
    }
}
