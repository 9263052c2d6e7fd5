//! Semantic pattern classification
//!
//! Rules are evaluated top to bottom and the first match wins. Later rules
//! that also match are reported as ambiguous, never as a failure.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::types::{SemanticPattern, TypeFamily};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles")
});

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid pattern compiles")
});

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("date pattern compiles"));

/// Share of values a regex rule needs to match
const MATCH_SHARE: f64 = 0.9;

/// Average value length from which a text column reads as prose
const FREE_TEXT_MIN_AVG_LEN: f64 = 20.0;

/// What the rules look at for one column
pub struct PatternInput<'a> {
    /// Non-null values
    pub values: &'a [&'a str],
    pub distinct: u64,
    pub family: TypeFamily,
    pub is_primary_key: bool,
    pub enumeration_max_distinct: u64,
}

/// Result of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub pattern: SemanticPattern,
    pub ambiguous: Vec<SemanticPattern>,
}

type Rule = fn(&PatternInput<'_>) -> bool;

/// The ordered rule list
const RULES: &[(SemanticPattern, Rule)] = &[
    (SemanticPattern::Email, is_email),
    (SemanticPattern::Identifier, is_identifier),
    (SemanticPattern::Date, is_date),
    (SemanticPattern::Enumeration, is_enumeration),
    (SemanticPattern::FreeText, is_free_text),
];

fn share_matching(values: &[&str], regex: &Regex) -> f64 {
    let hits = values.iter().filter(|v| regex.is_match(v)).count();
    hits as f64 / values.len() as f64
}

fn is_email(input: &PatternInput<'_>) -> bool {
    share_matching(input.values, &EMAIL) >= MATCH_SHARE
}

fn is_identifier(input: &PatternInput<'_>) -> bool {
    if input.family == TypeFamily::Uuid || share_matching(input.values, &UUID) >= MATCH_SHARE {
        return true;
    }
    let unique = input.distinct as usize == input.values.len() && input.values.len() > 1;
    input.is_primary_key || (unique && input.family == TypeFamily::Integer)
}

fn is_date(input: &PatternInput<'_>) -> bool {
    input.family == TypeFamily::Temporal || share_matching(input.values, &DATE) >= MATCH_SHARE
}

fn is_enumeration(input: &PatternInput<'_>) -> bool {
    input.distinct <= input.enumeration_max_distinct
        && (input.distinct as f64) <= 0.5 * input.values.len() as f64
}

fn is_free_text(input: &PatternInput<'_>) -> bool {
    if input.family != TypeFamily::Text {
        return false;
    }
    let total: usize = input.values.iter().map(|v| v.chars().count()).sum();
    let with_spaces = input.values.iter().filter(|v| v.trim().contains(' ')).count();
    total as f64 / input.values.len() as f64 >= FREE_TEXT_MIN_AVG_LEN
        || with_spaces * 2 >= input.values.len()
}

/// Classify a column; columns without values stay unclassified
pub fn classify(input: &PatternInput<'_>) -> Classification {
    if input.values.is_empty() {
        return Classification {
            pattern: SemanticPattern::Unclassified,
            ambiguous: Vec::new(),
        };
    }

    let mut matched = RULES
        .iter()
        .filter(|(_, rule)| rule(input))
        .map(|(pattern, _)| *pattern);

    match matched.next() {
        Some(pattern) => Classification {
            pattern,
            ambiguous: matched.collect(),
        },
        None => Classification {
            pattern: SemanticPattern::Unclassified,
            ambiguous: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify_values(values: &[&str], family: TypeFamily, is_primary_key: bool) -> Classification {
        let distinct = values.iter().collect::<std::collections::HashSet<_>>().len() as u64;
        classify(&PatternInput {
            values,
            distinct,
            family,
            is_primary_key,
            enumeration_max_distinct: 20,
        })
    }

    #[test]
    fn test_email() {
        let c = classify_values(&["a@example.com", "b@example.org", "c@test.io"], TypeFamily::Text, false);
        assert_eq!(c.pattern, SemanticPattern::Email);
    }

    #[test]
    fn test_primary_key_is_identifier() {
        let c = classify_values(&["1", "2", "3"], TypeFamily::Integer, true);
        assert_eq!(c.pattern, SemanticPattern::Identifier);
    }

    #[test]
    fn test_uuid_identifier() {
        let c = classify_values(
            &["1b4e28ba-2fa1-11d2-883f-0016d3cca427", "6fa459ea-ee8a-3ca4-894e-db77e160355e"],
            TypeFamily::Text,
            false,
        );
        assert_eq!(c.pattern, SemanticPattern::Identifier);
    }

    #[test]
    fn test_date_strings() {
        let c = classify_values(&["2024-01-02", "2024-03-04 10:00:00"], TypeFamily::Text, false);
        assert_eq!(c.pattern, SemanticPattern::Date);
    }

    #[test]
    fn test_enumeration() {
        let values = ["open", "closed", "open", "open", "closed", "pending"];
        let c = classify_values(&values, TypeFamily::Text, false);
        assert_eq!(c.pattern, SemanticPattern::Enumeration);
        assert!(c.ambiguous.is_empty());
    }

    #[test]
    fn test_free_text() {
        let values = [
            "Arrived late but the box was intact",
            "Great service, would order again",
            "Missing one item from the order",
        ];
        let c = classify_values(&values, TypeFamily::Text, false);
        assert_eq!(c.pattern, SemanticPattern::FreeText);
    }

    #[test]
    fn test_first_rule_wins_and_rest_are_ambiguous() {
        // Repeated dates in a date column also look like an enumeration
        let values = ["2024-01-01", "2024-01-01", "2024-01-02", "2024-01-02"];
        let c = classify_values(&values, TypeFamily::Temporal, false);
        assert_eq!(c.pattern, SemanticPattern::Date);
        assert_eq!(c.ambiguous, vec![SemanticPattern::Enumeration]);
    }

    #[test]
    fn test_empty_is_unclassified() {
        let c = classify_values(&[], TypeFamily::Text, false);
        assert_eq!(c.pattern, SemanticPattern::Unclassified);
    }

    #[test]
    fn test_no_rule_matches() {
        let c = classify_values(&["12.5", "3.25", "7.75"], TypeFamily::Decimal, false);
        assert_eq!(c.pattern, SemanticPattern::Unclassified);
    }
}
