//! Canonical form for validated rule bodies
//!
//! The logic operator is already canonical once parsed (it only serializes
//! uppercase). What remains is case handling on text conditions: an absent
//! `case_sensitive` becomes an explicit `false`, and comparison values of
//! case-insensitive conditions are lowercased so the stored body compares
//! the same way it is evaluated. Running this twice changes nothing.
//!
//! Regex patterns are the exception and are stored as written: lowercasing
//! would turn escapes such as `\D`, `\W` or `\P{..}` into their opposites,
//! and the evaluator adds the case-insensitive flag instead.

use super::grammar::{Condition, RuleConditions, TextCondition, TextPredicate};

/// Canonicalize a validated rule body
///
/// Case-insensitive text values are lowercased, except regex patterns.
pub fn normalize(rule: RuleConditions) -> RuleConditions {
    RuleConditions {
        logic: rule.logic,
        conditions: rule.conditions.into_iter().map(normalize_condition).collect(),
    }
}

fn normalize_condition(condition: Condition) -> Condition {
    match condition {
        Condition::Numeric(c) => Condition::Numeric(c),
        Condition::Text(c) => {
            let case_sensitive = c.is_case_sensitive();
            let predicate = match c.predicate {
                predicate @ TextPredicate::Regex(_) => predicate,
                predicate if case_sensitive => predicate,
                predicate => predicate.map_values(|v| v.to_lowercase()),
            };
            Condition::Text(TextCondition {
                field: c.field,
                predicate,
                case_sensitive: Some(case_sensitive),
            })
        }
    }
}
