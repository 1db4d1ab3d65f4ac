//! Rule evaluation against a single transaction
//!
//! Evaluation is pure and never fails: a field missing from the context, or
//! a regex that no longer compiles, simply makes the condition false.

use std::borrow::Cow;

use regex::RegexBuilder;
use rust_decimal::Decimal;

use super::grammar::{
    Condition, Logic, NumericCondition, NumericField, NumericPredicate, RuleConditions,
    StringField, TextCondition, TextPredicate,
};
use crate::domain::{AccountContext, Transaction};

/// The transaction and account values a rule can see
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransactionContext<'a> {
    pub merchant: Option<&'a str>,
    pub description: Option<&'a str>,
    pub direction: Option<i32>,
    pub account_type: Option<&'a str>,
    pub account_name: Option<&'a str>,
    pub bank: Option<&'a str>,
    pub currency: Option<&'a str>,
    /// Magnitude of the amount; the sign is carried by `direction`
    pub amount: Option<Decimal>,
}

impl<'a> TransactionContext<'a> {
    /// Combine a transaction with its account (if the account is known)
    ///
    /// Ledger amounts are signed (money out is negative). Rules see the
    /// magnitude, so `amount` bounds stay non-negative for debits too.
    pub fn new(tx: &'a Transaction, account: Option<&'a AccountContext>) -> Self {
        Self {
            merchant: tx.merchant.as_deref(),
            description: tx.description.as_deref(),
            direction: tx.direction,
            account_type: account.and_then(|a| a.account_type.as_deref()),
            account_name: account.and_then(|a| a.name.as_deref()),
            bank: account.and_then(|a| a.bank.as_deref()),
            currency: tx.currency.as_deref(),
            amount: Some(tx.amount.abs()),
        }
    }

    fn text(&self, field: StringField) -> Option<&'a str> {
        match field {
            StringField::Merchant => self.merchant,
            StringField::Description => self.description,
            StringField::AccountType => self.account_type,
            StringField::AccountName => self.account_name,
            StringField::Bank => self.bank,
            StringField::Currency => self.currency,
        }
    }

    fn number(&self, field: NumericField) -> Option<Decimal> {
        match field {
            NumericField::Amount => self.amount,
            NumericField::Direction => self.direction.map(Decimal::from),
        }
    }
}

/// Evaluate a rule body; AND stops at the first false condition, OR at the
/// first true one. An empty body never matches.
pub fn evaluate(rule: &RuleConditions, ctx: &TransactionContext<'_>) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    match rule.logic {
        Logic::And => rule.conditions.iter().all(|c| evaluate_condition(c, ctx)),
        Logic::Or => rule.conditions.iter().any(|c| evaluate_condition(c, ctx)),
    }
}

/// Evaluate one condition
pub fn evaluate_condition(condition: &Condition, ctx: &TransactionContext<'_>) -> bool {
    match condition {
        Condition::Text(c) => evaluate_text(c, ctx),
        Condition::Numeric(c) => evaluate_numeric(c, ctx),
    }
}

fn evaluate_text(condition: &TextCondition, ctx: &TransactionContext<'_>) -> bool {
    let Some(raw) = ctx.text(condition.field) else {
        return false;
    };

    let case_sensitive = condition.is_case_sensitive();
    let fold = |s: &str| -> String {
        if case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let value: Cow<'_, str> = if case_sensitive {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(raw.to_lowercase())
    };

    match &condition.predicate {
        TextPredicate::Equals(expected) => *value == fold(expected),
        TextPredicate::NotEquals(expected) => *value != fold(expected),
        TextPredicate::Contains(needle) => value.contains(&*fold(needle)),
        TextPredicate::NotContains(needle) => !value.contains(&*fold(needle)),
        TextPredicate::StartsWith(prefix) => value.starts_with(&*fold(prefix)),
        TextPredicate::EndsWith(suffix) => value.ends_with(&*fold(suffix)),
        TextPredicate::ContainsAny(needles) => {
            needles.iter().any(|needle| value.contains(&*fold(needle)))
        }
        // Matched against the unfolded value; case handling comes from the flag
        TextPredicate::Regex(pattern) => RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map(|re| re.is_match(raw))
            .unwrap_or(false),
    }
}

fn evaluate_numeric(condition: &NumericCondition, ctx: &TransactionContext<'_>) -> bool {
    let Some(value) = ctx.number(condition.field) else {
        return false;
    };

    match condition.predicate {
        NumericPredicate::Equals(expected) => value == expected,
        NumericPredicate::NotEquals(expected) => value != expected,
        NumericPredicate::GreaterThan(bound) => value > bound,
        NumericPredicate::LessThan(bound) => value < bound,
        NumericPredicate::Between { min, max } => value >= min && value <= max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::validation::validate_value;
    use serde_json::json;

    fn rule(body: serde_json::Value) -> RuleConditions {
        let result = validate_value(&body);
        assert!(result.valid, "{}", result);
        result.conditions.unwrap()
    }

    fn text(field: StringField, predicate: TextPredicate, case_sensitive: bool) -> Condition {
        Condition::Text(TextCondition {
            field,
            predicate,
            case_sensitive: Some(case_sensitive),
        })
    }

    fn merchant(name: &str) -> TransactionContext<'_> {
        TransactionContext {
            merchant: Some(name),
            ..Default::default()
        }
    }

    #[test]
    fn test_coffee_scenario_matches() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [
                {"field": "merchant", "operator": "contains_any",
                 "values": ["starbucks", "dunkin"], "case_sensitive": false},
                {"field": "amount", "operator": "between", "min_value": 2.00, "max_value": 25.00}
            ]
        }));
        let ctx = TransactionContext {
            merchant: Some("STARBUCKS #402"),
            amount: Some(Decimal::new(450, 2)),
            ..Default::default()
        };
        assert!(evaluate(&rule, &ctx));
    }

    #[test]
    fn test_case_fold_equivalence() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [{"field": "merchant", "operator": "equals", "value": "Starbucks"}]
        }));
        assert!(evaluate(&rule, &merchant("STARBUCKS")));
        assert!(evaluate(&rule, &merchant("starbucks")));
    }

    #[test]
    fn test_case_sensitive_comparison() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [{"field": "merchant", "operator": "starts_with", "value": "AMZN",
                            "case_sensitive": true}]
        }));
        assert!(evaluate(&rule, &merchant("AMZN Mktp US")));
        assert!(!evaluate(&rule, &merchant("amzn mktp us")));
    }

    #[test]
    fn test_and_or_short_circuit() {
        let never = text(StringField::Merchant, TextPredicate::Equals("nope".into()), false);
        let always = text(StringField::Merchant, TextPredicate::Contains("shell".into()), false);
        let ctx = merchant("Shell Oil");

        let and = RuleConditions::new(Logic::And, vec![never.clone(), always.clone()]);
        let or = RuleConditions::new(Logic::Or, vec![never, always]);
        assert!(!evaluate(&and, &ctx));
        assert!(evaluate(&or, &ctx));
    }

    #[test]
    fn test_empty_rule_never_matches() {
        let ctx = merchant("anything");
        assert!(!evaluate(&RuleConditions::new(Logic::And, vec![]), &ctx));
        assert!(!evaluate(&RuleConditions::new(Logic::Or, vec![]), &ctx));
    }

    #[test]
    fn test_between_is_inclusive() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [{"field": "amount", "operator": "between",
                            "min_value": 2.00, "max_value": 25.00}]
        }));
        let at = |amount: Decimal| TransactionContext {
            amount: Some(amount),
            ..Default::default()
        };
        assert!(evaluate(&rule, &at(Decimal::new(200, 2))));
        assert!(evaluate(&rule, &at(Decimal::new(2500, 2))));
        assert!(!evaluate(&rule, &at(Decimal::new(199, 2))));
        assert!(!evaluate(&rule, &at(Decimal::new(2501, 2))));
    }

    #[test]
    fn test_absent_fields_are_false() {
        let ctx = TransactionContext::default();
        for body in [
            json!({"field": "merchant", "operator": "not_equals", "value": "x"}),
            json!({"field": "bank", "operator": "not_contains", "value": "x"}),
            json!({"field": "amount", "operator": "not_equals", "value": 1}),
            json!({"field": "direction", "operator": "less_than", "value": 2}),
        ] {
            let rule = rule(json!({"logic": "OR", "conditions": [body]}));
            assert!(!evaluate(&rule, &ctx));
        }
    }

    #[test]
    fn test_string_operators() {
        let ctx = TransactionContext {
            description: Some("POS Purchase WHOLEFDS MKT 10234"),
            ..Default::default()
        };
        let check = |operator: &str, value: serde_json::Value| {
            let rule = rule(json!({
                "logic": "AND",
                "conditions": [{"field": "description", "operator": operator, "value": value}]
            }));
            evaluate(&rule, &ctx)
        };

        assert!(check("contains", json!("wholefds")));
        assert!(!check("not_contains", json!("wholefds")));
        assert!(check("starts_with", json!("pos purchase")));
        assert!(check("ends_with", json!("10234")));
        assert!(!check("equals", json!("pos")));
        assert!(check("not_equals", json!("pos")));
    }

    #[test]
    fn test_regex_uses_original_value() {
        let ctx = merchant("Uber *TRIP");
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [{"field": "merchant", "operator": "regex", "value": "^uber \\*trip$"}]
        }));
        assert!(evaluate(&rule, &ctx));

        let sensitive = rule_cs("^uber");
        assert!(!evaluate(&sensitive, &ctx));
    }

    fn rule_cs(pattern: &str) -> RuleConditions {
        rule(json!({
            "logic": "AND",
            "conditions": [{"field": "merchant", "operator": "regex", "value": pattern,
                            "case_sensitive": true}]
        }))
    }

    #[test]
    fn test_uncompilable_regex_is_false() {
        let broken = RuleConditions::new(
            Logic::Or,
            vec![
                text(StringField::Merchant, TextPredicate::Regex("(".into()), false),
                text(StringField::Merchant, TextPredicate::Contains("lyft".into()), false),
            ],
        );
        assert!(!evaluate(&broken, &merchant("Uber")));
        assert!(evaluate(&broken, &merchant("Lyft Ride")));
    }

    #[test]
    fn test_debit_amount_seen_as_magnitude() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [
                {"field": "amount", "operator": "between", "min_value": 2.00, "max_value": 25.00},
                {"field": "direction", "operator": "equals", "value": 0}
            ]
        }));
        let mut tx = Transaction::new(
            uuid::Uuid::new_v4(),
            "user-1",
            uuid::Uuid::new_v4(),
            Decimal::new(-450, 2),
            chrono::NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        );
        tx.direction = Some(0);

        let ctx = TransactionContext::new(&tx, None);
        assert_eq!(ctx.amount, Some(Decimal::new(450, 2)));
        assert!(evaluate(&rule, &ctx));

        tx.direction = Some(1);
        assert!(!evaluate(&rule, &TransactionContext::new(&tx, None)));
    }

    #[test]
    fn test_direction_and_account_fields() {
        let rule = rule(json!({
            "logic": "AND",
            "conditions": [
                {"field": "direction", "operator": "equals", "value": 1},
                {"field": "account_type", "operator": "equals", "value": "checking"},
                {"field": "bank", "operator": "contains", "value": "chase"}
            ]
        }));
        let ctx = TransactionContext {
            direction: Some(1),
            account_type: Some("Checking"),
            bank: Some("JPMorgan Chase"),
            ..Default::default()
        };
        assert!(evaluate(&rule, &ctx));
        assert!(!evaluate(&rule, &TransactionContext { direction: Some(0), ..ctx }));
    }
}
