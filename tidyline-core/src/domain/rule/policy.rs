//! Rule application policy
//!
//! Decides what a rule set proposes for a transaction and how proposals for
//! many transactions are batched into writes.
//!
//! Targets are filled first-match-wins, independently per target: the first
//! matching rule (in priority order) that carries a category decides the
//! category, and the first matching rule that carries a merchant decides
//! the merchant. Bulk writes are batched by the exact
//! `(category_id, merchant)` pair.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use super::evaluate::TransactionContext;
use super::Rule;

/// What the rule set proposes for one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    /// Rule that supplied `category_id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_rule_id: Option<Uuid>,
    /// Rule that supplied `merchant`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_rule_id: Option<Uuid>,
}

impl RuleOutcome {
    /// Neither target was proposed
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none() && self.merchant.is_none()
    }

    /// Both targets were proposed
    pub fn is_complete(&self) -> bool {
        self.category_id.is_some() && self.merchant.is_some()
    }

    /// Drop targets the user set by hand
    pub fn without_manual_targets(mut self, category_manually_set: bool, merchant_manually_set: bool) -> Self {
        if category_manually_set {
            self.category_id = None;
            self.category_rule_id = None;
        }
        if merchant_manually_set {
            self.merchant = None;
            self.merchant_rule_id = None;
        }
        self
    }

    /// Distinct rules that contributed a target
    pub fn contributing_rules(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .category_rule_id
            .into_iter()
            .chain(self.merchant_rule_id)
            .collect();
        ids.dedup();
        ids
    }
}

/// Evaluate `rules` in the given order against one transaction
///
/// Inactive rules are skipped. Evaluation stops as soon as both targets
/// are filled.
pub fn apply_rules<'r>(
    rules: impl IntoIterator<Item = &'r Rule>,
    ctx: &TransactionContext<'_>,
) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    for rule in rules {
        if !rule.is_active {
            continue;
        }
        if !rule.conditions.matches(ctx) {
            continue;
        }

        if outcome.category_id.is_none() {
            if let Some(category_id) = rule.category_id {
                outcome.category_id = Some(category_id);
                outcome.category_rule_id = Some(rule.rule_id);
            }
        }
        if outcome.merchant.is_none() {
            if let Some(merchant) = &rule.merchant {
                outcome.merchant = Some(merchant.clone());
                outcome.merchant_rule_id = Some(rule.rule_id);
            }
        }

        if outcome.is_complete() {
            break;
        }
    }

    outcome
}

/// Transactions that share one outcome, written together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeGroup {
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    pub transaction_ids: Vec<Uuid>,
    /// Rule id -> number of transactions in this group it contributed to
    pub rule_usage: BTreeMap<Uuid, u64>,
}

/// Group outcomes by exact `(category_id, merchant)`; empty outcomes are
/// dropped. Groups come out in order of first appearance.
pub fn group_outcomes(outcomes: impl IntoIterator<Item = (Uuid, RuleOutcome)>) -> Vec<OutcomeGroup> {
    let mut groups: Vec<OutcomeGroup> = Vec::new();
    let mut index: HashMap<(Option<i64>, Option<String>), usize> = HashMap::new();

    for (transaction_id, outcome) in outcomes {
        if outcome.is_empty() {
            continue;
        }

        let key = (outcome.category_id, outcome.merchant.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(OutcomeGroup {
                category_id: outcome.category_id,
                merchant: outcome.merchant.clone(),
                transaction_ids: Vec::new(),
                rule_usage: BTreeMap::new(),
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.transaction_ids.push(transaction_id);
        for rule_id in outcome.contributing_rules() {
            *group.rule_usage.entry(rule_id).or_insert(0) += 1;
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::validation::validate_value;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn rule(priority: i32, body: serde_json::Value, category_id: Option<i64>, merchant: Option<&str>) -> Rule {
        let conditions = validate_value(&body).into_conditions().unwrap();
        let mut rule = Rule::new("user-1", format!("rule {}", priority), conditions);
        rule.priority_order = priority;
        rule.category_id = category_id;
        rule.merchant = merchant.map(str::to_string);
        rule
    }

    fn merchant_contains(text: &str) -> serde_json::Value {
        json!({"logic": "AND", "conditions": [
            {"field": "merchant", "operator": "contains", "value": text}
        ]})
    }

    fn ctx(merchant: &str) -> TransactionContext<'_> {
        TransactionContext {
            merchant: Some(merchant),
            amount: Some(Decimal::new(1299, 2)),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_match_wins_per_field() {
        let a = rule(1, merchant_contains("starbucks"), Some(3), None);
        let b = rule(2, merchant_contains("star"), None, Some("Starbucks"));
        let rules = vec![a.clone(), b.clone()];

        let outcome = apply_rules(&rules, &ctx("STARBUCKS #12"));
        assert_eq!(outcome.category_id, Some(3));
        assert_eq!(outcome.merchant.as_deref(), Some("Starbucks"));
        assert_eq!(outcome.category_rule_id, Some(a.rule_id));
        assert_eq!(outcome.merchant_rule_id, Some(b.rule_id));
    }

    #[test]
    fn test_earlier_rule_keeps_its_target() {
        let a = rule(1, merchant_contains("shell"), Some(10), Some("Shell"));
        let b = rule(2, merchant_contains("shell"), Some(11), Some("Shell Gas"));
        let outcome = apply_rules(&[a, b], &ctx("Shell Oil 5512"));
        assert_eq!(outcome.category_id, Some(10));
        assert_eq!(outcome.merchant.as_deref(), Some("Shell"));
    }

    #[test]
    fn test_stops_once_both_targets_filled() {
        let a = rule(1, merchant_contains("shell"), Some(10), Some("Shell"));
        let b = rule(2, merchant_contains("shell"), Some(11), None);
        let outcome = apply_rules(&[a.clone(), b], &ctx("Shell"));
        assert_eq!(outcome.contributing_rules(), vec![a.rule_id]);
    }

    #[test]
    fn test_inactive_and_non_matching_rules_skipped() {
        let mut inactive = rule(1, merchant_contains("target"), Some(1), None);
        inactive.is_active = false;
        let other = rule(2, merchant_contains("walmart"), Some(2), None);
        let outcome = apply_rules(&[inactive, other], &ctx("TARGET T-1234"));
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_without_manual_targets() {
        let outcome = RuleOutcome {
            category_id: Some(4),
            merchant: Some("Netflix".into()),
            category_rule_id: Some(Uuid::new_v4()),
            merchant_rule_id: Some(Uuid::new_v4()),
        };
        let filtered = outcome.without_manual_targets(true, false);
        assert_eq!(filtered.category_id, None);
        assert_eq!(filtered.category_rule_id, None);
        assert_eq!(filtered.merchant.as_deref(), Some("Netflix"));
    }

    #[test]
    fn test_group_outcomes_by_exact_pair() {
        let rule_id = Uuid::new_v4();
        let seven = RuleOutcome {
            category_id: Some(7),
            category_rule_id: Some(rule_id),
            ..Default::default()
        };
        let seven_with_merchant = RuleOutcome {
            merchant: Some("Costco".into()),
            merchant_rule_id: Some(rule_id),
            ..seven.clone()
        };

        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let groups = group_outcomes(vec![
            (ids[0], seven.clone()),
            (ids[1], RuleOutcome::default()),
            (ids[2], seven_with_merchant.clone()),
            (ids[3], seven.clone()),
            (ids[4], RuleOutcome::default()),
            (ids[5], seven),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].category_id, Some(7));
        assert_eq!(groups[0].merchant, None);
        assert_eq!(groups[0].transaction_ids, vec![ids[0], ids[3], ids[5]]);
        assert_eq!(groups[0].rule_usage.get(&rule_id), Some(&3));
        assert_eq!(groups[1].merchant.as_deref(), Some("Costco"));
        // Same rule supplied both targets: counted once for the transaction
        assert_eq!(groups[1].rule_usage.get(&rule_id), Some(&1));
    }
}
