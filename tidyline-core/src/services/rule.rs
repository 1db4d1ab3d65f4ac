//! Rule service - rule management and application
//!
//! Orchestrates the pure rule engine (validation, evaluation, application
//! policy) against a [`RuleStore`]. This is where manual-override
//! protection is enforced and where bulk outcomes are turned into grouped
//! writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::rule::{
    apply_rules, group_outcomes, validate_rule_conditions, validate_value, RuleOutcome,
    TransactionContext, ValidationResult,
};
use crate::domain::{AccountContext, NewRule, Rule, RuleConditions, RuleUpdate};
use crate::ports::RuleStore;
use crate::services::logging::{events, LogEvent, LoggingService};

/// Summary of a bulk re-application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkApplyResult {
    /// Active rules considered
    pub rules_evaluated: usize,
    /// Eligible transactions evaluated
    pub transactions_evaluated: usize,
    /// Transactions that got at least one target
    pub transactions_matched: usize,
    pub groups_written: usize,
    /// Groups whose write failed and was skipped
    pub groups_failed: usize,
    /// Rows actually updated across all written groups
    pub updated_count: usize,
}

/// A created or updated rule, plus the backfill run if one was requested
#[derive(Debug, Clone, Serialize)]
pub struct RuleChange {
    pub rule: Rule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backfill: Option<BulkApplyResult>,
}

/// Rule management and application for one store
#[derive(Clone)]
pub struct RuleService {
    store: Arc<dyn RuleStore>,
    logger: Option<Arc<LoggingService>>,
    backfill_includes_manual: bool,
}

impl RuleService {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            logger: None,
            backfill_includes_manual: false,
        }
    }

    /// Record rule events in the given log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Whether backfills after create/update also touch fully manual transactions
    pub fn with_backfill_includes_manual(mut self, include: bool) -> Self {
        self.backfill_includes_manual = include;
        self
    }

    /// Logging never fails an operation
    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(event);
        }
    }

    // === Validation ===

    /// Dry-validate a raw rule body; on success the result carries the
    /// normalized conditions
    pub fn validate_rule(&self, raw: &str) -> ValidationResult {
        validate_rule_conditions(raw)
    }

    fn checked_conditions(body: &serde_json::Value) -> Result<RuleConditions> {
        validate_value(body)
            .into_conditions()
            .map_err(Error::InvalidConditions)
    }

    // === Rule management ===

    /// Create a rule from a request
    ///
    /// The body is validated and stored in normalized form. Without an
    /// explicit priority the rule goes after the user's existing rules.
    pub fn create_rule(&self, user_id: &str, new: NewRule) -> Result<RuleChange> {
        let conditions = Self::checked_conditions(&new.conditions)?;

        let mut rule = Rule::new(user_id, new.rule_name.trim(), conditions);
        rule.category_id = new.category_id;
        rule.merchant = Rule::normalize_merchant(new.merchant.as_deref());
        rule.rule_source = new.rule_source.unwrap_or_default();
        rule.priority_order = match new.priority_order {
            Some(priority) => priority,
            None => self.store.max_priority(user_id)?.map_or(0, |max| max + 1),
        };
        rule.validate().map_err(Error::validation)?;

        self.store.insert_rule(&rule)?;
        self.log(LogEvent::new(events::RULE_CREATED).with_rule(rule.rule_id));

        self.finish_change(user_id, rule, new.backfill)
    }

    /// Apply a partial update to a rule
    pub fn update_rule(&self, user_id: &str, rule_id: Uuid, update: RuleUpdate) -> Result<RuleChange> {
        let mut rule = self.get_rule(user_id, rule_id)?;

        if let Some(name) = update.rule_name {
            rule.rule_name = name.trim().to_string();
        }
        if let Some(body) = update.conditions {
            rule.conditions = Self::checked_conditions(&body)?;
        }
        if let Some(category_id) = update.category_id {
            rule.category_id = category_id;
        }
        if let Some(merchant) = update.merchant {
            rule.merchant = Rule::normalize_merchant(merchant.as_deref());
        }
        if let Some(is_active) = update.is_active {
            rule.is_active = is_active;
        }
        if let Some(priority) = update.priority_order {
            rule.priority_order = priority;
        }
        rule.validate().map_err(Error::validation)?;
        rule.updated_at = Utc::now();

        self.store.update_rule(&rule)?;
        self.log(LogEvent::new(events::RULE_UPDATED).with_rule(rule.rule_id));

        self.finish_change(user_id, rule, update.backfill)
    }

    fn finish_change(&self, user_id: &str, rule: Rule, backfill: bool) -> Result<RuleChange> {
        if !backfill {
            return Ok(RuleChange { rule, backfill: None });
        }

        let result = self.apply_to_existing(user_id, None, self.backfill_includes_manual)?;
        // Usage counters moved during the backfill
        let rule = self.store.get_rule(user_id, rule.rule_id)?.unwrap_or(rule);
        Ok(RuleChange {
            rule,
            backfill: Some(result),
        })
    }

    /// Turn a rule on or off
    pub fn set_active(&self, user_id: &str, rule_id: Uuid, is_active: bool) -> Result<Rule> {
        let update = RuleUpdate {
            is_active: Some(is_active),
            ..Default::default()
        };
        Ok(self.update_rule(user_id, rule_id, update)?.rule)
    }

    pub fn delete_rule(&self, user_id: &str, rule_id: Uuid) -> Result<()> {
        if !self.store.delete_rule(user_id, rule_id)? {
            return Err(Error::not_found(format!("rule {}", rule_id)));
        }
        self.log(LogEvent::new(events::RULE_DELETED).with_rule(rule_id));
        Ok(())
    }

    pub fn get_rule(&self, user_id: &str, rule_id: Uuid) -> Result<Rule> {
        self.store
            .get_rule(user_id, rule_id)?
            .ok_or_else(|| Error::not_found(format!("rule {}", rule_id)))
    }

    /// All rules (active or not) in evaluation order
    pub fn list_rules(&self, user_id: &str) -> Result<Vec<Rule>> {
        self.store.list_rules(user_id)
    }

    // === Application ===

    /// Run the active rules against one stored transaction and write the
    /// targets that were not set by hand
    ///
    /// Returns what was written. A transaction whose category and merchant
    /// were both set by hand is not evaluated at all.
    pub fn apply_to_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<RuleOutcome> {
        let tx = self
            .store
            .fetch_transaction(user_id, transaction_id)?
            .ok_or_else(|| Error::not_found(format!("transaction {}", transaction_id)))?;

        if tx.fully_manual() {
            return Ok(RuleOutcome::default());
        }

        let rules = self.store.fetch_active_rules(user_id)?;
        let account = self.store.fetch_account_context(user_id, tx.account_id)?;
        let outcome = apply_rules(&rules, &TransactionContext::new(&tx, account.as_ref()))
            .without_manual_targets(tx.category_manually_set, tx.merchant_manually_set);

        if outcome.is_empty() {
            return Ok(outcome);
        }

        let updated = self.store.persist_grouped_update(
            user_id,
            outcome.category_id,
            outcome.merchant.as_deref(),
            &[tx.id],
        )?;
        if updated > 0 {
            let usage = outcome
                .contributing_rules()
                .into_iter()
                .map(|rule_id| (rule_id, updated as u64))
                .collect();
            self.record_usage(usage);
        }

        Ok(outcome)
    }

    /// Re-run the active rules over stored transactions
    ///
    /// `transaction_ids` narrows the run; `None` means every transaction of
    /// the user. Outcomes are written in one batch per distinct
    /// `(category_id, merchant)` pair. A batch that fails to write is
    /// logged and skipped; the others are still attempted.
    pub fn apply_to_existing(
        &self,
        user_id: &str,
        transaction_ids: Option<&[Uuid]>,
        include_manually_set: bool,
    ) -> Result<BulkApplyResult> {
        let rules = self.store.fetch_active_rules(user_id)?;
        let mut result = BulkApplyResult {
            rules_evaluated: rules.len(),
            ..Default::default()
        };
        if rules.is_empty() {
            return Ok(result);
        }

        let transactions = self.store.fetch_transactions_eligible_for_rule_application(
            user_id,
            transaction_ids,
            include_manually_set,
        )?;
        result.transactions_evaluated = transactions.len();

        let mut accounts: HashMap<Uuid, Option<AccountContext>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            if !accounts.contains_key(&tx.account_id) {
                let context = self.store.fetch_account_context(user_id, tx.account_id)?;
                accounts.insert(tx.account_id, context);
            }
            let account = accounts.get(&tx.account_id).and_then(Option::as_ref);

            let mut outcome = apply_rules(&rules, &TransactionContext::new(tx, account));
            if !include_manually_set {
                outcome = outcome
                    .without_manual_targets(tx.category_manually_set, tx.merchant_manually_set);
            }
            outcomes.push((tx.id, outcome));
        }

        let groups = group_outcomes(outcomes);
        result.transactions_matched = groups.iter().map(|g| g.transaction_ids.len()).sum();

        let mut usage: BTreeMap<Uuid, u64> = BTreeMap::new();
        for group in groups {
            match self.store.persist_grouped_update(
                user_id,
                group.category_id,
                group.merchant.as_deref(),
                &group.transaction_ids,
            ) {
                Ok(updated) => {
                    result.groups_written += 1;
                    result.updated_count += updated;
                    for (rule_id, count) in group.rule_usage {
                        *usage.entry(rule_id).or_insert(0) += count;
                    }
                }
                Err(e) => {
                    result.groups_failed += 1;
                    self.log(
                        LogEvent::new(events::RULE_GROUP_UPDATE_FAILED)
                            .with_count(group.transaction_ids.len())
                            .with_error(e.to_string()),
                    );
                }
            }
        }

        self.record_usage(usage);
        self.log(LogEvent::new(events::RULES_APPLIED).with_count(result.updated_count));

        Ok(result)
    }

    /// Bump usage counters; a failure here does not undo the writes
    fn record_usage(&self, usage: BTreeMap<Uuid, u64>) {
        let applied_at = Utc::now();
        for (rule_id, count) in usage {
            if let Err(e) = self.store.record_rule_applications(rule_id, count, applied_at) {
                self.log(
                    LogEvent::new(events::RULES_APPLIED)
                        .with_rule(rule_id)
                        .with_error(format!("failed to record rule usage: {}", e)),
                );
            }
        }
    }
}
