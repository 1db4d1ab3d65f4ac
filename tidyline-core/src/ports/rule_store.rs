//! Rule store port - persistence the rule engine depends on

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{AccountContext, Rule, Transaction};

/// Storage for rules and the transaction data they are applied to
///
/// All lookups are scoped to one user. Implementations (adapters) provide
/// the actual storage; the services only ever talk to this trait.
pub trait RuleStore: Send + Sync {
    // === Rule definitions ===

    /// Insert a new rule
    fn insert_rule(&self, rule: &Rule) -> Result<()>;

    /// Overwrite an existing rule; errors with `NotFound` if it is missing
    fn update_rule(&self, rule: &Rule) -> Result<()>;

    /// Delete a rule; returns false if nothing was deleted
    fn delete_rule(&self, user_id: &str, rule_id: Uuid) -> Result<bool>;

    /// Get a rule by id
    fn get_rule(&self, user_id: &str, rule_id: Uuid) -> Result<Option<Rule>>;

    /// All rules of a user (active or not), by ascending priority
    fn list_rules(&self, user_id: &str) -> Result<Vec<Rule>>;

    /// Highest priority_order in use, if the user has any rules
    fn max_priority(&self, user_id: &str) -> Result<Option<i32>>;

    // === Rule application ===

    /// Active rules in evaluation order (ascending priority_order)
    fn fetch_active_rules(&self, user_id: &str) -> Result<Vec<Rule>>;

    /// Account fields visible to rules, if the account exists
    fn fetch_account_context(&self, user_id: &str, account_id: Uuid) -> Result<Option<AccountContext>>;

    /// A single transaction
    fn fetch_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>>;

    /// Transactions a bulk application may touch
    ///
    /// `transaction_ids` narrows the candidates (all of the user's
    /// transactions when `None`). Unless `include_manually_set` is set,
    /// transactions whose category and merchant were both set by hand are
    /// left out.
    fn fetch_transactions_eligible_for_rule_application(
        &self,
        user_id: &str,
        transaction_ids: Option<&[Uuid]>,
        include_manually_set: bool,
    ) -> Result<Vec<Transaction>>;

    /// Write one `(category_id, merchant)` outcome to many transactions
    ///
    /// `None` targets are left untouched. Returns the number of rows updated.
    fn persist_grouped_update(
        &self,
        user_id: &str,
        category_id: Option<i64>,
        merchant: Option<&str>,
        transaction_ids: &[Uuid],
    ) -> Result<usize>;

    /// Bump a rule's usage counters
    fn record_rule_applications(&self, rule_id: Uuid, count: u64, applied_at: DateTime<Utc>) -> Result<()>;
}
