//! In-memory store
//!
//! Implements both ports over plain vectors. Used by tests and by callers
//! that embed the engine without a database. Grouped writes can be made to
//! fail for a chosen `(category_id, merchant)` pair, and every grouped write
//! attempt is recorded.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountContext, Rule, Transaction};
use crate::ports::{LedgerStore, RuleStore};

/// One call to `persist_grouped_update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupWrite {
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    pub transaction_ids: Vec<Uuid>,
    pub succeeded: bool,
}

#[derive(Default)]
struct MemoryState {
    rules: Vec<Rule>,
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    failing_groups: Vec<(Option<i64>, Option<String>)>,
    writes: Vec<GroupWrite>,
}

/// Store that keeps everything in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Make grouped writes for this exact outcome fail
    pub fn fail_group_updates(&self, category_id: Option<i64>, merchant: Option<&str>) -> Result<()> {
        self.lock()?
            .failing_groups
            .push((category_id, merchant.map(str::to_string)));
        Ok(())
    }

    /// Grouped writes attempted so far, in order
    pub fn group_writes(&self) -> Result<Vec<GroupWrite>> {
        Ok(self.lock()?.writes.clone())
    }
}

fn sorted_rules<'a>(rules: impl Iterator<Item = &'a Rule>) -> Vec<Rule> {
    let mut rules: Vec<Rule> = rules.cloned().collect();
    rules.sort_by(|a, b| {
        a.priority_order
            .cmp(&b.priority_order)
            .then(a.created_at.cmp(&b.created_at))
    });
    rules
}

impl RuleStore for MemoryStore {
    fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let mut state = self.lock()?;
        if state.rules.iter().any(|r| r.rule_id == rule.rule_id) {
            return Err(Error::database(format!("duplicate rule {}", rule.rule_id)));
        }
        state.rules.push(rule.clone());
        Ok(())
    }

    fn update_rule(&self, rule: &Rule) -> Result<()> {
        let mut state = self.lock()?;
        let existing = state
            .rules
            .iter_mut()
            .find(|r| r.rule_id == rule.rule_id && r.user_id == rule.user_id)
            .ok_or_else(|| Error::not_found(format!("rule {}", rule.rule_id)))?;
        // Usage counters are only changed by record_rule_applications
        let (times_applied, last_applied_at) = (existing.times_applied, existing.last_applied_at);
        *existing = Rule {
            times_applied,
            last_applied_at,
            ..rule.clone()
        };
        Ok(())
    }

    fn delete_rule(&self, user_id: &str, rule_id: Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.rules.len();
        state
            .rules
            .retain(|r| !(r.rule_id == rule_id && r.user_id == user_id));
        Ok(state.rules.len() < before)
    }

    fn get_rule(&self, user_id: &str, rule_id: Uuid) -> Result<Option<Rule>> {
        Ok(self
            .lock()?
            .rules
            .iter()
            .find(|r| r.rule_id == rule_id && r.user_id == user_id)
            .cloned())
    }

    fn list_rules(&self, user_id: &str) -> Result<Vec<Rule>> {
        let state = self.lock()?;
        Ok(sorted_rules(state.rules.iter().filter(|r| r.user_id == user_id)))
    }

    fn max_priority(&self, user_id: &str) -> Result<Option<i32>> {
        Ok(self
            .lock()?
            .rules
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.priority_order)
            .max())
    }

    fn fetch_active_rules(&self, user_id: &str) -> Result<Vec<Rule>> {
        let state = self.lock()?;
        Ok(sorted_rules(
            state.rules.iter().filter(|r| r.user_id == user_id && r.is_active),
        ))
    }

    fn fetch_account_context(&self, user_id: &str, account_id: Uuid) -> Result<Option<AccountContext>> {
        Ok(self
            .lock()?
            .accounts
            .iter()
            .find(|a| a.id == account_id && a.user_id == user_id)
            .map(Account::context))
    }

    fn fetch_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .find(|t| t.id == transaction_id && t.user_id == user_id)
            .cloned())
    }

    fn fetch_transactions_eligible_for_rule_application(
        &self,
        user_id: &str,
        transaction_ids: Option<&[Uuid]>,
        include_manually_set: bool,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| include_manually_set || !t.fully_manual())
            .filter(|t| transaction_ids.map_or(true, |ids| ids.contains(&t.id)))
            .cloned()
            .collect())
    }

    fn persist_grouped_update(
        &self,
        user_id: &str,
        category_id: Option<i64>,
        merchant: Option<&str>,
        transaction_ids: &[Uuid],
    ) -> Result<usize> {
        let mut state = self.lock()?;
        let key = (category_id, merchant.map(str::to_string));
        let fails = state.failing_groups.contains(&key);

        state.writes.push(GroupWrite {
            category_id,
            merchant: key.1.clone(),
            transaction_ids: transaction_ids.to_vec(),
            succeeded: !fails,
        });
        if fails {
            return Err(Error::database("grouped update rejected"));
        }

        let now = Utc::now();
        let mut updated = 0;
        for tx in state
            .transactions
            .iter_mut()
            .filter(|t| t.user_id == user_id && transaction_ids.contains(&t.id))
        {
            if let Some(category_id) = category_id {
                tx.category_id = Some(category_id);
            }
            if let Some(merchant) = merchant {
                tx.merchant = Some(merchant.to_string());
            }
            tx.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    fn record_rule_applications(&self, rule_id: Uuid, count: u64, applied_at: DateTime<Utc>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut state = self.lock()?;
        if let Some(rule) = state.rules.iter_mut().find(|r| r.rule_id == rule_id) {
            rule.times_applied += count as i64;
            rule.last_applied_at = Some(applied_at);
        }
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn insert_account(&self, account: &Account) -> Result<()> {
        self.lock()?.accounts.push(account.clone());
        Ok(())
    }

    fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .lock()?
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    fn get_account(&self, user_id: &str, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self
            .lock()?
            .accounts
            .iter()
            .find(|a| a.id == account_id && a.user_id == user_id)
            .cloned())
    }

    fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut state = self.lock()?;
        if state.transactions.iter().any(|t| t.id == tx.id) {
            return Err(Error::database(format!("duplicate transaction {}", tx.id)));
        }
        state.transactions.push(tx.clone());
        Ok(())
    }

    fn get_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>> {
        self.fetch_transaction(user_id, transaction_id)
    }

    fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut state = self.lock()?;
        let existing = state
            .transactions
            .iter_mut()
            .find(|t| t.id == tx.id && t.user_id == tx.user_id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", tx.id)))?;
        *existing = tx.clone();
        Ok(())
    }

    fn list_transactions(
        &self,
        user_id: &str,
        account_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| account_id.map_or(true, |id| t.account_id == id))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            b.transaction_date
                .cmp(&a.transaction_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        if let Some(limit) = limit {
            transactions.truncate(limit);
        }
        Ok(transactions)
    }
}
