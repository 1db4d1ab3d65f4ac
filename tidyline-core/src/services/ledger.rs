//! Ledger service - accounts and transactions
//!
//! A minimal ledger for the rule engine to classify. New and edited
//! transactions go through rule application, and values picked by the
//! user are marked as manually set so rules leave them alone.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, NewAccount, NewTransaction, Rule, Transaction, TransactionUpdate,
};
use crate::ports::LedgerStore;
use crate::services::RuleService;

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    rules: RuleService,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, rules: RuleService) -> Self {
        Self { store, rules }
    }

    // === Accounts ===

    pub fn add_account(&self, user_id: &str, new: NewAccount) -> Result<Account> {
        let mut account = Account::new(Uuid::new_v4(), user_id, new.name.trim());
        account.account_type = new.account_type.filter(|t| !t.trim().is_empty());
        account.bank = new.bank.filter(|b| !b.trim().is_empty());
        if let Some(currency) = new.currency {
            account.currency = Account::normalize_currency(&currency);
        }
        account.validate().map_err(Error::validation)?;

        self.store.insert_account(&account)?;
        Ok(account)
    }

    pub fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        self.store.list_accounts(user_id)
    }

    // === Transactions ===

    /// Record a transaction and classify it
    ///
    /// A category passed in is treated as the user's choice. Rules fill in
    /// whatever was not chosen by hand.
    pub fn add_transaction(&self, user_id: &str, new: NewTransaction) -> Result<Transaction> {
        let account = self
            .store
            .get_account(user_id, new.account_id)?
            .ok_or_else(|| Error::not_found(format!("account {}", new.account_id)))?;

        let date = new.transaction_date.unwrap_or_else(|| Utc::now().date_naive());
        let mut tx = Transaction::new(Uuid::new_v4(), user_id, account.id, new.amount, date);
        tx.direction = Some(
            new.direction
                .unwrap_or_else(|| Transaction::direction_for_amount(new.amount)),
        );
        tx.description = new.description;
        tx.merchant = Rule::normalize_merchant(new.merchant.as_deref());
        tx.currency = Some(
            new.currency
                .map(|c| Account::normalize_currency(&c))
                .unwrap_or_else(|| account.currency.clone()),
        );
        tx.category_id = new.category_id;
        tx.category_manually_set = new.category_id.is_some();
        tx.merchant_manually_set = new.merchant_manually_set && tx.merchant.is_some();

        self.store.insert_transaction(&tx)?;

        if !tx.fully_manual() {
            self.rules.apply_to_transaction(user_id, tx.id)?;
        }
        self.get_transaction(user_id, tx.id)
    }

    /// Edit a transaction
    ///
    /// A category or merchant given here becomes manually set. When a field
    /// rules look at changes (or a target is released back to the rules),
    /// rules run again for the targets that are not manually set.
    pub fn update_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        update: TransactionUpdate,
    ) -> Result<Transaction> {
        let mut tx = self.get_transaction(user_id, transaction_id)?;
        let reapply = update.changes_rule_inputs() || update.release_category || update.release_merchant;

        if let Some(amount) = update.amount {
            tx.amount = amount;
        }
        if let Some(description) = update.description {
            tx.description = Some(description);
        }
        if let Some(merchant) = update.merchant {
            tx.merchant = Rule::normalize_merchant(Some(&merchant));
            tx.merchant_manually_set = tx.merchant.is_some();
        }
        if let Some(category_id) = update.category_id {
            tx.category_id = Some(category_id);
            tx.category_manually_set = true;
        }
        if let Some(date) = update.transaction_date {
            tx.transaction_date = date;
        }
        if update.release_category {
            tx.category_manually_set = false;
        }
        if update.release_merchant {
            tx.merchant_manually_set = false;
        }
        tx.updated_at = Utc::now();

        self.store.update_transaction(&tx)?;

        if reapply && !tx.fully_manual() {
            self.rules.apply_to_transaction(user_id, tx.id)?;
        }
        self.get_transaction(user_id, tx.id)
    }

    pub fn get_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Transaction> {
        self.store
            .get_transaction(user_id, transaction_id)?
            .ok_or_else(|| Error::not_found(format!("transaction {}", transaction_id)))
    }

    /// Newest first
    pub fn list_transactions(
        &self,
        user_id: &str,
        account_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        self.store.list_transactions(user_id, account_id, limit)
    }
}
