//! Ledger store port - accounts and transactions

use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{Account, Transaction};

/// Storage for the user's accounts and transactions
pub trait LedgerStore: Send + Sync {
    // === Accounts ===

    /// Add a new account
    fn insert_account(&self, account: &Account) -> Result<()>;

    /// Get all accounts of a user, by name
    fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>>;

    /// Get account by ID
    fn get_account(&self, user_id: &str, account_id: Uuid) -> Result<Option<Account>>;

    // === Transactions ===

    /// Add a new transaction
    fn insert_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Get transaction by ID
    fn get_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>>;

    /// Overwrite an existing transaction; errors with `NotFound` if it is missing
    fn update_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Transactions of a user, newest first, optionally limited to one account
    fn list_transactions(
        &self,
        user_id: &str,
        account_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>>;
}
