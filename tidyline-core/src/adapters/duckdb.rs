//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::rule::validate_rule_conditions;
use crate::domain::{Account, AccountContext, Rule, RuleSource, Transaction};
use crate::ports::{LedgerStore, RuleStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Timestamps are stored as naive UTC with microsecond precision
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const RULE_COLUMNS: &str = "rule_id, user_id, rule_name, conditions, category_id, merchant, \
     is_active, priority_order, rule_source, times_applied, last_applied_at::VARCHAR, \
     created_at::VARCHAR, updated_at::VARCHAR";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, account_id, amount::VARCHAR, \
     direction, description, merchant, currency, category_id, category_manually_set, \
     merchant_manually_set, transaction_date::VARCHAR, created_at::VARCHAR, updated_at::VARCHAR";

const ACCOUNT_COLUMNS: &str = "account_id, user_id, name, account_type, bank, currency, \
     created_at::VARCHAR, updated_at::VARCHAR";

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process (e.g. a second CLI invocation) holds
    /// the file.
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[tidyline] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> anyhow::Result<Connection> {
        // Extension autoloading stays off; JSON is linked in via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Path of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn query_rules(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> Result<Vec<Rule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawRule::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Rows whose stored body no longer validates are reported and skipped
        Ok(raw
            .into_iter()
            .filter_map(|r| match r.into_rule() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    eprintln!("[tidyline] Skipping rule: {}", e);
                    None
                }
            })
            .collect())
    }

    fn query_transactions(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTransaction::into_transaction).collect()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

struct RawRule {
    rule_id: String,
    user_id: String,
    rule_name: String,
    conditions: String,
    category_id: Option<i64>,
    merchant: Option<String>,
    is_active: bool,
    priority_order: i32,
    rule_source: String,
    times_applied: i64,
    last_applied_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRule {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            rule_id: row.get(0)?,
            user_id: row.get(1)?,
            rule_name: row.get(2)?,
            conditions: row.get(3)?,
            category_id: row.get(4)?,
            merchant: row.get(5)?,
            is_active: row.get(6)?,
            priority_order: row.get(7)?,
            rule_source: row.get(8)?,
            times_applied: row.get(9)?,
            last_applied_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_rule(self) -> Result<Rule> {
        let rule_id = parse_uuid(&self.rule_id)?;
        let conditions = validate_rule_conditions(&self.conditions)
            .into_conditions()
            .map_err(|result| {
                Error::database(format!(
                    "rule {} has invalid stored conditions: {}",
                    rule_id, result
                ))
            })?;

        Ok(Rule {
            rule_id,
            user_id: self.user_id,
            rule_name: self.rule_name,
            conditions,
            category_id: self.category_id,
            merchant: self.merchant,
            is_active: self.is_active,
            priority_order: self.priority_order,
            rule_source: RuleSource::parse(&self.rule_source).unwrap_or_default(),
            times_applied: self.times_applied,
            last_applied_at: self.last_applied_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct RawTransaction {
    transaction_id: String,
    user_id: String,
    account_id: String,
    amount: String,
    direction: Option<i32>,
    description: Option<String>,
    merchant: Option<String>,
    currency: Option<String>,
    category_id: Option<i64>,
    category_manually_set: bool,
    merchant_manually_set: bool,
    transaction_date: String,
    created_at: String,
    updated_at: String,
}

impl RawTransaction {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            transaction_id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            amount: row.get(3)?,
            direction: row.get(4)?,
            description: row.get(5)?,
            merchant: row.get(6)?,
            currency: row.get(7)?,
            category_id: row.get(8)?,
            category_manually_set: row.get(9)?,
            merchant_manually_set: row.get(10)?,
            transaction_date: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: parse_uuid(&self.transaction_id)?,
            user_id: self.user_id,
            account_id: parse_uuid(&self.account_id)?,
            amount: Decimal::from_str(&self.amount)
                .map_err(|e| Error::database(format!("bad amount '{}': {}", self.amount, e)))?,
            direction: self.direction,
            description: self.description,
            merchant: self.merchant,
            currency: self.currency,
            category_id: self.category_id,
            transaction_date: parse_date(&self.transaction_date)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            category_manually_set: self.category_manually_set,
            merchant_manually_set: self.merchant_manually_set,
        })
    }
}

struct RawAccount {
    account_id: String,
    user_id: String,
    name: String,
    account_type: Option<String>,
    bank: Option<String>,
    currency: String,
    created_at: String,
    updated_at: String,
}

impl RawAccount {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            account_id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            account_type: row.get(3)?,
            bank: row.get(4)?,
            currency: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: parse_uuid(&self.account_id)?,
            user_id: self.user_id,
            name: self.name,
            account_type: self.account_type,
            bank: self.bank,
            currency: self.currency,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

// ============================================================================
// Rule store
// ============================================================================

impl RuleStore for DuckDbRepository {
    fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let conditions = serde_json::to_string(&rule.conditions)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sys_rules (rule_id, user_id, rule_name, conditions, category_id, merchant,
                                    is_active, priority_order, rule_source, times_applied,
                                    last_applied_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params![
                rule.rule_id.to_string(),
                rule.user_id,
                rule.rule_name,
                conditions,
                rule.category_id,
                rule.merchant,
                rule.is_active,
                rule.priority_order,
                rule.rule_source.as_str(),
                rule.times_applied,
                rule.last_applied_at.map(format_timestamp),
                format_timestamp(rule.created_at),
                format_timestamp(rule.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update_rule(&self, rule: &Rule) -> Result<()> {
        let conditions = serde_json::to_string(&rule.conditions)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sys_rules SET
                rule_name = ?, conditions = ?, category_id = ?, merchant = ?,
                is_active = ?, priority_order = ?, rule_source = ?,
                updated_at = CAST(? AS TIMESTAMP)
             WHERE rule_id = ? AND user_id = ?",
            params![
                rule.rule_name,
                conditions,
                rule.category_id,
                rule.merchant,
                rule.is_active,
                rule.priority_order,
                rule.rule_source.as_str(),
                format_timestamp(rule.updated_at),
                rule.rule_id.to_string(),
                rule.user_id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("rule {}", rule.rule_id)));
        }
        Ok(())
    }

    fn delete_rule(&self, user_id: &str, rule_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM sys_rules WHERE rule_id = ? AND user_id = ?",
            params![rule_id.to_string(), user_id],
        )?;
        Ok(deleted > 0)
    }

    fn get_rule(&self, user_id: &str, rule_id: Uuid) -> Result<Option<Rule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_rules WHERE rule_id = ? AND user_id = ?",
            RULE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![rule_id.to_string(), user_id], RawRule::from_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_rule()?)),
            None => Ok(None),
        }
    }

    fn list_rules(&self, user_id: &str) -> Result<Vec<Rule>> {
        self.query_rules(
            &format!(
                "SELECT {} FROM sys_rules WHERE user_id = ?
                 ORDER BY priority_order, created_at",
                RULE_COLUMNS
            ),
            params![user_id],
        )
    }

    fn max_priority(&self, user_id: &str) -> Result<Option<i32>> {
        let conn = self.lock()?;
        let max: Option<i32> = conn.query_row(
            "SELECT MAX(priority_order) FROM sys_rules WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn fetch_active_rules(&self, user_id: &str) -> Result<Vec<Rule>> {
        self.query_rules(
            &format!(
                "SELECT {} FROM sys_rules WHERE user_id = ? AND is_active
                 ORDER BY priority_order, created_at",
                RULE_COLUMNS
            ),
            params![user_id],
        )
    }

    fn fetch_account_context(&self, user_id: &str, account_id: Uuid) -> Result<Option<AccountContext>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT account_type, name, bank FROM sys_accounts
             WHERE account_id = ? AND user_id = ?",
        )?;
        let mut rows = stmt.query_map(params![account_id.to_string(), user_id], |row| {
            Ok(AccountContext {
                account_type: row.get(0)?,
                name: row.get(1)?,
                bank: row.get(2)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    fn fetch_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>> {
        let mut found = self.query_transactions(
            &format!(
                "SELECT {} FROM sys_transactions WHERE transaction_id = ? AND user_id = ?",
                TRANSACTION_COLUMNS
            ),
            params![transaction_id.to_string(), user_id],
        )?;
        Ok(found.pop())
    }

    fn fetch_transactions_eligible_for_rule_application(
        &self,
        user_id: &str,
        transaction_ids: Option<&[Uuid]>,
        include_manually_set: bool,
    ) -> Result<Vec<Transaction>> {
        let mut sql = format!(
            "SELECT {} FROM sys_transactions WHERE user_id = ?",
            TRANSACTION_COLUMNS
        );
        if !include_manually_set {
            sql.push_str(" AND NOT (category_manually_set AND merchant_manually_set)");
        }
        if let Some(ids) = transaction_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND transaction_id IN ({})", in_list(ids)));
        }
        sql.push_str(" ORDER BY transaction_date, transaction_id");

        self.query_transactions(&sql, params![user_id])
    }

    fn persist_grouped_update(
        &self,
        user_id: &str,
        category_id: Option<i64>,
        merchant: Option<&str>,
        transaction_ids: &[Uuid],
    ) -> Result<usize> {
        if transaction_ids.is_empty() || (category_id.is_none() && merchant.is_none()) {
            return Ok(0);
        }

        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn duckdb::ToSql>> = Vec::new();
        if let Some(category_id) = category_id {
            assignments.push("category_id = ?");
            values.push(Box::new(category_id));
        }
        if let Some(merchant) = merchant {
            assignments.push("merchant = ?");
            values.push(Box::new(merchant.to_string()));
        }
        assignments.push("updated_at = CAST(? AS TIMESTAMP)");
        values.push(Box::new(format_timestamp(Utc::now())));
        values.push(Box::new(user_id.to_string()));

        let sql = format!(
            "UPDATE sys_transactions SET {} WHERE user_id = ? AND transaction_id IN ({})",
            assignments.join(", "),
            in_list(transaction_ids)
        );

        let conn = self.lock()?;
        let refs: Vec<&dyn duckdb::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let updated = conn.execute(&sql, refs.as_slice())?;
        Ok(updated)
    }

    fn record_rule_applications(&self, rule_id: Uuid, count: u64, applied_at: DateTime<Utc>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sys_rules
             SET times_applied = times_applied + ?, last_applied_at = CAST(? AS TIMESTAMP)
             WHERE rule_id = ?",
            params![count as i64, format_timestamp(applied_at), rule_id.to_string()],
        )?;
        Ok(())
    }
}

// ============================================================================
// Ledger store
// ============================================================================

impl LedgerStore for DuckDbRepository {
    fn insert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sys_accounts (account_id, user_id, name, account_type, bank, currency,
                                       created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params![
                account.id.to_string(),
                account.user_id,
                account.name,
                account.account_type,
                account.bank,
                account.currency,
                format_timestamp(account.created_at),
                format_timestamp(account.updated_at),
            ],
        )?;
        Ok(())
    }

    fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_accounts WHERE user_id = ? ORDER BY name",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], RawAccount::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawAccount::into_account).collect()
    }

    fn get_account(&self, user_id: &str, account_id: Uuid) -> Result<Option<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_accounts WHERE account_id = ? AND user_id = ?",
            ACCOUNT_COLUMNS
        ))?;
        let mut rows =
            stmt.query_map(params![account_id.to_string(), user_id], RawAccount::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_account()?)),
            None => Ok(None),
        }
    }

    fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sys_transactions (transaction_id, user_id, account_id, amount, direction,
                                           description, merchant, currency, category_id,
                                           category_manually_set, merchant_manually_set,
                                           transaction_date, created_at, updated_at)
             VALUES (?, ?, ?, CAST(? AS DECIMAL(18, 2)), ?, ?, ?, ?, ?, ?, ?,
                     CAST(? AS DATE), CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params![
                tx.id.to_string(),
                tx.user_id,
                tx.account_id.to_string(),
                tx.amount.to_string(),
                tx.direction,
                tx.description,
                tx.merchant,
                tx.currency,
                tx.category_id,
                tx.category_manually_set,
                tx.merchant_manually_set,
                tx.transaction_date.to_string(),
                format_timestamp(tx.created_at),
                format_timestamp(tx.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_transaction(&self, user_id: &str, transaction_id: Uuid) -> Result<Option<Transaction>> {
        self.fetch_transaction(user_id, transaction_id)
    }

    fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sys_transactions SET
                account_id = ?, amount = CAST(? AS DECIMAL(18, 2)), direction = ?,
                description = ?, merchant = ?, currency = ?, category_id = ?,
                category_manually_set = ?, merchant_manually_set = ?,
                transaction_date = CAST(? AS DATE), updated_at = CAST(? AS TIMESTAMP)
             WHERE transaction_id = ? AND user_id = ?",
            params![
                tx.account_id.to_string(),
                tx.amount.to_string(),
                tx.direction,
                tx.description,
                tx.merchant,
                tx.currency,
                tx.category_id,
                tx.category_manually_set,
                tx.merchant_manually_set,
                tx.transaction_date.to_string(),
                format_timestamp(tx.updated_at),
                tx.id.to_string(),
                tx.user_id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    fn list_transactions(
        &self,
        user_id: &str,
        account_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut sql = format!(
            "SELECT {} FROM sys_transactions WHERE user_id = ?",
            TRANSACTION_COLUMNS
        );
        if let Some(account_id) = account_id {
            sql.push_str(&format!(" AND account_id = '{}'", account_id));
        }
        sql.push_str(" ORDER BY transaction_date DESC, created_at DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        self.query_transactions(&sql, params![user_id])
    }
}

// Helper functions

/// Quoted, comma separated ids for an IN clause (UUIDs need no escaping)
fn in_list(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::database(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::database(format!("bad date '{}': {}", s, e)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("bad id '{}': {}", s, e)))
}
