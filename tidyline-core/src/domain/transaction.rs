//! Transaction domain model

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction codes stored on a transaction
pub mod direction {
    pub const DEBIT: i32 = 0;
    pub const CREDIT: i32 = 1;
    pub const TRANSFER: i32 = 2;
}

/// A single financial transaction belonging to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    pub account_id: Uuid,
    pub amount: Decimal,
    /// See [`direction`]
    pub direction: Option<i32>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    /// ISO 4217 currency code, uppercase
    pub currency: Option<String>,
    pub category_id: Option<i64>,
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // =========================================================================
    // Manual flags
    // =========================================================================
    /// True if the user picked the category; rules must not overwrite it
    pub category_manually_set: bool,
    /// True if the user picked the merchant; rules must not overwrite it
    pub merchant_manually_set: bool,
}

impl Transaction {
    /// Create a new transaction with required fields
    pub fn new(
        id: Uuid,
        user_id: impl Into<String>,
        account_id: Uuid,
        amount: Decimal,
        transaction_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            account_id,
            amount,
            direction: None,
            description: None,
            merchant: None,
            currency: None,
            category_id: None,
            transaction_date,
            created_at: now,
            updated_at: now,
            category_manually_set: false,
            merchant_manually_set: false,
        }
    }

    /// Both targets were set by hand, so rules have nothing to do
    pub fn fully_manual(&self) -> bool {
        self.category_manually_set && self.merchant_manually_set
    }

    /// Direction code implied by the sign of an amount
    pub fn direction_for_amount(amount: Decimal) -> i32 {
        if amount < Decimal::ZERO {
            direction::DEBIT
        } else {
            direction::CREDIT
        }
    }
}

/// Request to record a transaction
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTransaction {
    pub account_id: Uuid,
    pub amount: Decimal,
    /// Derived from the amount's sign when absent
    pub direction: Option<i32>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    /// Defaults to the account's currency
    pub currency: Option<String>,
    /// A category given here counts as set by hand
    pub category_id: Option<i64>,
    /// A merchant given here counts as set by hand
    #[serde(default)]
    pub merchant_manually_set: bool,
    /// Defaults to today (UTC)
    pub transaction_date: Option<NaiveDate>,
}

/// Partial update of a transaction; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    /// A merchant picked by the user; protects it from rules
    pub merchant: Option<String>,
    /// A category picked by the user; protects it from rules
    pub category_id: Option<i64>,
    pub transaction_date: Option<NaiveDate>,
    /// Hand the category back to the rules
    #[serde(default)]
    pub release_category: bool,
    /// Hand the merchant back to the rules
    #[serde(default)]
    pub release_merchant: bool,
}

impl TransactionUpdate {
    /// Whether the update touches a field rules look at
    pub fn changes_rule_inputs(&self) -> bool {
        self.amount.is_some() || self.description.is_some() || self.merchant.is_some()
    }
}
