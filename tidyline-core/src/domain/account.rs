//! Account domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A financial account owned by the user
/// Note: account_type is a freeform string ("checking", "credit", "savings", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    pub name: String,
    pub account_type: Option<String>,
    /// Institution name
    pub bank: Option<String>,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The part of an account that rules can match on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub account_type: Option<String>,
    pub name: Option<String>,
    pub bank: Option<String>,
}

/// Request to create an account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub account_type: Option<String>,
    pub bank: Option<String>,
    /// Defaults to USD
    pub currency: Option<String>,
}

impl Account {
    /// Create a new account with required fields
    pub fn new(id: Uuid, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            name: name.into(),
            account_type: None,
            bank: None,
            currency: "USD".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Normalize currency code to uppercase
    pub fn normalize_currency(currency: &str) -> String {
        currency.trim().to_uppercase()
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.currency.trim().is_empty() {
            return Err("currency cannot be empty");
        }
        Ok(())
    }

    /// Projection used during rule evaluation
    pub fn context(&self) -> AccountContext {
        AccountContext {
            account_type: self.account_type.clone(),
            name: Some(self.name.clone()),
            bank: self.bank.clone(),
        }
    }
}
