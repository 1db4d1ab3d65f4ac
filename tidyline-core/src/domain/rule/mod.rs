//! Classification rules
//!
//! A rule pairs a condition tree with the category and/or merchant it
//! assigns to matching transactions. The submodules hold the engine:
//!
//! - [`grammar`]: fields, operators and the typed condition tree
//! - [`validation`]: checks raw bodies and reports every error
//! - [`normalize`]: canonical form for stored bodies
//! - [`evaluate`]: matches a body against one transaction
//! - [`policy`]: first-match-wins application and bulk grouping

pub mod evaluate;
pub mod grammar;
pub mod normalize;
pub mod policy;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use evaluate::{evaluate, TransactionContext};
pub use grammar::{
    Condition, Field, Logic, NumericCondition, NumericField, NumericPredicate, Operator,
    RuleConditions, StringField, TextCondition, TextPredicate,
};
pub use normalize::normalize;
pub use policy::{apply_rules, group_outcomes, OutcomeGroup, RuleOutcome};
pub use validation::{
    validate_rule_conditions, validate_value, ErrorCode, ValidationError, ValidationResult,
};

/// Where a rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// Written by the user
    #[default]
    User,
    /// Created by the application (e.g. seeded defaults)
    System,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::User => "user",
            RuleSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(RuleSource::User),
            "system" => Some(RuleSource::System),
            _ => None,
        }
    }
}

/// A user's classification rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: Uuid,
    /// Owning user
    pub user_id: String,
    pub rule_name: String,
    pub conditions: RuleConditions,
    /// Category assigned on match
    pub category_id: Option<i64>,
    /// Canonical merchant name assigned on match
    pub merchant: Option<String>,
    pub is_active: bool,
    /// Lower values are evaluated first
    pub priority_order: i32,
    pub rule_source: RuleSource,
    /// Number of transactions this rule has classified
    pub times_applied: i64,
    pub last_applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Create an active rule with no targets yet
    pub fn new(
        user_id: impl Into<String>,
        rule_name: impl Into<String>,
        conditions: RuleConditions,
    ) -> Self {
        let now = Utc::now();
        Self {
            rule_id: Uuid::new_v4(),
            user_id: user_id.into(),
            rule_name: rule_name.into(),
            conditions,
            category_id: None,
            merchant: None,
            is_active: true,
            priority_order: 0,
            rule_source: RuleSource::User,
            times_applied: 0,
            last_applied_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the rule assigns anything at all
    pub fn has_target(&self) -> bool {
        self.category_id.is_some() || self.merchant.is_some()
    }

    /// Whether the rule matches the given context (ignores `is_active`)
    pub fn matches(&self, ctx: &TransactionContext<'_>) -> bool {
        self.conditions.matches(ctx)
    }

    /// Check name and targets
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.rule_name.trim().is_empty() {
            return Err("rule name cannot be empty");
        }
        if !self.has_target() {
            return Err("rule must set a category, a merchant, or both");
        }
        Ok(())
    }

    /// Trim a merchant target; blank means no merchant
    pub fn normalize_merchant(merchant: Option<&str>) -> Option<String> {
        merchant
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }
}

/// Request to create a rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRule {
    pub rule_name: String,
    /// Raw condition body, validated on create
    pub conditions: JsonValue,
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    /// Defaults to one past the user's highest priority_order, so it runs last
    pub priority_order: Option<i32>,
    pub rule_source: Option<RuleSource>,
    /// Re-apply the user's rules to stored transactions afterwards
    #[serde(default)]
    pub backfill: bool,
}

/// Partial update of a rule; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleUpdate {
    pub rule_name: Option<String>,
    pub conditions: Option<JsonValue>,
    /// `Some(None)` clears the category target
    pub category_id: Option<Option<i64>>,
    /// `Some(None)` clears the merchant target
    pub merchant: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub priority_order: Option<i32>,
    #[serde(default)]
    pub backfill: bool,
}
