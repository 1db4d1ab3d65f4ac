//! Rule condition grammar
//!
//! The vocabulary rules are written in: the transaction/account fields a
//! condition can read, the operators each field family accepts, and the
//! typed shape a condition takes once it has passed validation.
//!
//! A validated condition is either a [`TextCondition`] or a
//! [`NumericCondition`], so a numeric operator on a text field (or the
//! reverse) cannot be represented past the validator.
//!
//! Wire format (JSON):
//! ```json
//! {
//!   "logic": "AND",
//!   "conditions": [
//!     { "field": "merchant", "operator": "contains_any",
//!       "values": ["starbucks", "dunkin"], "case_sensitive": false },
//!     { "field": "amount", "operator": "between",
//!       "min_value": 2.00, "max_value": 25.00 }
//!   ]
//! }
//! ```

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use super::evaluate::{evaluate, TransactionContext};
use super::validation::validate_value;

/// How the conditions of a rule are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    /// Canonical (uppercase) form
    pub fn as_str(&self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }

    /// Parse a logic operator, ignoring case
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("and") {
            Some(Logic::And)
        } else if s.eq_ignore_ascii_case("or") {
            Some(Logic::Or)
        } else {
            None
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields holding text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringField {
    Merchant,
    Description,
    AccountType,
    AccountName,
    Bank,
    Currency,
}

impl StringField {
    pub const ALL: [StringField; 6] = [
        StringField::Merchant,
        StringField::Description,
        StringField::AccountType,
        StringField::AccountName,
        StringField::Bank,
        StringField::Currency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StringField::Merchant => "merchant",
            StringField::Description => "description",
            StringField::AccountType => "account_type",
            StringField::AccountName => "account_name",
            StringField::Bank => "bank",
            StringField::Currency => "currency",
        }
    }
}

/// Fields holding numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    Amount,
    /// Direction code: 0 = debit, 1 = credit, 2 = transfer
    Direction,
}

impl NumericField {
    pub const ALL: [NumericField; 2] = [NumericField::Amount, NumericField::Direction];

    pub fn as_str(&self) -> &'static str {
        match self {
            NumericField::Amount => "amount",
            NumericField::Direction => "direction",
        }
    }
}

/// Which family a field (or operator) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    Text,
    Numeric,
}

/// Any field a condition can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Text(StringField),
    Numeric(NumericField),
}

impl Field {
    /// Look up a field by its wire name (exact match)
    pub fn parse(name: &str) -> Option<Self> {
        StringField::ALL
            .iter()
            .find(|f| f.as_str() == name)
            .map(|f| Field::Text(*f))
            .or_else(|| {
                NumericField::ALL
                    .iter()
                    .find(|f| f.as_str() == name)
                    .map(|f| Field::Numeric(*f))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Text(f) => f.as_str(),
            Field::Numeric(f) => f.as_str(),
        }
    }

    pub fn family(&self) -> FieldFamily {
        match self {
            Field::Text(_) => FieldFamily::Text,
            Field::Numeric(_) => FieldFamily::Numeric,
        }
    }
}

/// Comparison operators across both families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    ContainsAny,
    Regex,
    GreaterThan,
    LessThan,
    Between,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::ContainsAny,
        Operator::Regex,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::Between,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::ContainsAny => "contains_any",
            Operator::Regex => "regex",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Between => "between",
        }
    }

    /// Whether the operator may be used on fields of `family`
    pub fn applies_to(&self, family: FieldFamily) -> bool {
        match self {
            Operator::Equals | Operator::NotEquals => true,
            Operator::Contains
            | Operator::NotContains
            | Operator::StartsWith
            | Operator::EndsWith
            | Operator::ContainsAny
            | Operator::Regex => family == FieldFamily::Text,
            Operator::GreaterThan | Operator::LessThan | Operator::Between => {
                family == FieldFamily::Numeric
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate applied to a text field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPredicate {
    Equals(String),
    NotEquals(String),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
    ContainsAny(Vec<String>),
    Regex(String),
}

impl TextPredicate {
    /// Build a single-value predicate; `None` for operators that don't take one
    pub fn with_value(operator: Operator, value: String) -> Option<Self> {
        match operator {
            Operator::Equals => Some(TextPredicate::Equals(value)),
            Operator::NotEquals => Some(TextPredicate::NotEquals(value)),
            Operator::Contains => Some(TextPredicate::Contains(value)),
            Operator::NotContains => Some(TextPredicate::NotContains(value)),
            Operator::StartsWith => Some(TextPredicate::StartsWith(value)),
            Operator::EndsWith => Some(TextPredicate::EndsWith(value)),
            Operator::Regex => Some(TextPredicate::Regex(value)),
            Operator::ContainsAny
            | Operator::GreaterThan
            | Operator::LessThan
            | Operator::Between => None,
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            TextPredicate::Equals(_) => Operator::Equals,
            TextPredicate::NotEquals(_) => Operator::NotEquals,
            TextPredicate::Contains(_) => Operator::Contains,
            TextPredicate::NotContains(_) => Operator::NotContains,
            TextPredicate::StartsWith(_) => Operator::StartsWith,
            TextPredicate::EndsWith(_) => Operator::EndsWith,
            TextPredicate::ContainsAny(_) => Operator::ContainsAny,
            TextPredicate::Regex(_) => Operator::Regex,
        }
    }

    /// Rewrite every comparison value, keeping the operator
    pub fn map_values(self, f: impl Fn(String) -> String) -> Self {
        match self {
            TextPredicate::Equals(v) => TextPredicate::Equals(f(v)),
            TextPredicate::NotEquals(v) => TextPredicate::NotEquals(f(v)),
            TextPredicate::Contains(v) => TextPredicate::Contains(f(v)),
            TextPredicate::NotContains(v) => TextPredicate::NotContains(f(v)),
            TextPredicate::StartsWith(v) => TextPredicate::StartsWith(f(v)),
            TextPredicate::EndsWith(v) => TextPredicate::EndsWith(f(v)),
            TextPredicate::ContainsAny(vs) => {
                TextPredicate::ContainsAny(vs.into_iter().map(f).collect())
            }
            TextPredicate::Regex(v) => TextPredicate::Regex(f(v)),
        }
    }
}

/// Predicate applied to a numeric field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericPredicate {
    Equals(Decimal),
    NotEquals(Decimal),
    GreaterThan(Decimal),
    LessThan(Decimal),
    /// Inclusive on both ends
    Between { min: Decimal, max: Decimal },
}

impl NumericPredicate {
    /// Build a single-value predicate; `None` for operators that don't take one
    pub fn with_value(operator: Operator, value: Decimal) -> Option<Self> {
        match operator {
            Operator::Equals => Some(NumericPredicate::Equals(value)),
            Operator::NotEquals => Some(NumericPredicate::NotEquals(value)),
            Operator::GreaterThan => Some(NumericPredicate::GreaterThan(value)),
            Operator::LessThan => Some(NumericPredicate::LessThan(value)),
            Operator::Contains
            | Operator::NotContains
            | Operator::StartsWith
            | Operator::EndsWith
            | Operator::ContainsAny
            | Operator::Regex
            | Operator::Between => None,
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            NumericPredicate::Equals(_) => Operator::Equals,
            NumericPredicate::NotEquals(_) => Operator::NotEquals,
            NumericPredicate::GreaterThan(_) => Operator::GreaterThan,
            NumericPredicate::LessThan(_) => Operator::LessThan,
            NumericPredicate::Between { .. } => Operator::Between,
        }
    }
}

/// A condition over one of the text fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCondition {
    pub field: StringField,
    pub predicate: TextPredicate,
    /// `None` until normalized; absent means case-insensitive
    pub case_sensitive: Option<bool>,
}

impl TextCondition {
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive.unwrap_or(false)
    }
}

/// A condition over one of the numeric fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericCondition {
    pub field: NumericField,
    pub predicate: NumericPredicate,
}

/// One validated atomic predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Text(TextCondition),
    Numeric(NumericCondition),
}

impl Condition {
    pub fn field(&self) -> Field {
        match self {
            Condition::Text(c) => Field::Text(c.field),
            Condition::Numeric(c) => Field::Numeric(c.field),
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Condition::Text(c) => c.predicate.operator(),
            Condition::Numeric(c) => c.predicate.operator(),
        }
    }

    /// Wire representation of this condition
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        obj.insert("field".into(), self.field().as_str().into());
        obj.insert("operator".into(), self.operator().as_str().into());

        match self {
            Condition::Text(c) => {
                match &c.predicate {
                    TextPredicate::ContainsAny(values) => {
                        obj.insert("values".into(), values.clone().into());
                    }
                    TextPredicate::Equals(v)
                    | TextPredicate::NotEquals(v)
                    | TextPredicate::Contains(v)
                    | TextPredicate::NotContains(v)
                    | TextPredicate::StartsWith(v)
                    | TextPredicate::EndsWith(v)
                    | TextPredicate::Regex(v) => {
                        obj.insert("value".into(), v.clone().into());
                    }
                }
                if let Some(case_sensitive) = c.case_sensitive {
                    obj.insert("case_sensitive".into(), case_sensitive.into());
                }
            }
            Condition::Numeric(c) => match c.predicate {
                NumericPredicate::Between { min, max } => {
                    obj.insert("min_value".into(), decimal_to_json(min));
                    obj.insert("max_value".into(), decimal_to_json(max));
                }
                NumericPredicate::Equals(v)
                | NumericPredicate::NotEquals(v)
                | NumericPredicate::GreaterThan(v)
                | NumericPredicate::LessThan(v) => {
                    obj.insert("value".into(), decimal_to_json(v));
                }
            },
        }

        JsonValue::Object(obj)
    }
}

/// A parsed rule body: a logic operator over a flat list of conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConditions {
    pub logic: Logic,
    pub conditions: Vec<Condition>,
}

impl RuleConditions {
    pub fn new(logic: Logic, conditions: Vec<Condition>) -> Self {
        Self { logic, conditions }
    }

    /// Whether this condition tree matches the given context
    pub fn matches(&self, ctx: &TransactionContext<'_>) -> bool {
        evaluate(self, ctx)
    }

    /// Wire representation of the whole tree
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        obj.insert("logic".into(), self.logic.as_str().into());
        obj.insert(
            "conditions".into(),
            JsonValue::Array(self.conditions.iter().map(Condition::to_json).collect()),
        );
        JsonValue::Object(obj)
    }
}

impl Serialize for RuleConditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Deserializing runs the full validator, so a stored body that no longer
/// satisfies the grammar is rejected rather than half-loaded.
impl<'de> Deserialize<'de> for RuleConditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        let result = validate_value(&raw);
        match result.conditions {
            Some(conditions) if result.valid => Ok(conditions),
            _ => Err(serde::de::Error::custom(result.to_string())),
        }
    }
}

/// Integral decimals become JSON integers, everything else a float
fn decimal_to_json(value: Decimal) -> JsonValue {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return JsonValue::from(i);
        }
    }
    value.to_f64().map(JsonValue::from).unwrap_or(JsonValue::Null)
}

/// Read a JSON number as an exact decimal
pub(crate) fn json_to_decimal(value: &JsonValue) -> Option<Decimal> {
    let number = value.as_number()?;
    if let Some(i) = number.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = number.as_u64() {
        return Some(Decimal::from(u));
    }
    let text = number.to_string();
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
