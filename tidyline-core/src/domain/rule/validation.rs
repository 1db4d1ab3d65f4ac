//! Rule body validation
//!
//! Checks a submitted rule body against the grammar and either produces the
//! normalized [`RuleConditions`] or every error it could find. Validation
//! never stops at the first problem: each condition is checked on its own
//! and all errors are reported in document order.

use std::fmt;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::grammar::{
    json_to_decimal, Condition, Field, Logic, NumericCondition, NumericField, NumericPredicate,
    Operator, RuleConditions, StringField, TextCondition, TextPredicate,
};
use super::normalize::normalize;

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    RequiredField,
    InvalidValue,
    InvalidField,
    InvalidOperator,
    InvalidOperatorForField,
    ConflictingFields,
    InvalidRange,
    InvalidFieldForType,
    InvalidRegex,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::RequiredField => "REQUIRED_FIELD",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::InvalidField => "INVALID_FIELD",
            ErrorCode::InvalidOperator => "INVALID_OPERATOR",
            ErrorCode::InvalidOperatorForField => "INVALID_OPERATOR_FOR_FIELD",
            ErrorCode::ConflictingFields => "CONFLICTING_FIELDS",
            ErrorCode::InvalidRange => "INVALID_RANGE",
            ErrorCode::InvalidFieldForType => "INVALID_FIELD_FOR_TYPE",
            ErrorCode::InvalidRegex => "INVALID_REGEX",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem with a rule body, addressed by field path
/// (e.g. `conditions[1].max_value`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: ErrorCode,
}

/// Outcome of validating a rule body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    /// Normalized body, present only when `valid`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<RuleConditions>,
}

impl ValidationResult {
    fn success(conditions: RuleConditions) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            conditions: Some(conditions),
        }
    }

    fn failure(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: false,
            errors,
            conditions: None,
        }
    }

    /// The body could not be read as a condition tree at all
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::failure(vec![ValidationError {
            field: "conditions".to_string(),
            message: message.into(),
            code: ErrorCode::InvalidJson,
        }])
    }

    /// Whether any error carries `code`
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Errors reported against an exact field path
    pub fn errors_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// Take the normalized body, or give the failed result back
    pub fn into_conditions(self) -> std::result::Result<RuleConditions, ValidationResult> {
        match self.conditions {
            Some(conditions) if self.valid => Ok(conditions),
            _ => Err(self),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return f.write_str("valid");
        }
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.field, e.message, e.code))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Validate a rule body given as JSON text
pub fn validate_rule_conditions(raw: &str) -> ValidationResult {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationResult::invalid_json(format!("Rule conditions are not valid JSON: {}", e)),
    }
}

/// Validate an already-parsed rule body
pub fn validate_value(body: &JsonValue) -> ValidationResult {
    let Some(obj) = body.as_object() else {
        return ValidationResult::invalid_json("Rule conditions must be a JSON object");
    };

    let mut validator = Validator::default();
    let logic = validator.logic(obj.get("logic"));
    let conditions = validator.conditions(obj.get("conditions"));

    match logic {
        Some(logic) if validator.errors.is_empty() => {
            ValidationResult::success(normalize(RuleConditions::new(logic, conditions)))
        }
        _ => ValidationResult::failure(validator.errors),
    }
}

/// A key counts as present when it is set to anything but `null`
fn is_present(obj: &Map<String, JsonValue>, key: &str) -> bool {
    obj.get(key).map_or(false, |v| !v.is_null())
}

#[derive(Default)]
struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    fn push(&mut self, field: impl Into<String>, code: ErrorCode, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
            code,
        });
    }

    fn logic(&mut self, raw: Option<&JsonValue>) -> Option<Logic> {
        match raw {
            None | Some(JsonValue::Null) => {
                self.push("logic", ErrorCode::RequiredField, "logic is required");
                None
            }
            Some(JsonValue::String(s)) => {
                let logic = Logic::parse(s);
                if logic.is_none() {
                    self.push(
                        "logic",
                        ErrorCode::InvalidValue,
                        format!("logic must be AND or OR, got '{}'", s),
                    );
                }
                logic
            }
            Some(_) => {
                self.push("logic", ErrorCode::InvalidValue, "logic must be AND or OR");
                None
            }
        }
    }

    fn conditions(&mut self, raw: Option<&JsonValue>) -> Vec<Condition> {
        let items = match raw {
            Some(JsonValue::Array(items)) if !items.is_empty() => items,
            _ => {
                self.push(
                    "conditions",
                    ErrorCode::RequiredField,
                    "at least one condition is required",
                );
                return Vec::new();
            }
        };

        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| self.condition(index, item))
            .collect()
    }

    fn condition(&mut self, index: usize, raw: &JsonValue) -> Option<Condition> {
        let path = format!("conditions[{}]", index);
        let Some(obj) = raw.as_object() else {
            self.push(path, ErrorCode::InvalidValue, "condition must be an object");
            return None;
        };

        let errors_before = self.errors.len();

        let field = match obj.get("field") {
            None | Some(JsonValue::Null) => {
                self.push(format!("{}.field", path), ErrorCode::RequiredField, "field is required");
                None
            }
            Some(JsonValue::String(name)) => {
                let field = Field::parse(name);
                if field.is_none() {
                    self.push(
                        format!("{}.field", path),
                        ErrorCode::InvalidField,
                        format!("unknown field '{}'", name),
                    );
                }
                field
            }
            Some(_) => {
                self.push(format!("{}.field", path), ErrorCode::InvalidField, "field must be a string");
                None
            }
        };

        let operator = match obj.get("operator") {
            None | Some(JsonValue::Null) => {
                self.push(
                    format!("{}.operator", path),
                    ErrorCode::RequiredField,
                    "operator is required",
                );
                None
            }
            Some(JsonValue::String(name)) => {
                let operator = Operator::parse(name);
                if operator.is_none() {
                    self.push(
                        format!("{}.operator", path),
                        ErrorCode::InvalidOperator,
                        format!("unknown operator '{}'", name),
                    );
                }
                operator
            }
            Some(_) => {
                self.push(
                    format!("{}.operator", path),
                    ErrorCode::InvalidOperator,
                    "operator must be a string",
                );
                None
            }
        };

        let (Some(field), Some(operator)) = (field, operator) else {
            return None;
        };

        // Shape checks below depend on the family; a mismatch leaves it undefined
        if !operator.applies_to(field.family()) {
            self.push(
                format!("{}.operator", path),
                ErrorCode::InvalidOperatorForField,
                format!("operator '{}' cannot be used with field '{}'", operator, field.as_str()),
            );
            return None;
        }

        let condition = match field {
            Field::Text(field) => self.text_condition(&path, field, operator, obj),
            Field::Numeric(field) => self.numeric_condition(&path, field, operator, obj),
        };

        if self.errors.len() > errors_before {
            None
        } else {
            condition
        }
    }

    fn text_condition(
        &mut self,
        path: &str,
        field: StringField,
        operator: Operator,
        obj: &Map<String, JsonValue>,
    ) -> Option<Condition> {
        let predicate = if operator == Operator::ContainsAny {
            let values = self.text_values(path, obj);
            if is_present(obj, "value") {
                self.push(
                    format!("{}.value", path),
                    ErrorCode::ConflictingFields,
                    "value cannot be combined with contains_any; use values",
                );
            }
            values.map(TextPredicate::ContainsAny)
        } else {
            let value = self.text_value(path, operator, obj);
            if is_present(obj, "values") {
                self.push(
                    format!("{}.values", path),
                    ErrorCode::ConflictingFields,
                    format!("values can only be used with contains_any, not {}", operator),
                );
            }
            value.and_then(|v| TextPredicate::with_value(operator, v))
        };

        let case_sensitive = match obj.get("case_sensitive") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::Bool(b)) => Some(*b),
            Some(_) => {
                self.push(
                    format!("{}.case_sensitive", path),
                    ErrorCode::InvalidValue,
                    "case_sensitive must be true or false",
                );
                None
            }
        };

        self.reject_currency_modifier(path, obj);

        if let Some(TextPredicate::Regex(pattern)) = &predicate {
            if let Err(e) = Regex::new(pattern) {
                self.push(
                    format!("{}.value", path),
                    ErrorCode::InvalidRegex,
                    format!("invalid regular expression: {}", e),
                );
            }
        }

        predicate.map(|predicate| {
            Condition::Text(TextCondition {
                field,
                predicate,
                case_sensitive,
            })
        })
    }

    fn numeric_condition(
        &mut self,
        path: &str,
        field: NumericField,
        operator: Operator,
        obj: &Map<String, JsonValue>,
    ) -> Option<Condition> {
        // (property, value) pairs that parsed, for the field range checks
        let mut numbers: Vec<(&'static str, Decimal)> = Vec::new();

        let predicate = if operator == Operator::Between {
            let min = self.number(path, "min_value", operator, obj);
            let max = self.number(path, "max_value", operator, obj);
            if is_present(obj, "value") {
                self.push(
                    format!("{}.value", path),
                    ErrorCode::ConflictingFields,
                    "value cannot be combined with between; use min_value and max_value",
                );
            }
            if let Some(min) = min {
                numbers.push(("min_value", min));
            }
            if let Some(max) = max {
                numbers.push(("max_value", max));
            }
            match (min, max) {
                (Some(min), Some(max)) => {
                    if min >= max {
                        self.push(
                            format!("{}.min_value", path),
                            ErrorCode::InvalidRange,
                            "min_value must be less than max_value",
                        );
                    }
                    Some(NumericPredicate::Between { min, max })
                }
                _ => None,
            }
        } else {
            let value = self.number(path, "value", operator, obj);
            if is_present(obj, "values") {
                self.push(
                    format!("{}.values", path),
                    ErrorCode::ConflictingFields,
                    format!("values can only be used with contains_any, not {}", operator),
                );
            }
            if let Some(value) = value {
                numbers.push(("value", value));
            }
            value.and_then(|v| NumericPredicate::with_value(operator, v))
        };

        if is_present(obj, "case_sensitive") {
            self.push(
                format!("{}.case_sensitive", path),
                ErrorCode::InvalidFieldForType,
                format!("case_sensitive does not apply to numeric field '{}'", field.as_str()),
            );
        }

        self.reject_currency_modifier(path, obj);

        match field {
            NumericField::Amount => {
                for (prop, value) in &numbers {
                    if *prop != "value" && *value < Decimal::ZERO {
                        self.push(
                            format!("{}.{}", path, prop),
                            ErrorCode::InvalidValue,
                            format!("{} for amount cannot be negative", prop),
                        );
                    }
                }
            }
            NumericField::Direction => {
                let max_direction = Decimal::new(2, 0);
                for (prop, value) in &numbers {
                    if *value < Decimal::ZERO || *value > max_direction {
                        self.push(
                            format!("{}.{}", path, prop),
                            ErrorCode::InvalidValue,
                            format!("{} for direction must be between 0 and 2", prop),
                        );
                    }
                }
            }
        }

        predicate.map(|predicate| Condition::Numeric(NumericCondition { field, predicate }))
    }

    /// Currency is a field of its own, never a per-condition modifier
    fn reject_currency_modifier(&mut self, path: &str, obj: &Map<String, JsonValue>) {
        if obj.contains_key("currency") {
            self.push(
                format!("{}.currency", path),
                ErrorCode::InvalidFieldForType,
                "currency is not a condition modifier; use the currency field instead",
            );
        }
    }

    fn text_value(
        &mut self,
        path: &str,
        operator: Operator,
        obj: &Map<String, JsonValue>,
    ) -> Option<String> {
        match obj.get("value") {
            None | Some(JsonValue::Null) => {
                self.push(
                    format!("{}.value", path),
                    ErrorCode::RequiredField,
                    format!("value is required for {}", operator),
                );
                None
            }
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            Some(_) => {
                self.push(
                    format!("{}.value", path),
                    ErrorCode::InvalidValue,
                    "value must be a string",
                );
                None
            }
        }
    }

    fn text_values(&mut self, path: &str, obj: &Map<String, JsonValue>) -> Option<Vec<String>> {
        let items = match obj.get("values") {
            None | Some(JsonValue::Null) => {
                self.push(
                    format!("{}.values", path),
                    ErrorCode::RequiredField,
                    "values is required for contains_any",
                );
                return None;
            }
            Some(JsonValue::Array(items)) if items.is_empty() => {
                self.push(
                    format!("{}.values", path),
                    ErrorCode::RequiredField,
                    "values must contain at least one entry",
                );
                return None;
            }
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                self.push(
                    format!("{}.values", path),
                    ErrorCode::InvalidValue,
                    "values must be a list of strings",
                );
                return None;
            }
        };

        let mut values = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match item {
                JsonValue::String(s) => values.push(s.clone()),
                _ => {
                    ok = false;
                    self.push(
                        format!("{}.values[{}]", path, i),
                        ErrorCode::InvalidValue,
                        "values must be a list of strings",
                    );
                }
            }
        }
        ok.then_some(values)
    }

    fn number(
        &mut self,
        path: &str,
        prop: &'static str,
        operator: Operator,
        obj: &Map<String, JsonValue>,
    ) -> Option<Decimal> {
        match obj.get(prop) {
            None | Some(JsonValue::Null) => {
                self.push(
                    format!("{}.{}", path, prop),
                    ErrorCode::RequiredField,
                    format!("{} is required for {}", prop, operator),
                );
                None
            }
            Some(value) => {
                let number = json_to_decimal(value);
                if number.is_none() {
                    self.push(
                        format!("{}.{}", path, prop),
                        ErrorCode::InvalidValue,
                        format!("{} must be a number", prop),
                    );
                }
                number
            }
        }
    }
}
