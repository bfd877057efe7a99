//! Validation engine.
//!
//! Rules run in declared order and the first failure's message wins.
//! Length, email and password rules only ever inspect string values;
//! numbers and multi-selects pass them untested. That asymmetry is part
//! of the contract, not an oversight.

use regex::Regex;

use crate::schema::{FieldErrors, FieldValue, FormField, RuleType, ValidationRule, ValueMap};

/// RFC-lite: localpart@domain.tld, no whitespace.
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Rule evaluator with its patterns compiled once.
pub struct Validator {
    email: Regex,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            email: Regex::new(EMAIL_PATTERN).expect("email pattern is valid"),
        }
    }

    /// Evaluate `value` against `rules`, returning the first failing
    /// rule's message, or an empty string when every rule passes.
    pub fn validate_field(&self, value: Option<&FieldValue>, rules: &[ValidationRule]) -> String {
        for rule in rules {
            if self.rule_fails(value, rule) {
                return rule.message.clone();
            }
        }
        String::new()
    }

    /// Validate every non-derived field, collecting only non-empty
    /// messages. Derived fields are the derived-value engine's
    /// responsibility and never appear in the result.
    pub fn validate_form(&self, values: &ValueMap, fields: &[FormField]) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for field in fields {
            if field.is_derived {
                continue;
            }
            let message = self.validate_field(values.get(&field.id), &field.validation_rules);
            if !message.is_empty() {
                errors.insert(field.id.clone(), message);
            }
        }
        errors
    }

    fn rule_fails(&self, value: Option<&FieldValue>, rule: &ValidationRule) -> bool {
        match rule.rule_type {
            // Synonyms: absent value or blank string.
            RuleType::Required | RuleType::NotEmpty => {
                value.map_or(true, |v| v.is_blank())
            }
            RuleType::MinLength => match (value, rule.value) {
                (Some(FieldValue::Text(s)), Some(min)) => s.chars().count() < min,
                _ => false,
            },
            RuleType::MaxLength => match (value, rule.value) {
                (Some(FieldValue::Text(s)), Some(max)) => s.chars().count() > max,
                _ => false,
            },
            RuleType::Email => match value {
                Some(FieldValue::Text(s)) => !self.email.is_match(s),
                _ => false,
            },
            RuleType::Password => match value {
                Some(FieldValue::Text(s)) => !password_ok(s),
                _ => false,
            },
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// At least 8 characters, one ASCII letter and one ASCII digit.
fn password_ok(s: &str) -> bool {
    s.chars().count() >= 8
        && s.chars().any(|c| c.is_ascii_alphabetic())
        && s.chars().any(|c| c.is_ascii_digit())
}
