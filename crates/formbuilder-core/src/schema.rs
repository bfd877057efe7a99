//! Field, rule and form schema data model.
//!
//! Wire format is the camelCase JSON the browser client produces
//! (`isDerived`, `parentFields`, `createdAt`, ...), so schemas exported
//! from older builds deserialize unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field renderer kind, determines which value shapes apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Textarea,
    Select,
    Radio,
    Checkbox,
    Date,
}

impl FieldType {
    /// Choice-style fields must carry a non-empty option list.
    pub fn requires_options(&self) -> bool {
        matches!(self, Self::Select | Self::Radio | Self::Checkbox)
    }
}

/// Validation rule kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleType {
    Required,
    NotEmpty,
    MinLength,
    MaxLength,
    Email,
    Password,
}

/// A single validation rule. Rules are evaluated in declared order and
/// the first failure wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Length threshold, meaningful only for minLength/maxLength. A rule
    /// carrying no threshold can never fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<usize>,
    /// Returned verbatim when the rule fails.
    pub message: String,
}

/// One (label, stored value) choice for select/radio/checkbox fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

/// Computation strategy of a derived field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaType {
    AgeFromBirthdate,
    Sum,
    Concat,
    Custom,
}

/// Configuration of a derived field: which fields feed it and how the
/// value is computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedConfig {
    /// Ids of the parent fields, in evaluation order. Must reference only
    /// non-derived fields (enforced at edit time by the builder).
    pub parent_fields: Vec<String>,
    pub formula_type: FormulaType,
    /// Free-form expression, used only when `formula_type` is `Custom`.
    #[serde(default)]
    pub formula: String,
}

/// One form question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<FieldValue>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default)]
    pub is_derived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_config: Option<DerivedConfig>,
    /// Rank among siblings, contiguous from 0 after every mutation.
    pub order: u32,
}

/// A saved, immutable form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    pub id: String,
    pub name: String,
    pub fields: Vec<FormField>,
    pub created_at: DateTime<Utc>,
}

/// Auto-saved snapshot of a form under construction, distinct from a
/// saved [`FormSchema`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftForm {
    pub name: String,
    pub fields: Vec<FormField>,
    pub last_modified: DateTime<Utc>,
}

/// A field's current value during form filling.
///
/// Untagged so that JSON numbers, strings and string arrays map onto the
/// matching variant directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// Multi-select (checkbox) values.
    Many(Vec<String>),
}

impl FieldValue {
    /// True for empty and whitespace-only strings.
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    /// Numeric view: numbers as-is, non-empty numeric strings parsed
    /// whole (no prefix parsing), everything else `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    t.parse::<f64>().ok()
                }
            }
            Self::Many(_) => None,
        }
    }

    /// Display form used by concatenation: whole floats print without a
    /// fractional part, multi-values join with commas.
    pub fn display(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Many(items) => items.join(","),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Render a float the way form output expects: `7` rather than `7.0`,
/// `7.5` kept as-is, infinities spelled out.
pub fn format_number(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Per-session mapping from field id to current value.
pub type ValueMap = HashMap<String, FieldValue>;

/// Per-field validation messages keyed by field id.
pub type FieldErrors = HashMap<String, String>;
