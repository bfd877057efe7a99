//! Derived-value engine.
//!
//! Recomputes derived field values from the current value map. The
//! engine is total: whatever the field shape, the formula text or the
//! map contents, `calculate` returns a value - malformed input degrades
//! to an empty string (or 0 for ages), never to a panic or an error.
//! It runs on every keystroke-driven edit, so a single broken formula
//! must only blank its own field.

mod expr;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::schema::{FieldValue, FormField, FormulaType, ValueMap};
use expr::{Bindings, Value};

/// Positional aliases `field1..field10` are always bound, so a formula
/// referencing an unconfigured slot evaluates instead of erroring.
const ALIAS_SLOTS: usize = 10;

/// Evaluator for derived fields, with its formula guards compiled once.
pub struct DerivedEngine {
    /// Positional alias reference (`field1`, `field2`, ...).
    alias_ref: Regex,
    /// Helper call reference (`sum(`, `multiply(`, `concat(`).
    helper_ref: Regex,
}

impl DerivedEngine {
    pub fn new() -> Self {
        Self {
            alias_ref: Regex::new(r"field\d+").expect("alias pattern is valid"),
            helper_ref: Regex::new(r"sum\(|multiply\(|concat\(").expect("helper pattern is valid"),
        }
    }

    /// Compute the current value of a derived field.
    ///
    /// Non-derived fields and fields missing their config yield an empty
    /// string (defensive default, not an error).
    pub fn calculate(&self, field: &FormField, values: &ValueMap) -> FieldValue {
        if !field.is_derived {
            return FieldValue::from("");
        }
        let Some(config) = &field.derived_config else {
            return FieldValue::from("");
        };

        match config.formula_type {
            FormulaType::AgeFromBirthdate => {
                let age = config
                    .parent_fields
                    .first()
                    .and_then(|id| values.get(id))
                    .and_then(|v| match v {
                        FieldValue::Text(s) => parse_birthdate(s),
                        _ => None,
                    })
                    .map(|birth| age_at(birth, Utc::now().date_naive()))
                    .unwrap_or(0);
                FieldValue::Number(age as f64)
            }
            FormulaType::Sum => {
                let total: f64 = config
                    .parent_fields
                    .iter()
                    .map(|id| {
                        values
                            .get(id)
                            .and_then(FieldValue::as_number)
                            .unwrap_or(0.0)
                    })
                    .sum();
                FieldValue::Number(total)
            }
            FormulaType::Concat => {
                let joined = config
                    .parent_fields
                    .iter()
                    .map(|id| values.get(id).map(FieldValue::display).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(" ");
                FieldValue::Text(joined)
            }
            FormulaType::Custom => {
                self.evaluate_custom(&config.formula, &config.parent_fields, values)
            }
        }
    }

    fn evaluate_custom(
        &self,
        formula: &str,
        parent_fields: &[String],
        values: &ValueMap,
    ) -> FieldValue {
        let clean = clean_formula(formula);
        if clean.is_empty() {
            return FieldValue::from("");
        }

        // Minimal syntax guard, not a parser.
        if clean.contains("()") || clean.starts_with(',') || clean.ends_with(',') {
            tracing::warn!(formula = %clean, "rejecting formula with invalid syntax");
            return FieldValue::from("");
        }

        // A formula must reference something we bound: a positional
        // alias, a literal parent id or one of the helpers.
        let references_alias = self.alias_ref.is_match(&clean);
        let references_parent = parent_fields.iter().any(|id| clean.contains(id.as_str()));
        let references_helper = self.helper_ref.is_match(&clean);
        if !references_alias && !references_parent && !references_helper {
            tracing::warn!(formula = %clean, "formula references no known field or helper");
            return FieldValue::from("");
        }

        let vars = build_bindings(parent_fields, values);
        match expr::evaluate(&clean, &vars) {
            Ok(Value::Number(n)) if n.is_finite() => FieldValue::Number(n),
            Ok(Value::Number(n)) if n.is_nan() => FieldValue::from(""),
            Ok(Value::Number(n)) => FieldValue::Text(crate::schema::format_number(n)),
            Ok(Value::Text(s)) => FieldValue::Text(s),
            Err(e) => {
                tracing::debug!(formula = %clean, error = %e, "formula evaluation failed");
                FieldValue::from("")
            }
        }
    }
}

impl Default for DerivedEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip wrapping backticks and collapse internal whitespace runs.
fn clean_formula(formula: &str) -> String {
    let trimmed = formula.trim().trim_matches('`').trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bind every parent under its literal id and its positional alias,
/// numeric strings coerced to numbers, absent parents defaulting to 0.
fn build_bindings(parent_fields: &[String], values: &ValueMap) -> Bindings {
    let mut vars = Bindings::new();
    for (index, id) in parent_fields.iter().enumerate() {
        let value = match values.get(id) {
            None => Value::Number(0.0),
            Some(v) => match v.as_number() {
                Some(n) => Value::Number(n),
                None => match v {
                    // Blank strings count as unset.
                    FieldValue::Text(s) if s.trim().is_empty() => Value::Number(0.0),
                    other => Value::Text(other.display()),
                },
            },
        };
        vars.insert(id.clone(), value.clone());
        vars.insert(format!("field{}", index + 1), value);
    }
    for slot in 1..=ALIAS_SLOTS {
        vars.entry(format!("field{}", slot))
            .or_insert(Value::Number(0.0));
    }
    vars
}

/// Accepts ISO `YYYY-MM-DD` and component-wise `DD/MM/YYYY`.
/// Out-of-range components are a parse failure, not a rollover.
fn parse_birthdate(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return None;
        }
        let day: u32 = parts[0].trim().parse().ok()?;
        let month: u32 = parts[1].trim().parse().ok()?;
        let year: i32 = parts[2].trim().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    } else {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }
}

/// Whole years between `birth` and `today`, decremented when today's
/// month/day precedes the birthday's, clamped to 0.
fn age_at(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DerivedConfig, FieldType};
    use proptest::prelude::*;

    fn derived_field(formula_type: FormulaType, parents: &[&str], formula: &str) -> FormField {
        FormField {
            id: "derived".to_string(),
            field_type: FieldType::Text,
            label: "Derived".to_string(),
            required: false,
            default_value: None,
            validation_rules: vec![],
            options: vec![],
            is_derived: true,
            derived_config: Some(DerivedConfig {
                parent_fields: parents.iter().map(|s| s.to_string()).collect(),
                formula_type,
                formula: formula.to_string(),
            }),
            order: 0,
        }
    }

    fn values(pairs: &[(&str, FieldValue)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_non_derived_field_yields_empty() {
        let engine = DerivedEngine::new();
        let mut field = derived_field(FormulaType::Sum, &["a"], "");
        field.is_derived = false;
        assert_eq!(engine.calculate(&field, &ValueMap::new()), FieldValue::from(""));

        let mut field = derived_field(FormulaType::Sum, &["a"], "");
        field.derived_config = None;
        assert_eq!(engine.calculate(&field, &ValueMap::new()), FieldValue::from(""));
    }

    #[test]
    fn test_sum() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Sum, &["a", "b"], "");
        let vals = values(&[("a", FieldValue::from("3")), ("b", FieldValue::from("4.5"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(7.5));
    }

    #[test]
    fn test_sum_non_numeric_contributes_zero() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Sum, &["a", "b", "c"], "");
        let vals = values(&[("a", FieldValue::from("10")), ("b", FieldValue::from("oops"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(10.0));
    }

    #[test]
    fn test_concat() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Concat, &["a", "b"], "");
        let vals = values(&[("a", FieldValue::from("Jane")), ("b", FieldValue::from("Doe"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from("Jane Doe"));
    }

    #[test]
    fn test_concat_absent_parent_is_empty() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Concat, &["a", "b"], "");
        let vals = values(&[("a", FieldValue::from("Jane"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from("Jane "));
    }

    #[test]
    fn test_age_boundary() {
        let birth = NaiveDate::from_ymd_opt(2000, 6, 15).unwrap();
        assert_eq!(age_at(birth, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), 23);
        assert_eq!(age_at(birth, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 24);
    }

    #[test]
    fn test_age_never_negative() {
        let birth = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert_eq!(age_at(birth, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 0);
    }

    #[test]
    fn test_birthdate_formats() {
        assert_eq!(
            parse_birthdate("2000-06-15"),
            NaiveDate::from_ymd_opt(2000, 6, 15)
        );
        assert_eq!(
            parse_birthdate("15/06/2000"),
            NaiveDate::from_ymd_opt(2000, 6, 15)
        );
        assert_eq!(parse_birthdate("32/01/2000"), None);
        assert_eq!(parse_birthdate("junk"), None);
        assert_eq!(parse_birthdate("15/06"), None);
    }

    #[test]
    fn test_age_invalid_input_is_zero() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::AgeFromBirthdate, &["dob"], "");
        assert_eq!(engine.calculate(&field, &ValueMap::new()), FieldValue::Number(0.0));
        let vals = values(&[("dob", FieldValue::from("not a date"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(0.0));
        let vals = values(&[("dob", FieldValue::Number(42.0))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(0.0));
    }

    #[test]
    fn test_custom_formula_with_aliases() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x", "y"], "field1 + field2 * 2");
        let vals = values(&[("x", FieldValue::from("3")), ("y", FieldValue::from("4"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(11.0));
    }

    #[test]
    fn test_custom_formula_with_literal_ids() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["price", "qty"], "price * qty");
        let vals = values(&[("price", FieldValue::from("2.5")), ("qty", FieldValue::from("4"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(10.0));
    }

    #[test]
    fn test_custom_formula_backticks_and_whitespace() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x"], "`field1   +   1`");
        let vals = values(&[("x", FieldValue::from("9"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(10.0));
    }

    #[test]
    fn test_custom_formula_unconfigured_slot_defaults_to_zero() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x"], "field1 + field2");
        let vals = values(&[("x", FieldValue::from("5"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(5.0));
    }

    #[test]
    fn test_custom_formula_helpers() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["a", "b"], "sum(field1, field2)");
        let vals = values(&[("a", FieldValue::from("1")), ("b", FieldValue::from("2"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::Number(3.0));

        let field = derived_field(
            FormulaType::Custom,
            &["first", "last"],
            "concat(field1, ' ', field2)",
        );
        let vals = values(&[
            ("first", FieldValue::from("Jane")),
            ("last", FieldValue::from("Doe")),
        ]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from("Jane Doe"));
    }

    #[test]
    fn test_custom_formula_without_references_is_rejected() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x"], "banana");
        let vals = values(&[("x", FieldValue::from("1"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from(""));
    }

    #[test]
    fn test_custom_formula_syntax_guards() {
        let engine = DerivedEngine::new();
        let vals = values(&[("x", FieldValue::from("1"))]);
        for formula in ["", "   ", "``", "sum()", ",field1", "field1,"] {
            let field = derived_field(FormulaType::Custom, &["x"], formula);
            assert_eq!(
                engine.calculate(&field, &vals),
                FieldValue::from(""),
                "formula {:?} should be rejected",
                formula
            );
        }
    }

    #[test]
    fn test_custom_formula_evaluation_error_degrades_to_empty() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x"], "field1 + + *");
        let vals = values(&[("x", FieldValue::from("1"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from(""));
    }

    #[test]
    fn test_custom_formula_non_numeric_string_value() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["name"], "field1 + '!'");
        let vals = values(&[("name", FieldValue::from("Jane"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from("Jane!"));
    }

    #[test]
    fn test_custom_formula_division_by_zero_stringifies() {
        let engine = DerivedEngine::new();
        let field = derived_field(FormulaType::Custom, &["x"], "field1 / 0");
        let vals = values(&[("x", FieldValue::from("1"))]);
        assert_eq!(engine.calculate(&field, &vals), FieldValue::from("Infinity"));
    }

    proptest! {
        /// The engine is total: any formula text against any small value
        /// map yields a value, never a panic.
        #[test]
        fn test_calculate_never_panics(formula in ".{0,40}", a in any::<f64>(), b in ".{0,10}") {
            let engine = DerivedEngine::new();
            let field = derived_field(FormulaType::Custom, &["x", "y"], &formula);
            let vals = values(&[
                ("x", FieldValue::Number(a)),
                ("y", FieldValue::from(b.as_str())),
            ]);
            let _ = engine.calculate(&field, &vals);
        }
    }
}
