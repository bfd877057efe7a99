//! Form Builder Core
//!
//! Field model, validation engine, derived-field evaluation and the
//! form-filling session loop.
//!
//! ## Features
//! - Typed fields (text, number, select, radio, checkbox, date) with
//!   ordered validation rules
//! - Derived fields computed from parent fields (age-from-birthdate,
//!   sum, concatenation, custom expressions)
//! - Sandboxed expression interpreter for custom formulas - no host
//!   code evaluation, every failure degrades to an empty value
//! - Form-filling session with single-pass derived recomputation on
//!   every edit and paced submit validation

use thiserror::Error;

pub mod builder;
pub mod derived;
pub mod schema;
pub mod session;
pub mod validation;

pub use builder::{FieldSpec, FormBuilder};
pub use derived::DerivedEngine;
pub use schema::{
    DerivedConfig, DraftForm, FieldErrors, FieldOption, FieldType, FieldValue, FormField,
    FormSchema, FormulaType, RuleType, ValidationRule, ValueMap,
};
pub use session::{FormSession, SessionState, SubmitOutcome};
pub use validation::Validator;

/// Errors surfaced by form mutation and session operations.
///
/// Formula evaluation never produces one of these: the derived-value
/// engine is total and degrades to empty values instead.
#[derive(Error, Debug)]
pub enum FormError {
    #[error("field label must not be empty")]
    EmptyLabel,

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("derived field {0} cannot be edited directly")]
    DerivedFieldWrite(String),

    #[error("form needs a name and at least one field before saving")]
    EmptyForm,

    #[error("field index out of range")]
    IndexOutOfRange,

    #[error("operation only valid while editing")]
    NotEditing,
}

pub type Result<T> = std::result::Result<T, FormError>;
