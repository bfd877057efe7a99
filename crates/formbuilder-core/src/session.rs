//! Form-filling session loop.
//!
//! One session per open form: `Editing -> Submitting -> Submitted`,
//! with edits cycling in `Editing` and `reset` returning there from
//! `Submitted`. Every accepted edit triggers exactly one derived
//! recompute pass over the whole form in field order - no fixpoint
//! iteration, which is sound because derived fields never feed each
//! other.

use std::time::Duration;

use crate::derived::DerivedEngine;
use crate::schema::{FieldErrors, FieldValue, FormField, ValueMap};
use crate::validation::Validator;
use crate::{FormError, Result};

/// Pacing delay between the submit action and the validation pass.
const DEFAULT_SUBMIT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Editing,
    /// Transient, gates duplicate submits while the pacing delay runs.
    Submitting,
    Submitted,
}

/// Result of a submit attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// All rules passed; the value map is frozen as the response.
    Accepted,
    /// Per-field messages; the session is back in `Editing`.
    Rejected(FieldErrors),
}

/// A live form-filling session. Owns the value map; derived entries are
/// written exclusively by the derived-value engine.
pub struct FormSession {
    fields: Vec<FormField>,
    values: ValueMap,
    errors: FieldErrors,
    state: SessionState,
    engine: DerivedEngine,
    validator: Validator,
    submit_delay: Duration,
}

impl FormSession {
    /// Start a session over the given fields (sorted into form order).
    pub fn new(mut fields: Vec<FormField>) -> Self {
        fields.sort_by_key(|f| f.order);
        let mut session = Self {
            fields,
            values: ValueMap::new(),
            errors: FieldErrors::new(),
            state: SessionState::Editing,
            engine: DerivedEngine::new(),
            validator: Validator::new(),
            submit_delay: DEFAULT_SUBMIT_DELAY,
        };
        session.initialize_values();
        session
    }

    /// Same as [`new`](Self::new) with a custom pacing delay. Tests use
    /// a zero delay.
    pub fn with_submit_delay(fields: Vec<FormField>, delay: Duration) -> Self {
        let mut session = Self::new(fields);
        session.submit_delay = delay;
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// The recorded response, available once submitted.
    pub fn response(&self) -> Option<&ValueMap> {
        (self.state == SessionState::Submitted).then_some(&self.values)
    }

    /// Direct edit of a non-derived field. Clears the field's error and
    /// runs one derived recompute pass.
    pub fn set_value(&mut self, field_id: &str, value: FieldValue) -> Result<()> {
        if self.state != SessionState::Editing {
            return Err(FormError::NotEditing);
        }
        let field = self
            .fields
            .iter()
            .find(|f| f.id == field_id)
            .ok_or_else(|| FormError::FieldNotFound(field_id.to_string()))?;
        if field.is_derived {
            return Err(FormError::DerivedFieldWrite(field_id.to_string()));
        }

        self.values.insert(field_id.to_string(), value);
        self.errors.remove(field_id);
        self.recompute_derived();
        Ok(())
    }

    /// Run the pacing delay, then validate and either record the
    /// response or return to editing with errors attached.
    ///
    /// Dropping the returned future before it completes leaves the
    /// submit unapplied: the session returns to `Editing` and keeps
    /// every entered value.
    pub async fn submit(&mut self) -> Result<SubmitOutcome> {
        if self.state != SessionState::Editing {
            return Err(FormError::NotEditing);
        }
        self.state = SessionState::Submitting;

        {
            // Cancelling mid-delay must not leave the session stuck in
            // `Submitting`.
            let mut guard = SubmitGuard {
                state: &mut self.state,
                completed: false,
            };
            tokio::time::sleep(self.submit_delay).await;
            guard.completed = true;
        }

        let errors = self.validator.validate_form(&self.values, &self.fields);
        if errors.is_empty() {
            self.state = SessionState::Submitted;
            tracing::debug!(fields = self.fields.len(), "form submitted");
            Ok(SubmitOutcome::Accepted)
        } else {
            self.state = SessionState::Editing;
            self.errors = errors.clone();
            Ok(SubmitOutcome::Rejected(errors))
        }
    }

    /// Back to initial defaults, clearing errors and any recorded
    /// response.
    pub fn reset(&mut self) {
        self.values.clear();
        self.errors.clear();
        self.state = SessionState::Editing;
        self.initialize_values();
    }

    /// Seed non-derived defaults, then populate derived fields.
    fn initialize_values(&mut self) {
        for field in &self.fields {
            if !field.is_derived {
                if let Some(default) = &field.default_value {
                    self.values.insert(field.id.clone(), default.clone());
                }
            }
        }
        self.recompute_derived();
    }

    /// Single pass over all derived fields in form order.
    fn recompute_derived(&mut self) {
        for field in &self.fields {
            if field.is_derived {
                let value = self.engine.calculate(field, &self.values);
                self.values.insert(field.id.clone(), value);
            }
        }
    }
}

/// Rolls a cancelled submit back to `Editing`.
struct SubmitGuard<'a> {
    state: &'a mut SessionState,
    completed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            *self.state = SessionState::Editing;
        }
    }
}
