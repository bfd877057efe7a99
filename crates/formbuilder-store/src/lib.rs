//! Form Builder Persistence
//!
//! Stores saved form schemas and the auto-saved draft in a string
//! key-value medium behind the [`KeyValueStore`] seam, so the core
//! never touches ambient storage directly and tests substitute an
//! in-memory backend.
//!
//! Failure policy: "no stored data" and "corrupt stored data" are the
//! same thing - an empty list or an absent draft. Readers never see a
//! parse error.

use async_trait::async_trait;
use thiserror::Error;

use formbuilder_core::{DraftForm, FormSchema};

pub mod json;
pub mod kv;

pub use json::JsonFormStore;
pub use kv::{InMemoryKv, KeyValueStore};

/// Storage key for the saved-schema list, wire-compatible with the
/// browser client.
pub const SAVED_FORMS_KEY: &str = "formBuilder_savedForms";
/// Storage key for the auto-saved draft.
pub const DRAFT_FORM_KEY: &str = "formBuilder_draftForm";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence collaborator for form schemas and the draft.
#[async_trait]
pub trait FormStore: Send + Sync {
    /// All saved schemas, oldest first. Missing or corrupt data yields
    /// an empty list.
    async fn list_forms(&self) -> Result<Vec<FormSchema>>;

    /// Append a schema to the saved list.
    async fn save_form(&self, schema: &FormSchema) -> Result<()>;

    /// Remove a schema by id, returning the updated list. Unknown ids
    /// are a no-op.
    async fn delete_form(&self, form_id: &str) -> Result<Vec<FormSchema>>;

    /// The auto-saved draft, if any (and parseable).
    async fn load_draft(&self) -> Result<Option<DraftForm>>;

    async fn save_draft(&self, draft: &DraftForm) -> Result<()>;

    async fn clear_draft(&self) -> Result<()>;

    /// Whether a draft key exists, parseable or not.
    async fn has_draft(&self) -> Result<bool>;
}
