//! JSON schema store over any key-value backend.

use async_trait::async_trait;

use formbuilder_core::{DraftForm, FormSchema};

use crate::kv::KeyValueStore;
use crate::{FormStore, Result, DRAFT_FORM_KEY, SAVED_FORMS_KEY};

/// Serializes schemas and drafts as JSON under the fixed storage keys.
pub struct JsonFormStore<K: KeyValueStore> {
    backend: K,
}

impl<K: KeyValueStore> JsonFormStore<K> {
    pub fn new(backend: K) -> Self {
        Self { backend }
    }

    async fn read_forms(&self) -> Result<Vec<FormSchema>> {
        let raw = match self.backend.get(SAVED_FORMS_KEY).await? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(forms) => Ok(forms),
            Err(e) => {
                // Corrupt data reads the same as no data.
                tracing::warn!(error = %e, key = SAVED_FORMS_KEY, "discarding corrupt form list");
                Ok(Vec::new())
            }
        }
    }

    async fn write_forms(&self, forms: &[FormSchema]) -> Result<()> {
        let raw = serde_json::to_string(forms)
            .map_err(|e| crate::StoreError::Backend(e.to_string()))?;
        self.backend.set(SAVED_FORMS_KEY, raw).await
    }
}

#[async_trait]
impl<K: KeyValueStore> FormStore for JsonFormStore<K> {
    async fn list_forms(&self) -> Result<Vec<FormSchema>> {
        self.read_forms().await
    }

    async fn save_form(&self, schema: &FormSchema) -> Result<()> {
        let mut forms = self.read_forms().await?;
        forms.push(schema.clone());
        self.write_forms(&forms).await
    }

    async fn delete_form(&self, form_id: &str) -> Result<Vec<FormSchema>> {
        let mut forms = self.read_forms().await?;
        forms.retain(|f| f.id != form_id);
        self.write_forms(&forms).await?;
        Ok(forms)
    }

    async fn load_draft(&self) -> Result<Option<DraftForm>> {
        let raw = match self.backend.get(DRAFT_FORM_KEY).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                tracing::warn!(error = %e, key = DRAFT_FORM_KEY, "discarding corrupt draft");
                Ok(None)
            }
        }
    }

    async fn save_draft(&self, draft: &DraftForm) -> Result<()> {
        let raw = serde_json::to_string(draft)
            .map_err(|e| crate::StoreError::Backend(e.to_string()))?;
        self.backend.set(DRAFT_FORM_KEY, raw).await
    }

    async fn clear_draft(&self) -> Result<()> {
        self.backend.remove(DRAFT_FORM_KEY).await
    }

    async fn has_draft(&self) -> Result<bool> {
        Ok(self.backend.get(DRAFT_FORM_KEY).await?.is_some())
    }
}
