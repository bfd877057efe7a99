//! Form construction and mutation.
//!
//! Holds the form under construction and applies the field-editor
//! operations: add, update, delete, reorder, save. After every mutation
//! the `order` ranks stay a contiguous 0..n-1 sequence matching the
//! field list. Saved schemas are immutable; saving leaves the working
//! form untouched.

use chrono::Utc;
use uuid::Uuid;

use crate::schema::{
    DerivedConfig, DraftForm, FieldOption, FieldType, FieldValue, FormField, FormSchema,
    FormulaType, ValidationRule,
};
use crate::{FormError, Result};

/// The form currently being built.
#[derive(Clone, Debug, Default)]
pub struct FormBuilder {
    name: String,
    fields: Vec<FormField>,
}

/// Everything needed to add a field; id and order are assigned by the
/// builder.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub label: String,
    pub required: bool,
    pub default_value: Option<FieldValue>,
    pub validation_rules: Vec<ValidationRule>,
    pub options: Vec<FieldOption>,
    pub is_derived: bool,
    pub derived_config: Option<DerivedConfig>,
}

impl FormBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Add a field at the end of the form.
    pub fn add_field(&mut self, spec: FieldSpec) -> Result<&FormField> {
        let field = FormField {
            id: format!("field_{}", Uuid::new_v4().simple()),
            field_type: spec.field_type,
            label: spec.label,
            required: spec.required,
            default_value: spec.default_value,
            validation_rules: spec.validation_rules,
            options: spec.options,
            is_derived: spec.is_derived,
            derived_config: spec.derived_config,
            order: self.fields.len() as u32,
        };
        self.check_field(&field)?;
        self.fields.push(field);
        Ok(self.fields.last().expect("just pushed"))
    }

    /// Apply `apply` to the field with the given id. Id and order are
    /// restored afterwards, and the resulting shape is re-checked.
    pub fn update_field(&mut self, id: &str, apply: impl FnOnce(&mut FormField)) -> Result<()> {
        let index = self
            .fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| FormError::FieldNotFound(id.to_string()))?;

        let mut updated = self.fields[index].clone();
        apply(&mut updated);
        updated.id = self.fields[index].id.clone();
        updated.order = self.fields[index].order;
        self.check_field(&updated)?;
        self.fields[index] = updated;
        Ok(())
    }

    /// Delete a field and renumber the survivors.
    pub fn delete_field(&mut self, id: &str) -> Result<()> {
        let index = self
            .fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| FormError::FieldNotFound(id.to_string()))?;
        self.fields.remove(index);
        self.renumber();
        Ok(())
    }

    /// Move the field at `old_index` to `new_index`, shifting the
    /// fields in between and renumbering everything.
    pub fn reorder_field(&mut self, old_index: usize, new_index: usize) -> Result<()> {
        if old_index >= self.fields.len() || new_index >= self.fields.len() {
            return Err(FormError::IndexOutOfRange);
        }
        let field = self.fields.remove(old_index);
        self.fields.insert(new_index, field);
        self.renumber();
        Ok(())
    }

    /// Freeze the current form into an immutable schema. Requires a
    /// non-empty name and at least one field.
    pub fn save_form(&self) -> Result<FormSchema> {
        if self.name.trim().is_empty() || self.fields.is_empty() {
            return Err(FormError::EmptyForm);
        }
        Ok(FormSchema {
            id: format!("form_{}", Uuid::new_v4().simple()),
            name: self.name.clone(),
            fields: self.fields.clone(),
            created_at: Utc::now(),
        })
    }

    /// Load a saved schema for preview/fill.
    pub fn load_schema(&mut self, schema: &FormSchema) {
        self.name = schema.name.clone();
        self.fields = schema.fields.clone();
    }

    /// Snapshot for auto-save.
    pub fn draft(&self) -> DraftForm {
        DraftForm {
            name: self.name.clone(),
            fields: self.fields.clone(),
            last_modified: Utc::now(),
        }
    }

    /// Restore an auto-saved snapshot.
    pub fn load_draft(&mut self, draft: DraftForm) {
        self.name = draft.name;
        self.fields = draft.fields;
    }

    pub fn clear(&mut self) {
        self.name.clear();
        self.fields.clear();
    }

    fn renumber(&mut self) {
        for (index, field) in self.fields.iter_mut().enumerate() {
            field.order = index as u32;
        }
    }

    /// Shape checks the field editor guarantees before a field is
    /// admitted (label present, derived config coherent, options where
    /// the type needs them).
    fn check_field(&self, field: &FormField) -> Result<()> {
        if field.label.trim().is_empty() {
            return Err(FormError::EmptyLabel);
        }
        if field.field_type.requires_options() && field.options.is_empty() {
            return Err(FormError::InvalidField(format!(
                "field '{}' needs at least one option",
                field.label
            )));
        }
        if field.is_derived {
            let config = field.derived_config.as_ref().ok_or_else(|| {
                FormError::InvalidField(format!("derived field '{}' has no config", field.label))
            })?;
            if config.parent_fields.is_empty() {
                return Err(FormError::InvalidField(format!(
                    "derived field '{}' needs at least one parent",
                    field.label
                )));
            }
            for parent_id in &config.parent_fields {
                let parent = self
                    .fields
                    .iter()
                    .find(|f| f.id == *parent_id && f.id != field.id)
                    .ok_or_else(|| FormError::FieldNotFound(parent_id.clone()))?;
                // No chained derivation.
                if parent.is_derived {
                    return Err(FormError::InvalidField(format!(
                        "parent '{}' of '{}' is itself derived",
                        parent_id, field.label
                    )));
                }
            }
            if config.formula_type == FormulaType::Custom
                && config.formula.trim().is_empty()
            {
                return Err(FormError::InvalidField(format!(
                    "derived field '{}' needs a formula",
                    field.label
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DerivedConfig, FieldOption, FieldType, FormulaType};

    fn text_spec(label: &str) -> FieldSpec {
        FieldSpec {
            field_type: FieldType::Text,
            label: label.to_string(),
            required: false,
            default_value: None,
            validation_rules: vec![],
            options: vec![],
            is_derived: false,
            derived_config: None,
        }
    }

    fn builder_with(labels: &[&str]) -> FormBuilder {
        let mut b = FormBuilder::new();
        for label in labels {
            b.add_field(text_spec(label)).unwrap();
        }
        b
    }

    fn orders(b: &FormBuilder) -> Vec<u32> {
        b.fields().iter().map(|f| f.order).collect()
    }

    fn labels(b: &FormBuilder) -> Vec<&str> {
        b.fields().iter().map(|f| f.label.as_str()).collect()
    }

    #[test]
    fn test_add_assigns_contiguous_orders() {
        let b = builder_with(&["a", "b", "c"]);
        assert_eq!(orders(&b), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_label_rejected() {
        let mut b = FormBuilder::new();
        assert!(matches!(b.add_field(text_spec("   ")), Err(FormError::EmptyLabel)));
    }

    #[test]
    fn test_choice_field_needs_options() {
        let mut b = FormBuilder::new();
        let mut spec = text_spec("Color");
        spec.field_type = FieldType::Select;
        assert!(matches!(b.add_field(spec.clone()), Err(FormError::InvalidField(_))));

        spec.options = vec![FieldOption {
            label: "Red".to_string(),
            value: "red".to_string(),
        }];
        assert!(b.add_field(spec).is_ok());
    }

    #[test]
    fn test_delete_renumbers() {
        let mut b = builder_with(&["a", "b", "c"]);
        let middle_id = b.fields()[1].id.clone();
        b.delete_field(&middle_id).unwrap();
        assert_eq!(labels(&b), vec!["a", "c"]);
        assert_eq!(orders(&b), vec![0, 1]);
    }

    #[test]
    fn test_reorder_renumbers() {
        let mut b = builder_with(&["a", "b", "c", "d"]);
        b.reorder_field(0, 2).unwrap();
        assert_eq!(labels(&b), vec!["b", "c", "a", "d"]);
        assert_eq!(orders(&b), vec![0, 1, 2, 3]);

        b.reorder_field(3, 0).unwrap();
        assert_eq!(labels(&b), vec!["d", "b", "c", "a"]);
        assert_eq!(orders(&b), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reorder_out_of_range() {
        let mut b = builder_with(&["a"]);
        assert!(matches!(b.reorder_field(0, 5), Err(FormError::IndexOutOfRange)));
    }

    #[test]
    fn test_update_preserves_id_and_order() {
        let mut b = builder_with(&["a", "b"]);
        let id = b.fields()[1].id.clone();
        b.update_field(&id, |f| {
            f.label = "renamed".to_string();
            f.id = "hijacked".to_string();
            f.order = 99;
        })
        .unwrap();
        assert_eq!(b.fields()[1].id, id);
        assert_eq!(b.fields()[1].order, 1);
        assert_eq!(b.fields()[1].label, "renamed");
    }

    #[test]
    fn test_derived_field_checks() {
        let mut b = builder_with(&["price", "qty"]);
        let price_id = b.fields()[0].id.clone();
        let qty_id = b.fields()[1].id.clone();

        let mut spec = text_spec("Total");
        spec.is_derived = true;
        // Missing config
        assert!(matches!(b.add_field(spec.clone()), Err(FormError::InvalidField(_))));

        // Empty parents
        spec.derived_config = Some(DerivedConfig {
            parent_fields: vec![],
            formula_type: FormulaType::Sum,
            formula: String::new(),
        });
        assert!(matches!(b.add_field(spec.clone()), Err(FormError::InvalidField(_))));

        // Unknown parent
        spec.derived_config = Some(DerivedConfig {
            parent_fields: vec!["nope".to_string()],
            formula_type: FormulaType::Sum,
            formula: String::new(),
        });
        assert!(matches!(b.add_field(spec.clone()), Err(FormError::FieldNotFound(_))));

        // Custom without a formula
        spec.derived_config = Some(DerivedConfig {
            parent_fields: vec![price_id.clone(), qty_id.clone()],
            formula_type: FormulaType::Custom,
            formula: "  ".to_string(),
        });
        assert!(matches!(b.add_field(spec.clone()), Err(FormError::InvalidField(_))));

        // Valid sum
        spec.derived_config = Some(DerivedConfig {
            parent_fields: vec![price_id, qty_id],
            formula_type: FormulaType::Sum,
            formula: String::new(),
        });
        let total_id = b.add_field(spec).unwrap().id.clone();

        // A derived field cannot feed another derived field.
        let mut chained = text_spec("Chained");
        chained.is_derived = true;
        chained.derived_config = Some(DerivedConfig {
            parent_fields: vec![total_id],
            formula_type: FormulaType::Sum,
            formula: String::new(),
        });
        assert!(matches!(b.add_field(chained), Err(FormError::InvalidField(_))));
    }

    #[test]
    fn test_save_requires_name_and_fields() {
        let mut b = FormBuilder::new();
        assert!(matches!(b.save_form(), Err(FormError::EmptyForm)));
        b.set_name("Survey");
        assert!(matches!(b.save_form(), Err(FormError::EmptyForm)));
        b.add_field(text_spec("Question")).unwrap();

        let schema = b.save_form().unwrap();
        assert_eq!(schema.name, "Survey");
        assert_eq!(schema.fields.len(), 1);
        assert!(schema.id.starts_with("form_"));
        // Saving does not consume the working form.
        assert_eq!(b.fields().len(), 1);
    }

    #[test]
    fn test_draft_round_trip() {
        let mut b = FormBuilder::new();
        b.set_name("WIP");
        b.add_field(text_spec("Question")).unwrap();
        let draft = b.draft();

        let mut restored = FormBuilder::new();
        restored.load_draft(draft);
        assert_eq!(restored.name(), "WIP");
        assert_eq!(restored.fields().len(), 1);
    }
}
