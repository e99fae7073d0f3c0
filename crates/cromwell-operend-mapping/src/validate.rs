use std::fs::File;
use std::path::Path;

use cromwell_operend_core::{
    EntitySchema, EntitySchemaSource, FieldSide, FieldValue, RowTable, VariableDefinition,
    VariableType,
};
use serde_json::Value;

use crate::{FieldMapping, MappingManifest, MappingRole};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("manifest specifies {} {field}, which is not found in the Cromwell metadata", .role.as_str())]
    MissingField { field: String, role: MappingRole },
    #[error("saw for {field} at row {row} a value of unsupported type: {value}")]
    UnsupportedValueType {
        field: String,
        row: usize,
        value: Value,
    },
    #[error("output file {path} for {field} is not readable: {reason}")]
    FileNotAccessible {
        field: String,
        path: String,
        reason: String,
    },
    #[error("entity class lookup for {class_name} failed: {reason}")]
    SchemaUnavailable { class_name: String, reason: String },
    #[error("Operend server has no visible entity class named {0}")]
    UnknownEntityClass(String),
    #[error("entity class {class_name} does not have a variable named {target}")]
    UnknownTargetField { class_name: String, target: String },
    #[error("entity class field {target} wants {expected}, which does not match {field}: {observed}")]
    TypeMismatch {
        field: String,
        target: String,
        expected: String,
        observed: String,
    },
    #[error(
        "entity class field {target} expects {}, but {field} at row {row} holds {}",
        file_shape(*.expected_array),
        file_shape(!*.expected_array)
    )]
    ArrayShapeMismatch {
        field: String,
        target: String,
        row: usize,
        expected_array: bool,
    },
}

/// Checks a manifest against a row table, then optionally against the remote
/// entity class.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    manifest: &'a MappingManifest,
    mock_file: Option<&'a Path>,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub fn new(manifest: &'a MappingManifest) -> Self {
        Self {
            manifest,
            mock_file: None,
        }
    }

    /// Opens `path` instead of every output file named in the table.
    #[must_use]
    pub fn with_mock_file(mut self, path: Option<&'a Path>) -> Self {
        self.mock_file = path;
        self
    }

    /// Checks that need no network: mapped fields exist, output values have
    /// an entity-compatible type, and output files can be opened.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found.
    pub fn validate_local(&self, table: &RowTable) -> Result<(), ValidationError> {
        for role in MappingRole::ALL {
            for mapping in self.manifest.mappings(role) {
                if !table.has_field(role.side(), &mapping.source) {
                    return Err(ValidationError::MissingField {
                        field: mapping.source.clone(),
                        role,
                    });
                }
            }
        }

        for mapping in &self.manifest.output_values {
            for (row, value) in present_values(table, FieldSide::Output, &mapping.source) {
                if !FieldValue::classify(value).is_legal_entity_value() {
                    return Err(ValidationError::UnsupportedValueType {
                        field: mapping.source.clone(),
                        row,
                        value: value.clone(),
                    });
                }
            }
        }

        for mapping in &self.manifest.output_files {
            for (row, value) in present_values(table, FieldSide::Output, &mapping.source) {
                match value {
                    Value::Array(paths) => {
                        for path in paths {
                            self.check_readable(&mapping.source, row, path)?;
                        }
                    }
                    path => self.check_readable(&mapping.source, row, path)?,
                }
            }
        }

        tracing::info!(
            entity_class = %self.manifest.entity_class,
            rows = table.row_numbers().len(),
            "local validation passed"
        );
        Ok(())
    }

    /// Local checks, then the entity class lookup and per-field type checks.
    /// Returns the fetched schema.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found.
    pub fn validate_schema(
        &self,
        table: &RowTable,
        source: &dyn EntitySchemaSource,
    ) -> Result<EntitySchema, ValidationError> {
        self.validate_local(table)?;

        let class_name = &self.manifest.entity_class;
        let schema = source
            .fetch_entity_schema(class_name)
            .map_err(|err| ValidationError::SchemaUnavailable {
                class_name: class_name.clone(),
                reason: format!("{err:#}"),
            })?
            .ok_or_else(|| ValidationError::UnknownEntityClass(class_name.clone()))?;

        for role in [MappingRole::InputValue, MappingRole::OutputValue] {
            for mapping in self.manifest.mappings(role) {
                let definition = self.definition(&schema, mapping)?;
                if definition.is_file() {
                    return Err(ValidationError::TypeMismatch {
                        field: mapping.source.clone(),
                        target: mapping.target.clone(),
                        expected: describe(definition),
                        observed: format!("non-file {}", role.as_str()),
                    });
                }
                for (_, value) in present_values(table, role.side(), &mapping.source) {
                    if !definition.accepts(&FieldValue::classify(value)) {
                        return Err(ValidationError::TypeMismatch {
                            field: mapping.source.clone(),
                            target: mapping.target.clone(),
                            expected: describe(definition),
                            observed: value.to_string(),
                        });
                    }
                }
            }
        }

        for mapping in &self.manifest.output_files {
            let definition = self.definition(&schema, mapping)?;
            if !definition.is_file() {
                return Err(ValidationError::TypeMismatch {
                    field: mapping.source.clone(),
                    target: mapping.target.clone(),
                    expected: describe(definition),
                    observed: "output file".to_string(),
                });
            }
            for (row, value) in present_values(table, FieldSide::Output, &mapping.source) {
                if value.is_array() != definition.is_array {
                    return Err(ValidationError::ArrayShapeMismatch {
                        field: mapping.source.clone(),
                        target: mapping.target.clone(),
                        row,
                        expected_array: definition.is_array,
                    });
                }
            }
        }

        tracing::info!(entity_class = %class_name, "schema validation passed");
        Ok(schema)
    }

    fn definition<'s>(
        &self,
        schema: &'s EntitySchema,
        mapping: &FieldMapping,
    ) -> Result<&'s VariableDefinition, ValidationError> {
        schema
            .variable(&mapping.target)
            .ok_or_else(|| ValidationError::UnknownTargetField {
                class_name: self.manifest.entity_class.clone(),
                target: mapping.target.clone(),
            })
    }

    fn check_readable(&self, field: &str, row: usize, path: &Value) -> Result<(), ValidationError> {
        let Value::String(path) = path else {
            return Err(ValidationError::UnsupportedValueType {
                field: field.to_string(),
                row,
                value: path.clone(),
            });
        };
        let opened = self.mock_file.unwrap_or_else(|| Path::new(path));
        let not_accessible = |reason: String| ValidationError::FileNotAccessible {
            field: field.to_string(),
            path: opened.display().to_string(),
            reason,
        };
        // Directories open fine on unix but cannot be uploaded.
        let metadata = File::open(opened)
            .and_then(|file| file.metadata())
            .map_err(|err| not_accessible(err.to_string()))?;
        if metadata.is_file() {
            Ok(())
        } else {
            Err(not_accessible("not a regular file".to_string()))
        }
    }
}

/// Rows holding a non-null value for `field`, in row order.
fn present_values<'t>(
    table: &'t RowTable,
    side: FieldSide,
    field: &'t str,
) -> impl Iterator<Item = (usize, &'t Value)> + 't {
    table
        .rows(side)
        .iter()
        .filter_map(move |(row, fields)| fields.get(field).map(|value| (*row, value)))
        .filter(|(_, value)| !value.is_null())
}

fn file_shape(is_array: bool) -> &'static str {
    if is_array {
        "an array of files"
    } else {
        "a single file"
    }
}

fn describe(definition: &VariableDefinition) -> String {
    let base = match definition.variable_type {
        VariableType::Categorical => format!("categorical [{}]", definition.codes.join(", ")),
        other => other.as_str().to_string(),
    };
    if definition.is_array {
        format!("array of {base}")
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::{ValidationError, Validator};
    use crate::{MappingManifest, MappingRole};
    use cromwell_operend_client::InMemoryOperend;
    use cromwell_operend_core::{EntitySchema, RowTable, VariableDefinition, VariableType};
    use serde_json::{json, Value};
    use std::fs;
    use std::path::PathBuf;

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn temp_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "c2o-validate-{}-{}.txt",
            name,
            ulid::Ulid::new()
        ));
        must(fs::write(&path, b"fixture"));
        path
    }

    fn table_with_outputs(outputs: &Value) -> RowTable {
        must(RowTable::from_json(&json!({
            "calls": {
                "wf.step": [
                    {"shardIndex": 0, "inputs": {"sample": "s0", "depth": 10}, "outputs": outputs}
                ]
            }
        })))
    }

    fn manifest(raw: &Value) -> MappingManifest {
        must(MappingManifest::from_json(raw))
    }

    fn fixture_schema() -> EntitySchema {
        EntitySchema::new(
            "sample_qc",
            vec![
                VariableDefinition::new("sample_id", VariableType::Text, false),
                VariableDefinition::new("depth", VariableType::Integer, false),
                VariableDefinition::new("score", VariableType::Real, false),
                VariableDefinition::categorical("status", false, &["pass", "fail"]),
                VariableDefinition::new("report", VariableType::File, false),
                VariableDefinition::new("chunks", VariableType::File, true),
            ],
        )
    }

    #[test]
    fn missing_mapped_field_names_field_and_role() {
        let table = table_with_outputs(&json!({"score": 0.5}));
        let manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputValues": {"step.nope": "score"}
        }));
        let result = Validator::new(&manifest).validate_local(&table);
        assert_eq!(
            result,
            Err(ValidationError::MissingField {
                field: "step.nope".to_string(),
                role: MappingRole::OutputValue
            })
        );
    }

    #[test]
    fn output_values_must_be_entity_compatible() {
        let table = table_with_outputs(&json!({"flags": {"a": true}}));
        let manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputValues": {"step.flags": "status"}
        }));
        assert!(matches!(
            Validator::new(&manifest).validate_local(&table),
            Err(ValidationError::UnsupportedValueType { row: 0, .. })
        ));
    }

    #[test]
    fn output_files_must_be_openable() {
        let report = temp_file("report");
        let missing = std::env::temp_dir().join(format!("c2o-missing-{}.txt", ulid::Ulid::new()));
        let table = table_with_outputs(&json!({
            "report": report.display().to_string(),
            "chunks": [report.display().to_string(), missing.display().to_string()]
        }));

        let ok_manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.report": "report"}
        }));
        assert_eq!(Validator::new(&ok_manifest).validate_local(&table), Ok(()));

        let bad_manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.chunks": "chunks"}
        }));
        match Validator::new(&bad_manifest).validate_local(&table) {
            Err(ValidationError::FileNotAccessible { path, .. }) => {
                assert_eq!(path, missing.display().to_string());
            }
            other => panic!("expected inaccessible file, got {other:?}"),
        }

        let mock = temp_file("mock");
        assert_eq!(
            Validator::new(&bad_manifest)
                .with_mock_file(Some(mock.as_path()))
                .validate_local(&table),
            Ok(())
        );

        let _ = fs::remove_file(&report);
        let _ = fs::remove_file(&mock);
    }

    #[test]
    fn directories_are_not_readable_output_files() {
        let dir = std::env::temp_dir().join(format!("c2o-validate-dir-{}", ulid::Ulid::new()));
        must(fs::create_dir_all(&dir));
        let table = table_with_outputs(&json!({"report": dir.display().to_string()}));
        let manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.report": "report"}
        }));

        match Validator::new(&manifest).validate_local(&table) {
            Err(ValidationError::FileNotAccessible { path, reason, .. }) => {
                assert_eq!(path, dir.display().to_string());
                assert_eq!(reason, "not a regular file");
            }
            other => panic!("expected inaccessible file, got {other:?}"),
        }

        let operend = InMemoryOperend::new().with_schema(fixture_schema());
        assert!(matches!(
            Validator::new(&manifest).validate_schema(&table, &operend),
            Err(ValidationError::FileNotAccessible { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_validation_accepts_matching_types() {
        let report = temp_file("schema-ok");
        let table = table_with_outputs(&json!({
            "score": 0.75,
            "status": "pass",
            "report": report.display().to_string()
        }));
        let manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "inputValues": {"step.sample": "sample_id", "step.depth": "depth"},
            "outputValues": {"step.score": "score", "step.status": "status"},
            "outputFiles": {"step.report": "report"}
        }));
        let operend = InMemoryOperend::new().with_schema(fixture_schema());

        let schema = must(Validator::new(&manifest).validate_schema(&table, &operend));
        assert_eq!(schema.class_name, "sample_qc");
        let _ = fs::remove_file(&report);
    }

    #[test]
    fn unknown_entity_class_is_reported() {
        let table = table_with_outputs(&json!({}));
        let manifest = manifest(&json!({"entityClass": "absent"}));
        assert_eq!(
            Validator::new(&manifest).validate_schema(&table, &InMemoryOperend::new()),
            Err(ValidationError::UnknownEntityClass("absent".to_string()))
        );
    }

    #[test]
    fn value_type_mismatches_are_reported() {
        let table = table_with_outputs(&json!({"status": "unknown"}));
        let operend = InMemoryOperend::new().with_schema(fixture_schema());

        let categorical = manifest(&json!({
            "entityClass": "sample_qc",
            "outputValues": {"step.status": "status"}
        }));
        assert!(matches!(
            Validator::new(&categorical).validate_schema(&table, &operend),
            Err(ValidationError::TypeMismatch { target, .. }) if target == "status"
        ));

        let text_into_integer = manifest(&json!({
            "entityClass": "sample_qc",
            "inputValues": {"step.sample": "depth"}
        }));
        assert!(matches!(
            Validator::new(&text_into_integer).validate_schema(&table, &operend),
            Err(ValidationError::TypeMismatch { .. })
        ));

        let value_into_file = manifest(&json!({
            "entityClass": "sample_qc",
            "inputValues": {"step.sample": "report"}
        }));
        assert!(matches!(
            Validator::new(&value_into_file).validate_schema(&table, &operend),
            Err(ValidationError::TypeMismatch { .. })
        ));

        let unknown_target = manifest(&json!({
            "entityClass": "sample_qc",
            "inputValues": {"step.sample": "nonexistent"}
        }));
        assert!(matches!(
            Validator::new(&unknown_target).validate_schema(&table, &operend),
            Err(ValidationError::UnknownTargetField { .. })
        ));
    }

    #[test]
    fn output_files_need_file_targets_of_matching_shape() {
        let report = temp_file("shape");
        let path = report.display().to_string();
        let table = table_with_outputs(&json!({"report": path, "chunks": [path]}));
        let operend = InMemoryOperend::new().with_schema(fixture_schema());

        let into_text = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.report": "sample_id"}
        }));
        assert!(matches!(
            Validator::new(&into_text).validate_schema(&table, &operend),
            Err(ValidationError::TypeMismatch { .. })
        ));

        let scalar_into_array = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.report": "chunks"}
        }));
        assert_eq!(
            Validator::new(&scalar_into_array).validate_schema(&table, &operend),
            Err(ValidationError::ArrayShapeMismatch {
                field: "step.report".to_string(),
                target: "chunks".to_string(),
                row: 0,
                expected_array: true
            })
        );

        let array_into_scalar = manifest(&json!({
            "entityClass": "sample_qc",
            "outputFiles": {"step.chunks": "report"}
        }));
        assert!(matches!(
            Validator::new(&array_into_scalar).validate_schema(&table, &operend),
            Err(ValidationError::ArrayShapeMismatch { expected_array: false, .. })
        ));

        let _ = fs::remove_file(&report);
    }

    #[test]
    fn null_values_only_need_to_be_present() {
        let table = table_with_outputs(&json!({"score": null, "report": null}));
        let manifest = manifest(&json!({
            "entityClass": "sample_qc",
            "outputValues": {"step.score": "score"},
            "outputFiles": {"step.report": "report"}
        }));
        let operend = InMemoryOperend::new().with_schema(fixture_schema());
        assert!(Validator::new(&manifest).validate_schema(&table, &operend).is_ok());
    }
}
