use cromwell_operend_core::FieldSide;
use serde_json::{Map, Value};

const ENTITY_CLASS_KEY: &str = "entityClass";
const INPUT_FILES_KEY: &str = "inputFiles";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ManifestError {
    #[error("manifest is not a JSON object")]
    NotAnObject,
    #[error("key '{0}' not in manifest")]
    MissingKey(&'static str),
    #[error("{key} in manifest isn't a {expected}")]
    InvalidType { key: String, expected: &'static str },
    #[error("{0} in manifest must not be empty")]
    Empty(String),
    #[error("{0} is not yet supported")]
    Unsupported(String),
    #[error(
        "manifest contains key '{0}'; only entityClass, inputValues, outputValues, and outputFiles are allowed"
    )]
    UnknownKey(String),
}

/// How a row field reaches the target entity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MappingRole {
    InputValue,
    OutputValue,
    OutputFile,
}

impl MappingRole {
    pub const ALL: [Self; 3] = [Self::InputValue, Self::OutputValue, Self::OutputFile];

    #[must_use]
    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::InputValue => "inputValues",
            Self::OutputValue => "outputValues",
            Self::OutputFile => "outputFiles",
        }
    }

    #[must_use]
    pub fn side(self) -> FieldSide {
        match self {
            Self::InputValue => FieldSide::Input,
            Self::OutputValue | Self::OutputFile => FieldSide::Output,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputValue => "input value",
            Self::OutputValue => "output value",
            Self::OutputFile => "output file",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.manifest_key() == key)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FieldMapping {
    /// Dotted row field name.
    pub source: String,
    /// Entity class variable name.
    pub target: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MappingManifest {
    pub entity_class: String,
    pub input_values: Vec<FieldMapping>,
    pub output_values: Vec<FieldMapping>,
    pub output_files: Vec<FieldMapping>,
}

impl MappingManifest {
    /// Validates the raw manifest shape. Mappings keep the order they have in
    /// the manifest document.
    ///
    /// # Errors
    /// Returns [`ManifestError`] for unsupported or unknown keys, a missing
    /// `entityClass`, or mappings that are not objects of strings.
    pub fn from_json(raw: &Value) -> Result<Self, ManifestError> {
        let object = raw.as_object().ok_or(ManifestError::NotAnObject)?;

        if object.contains_key(INPUT_FILES_KEY) {
            return Err(ManifestError::Unsupported(INPUT_FILES_KEY.to_string()));
        }
        if let Some(unknown) = object
            .keys()
            .find(|key| key.as_str() != ENTITY_CLASS_KEY && MappingRole::from_key(key).is_none())
        {
            return Err(ManifestError::UnknownKey(unknown.clone()));
        }

        let entity_class = match object.get(ENTITY_CLASS_KEY) {
            None => return Err(ManifestError::MissingKey(ENTITY_CLASS_KEY)),
            Some(Value::String(name)) if name.trim().is_empty() => {
                return Err(ManifestError::Empty(ENTITY_CLASS_KEY.to_string()))
            }
            Some(Value::String(name)) => name.clone(),
            Some(_) => {
                return Err(ManifestError::InvalidType {
                    key: ENTITY_CLASS_KEY.to_string(),
                    expected: "string",
                })
            }
        };

        Ok(Self {
            entity_class,
            input_values: string_mappings(object, MappingRole::InputValue)?,
            output_values: string_mappings(object, MappingRole::OutputValue)?,
            output_files: string_mappings(object, MappingRole::OutputFile)?,
        })
    }

    #[must_use]
    pub fn mappings(&self, role: MappingRole) -> &[FieldMapping] {
        match role {
            MappingRole::InputValue => &self.input_values,
            MappingRole::OutputValue => &self.output_values,
            MappingRole::OutputFile => &self.output_files,
        }
    }
}

fn string_mappings(
    object: &Map<String, Value>,
    role: MappingRole,
) -> Result<Vec<FieldMapping>, ManifestError> {
    let key = role.manifest_key();
    let Some(raw) = object.get(key) else {
        return Ok(Vec::new());
    };
    let invalid = || ManifestError::InvalidType {
        key: key.to_string(),
        expected: "dict of strings",
    };

    raw.as_object()
        .ok_or_else(&invalid)?
        .iter()
        .map(|(source, target)| match target {
            Value::String(target) if target.trim().is_empty() => {
                Err(ManifestError::Empty(format!("{key}.{source}")))
            }
            Value::String(target) => Ok(FieldMapping {
                source: source.clone(),
                target: target.clone(),
            }),
            _ => Err(invalid()),
        })
        .collect()
}
