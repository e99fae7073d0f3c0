use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::FieldValue;

/// System id of an uploaded work file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct WorkFileId(pub u64);

impl Display for WorkFileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target entity field name to the work file ids produced for it.
pub type OutputIds = BTreeMap<String, Vec<WorkFileId>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum VariableType {
    Text,
    Real,
    Integer,
    Categorical,
    File,
}

impl VariableType {
    /// Single-letter code used by the Operend API.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Text => "T",
            Self::Real => "F",
            Self::Integer => "I",
            Self::Categorical => "C",
            Self::File => "W",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Real => "real",
            Self::Integer => "integer",
            Self::Categorical => "categorical",
            Self::File => "file",
        }
    }

    /// Accepts either the API code or the long name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "T" | "text" => Some(Self::Text),
            "F" | "real" => Some(Self::Real),
            "I" | "integer" => Some(Self::Integer),
            "C" | "categorical" => Some(Self::Categorical),
            "W" | "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl Display for VariableType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub variable_type: VariableType,
    pub is_array: bool,
    /// Legal codes of a categorical variable; empty for every other type.
    pub codes: Vec<String>,
}

impl VariableDefinition {
    #[must_use]
    pub fn new(name: &str, variable_type: VariableType, is_array: bool) -> Self {
        Self {
            name: name.to_string(),
            variable_type,
            is_array,
            codes: Vec::new(),
        }
    }

    #[must_use]
    pub fn categorical(name: &str, is_array: bool, codes: &[&str]) -> Self {
        Self {
            codes: codes.iter().map(ToString::to_string).collect(),
            ..Self::new(name, VariableType::Categorical, is_array)
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.variable_type == VariableType::File
    }

    /// Whether a non-file value may be stored in this variable. Array
    /// variables take lists whose every item matches; scalar variables take a
    /// single matching item.
    #[must_use]
    pub fn accepts(&self, value: &FieldValue<'_>) -> bool {
        match (self.is_array, value) {
            (true, FieldValue::List(items)) => items.iter().all(|item| self.accepts_item(item)),
            (true, _) | (false, FieldValue::List(_)) => false,
            (false, item) => self.accepts_item(item),
        }
    }

    fn accepts_item(&self, item: &FieldValue<'_>) -> bool {
        match (self.variable_type, item) {
            (VariableType::Text, FieldValue::Text(_))
            | (VariableType::Real, FieldValue::Real(_) | FieldValue::Integer(_))
            | (VariableType::Integer, FieldValue::Integer(_)) => true,
            (VariableType::Categorical, FieldValue::Text(code)) => {
                self.codes.iter().any(|legal| legal == code)
            }
            (VariableType::Categorical, FieldValue::Integer(code)) => {
                let code = code.to_string();
                self.codes.iter().any(|legal| *legal == code)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntitySchema {
    pub class_name: String,
    pub variables: BTreeMap<String, VariableDefinition>,
}

impl EntitySchema {
    #[must_use]
    pub fn new(class_name: &str, variables: Vec<VariableDefinition>) -> Self {
        Self {
            class_name: class_name.to_string(),
            variables: variables
                .into_iter()
                .map(|variable| (variable.name.clone(), variable))
                .collect(),
        }
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.get(name)
    }
}

/// Persisted job run. Fields this tool does not manage are carried through
/// `extra` untouched so a load/save round trip does not drop them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRunRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_work_file_ids: Option<OutputIds>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Appends newly produced ids to the existing per-field lists, keeping the
/// existing order and skipping ids a field already holds.
#[must_use]
pub fn merge_output_ids(existing: Option<&OutputIds>, incoming: &OutputIds) -> OutputIds {
    let mut merged = existing.cloned().unwrap_or_default();
    for (field, ids) in incoming {
        let slot = merged.entry(field.clone()).or_default();
        for id in ids {
            if !slot.contains(id) {
                slot.push(*id);
            }
        }
    }
    merged
}
