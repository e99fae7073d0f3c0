use serde_json::Value;

/// Closed classification of a trace value for entity type checks.
///
/// Booleans and objects have no Operend variable type and classify as
/// [`FieldValue::Unsupported`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Null,
    Text(&'a str),
    /// Wide enough for every integer JSON can carry, signed or unsigned.
    Integer(i128),
    Real(f64),
    List(Vec<FieldValue<'a>>),
    Unsupported(&'a Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Text,
    Numeric,
}

impl<'a> FieldValue<'a> {
    #[must_use]
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::String(text) => Self::Text(text),
            Value::Number(number) => match number
                .as_i64()
                .map(i128::from)
                .or_else(|| number.as_u64().map(i128::from))
            {
                Some(integer) => Self::Integer(integer),
                None => Self::Real(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::Array(items) => Self::List(items.iter().map(Self::classify).collect()),
            Value::Bool(_) | Value::Object(_) => Self::Unsupported(value),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Text(_) => Some(ScalarKind::Text),
            Self::Integer(_) | Self::Real(_) => Some(ScalarKind::Numeric),
            Self::Null | Self::List(_) | Self::Unsupported(_) => None,
        }
    }

    /// Whether some entity variable type (text, real, integer, categorical)
    /// could hold this value: a scalar, or a list whose items are all text or
    /// all numeric.
    #[must_use]
    pub fn is_legal_entity_value(&self) -> bool {
        match self {
            Self::List(items) => {
                let mut kinds = items.iter().map(FieldValue::scalar_kind);
                match kinds.next() {
                    None => true,
                    Some(None) => false,
                    Some(Some(first)) => kinds.all(|kind| kind == Some(first)),
                }
            }
            other => other.scalar_kind().is_some(),
        }
    }
}
