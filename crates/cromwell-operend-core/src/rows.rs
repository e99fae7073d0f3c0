use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::io::Write;

use serde_json::{Map, Value};

use crate::{ExecutionTrace, ShardExecution, TraceError};

/// Dotted field name to value, in first-recorded order.
pub type FieldMap = Map<String, Value>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FieldSide {
    Input,
    Output,
}

impl FieldSide {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Where a shard's bindings land in the row table.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RowAssignment {
    /// The shard owns row `n`.
    Assigned(usize),
    /// Neither the shard nor any ancestor is scattered.
    Unassigned,
    /// A scattered sub-call under an already scattered parent: its outputs
    /// roll up into lists on the parent's row.
    Aggregate(usize),
}

impl RowAssignment {
    #[must_use]
    pub fn from_shard_index(shard_index: i64) -> Self {
        usize::try_from(shard_index).map_or(Self::Unassigned, Self::Assigned)
    }

    /// Resolves a sub-call shard against the row its parent shard was given.
    #[must_use]
    pub fn for_sub_call(parent_row: Option<usize>, shard_index: i64) -> Self {
        match (parent_row, usize::try_from(shard_index).ok()) {
            (None, _) => Self::from_shard_index(shard_index),
            (Some(parent), Some(_)) => Self::Aggregate(parent),
            (Some(parent), None) => Self::Assigned(parent),
        }
    }

    fn row(self) -> Option<usize> {
        match self {
            Self::Assigned(row) | Self::Aggregate(row) => Some(row),
            Self::Unassigned => None,
        }
    }
}

/// A place where the trace did not fit the one-scatter-per-row assumption.
#[derive(Debug, Clone, PartialEq)]
pub enum Ambiguity {
    DuplicateKey {
        side: FieldSide,
        row: usize,
        field: String,
        kept: Value,
        rejected: Value,
    },
    UnsupportedNesting {
        parent: String,
        call: String,
    },
}

impl Display for Ambiguity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey {
                side,
                row,
                field,
                kept,
                rejected,
            } => write!(
                f,
                "duplicate {} key {field} for row {row} (saw values {kept} and {rejected})",
                side.as_str()
            ),
            Self::UnsupportedNesting { parent, call } => write!(
                f,
                "unsupported nesting depth: sub-workflow call {call} under {parent} has sub-workflows of its own"
            ),
        }
    }
}

/// Row-aligned input and output fields reconstructed from an execution trace.
///
/// `input_rows` and `output_rows` always share the same row set and
/// `row_numbers` lists it in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTable {
    input_rows: BTreeMap<usize, FieldMap>,
    output_rows: BTreeMap<usize, FieldMap>,
    row_numbers: Vec<usize>,
}

impl RowTable {
    /// Parses Cromwell metadata and reconstructs its rows.
    ///
    /// # Errors
    /// Returns [`TraceError::Malformed`] for metadata that is not a trace and
    /// [`TraceError::StructuralAmbiguity`] when rows cannot be aligned.
    pub fn from_json(metadata: &Value) -> Result<Self, TraceError> {
        Self::from_trace(&ExecutionTrace::from_json(metadata)?)
    }

    /// Walks the whole trace, then fails once with every ambiguity found.
    ///
    /// # Errors
    /// Returns [`TraceError::StructuralAmbiguity`] when a field is written
    /// twice with different values at one row, or when a sub-workflow call
    /// carries sub-workflows of its own.
    pub fn from_trace(trace: &ExecutionTrace) -> Result<Self, TraceError> {
        let mut builder = RowTableBuilder::default();
        builder.walk_calls(trace);
        builder.finish()
    }

    #[must_use]
    pub fn row_numbers(&self) -> &[usize] {
        &self.row_numbers
    }

    #[must_use]
    pub fn input_rows(&self) -> &BTreeMap<usize, FieldMap> {
        &self.input_rows
    }

    #[must_use]
    pub fn output_rows(&self) -> &BTreeMap<usize, FieldMap> {
        &self.output_rows
    }

    #[must_use]
    pub fn rows(&self, side: FieldSide) -> &BTreeMap<usize, FieldMap> {
        match side {
            FieldSide::Input => &self.input_rows,
            FieldSide::Output => &self.output_rows,
        }
    }

    #[must_use]
    pub fn value(&self, side: FieldSide, row: usize, field: &str) -> Option<&Value> {
        self.rows(side).get(&row).and_then(|fields| fields.get(field))
    }

    #[must_use]
    pub fn has_field(&self, side: FieldSide, field: &str) -> bool {
        self.rows(side)
            .values()
            .any(|fields| fields.contains_key(field))
    }

    /// Sorted distinct field names seen on one side.
    #[must_use]
    pub fn field_names(&self, side: FieldSide) -> BTreeSet<&str> {
        self.rows(side)
            .values()
            .flat_map(|fields| fields.keys().map(String::as_str))
            .collect()
    }

    /// One example value per field: the first non-null one in row order, or
    /// null when every row holds null.
    #[must_use]
    pub fn field_examples(&self, side: FieldSide) -> BTreeMap<&str, &Value> {
        let mut examples: BTreeMap<&str, &Value> = BTreeMap::new();
        for fields in self.rows(side).values() {
            for (field, value) in fields {
                let slot = examples.entry(field.as_str()).or_insert(value);
                if slot.is_null() {
                    *slot = value;
                }
            }
        }
        examples
    }

    /// Writes the requested columns as tab-separated text, one line per row.
    ///
    /// # Errors
    /// Returns an error when the writer fails.
    pub fn write_columns(
        &self,
        inputs: &[String],
        outputs: &[String],
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        let header: Vec<&str> = inputs.iter().chain(outputs).map(String::as_str).collect();
        writeln!(out, "{}", header.join("\t"))?;
        for row in &self.row_numbers {
            let cells: Vec<String> = inputs
                .iter()
                .map(|field| (FieldSide::Input, field))
                .chain(outputs.iter().map(|field| (FieldSide::Output, field)))
                .map(|(side, field)| self.value(side, *row, field).map(render_cell).unwrap_or_default())
                .collect();
            writeln!(out, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Top-level Cromwell call names are `workflow.call`; rows use `call`.
fn strip_workflow_name(call_name: &str) -> &str {
    call_name
        .split_once('.')
        .map_or(call_name, |(_, rest)| rest)
}

#[derive(Debug, Default)]
struct RowTableBuilder {
    input_rows: BTreeMap<usize, FieldMap>,
    output_rows: BTreeMap<usize, FieldMap>,
    aggregated: BTreeSet<(usize, String)>,
    diagnostics: Vec<Ambiguity>,
}

impl RowTableBuilder {
    fn walk_calls(&mut self, trace: &ExecutionTrace) {
        for call in &trace.calls {
            let call_name = strip_workflow_name(&call.name);
            for shard in &call.shards {
                let assignment = RowAssignment::from_shard_index(shard.shard_index);
                if let RowAssignment::Assigned(row) = assignment {
                    self.record_shard(row, call_name, shard);
                }
                if let Some(sub_trace) = &shard.sub_trace {
                    self.walk_sub_calls(call_name, assignment.row(), sub_trace);
                }
            }
        }
    }

    fn walk_sub_calls(&mut self, parent_name: &str, parent_row: Option<usize>, trace: &ExecutionTrace) {
        for call in &trace.calls {
            for shard in &call.shards {
                let assignment = RowAssignment::for_sub_call(parent_row, shard.shard_index);
                match assignment {
                    RowAssignment::Assigned(row) => self.record_shard(row, &call.name, shard),
                    RowAssignment::Aggregate(row) => self.aggregate_outputs(row, &call.name, shard),
                    RowAssignment::Unassigned => {}
                }

                // Field names for a second sub-workflow level are undefined.
                if shard.sub_trace.is_some() {
                    self.flag(Ambiguity::UnsupportedNesting {
                        parent: parent_name.to_string(),
                        call: call.name.clone(),
                    });
                }
            }
        }
    }

    fn record_shard(&mut self, row: usize, call_name: &str, shard: &ShardExecution) {
        for (key, value) in &shard.inputs {
            self.record(FieldSide::Input, row, format!("{call_name}.{key}"), value);
        }
        for (key, value) in &shard.outputs {
            self.record(FieldSide::Output, row, format!("{call_name}.{key}"), value);
        }
    }

    fn record(&mut self, side: FieldSide, row: usize, field: String, value: &Value) {
        let rows = match side {
            FieldSide::Input => &mut self.input_rows,
            FieldSide::Output => &mut self.output_rows,
        };
        let fields = rows.entry(row).or_default();
        let kept = match fields.get(&field) {
            Some(existing) if existing != value => existing.clone(),
            Some(_) => return,
            None => {
                fields.insert(field, value.clone());
                return;
            }
        };
        self.flag(Ambiguity::DuplicateKey {
            side,
            row,
            field,
            kept,
            rejected: value.clone(),
        });
    }

    fn aggregate_outputs(&mut self, row: usize, call_name: &str, shard: &ShardExecution) {
        if !shard.inputs.is_empty() {
            tracing::debug!(
                row,
                call = call_name,
                shard_index = shard.shard_index,
                "skipping inputs of nested shard"
            );
        }
        for (key, value) in &shard.outputs {
            let field = format!("{call_name}.{key}");
            let slot = (row, field.clone());
            let fields = self.output_rows.entry(row).or_default();
            let kept = match fields.get_mut(&field) {
                Some(Value::Array(items)) if self.aggregated.contains(&slot) => {
                    items.push(value.clone());
                    continue;
                }
                Some(existing) => existing.clone(),
                None => {
                    fields.insert(field, Value::Array(vec![value.clone()]));
                    self.aggregated.insert(slot);
                    continue;
                }
            };
            self.flag(Ambiguity::DuplicateKey {
                side: FieldSide::Output,
                row,
                field,
                kept,
                rejected: value.clone(),
            });
        }
    }

    fn flag(&mut self, ambiguity: Ambiguity) {
        tracing::warn!(%ambiguity, "confused by execution trace structure");
        self.diagnostics.push(ambiguity);
    }

    fn finish(self) -> Result<RowTable, TraceError> {
        let Self {
            mut input_rows,
            mut output_rows,
            diagnostics,
            ..
        } = self;

        for row in input_rows.keys() {
            output_rows.entry(*row).or_default();
        }
        for row in output_rows.keys() {
            input_rows.entry(*row).or_default();
        }
        let row_numbers = input_rows.keys().copied().collect();

        if !diagnostics.is_empty() {
            return Err(TraceError::StructuralAmbiguity { diagnostics });
        }

        Ok(RowTable {
            input_rows,
            output_rows,
            row_numbers,
        })
    }
}
