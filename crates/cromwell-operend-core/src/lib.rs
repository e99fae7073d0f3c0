#![forbid(unsafe_code)]
//! Core model for turning Cromwell execution metadata into Operend entities.
//!
//! The crate owns the parts that do not touch the network:
//! - [`ExecutionTrace`]: the typed view of Cromwell's `-m` metadata output.
//! - [`RowTable`]: per-row input/output fields reconstructed from the trace.
//! - [`FieldValue`]: the closed value model used for type legality checks.
//! - [`EntitySchema`] / [`JobRunRecord`]: the remote records the mapping and
//!   posting layers read and write, reached through the traits in
//!   [`services`].

mod model;
mod rows;
pub mod services;
mod trace;
mod value;

pub use model::{
    merge_output_ids, EntityId, EntitySchema, JobRunRecord, OutputIds, VariableDefinition,
    VariableType, WorkFileId,
};
pub use rows::{Ambiguity, FieldMap, FieldSide, RowAssignment, RowTable};
pub use services::{EntitySchemaSource, EntityStore, JobRunStore, WorkFileStore};
pub use trace::{CallRecord, ExecutionTrace, ShardExecution};
pub use value::FieldValue;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TraceError {
    #[error("malformed execution trace: {0}")]
    Malformed(String),
    #[error(
        "parser reached an ambiguity reading Cromwell metadata ({} problem(s)): {}",
        .diagnostics.len(),
        describe_all(.diagnostics)
    )]
    StructuralAmbiguity { diagnostics: Vec<Ambiguity> },
}

fn describe_all(diagnostics: &[Ambiguity]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
