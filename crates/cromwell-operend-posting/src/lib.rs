#![forbid(unsafe_code)]
//! Turns validated rows into Operend entities.
//!
//! [`simulate_run`] reports every upload, entity and job run update that a
//! run would perform without contacting a server. [`execute_run`] performs
//! them through the collaborator traits and finishes by merging the uploaded
//! work file ids into the job run and marking it complete.

use std::io::Write;
use std::path::Path;

use cromwell_operend_core::{
    merge_output_ids, EntityId, EntityStore, FieldSide, JobRunStore, OutputIds, RowTable,
    WorkFileId, WorkFileStore,
};
use cromwell_operend_mapping::{MappingManifest, MappingRole, ValidationError};
use serde_json::{Map, Value};

/// First id handed out by simulated uploads.
pub const FIRST_MOCK_WORK_FILE_ID: u64 = 101;

pub const JOB_RUN_COMPLETE: &str = "COMPLETE";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("uploading {path} for {field} failed: {reason}")]
    UploadFailure {
        field: String,
        path: String,
        reason: String,
    },
    #[error("creating {class_name} entity for row {row} failed: {reason}")]
    EntityCreateFailure {
        class_name: String,
        row: usize,
        reason: String,
    },
    #[error("no job run found with id {0}")]
    JobRunNotFound(String),
    #[error("looking up job run {job_run_id} failed: {reason}")]
    JobRunLookupFailure { job_run_id: String, reason: String },
    #[error("updating job run {job_run_id} failed: {reason}")]
    JobRunUpdateFailure { job_run_id: String, reason: String },
    #[error("failed writing run report: {0}")]
    Output(#[from] std::io::Error),
}

/// Everything one run reads. Rows are visited in `table.row_numbers()` order.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub table: &'a RowTable,
    pub manifest: &'a MappingManifest,
    pub job_run_id: Option<&'a str>,
    /// Uploaded in place of every recorded output file.
    pub mock_file: Option<&'a Path>,
}

/// Work file ids produced during one run, per target entity field, in upload
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingIntent {
    output_ids: OutputIds,
}

impl PostingIntent {
    fn record(&mut self, target: &str, id: WorkFileId) {
        self.output_ids.entry(target.to_string()).or_default().push(id);
    }

    #[must_use]
    pub fn output_ids(&self) -> &OutputIds {
        &self.output_ids
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub entity_ids: Vec<EntityId>,
    pub intent: PostingIntent,
}

/// Fails with [`RunError::JobRunNotFound`] unless the job run exists.
///
/// # Errors
/// Also fails with [`RunError::JobRunLookupFailure`] when the lookup itself
/// fails.
pub fn confirm_job_run_exists(job_runs: &dyn JobRunStore, job_run_id: &str) -> Result<(), RunError> {
    let exists = job_runs
        .job_run_exists(job_run_id)
        .map_err(|err| lookup_failure(job_run_id, &err))?;
    if exists {
        Ok(())
    } else {
        Err(RunError::JobRunNotFound(job_run_id.to_string()))
    }
}

/// Reports, line by line, what [`execute_run`] would do. Uploads are given
/// sequential ids starting at [`FIRST_MOCK_WORK_FILE_ID`].
///
/// # Errors
/// Returns [`RunError::Output`] when `out` fails.
pub fn simulate_run(request: &RunRequest<'_>, out: &mut dyn Write) -> Result<PostingIntent, RunError> {
    let mut uploader = MockUploader {
        next_id: FIRST_MOCK_WORK_FILE_ID,
        mock_file: request.mock_file,
    };
    let mut intent = PostingIntent::default();

    for row in request.table.row_numbers() {
        let values = build_entity_values(request, *row, &mut uploader, &mut intent, out)?;
        let entity = with_class(&request.manifest.entity_class, values);
        writeln!(out, "would be posting entity {}", Value::Object(entity))?;
    }
    if let Some(job_run_id) = request.job_run_id {
        writeln!(
            out,
            "would be updating job run {job_run_id} with file outputs {}",
            render_output_ids(intent.output_ids())
        )?;
    }
    tracing::info!(
        rows = request.table.row_numbers().len(),
        "simulated run finished"
    );
    Ok(intent)
}

/// Uploads output files, creates one entity per row, then merges the new
/// work file ids into the job run and marks it complete.
///
/// A failure stops the run where it happened; rows already posted stay
/// posted.
///
/// # Errors
/// Returns the [`RunError`] of the first failing collaborator call.
pub fn execute_run<S>(
    request: &RunRequest<'_>,
    services: &S,
    out: &mut dyn Write,
) -> Result<RunReport, RunError>
where
    S: WorkFileStore + EntityStore + JobRunStore + ?Sized,
{
    let mut uploader = LiveUploader {
        store: services,
        mock_file: request.mock_file,
    };
    let mut intent = PostingIntent::default();
    let mut entity_ids = Vec::with_capacity(request.table.row_numbers().len());
    let class_name = &request.manifest.entity_class;

    for row in request.table.row_numbers() {
        let values = build_entity_values(request, *row, &mut uploader, &mut intent, out)?;
        write!(
            out,
            "POSTing entity {}...",
            Value::Object(with_class(class_name, values.clone()))
        )?;
        let entity_id = services.create_entity(class_name, &values).map_err(|err| {
            RunError::EntityCreateFailure {
                class_name: class_name.clone(),
                row: *row,
                reason: format!("{err:#}"),
            }
        })?;
        writeln!(out, " entity id {entity_id}")?;
        tracing::debug!(row, %entity_id, "created entity");
        entity_ids.push(entity_id);
    }

    if let Some(job_run_id) = request.job_run_id {
        complete_job_run(services, job_run_id, &intent, out)?;
    }
    tracing::info!(entities = entity_ids.len(), "run finished");
    Ok(RunReport { entity_ids, intent })
}

fn complete_job_run(
    job_runs: &(impl JobRunStore + ?Sized),
    job_run_id: &str,
    intent: &PostingIntent,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let mut record = job_runs
        .load_job_run(job_run_id)
        .map_err(|err| lookup_failure(job_run_id, &err))?
        .ok_or_else(|| RunError::JobRunNotFound(job_run_id.to_string()))?;

    record.output_work_file_ids = Some(merge_output_ids(
        record.output_work_file_ids.as_ref(),
        intent.output_ids(),
    ));
    record.status = Some(JOB_RUN_COMPLETE.to_string());

    write!(
        out,
        "updating job run {job_run_id} with file outputs {}... ",
        render_output_ids(intent.output_ids())
    )?;
    job_runs
        .save_job_run(job_run_id, &record)
        .map_err(|err| RunError::JobRunUpdateFailure {
            job_run_id: job_run_id.to_string(),
            reason: format!("{err:#}"),
        })?;
    writeln!(out, "complete")?;
    Ok(())
}

fn lookup_failure(job_run_id: &str, err: &anyhow::Error) -> RunError {
    RunError::JobRunLookupFailure {
        job_run_id: job_run_id.to_string(),
        reason: format!("{err:#}"),
    }
}

/// Target field values for one row. Output files are uploaded on the way and
/// replaced by their work file ids.
fn build_entity_values(
    request: &RunRequest<'_>,
    row: usize,
    uploader: &mut dyn Uploader,
    intent: &mut PostingIntent,
    out: &mut dyn Write,
) -> Result<Map<String, Value>, RunError> {
    let mut values = Map::new();
    for role in [MappingRole::InputValue, MappingRole::OutputValue] {
        for mapping in request.manifest.mappings(role) {
            if let Some(value) = present(request.table, role.side(), row, &mapping.source) {
                values.insert(mapping.target.clone(), value.clone());
            }
        }
    }

    for mapping in &request.manifest.output_files {
        let Some(value) = present(request.table, FieldSide::Output, row, &mapping.source) else {
            continue;
        };
        let uploaded = match value {
            Value::Array(paths) => {
                let mut ids = Vec::with_capacity(paths.len());
                for path in paths {
                    let id = uploader.upload(&mapping.source, recorded_path(&mapping.source, path)?, out)?;
                    intent.record(&mapping.target, id);
                    ids.push(Value::from(id.0));
                }
                Value::Array(ids)
            }
            path => {
                let id = uploader.upload(&mapping.source, recorded_path(&mapping.source, path)?, out)?;
                intent.record(&mapping.target, id);
                Value::from(id.0)
            }
        };
        values.insert(mapping.target.clone(), uploaded);
    }
    Ok(values)
}

fn present<'t>(table: &'t RowTable, side: FieldSide, row: usize, field: &str) -> Option<&'t Value> {
    table.value(side, row, field).filter(|value| !value.is_null())
}

fn recorded_path<'v>(field: &str, value: &'v Value) -> Result<&'v str, RunError> {
    value.as_str().ok_or_else(|| RunError::UploadFailure {
        field: field.to_string(),
        path: value.to_string(),
        reason: "value is not a file path".to_string(),
    })
}

fn with_class(class_name: &str, values: Map<String, Value>) -> Map<String, Value> {
    let mut entity = Map::with_capacity(values.len() + 1);
    entity.insert("_class".to_string(), Value::String(class_name.to_string()));
    entity.extend(values);
    entity
}

fn render_output_ids(output_ids: &OutputIds) -> Value {
    output_ids
        .iter()
        .map(|(field, ids)| {
            let ids = ids.iter().map(|id| Value::from(id.0)).collect();
            (field.clone(), Value::Array(ids))
        })
        .collect::<Map<String, Value>>()
        .into()
}

trait Uploader {
    fn upload(&mut self, field: &str, recorded: &str, out: &mut dyn Write) -> Result<WorkFileId, RunError>;
}

struct MockUploader<'a> {
    next_id: u64,
    mock_file: Option<&'a Path>,
}

impl Uploader for MockUploader<'_> {
    fn upload(&mut self, _field: &str, recorded: &str, out: &mut dyn Write) -> Result<WorkFileId, RunError> {
        let id = WorkFileId(self.next_id);
        self.next_id += 1;
        match self.mock_file {
            Some(mock) => writeln!(
                out,
                "would be POSTing file {recorded} (really {})... pretending it has wfid {id}",
                mock.display()
            )?,
            None => writeln!(out, "would be POSTing file {recorded}... pretending it has wfid {id}")?,
        }
        Ok(id)
    }
}

struct LiveUploader<'a, S: ?Sized> {
    store: &'a S,
    mock_file: Option<&'a Path>,
}

impl<S: WorkFileStore + ?Sized> Uploader for LiveUploader<'_, S> {
    fn upload(&mut self, field: &str, recorded: &str, out: &mut dyn Write) -> Result<WorkFileId, RunError> {
        let source = match self.mock_file {
            Some(mock) => {
                write!(out, "POSTing file {recorded} (really {})...", mock.display())?;
                mock
            }
            None => {
                write!(out, "POSTing file {recorded}...")?;
                Path::new(recorded)
            }
        };
        let id = self
            .store
            .upload_file(source)
            .map_err(|err| RunError::UploadFailure {
                field: field.to_string(),
                path: source.display().to_string(),
                reason: format!("{err:#}"),
            })?;
        writeln!(out, " wfid {id}")?;
        Ok(id)
    }
}
