//! Seams to the remote Operend service.

use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::{EntityId, EntitySchema, JobRunRecord, WorkFileId};

pub trait EntitySchemaSource {
    /// `Ok(None)` when the service has no visible class of that name.
    #[allow(clippy::missing_errors_doc)]
    fn fetch_entity_schema(&self, class_name: &str) -> Result<Option<EntitySchema>>;
}

pub trait WorkFileStore {
    #[allow(clippy::missing_errors_doc)]
    fn upload_file(&self, path: &Path) -> Result<WorkFileId>;
}

pub trait EntityStore {
    #[allow(clippy::missing_errors_doc)]
    fn create_entity(&self, class_name: &str, values: &Map<String, Value>) -> Result<EntityId>;
}

pub trait JobRunStore {
    #[allow(clippy::missing_errors_doc)]
    fn job_run_exists(&self, job_run_id: &str) -> Result<bool>;

    #[allow(clippy::missing_errors_doc)]
    fn load_job_run(&self, job_run_id: &str) -> Result<Option<JobRunRecord>>;

    #[allow(clippy::missing_errors_doc)]
    fn save_job_run(&self, job_run_id: &str, record: &JobRunRecord) -> Result<()>;
}
