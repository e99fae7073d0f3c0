use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cromwell_operend_core::{
    EntityId, EntitySchema, EntitySchemaSource, EntityStore, JobRunRecord, JobRunStore,
    WorkFileId, WorkFileStore,
};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEntity {
    pub entity_id: EntityId,
    pub class_name: String,
    pub values: Map<String, Value>,
}

/// Operend stand-in holding every record in memory. Identifiers are
/// sequential from 1 in call order.
#[derive(Debug, Default)]
pub struct InMemoryOperend {
    schemas: BTreeMap<String, EntitySchema>,
    job_runs: RefCell<BTreeMap<String, JobRunRecord>>,
    entities: RefCell<Vec<CreatedEntity>>,
    uploads: RefCell<Vec<PathBuf>>,
    last_id: Cell<u64>,
}

impl InMemoryOperend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.schemas.insert(schema.class_name.clone(), schema);
        self
    }

    #[must_use]
    pub fn with_job_run(self, job_run_id: &str, record: JobRunRecord) -> Self {
        self.job_runs
            .borrow_mut()
            .insert(job_run_id.to_string(), record);
        self
    }

    #[must_use]
    pub fn entities(&self) -> Vec<CreatedEntity> {
        self.entities.borrow().clone()
    }

    /// Paths in upload order.
    #[must_use]
    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.borrow().clone()
    }

    #[must_use]
    pub fn job_run(&self, job_run_id: &str) -> Option<JobRunRecord> {
        self.job_runs.borrow().get(job_run_id).cloned()
    }

    fn next_id(&self) -> u64 {
        let id = self.last_id.get() + 1;
        self.last_id.set(id);
        id
    }
}

impl EntitySchemaSource for InMemoryOperend {
    fn fetch_entity_schema(&self, class_name: &str) -> Result<Option<EntitySchema>> {
        Ok(self.schemas.get(class_name).cloned())
    }
}

impl WorkFileStore for InMemoryOperend {
    fn upload_file(&self, path: &Path) -> Result<WorkFileId> {
        File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
        self.uploads.borrow_mut().push(path.to_path_buf());
        Ok(WorkFileId(self.next_id()))
    }
}

impl EntityStore for InMemoryOperend {
    fn create_entity(&self, class_name: &str, values: &Map<String, Value>) -> Result<EntityId> {
        if !self.schemas.contains_key(class_name) {
            return Err(anyhow!("unknown entity class {class_name}"));
        }
        let entity_id = EntityId(format!("entity-{}", self.next_id()));
        self.entities.borrow_mut().push(CreatedEntity {
            entity_id: entity_id.clone(),
            class_name: class_name.to_string(),
            values: values.clone(),
        });
        Ok(entity_id)
    }
}

impl JobRunStore for InMemoryOperend {
    fn job_run_exists(&self, job_run_id: &str) -> Result<bool> {
        Ok(self.job_runs.borrow().contains_key(job_run_id))
    }

    fn load_job_run(&self, job_run_id: &str) -> Result<Option<JobRunRecord>> {
        Ok(self.job_run(job_run_id))
    }

    fn save_job_run(&self, job_run_id: &str, record: &JobRunRecord) -> Result<()> {
        let mut job_runs = self.job_runs.borrow_mut();
        let slot = job_runs
            .get_mut(job_run_id)
            .ok_or_else(|| anyhow!("no job run found with id {job_run_id}"))?;
        *slot = record.clone();
        Ok(())
    }
}
