use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cromwell_operend_core::{
    EntityId, EntitySchema, EntitySchemaSource, EntityStore, JobRunRecord, JobRunStore,
    VariableDefinition, VariableType, WorkFileId, WorkFileStore,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::OperendConfig;

/// Blocking JSON client for the Operend REST API.
#[derive(Debug, Clone)]
pub struct HttpOperendClient {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl HttpOperendClient {
    #[must_use]
    pub fn new(config: &OperendConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token_secret.clone(),
            agent,
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}/{path}", self.base_url))
            .set("accept", "application/json")
            .set("authorization", &format!("Bearer {}", self.token))
    }

    /// `Ok(None)` on 404.
    fn get_json(&self, path: &str) -> Result<Option<Value>> {
        match self.request("GET", path).call() {
            Ok(response) => Ok(Some(response.into_json()?)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(describe_failure("GET", path, err)),
        }
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Body<'_>,
    ) -> Result<Value> {
        let mut request = self.request(method, path);
        for (key, value) in query {
            request = request.query(key, value);
        }
        let outcome = match body {
            Body::Json(value) => request
                .set("content-type", "application/json")
                .send_json(value),
            Body::Bytes(bytes) => request
                .set("content-type", "application/octet-stream")
                .send_bytes(bytes),
        };
        match outcome {
            Ok(response) => {
                let text = response.into_string()?;
                if text.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    serde_json::from_str(&text)
                        .with_context(|| format!("{method} {path} returned non-JSON body"))
                }
            }
            Err(err) => Err(describe_failure(method, path, err)),
        }
    }
}

enum Body<'a> {
    Json(&'a Value),
    Bytes(&'a [u8]),
}

fn describe_failure(method: &str, path: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("{method} {path} failed with http status {code}: {body}")
        }
        ureq::Error::Transport(err) => anyhow!("{method} {path} http transport failure: {err}"),
    }
}

impl EntitySchemaSource for HttpOperendClient {
    fn fetch_entity_schema(&self, class_name: &str) -> Result<Option<EntitySchema>> {
        let path = resource_path("entityclasses", class_name);
        self.get_json(&path)?
            .map(|raw| schema_from_wire(class_name, raw))
            .transpose()
    }
}

impl WorkFileStore for HttpOperendClient {
    fn upload_file(&self, path: &Path) -> Result<WorkFileId> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let original_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let response = self.send(
            "POST",
            "workfiles",
            &[("originalName", original_name.as_str())],
            Body::Bytes(&bytes),
        )?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "uploaded work file");
        work_file_id_from_response(&response)
    }
}

impl EntityStore for HttpOperendClient {
    fn create_entity(&self, class_name: &str, values: &Map<String, Value>) -> Result<EntityId> {
        let mut body = Map::new();
        body.insert("_class".to_string(), Value::String(class_name.to_string()));
        body.extend(values.iter().map(|(key, value)| (key.clone(), value.clone())));
        let response = self.send("POST", "entities", &[], Body::Json(&Value::Object(body)))?;
        match response.get("entityId") {
            Some(Value::String(id)) => Ok(EntityId(id.clone())),
            Some(Value::Number(id)) => Ok(EntityId(id.to_string())),
            _ => Err(anyhow!("entity create response has no entityId: {response}")),
        }
    }
}

impl JobRunStore for HttpOperendClient {
    fn job_run_exists(&self, job_run_id: &str) -> Result<bool> {
        Ok(self.load_job_run(job_run_id)?.is_some())
    }

    fn load_job_run(&self, job_run_id: &str) -> Result<Option<JobRunRecord>> {
        let path = resource_path("jobruns", job_run_id);
        self.get_json(&path)?
            .map(|raw| {
                serde_json::from_value(raw)
                    .with_context(|| format!("job run {job_run_id} has an unexpected shape"))
            })
            .transpose()
    }

    fn save_job_run(&self, job_run_id: &str, record: &JobRunRecord) -> Result<()> {
        let path = resource_path("jobruns", job_run_id);
        let body = serde_json::to_value(record)?;
        self.send("PUT", &path, &[], Body::Json(&body))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntityClass {
    #[serde(default)]
    class_name: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, WireVariable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVariable {
    #[serde(rename = "type")]
    variable_type: String,
    #[serde(default)]
    is_array: bool,
    #[serde(default)]
    codes: Vec<BTreeMap<String, Value>>,
}

fn schema_from_wire(requested: &str, raw: Value) -> Result<EntitySchema> {
    let wire: WireEntityClass = serde_json::from_value(raw)
        .with_context(|| format!("entity class {requested} has an unexpected shape"))?;
    let mut variables = Vec::with_capacity(wire.variables.len());
    for (name, variable) in wire.variables {
        let variable_type = VariableType::parse(&variable.variable_type).ok_or_else(|| {
            anyhow!(
                "entity variable {name} has unsupported type {}",
                variable.variable_type
            )
        })?;
        let mut definition = VariableDefinition::new(&name, variable_type, variable.is_array);
        if variable_type == VariableType::Categorical {
            definition.codes = variable.codes.into_iter().flat_map(BTreeMap::into_keys).collect();
        }
        variables.push(definition);
    }
    let class_name = wire.class_name.unwrap_or_else(|| requested.to_string());
    Ok(EntitySchema::new(&class_name, variables))
}

/// `{collection}/{id}` with `id` percent-encoded as one path segment.
fn resource_path(collection: &str, id: &str) -> String {
    format!("{collection}/{}", urlencoding::encode(id))
}

fn work_file_id_from_response(response: &Value) -> Result<WorkFileId> {
    let id = match response.get("systemId") {
        Some(Value::Number(id)) => id.as_u64(),
        Some(Value::String(id)) => id.parse().ok(),
        _ => None,
    };
    id.map(WorkFileId)
        .ok_or_else(|| anyhow!("work file upload response has no numeric systemId: {response}"))
}
