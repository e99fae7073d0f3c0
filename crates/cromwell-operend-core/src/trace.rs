use serde_json::{Map, Value};

use crate::TraceError;

/// Call-oriented view of Cromwell run metadata.
///
/// Calls keep the order they appear in the metadata document; row
/// reconstruction relies on it for first-seen-wins conflict handling and for
/// the order of aggregated outputs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionTrace {
    pub calls: Vec<CallRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub name: String,
    pub shards: Vec<ShardExecution>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardExecution {
    /// `-1` for an unscattered call.
    pub shard_index: i64,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub sub_trace: Option<ExecutionTrace>,
}

impl ExecutionTrace {
    /// Reads the `calls` tree out of parsed Cromwell metadata.
    ///
    /// # Errors
    /// Returns [`TraceError::Malformed`] when `calls`, a shard list, or a
    /// shard's `shardIndex` is missing or of the wrong JSON type.
    pub fn from_json(metadata: &Value) -> Result<Self, TraceError> {
        Self::parse(metadata, "metadata")
    }

    fn parse(metadata: &Value, path: &str) -> Result<Self, TraceError> {
        let calls = metadata
            .get("calls")
            .and_then(Value::as_object)
            .ok_or_else(|| TraceError::Malformed(format!("{path} has no 'calls' object")))?;

        let mut records = Vec::with_capacity(calls.len());
        for (name, shards) in calls {
            let shards = shards.as_array().ok_or_else(|| {
                TraceError::Malformed(format!("{path}.calls['{name}'] is not a list of shards"))
            })?;
            let shards = shards
                .iter()
                .enumerate()
                .map(|(position, shard)| {
                    ShardExecution::parse(shard, &format!("{path}.calls['{name}'][{position}]"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            records.push(CallRecord {
                name: name.clone(),
                shards,
            });
        }

        Ok(Self { calls: records })
    }
}

impl ShardExecution {
    fn parse(shard: &Value, path: &str) -> Result<Self, TraceError> {
        let shard_index = shard
            .get("shardIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| TraceError::Malformed(format!("{path} has no integer 'shardIndex'")))?;

        let sub_trace = match shard.get("subWorkflowMetadata") {
            None | Some(Value::Null) => None,
            Some(nested) => Some(ExecutionTrace::parse(
                nested,
                &format!("{path}.subWorkflowMetadata"),
            )?),
        };

        Ok(Self {
            shard_index,
            inputs: bindings(shard, "inputs", path)?,
            outputs: bindings(shard, "outputs", path)?,
            sub_trace,
        })
    }
}

fn bindings(shard: &Value, key: &str, path: &str) -> Result<Map<String, Value>, TraceError> {
    match shard.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(TraceError::Malformed(format!(
            "{path}.{key} is not an object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionTrace;
    use crate::TraceError;
    use serde_json::json;

    #[test]
    fn parses_nested_sub_workflow_metadata() {
        let metadata = json!({
            "calls": {
                "wf.outer": [{
                    "shardIndex": -1,
                    "subWorkflowMetadata": {
                        "calls": {
                            "inner.task": [{"shardIndex": 4, "outputs": {"out": "x.txt"}}]
                        }
                    }
                }]
            }
        });

        let trace = match ExecutionTrace::from_json(&metadata) {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        };
        assert_eq!(trace.calls.len(), 1);
        let outer = &trace.calls[0].shards[0];
        assert_eq!(outer.shard_index, -1);
        assert!(outer.inputs.is_empty());
        let Some(sub) = &outer.sub_trace else {
            panic!("expected nested trace");
        };
        assert_eq!(sub.calls[0].name, "inner.task");
        assert_eq!(sub.calls[0].shards[0].shard_index, 4);
        assert_eq!(sub.calls[0].shards[0].outputs["out"], json!("x.txt"));
    }

    #[test]
    fn call_order_follows_document_order() {
        let metadata = json!({
            "calls": {
                "wf.zeta": [{"shardIndex": 0}],
                "wf.alpha": [{"shardIndex": 0}]
            }
        });
        let trace = match ExecutionTrace::from_json(&metadata) {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        };
        let names: Vec<&str> = trace.calls.iter().map(|call| call.name.as_str()).collect();
        assert_eq!(names, vec!["wf.zeta", "wf.alpha"]);
    }

    #[test]
    fn rejects_missing_calls_and_shard_index() {
        assert!(matches!(
            ExecutionTrace::from_json(&json!({"workflowName": "wf"})),
            Err(TraceError::Malformed(_))
        ));

        let err = ExecutionTrace::from_json(&json!({"calls": {"wf.a": [{"inputs": {}}]}}));
        match err {
            Err(TraceError::Malformed(message)) => assert!(message.contains("shardIndex")),
            other => panic!("expected malformed trace, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_bindings() {
        let err = ExecutionTrace::from_json(&json!({
            "calls": {"wf.a": [{"shardIndex": 0, "outputs": ["x"]}]}
        }));
        assert!(matches!(err, Err(TraceError::Malformed(_))));
    }
}
