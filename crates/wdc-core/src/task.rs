//! Task schema enforced at the worker boundary
//!
//! Tasks arrive as opaque JSON. [`TaskSpec::decode`] turns them into a typed
//! spec, separating "cannot be decoded at all" (not an object) from
//! "malformed" (missing or mistyped fields) so callers can treat the first
//! as a fault and the second as a soft failure.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded deployment task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Deployment action to perform (required, non-empty)
    pub action: String,
    /// Optional deployment target
    #[serde(default)]
    pub target: Option<String>,
    /// Free-form parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskSpec {
    /// Create a spec for `action`
    #[inline]
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            params: Map::new(),
        }
    }

    /// With target
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// With parameter
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Decode a raw task
    ///
    /// # Errors
    /// - `TaskError::NotAnObject` if the task is not a JSON object
    /// - `TaskError::Malformed` if a field is missing, mistyped or unknown
    /// - `TaskError::EmptyField` if `action` is blank
    pub fn decode(task: &Value) -> Result<Self, TaskError> {
        if !task.is_object() {
            return Err(TaskError::NotAnObject(json_kind(task)));
        }

        let spec: Self =
            Self::deserialize(task).map_err(|e| TaskError::Malformed(e.to_string()))?;

        if spec.action.trim().is_empty() {
            return Err(TaskError::EmptyField("action"));
        }

        Ok(spec)
    }

    /// Encode back into a raw task
    #[must_use]
    pub fn to_task(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_minimal_task() {
        let spec = TaskSpec::decode(&json!({"action": "rollout"})).unwrap();
        assert_eq!(spec.action, "rollout");
        assert!(spec.target.is_none());
        assert!(spec.params.is_empty());
    }

    #[test]
    fn decode_full_task() {
        let spec = TaskSpec::decode(&json!({
            "action": "rollout",
            "target": "eu-west",
            "params": {"replicas": 3}
        }))
        .unwrap();
        assert_eq!(spec.target.as_deref(), Some("eu-west"));
        assert_eq!(spec.params["replicas"], json!(3));
    }

    #[test]
    fn non_object_is_undecodable() {
        let err = TaskSpec::decode(&json!("rollout")).unwrap_err();
        assert_eq!(err, TaskError::NotAnObject("string"));
        assert!(err.is_undecodable());

        let err = TaskSpec::decode(&Value::Null).unwrap_err();
        assert_eq!(err, TaskError::NotAnObject("null"));
    }

    #[test]
    fn missing_action_is_malformed() {
        let err = TaskSpec::decode(&json!({"target": "eu-west"})).unwrap_err();
        assert!(matches!(err, TaskError::Malformed(ref m) if m.contains("action")));
        assert!(!err.is_undecodable());
    }

    #[test]
    fn mistyped_and_unknown_fields_are_malformed() {
        assert!(matches!(
            TaskSpec::decode(&json!({"action": 7})),
            Err(TaskError::Malformed(_))
        ));
        assert!(matches!(
            TaskSpec::decode(&json!({"action": "x", "extra": true})),
            Err(TaskError::Malformed(_))
        ));
    }

    #[test]
    fn blank_action_is_rejected() {
        assert_eq!(
            TaskSpec::decode(&json!({"action": "  "})),
            Err(TaskError::EmptyField("action"))
        );
    }

    #[test]
    fn builder_encodes_decodable_task() {
        let task = TaskSpec::new("rollout")
            .with_target("us-east")
            .with_param("canary", json!(true))
            .to_task();
        let spec = TaskSpec::decode(&task).unwrap();
        assert_eq!(spec.target.as_deref(), Some("us-east"));
    }
}
