use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use crate::error::{QueueError, Result};

/// Lifecycle of a task row. Only moves forward; SUCCESS and FAILURE are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
  Pending,
  Received,
  Started,
  Success,
  Failure,
}

impl State {
  pub fn as_str(self) -> &'static str {
    match self {
      State::Pending => "PENDING",
      State::Received => "RECEIVED",
      State::Started => "STARTED",
      State::Success => "SUCCESS",
      State::Failure => "FAILURE",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, State::Success | State::Failure)
  }
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for State {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "PENDING" => Ok(State::Pending),
      "RECEIVED" => Ok(State::Received),
      "STARTED" => Ok(State::Started),
      "SUCCESS" => Ok(State::Success),
      "FAILURE" => Ok(State::Failure),
      other => Err(format!("unknown task state '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArg {
  #[serde(rename = "type")]
  pub kind: String,
  pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
  #[serde(rename = "type")]
  pub kind: String,
  pub value: serde_json::Value,
}

/// The task definition producers publish and processors receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSignature {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(default)]
  pub args: Vec<TaskArg>,
}

impl TaskSignature {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      group_id: None,
      args: Vec::new(),
    }
  }

  pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
    self.group_id = Some(group_id.into());
    self
  }

  pub fn with_arg(mut self, kind: impl Into<String>, value: serde_json::Value) -> Self {
    self.args.push(TaskArg { kind: kind.into(), value });
    self
  }
}

/// What callers read back: `{task_id, state, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
  pub task_id: String,
  pub state: State,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Vec<TaskResult>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl TaskState {
  pub fn is_completed(&self) -> bool {
    self.state == State::Success
  }

  pub fn is_failure(&self) -> bool {
    self.state == State::Failure
  }
}

/// One row of the `tasks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
  pub id: String,
  pub group_id: Option<String>,
  pub name: String,
  pub payload: serde_json::Value,
  pub consumed: bool,
  pub state: String,
  pub result: Option<serde_json::Value>,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
  pub fn from_signature(signature: &TaskSignature) -> Result<Self> {
    let payload = serde_json::to_value(signature)
      .map_err(|e| QueueError::serialization("publish", e))?;
    let now = Utc::now();
    Ok(Self {
      id: signature.id.clone(),
      group_id: signature.group_id.clone(),
      name: signature.name.clone(),
      payload,
      consumed: false,
      state: State::Pending.as_str().to_string(),
      result: None,
      error: None,
      created_at: now,
      updated_at: now,
    })
  }

  /// A row that only reserves an id inside a group. Its empty payload keeps it
  /// out of the poller's reach until the task itself is published.
  pub fn placeholder(id: &str, group_id: &str) -> Self {
    let now = Utc::now();
    Self {
      id: id.to_string(),
      group_id: Some(group_id.to_string()),
      name: String::new(),
      payload: empty_payload(),
      consumed: false,
      state: State::Pending.as_str().to_string(),
      result: None,
      error: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn has_payload(&self) -> bool {
    self.payload != empty_payload()
  }

  pub fn signature(&self) -> Result<TaskSignature> {
    serde_json::from_value(self.payload.clone())
      .map_err(|e| QueueError::serialization("signature", e))
  }

  pub fn state(&self) -> Result<State> {
    self.state.parse().map_err(|message| QueueError::Storage { op: "state", message })
  }

  /// Resolves the row into its read format. Results are only attached on
  /// SUCCESS and errors only on FAILURE.
  pub fn task_state(&self) -> Result<TaskState> {
    let state = self.state()?;
    let mut task_state = TaskState {
      task_id: self.id.clone(),
      state,
      result: None,
      error: None,
    };
    match state {
      State::Success => {
        let results = match &self.result {
          Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| QueueError::serialization("task_state", e))?,
          None => Vec::new(),
        };
        task_state.result = Some(results);
      }
      State::Failure => task_state.error = Some(self.error.clone().unwrap_or_default()),
      _ => {}
    }
    Ok(task_state)
  }
}

pub fn empty_payload() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn signature_wire_format_uses_type_key() {
    let sig = TaskSignature::new("t1", "add").with_group("g1").with_arg("int64", json!(2));
    let value = serde_json::to_value(&sig).unwrap();
    assert_eq!(value, json!({"id": "t1", "name": "add", "group_id": "g1", "args": [{"type": "int64", "value": 2}]}));
  }

  #[test]
  fn invalid_payload_fails_to_deserialize() {
    let mut record = TaskRecord::from_signature(&TaskSignature::new("t1", "add")).unwrap();
    record.payload = json!({"id": 7});
    assert!(matches!(record.signature(), Err(QueueError::Serialization { .. })));
  }

  #[test]
  fn placeholder_rows_have_no_payload() {
    let record = TaskRecord::placeholder("t1", "g1");
    assert!(!record.has_payload());
    assert_eq!(record.group_id.as_deref(), Some("g1"));
    assert!(TaskRecord::from_signature(&TaskSignature::new("t2", "add")).unwrap().has_payload());
  }

  #[test]
  fn task_state_attaches_result_only_on_success() {
    let mut record = TaskRecord::from_signature(&TaskSignature::new("t1", "add")).unwrap();
    record.result = Some(json!([{"type": "int64", "value": 3}]));
    record.error = Some("boom".into());

    record.state = "STARTED".into();
    let started = record.task_state().unwrap();
    assert_eq!(started.result, None);
    assert_eq!(started.error, None);

    record.state = "SUCCESS".into();
    let success = record.task_state().unwrap();
    assert_eq!(success.result.unwrap()[0].value, json!(3));
    assert_eq!(success.error, None);

    record.state = "FAILURE".into();
    let failure = record.task_state().unwrap();
    assert_eq!(failure.error.as_deref(), Some("boom"));
    assert_eq!(failure.result, None);
  }

  #[test]
  fn unknown_state_is_a_storage_error() {
    let mut record = TaskRecord::placeholder("t1", "g1");
    record.state = "LOST".into();
    assert!(matches!(record.task_state(), Err(QueueError::Storage { .. })));
  }
}
