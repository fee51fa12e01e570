use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use crate::error::{QueueError, Result};
use crate::models::{State, TaskResult, TaskState};
use crate::store::DynStore;

/// Pause before every `get_state` read, bounding load from naive pollers.
pub const DEFAULT_STATE_READ_DELAY: Duration = Duration::from_secs(4);

/// Reads and writes task lifecycle state. Every read is a fresh row fetch;
/// there is no waiting or notification.
#[derive(Clone)]
pub struct Backend {
  store: DynStore,
  read_delay: Duration,
}

impl Backend {
  pub fn new(store: DynStore) -> Self {
    Self {
      store,
      read_delay: DEFAULT_STATE_READ_DELAY,
    }
  }

  pub fn with_read_delay(mut self, read_delay: Duration) -> Self {
    self.read_delay = read_delay;
    self
  }

  pub async fn set_pending(&self, task_id: &str) -> Result<()> {
    self.set_state(task_id, State::Pending).await
  }

  pub async fn set_received(&self, task_id: &str) -> Result<()> {
    self.set_state(task_id, State::Received).await
  }

  pub async fn set_started(&self, task_id: &str) -> Result<()> {
    self.set_state(task_id, State::Started).await
  }

  pub async fn set_success(&self, task_id: &str, result: &[TaskResult]) -> Result<()> {
    let result = serde_json::to_value(result)
      .map_err(|e| QueueError::serialization("set_success", e))?;
    let updated = self.store.set_success(task_id, &result).await?;
    log_write(task_id, State::Success, updated);
    Ok(())
  }

  pub async fn set_failure(&self, task_id: &str, error: &str) -> Result<()> {
    let updated = self.store.set_failure(task_id, error).await?;
    log_write(task_id, State::Failure, updated);
    Ok(())
  }

  pub async fn get_state(&self, task_id: &str) -> Result<TaskState> {
    if !self.read_delay.is_zero() {
      sleep(self.read_delay).await;
    }
    match self.store.fetch(task_id).await? {
      Some(record) => record.task_state(),
      None => Err(QueueError::NotFound { op: "get_state", task_id: task_id.to_string() }),
    }
  }

  pub async fn init_group(&self, group_id: &str, task_ids: &[String]) -> Result<()> {
    self.store.insert_placeholders(group_id, task_ids).await?;
    info!("Initialized group {} with {} tasks", group_id, task_ids.len());
    Ok(())
  }

  /// True only when exactly `expected` rows exist and all of them succeeded.
  /// A FAILURE row keeps the group incomplete.
  pub async fn group_completed(&self, group_id: &str, expected: usize) -> Result<bool> {
    let states = self.group_states(group_id, expected).await?;
    if states.iter().any(|state| !state.is_completed()) {
      return Ok(false);
    }
    Ok(states.len() == expected)
  }

  pub async fn group_states(&self, group_id: &str, expected: usize) -> Result<Vec<TaskState>> {
    let records = self.store.fetch_group(group_id).await?;
    let mut states = Vec::with_capacity(expected.max(records.len()));
    for record in &records {
      states.push(record.task_state()?);
    }
    Ok(states)
  }

  pub async fn purge_state(&self, task_id: &str) -> Result<()> {
    let deleted = self.store.delete(task_id).await?;
    debug!("Purged task {} ({} rows)", task_id, deleted);
    Ok(())
  }

  pub async fn purge_group_meta(&self, group_id: &str) -> Result<()> {
    let deleted = self.store.delete_group(group_id).await?;
    debug!("Purged group {} ({} rows)", group_id, deleted);
    Ok(())
  }

  async fn set_state(&self, task_id: &str, state: State) -> Result<()> {
    let updated = self.store.set_state(task_id, state).await?;
    log_write(task_id, state, updated);
    Ok(())
  }
}

fn log_write(task_id: &str, state: State, updated: u64) {
  if updated == 0 {
    debug!("State {} for task {} matched no row", state, task_id);
  } else {
    debug!("Task {} is now {}", task_id, state);
  }
}
