use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use crate::error::{QueueError, Result};
use crate::models::{State, TaskRecord};
use super::TaskStore;

/// In-process `TaskStore`. The table lives behind one mutex, so a claim is
/// as exclusive as a row lock. `set_online(false)` makes every operation fail
/// with a connectivity error, which is how tests simulate losing the store.
pub struct MemoryTaskStore {
  rows: Mutex<Vec<TaskRecord>>,
  online: AtomicBool,
}

impl Default for MemoryTaskStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryTaskStore {
  pub fn new() -> Self {
    Self {
      rows: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Inserts a row verbatim, timestamps included.
  pub fn seed(&self, record: TaskRecord) {
    let mut rows = self.rows();
    rows.retain(|row| row.id != record.id);
    rows.push(record);
  }

  pub fn snapshot(&self) -> Vec<TaskRecord> {
    self.rows().clone()
  }

  fn rows(&self) -> MutexGuard<'_, Vec<TaskRecord>> {
    self.rows.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn check(&self, op: &'static str) -> Result<()> {
    if self.online.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(QueueError::Connectivity { op, message: "connection refused".into() })
    }
  }

  fn update<F>(&self, op: &'static str, task_id: &str, apply: F) -> Result<u64>
  where
    F: FnOnce(&mut TaskRecord),
  {
    self.check(op)?;
    let mut rows = self.rows();
    match rows.iter_mut().find(|row| row.id == task_id) {
      Some(row) => {
        apply(row);
        row.updated_at = Utc::now();
        Ok(1)
      }
      None => Ok(0),
    }
  }
}

fn oldest_first(rows: &mut [TaskRecord]) {
  // Stable, so rows created in the same instant keep insertion order.
  rows.sort_by_key(|row| row.created_at);
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
  async fn ping(&self) -> Result<()> {
    self.check("ping")
  }

  async fn upsert(&self, record: &TaskRecord) -> Result<()> {
    self.check("publish")?;
    let mut rows = self.rows();
    match rows.iter_mut().find(|row| row.id == record.id) {
      Some(row) => {
        row.name = record.name.clone();
        row.group_id = record.group_id.clone();
        row.payload = record.payload.clone();
        row.updated_at = Utc::now();
      }
      None => {
        let mut row = record.clone();
        row.consumed = false;
        row.state = State::Pending.as_str().to_string();
        rows.push(row);
      }
    }
    Ok(())
  }

  async fn pending(&self, names: &[String]) -> Result<Vec<TaskRecord>> {
    self.check("get_pending_tasks")?;
    let mut pending: Vec<TaskRecord> = self
      .rows()
      .iter()
      .filter(|row| !row.consumed && names.contains(&row.name))
      .cloned()
      .collect();
    oldest_first(&mut pending);
    Ok(pending)
  }

  async fn claim_next(&self, names: &[String]) -> Result<Option<TaskRecord>> {
    self.check("claim")?;
    let mut rows = self.rows();
    let candidate = rows
      .iter()
      .enumerate()
      .filter(|(_, row)| !row.consumed && row.has_payload() && names.contains(&row.name))
      .min_by_key(|(_, row)| row.created_at)
      .map(|(idx, _)| idx);

    // Connectivity is re-checked before the claim is made visible.
    self.check("claim")?;
    Ok(candidate.map(|idx| {
      let row = &mut rows[idx];
      row.consumed = true;
      row.updated_at = Utc::now();
      row.clone()
    }))
  }

  async fn set_state(&self, task_id: &str, state: State) -> Result<u64> {
    self.update("set_state", task_id, |row| row.state = state.as_str().to_string())
  }

  async fn set_success(&self, task_id: &str, result: &serde_json::Value) -> Result<u64> {
    self.update("set_success", task_id, |row| {
      row.state = State::Success.as_str().to_string();
      row.result = Some(result.clone());
    })
  }

  async fn set_failure(&self, task_id: &str, error: &str) -> Result<u64> {
    self.update("set_failure", task_id, |row| {
      row.state = State::Failure.as_str().to_string();
      row.error = Some(error.to_string());
    })
  }

  async fn fetch(&self, task_id: &str) -> Result<Option<TaskRecord>> {
    self.check("get_state")?;
    Ok(self.rows().iter().find(|row| row.id == task_id).cloned())
  }

  async fn fetch_group(&self, group_id: &str) -> Result<Vec<TaskRecord>> {
    self.check("group_states")?;
    let mut group: Vec<TaskRecord> = self
      .rows()
      .iter()
      .filter(|row| row.group_id.as_deref() == Some(group_id))
      .cloned()
      .collect();
    oldest_first(&mut group);
    Ok(group)
  }

  async fn insert_placeholders(&self, group_id: &str, task_ids: &[String]) -> Result<()> {
    self.check("init_group")?;
    let mut rows = self.rows();
    for task_id in task_ids {
      if !rows.iter().any(|row| &row.id == task_id) {
        rows.push(TaskRecord::placeholder(task_id, group_id));
      }
    }
    Ok(())
  }

  async fn delete(&self, task_id: &str) -> Result<u64> {
    self.check("purge_state")?;
    let mut rows = self.rows();
    let before = rows.len();
    rows.retain(|row| row.id != task_id);
    Ok((before - rows.len()) as u64)
  }

  async fn delete_group(&self, group_id: &str) -> Result<u64> {
    self.check("purge_group_meta")?;
    let mut rows = self.rows();
    let before = rows.len();
    rows.retain(|row| row.group_id.as_deref() != Some(group_id));
    Ok((before - rows.len()) as u64)
  }

  async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    self.check("cleanup")?;
    let mut rows = self.rows();
    let before = rows.len();
    rows.retain(|row| !(row.state == State::Success.as_str() && row.created_at < cutoff));
    Ok((before - rows.len()) as u64)
  }
}
