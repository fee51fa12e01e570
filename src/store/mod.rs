use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use crate::error::Result;
use crate::models::{State, TaskRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

pub type DynStore = Arc<dyn TaskStore>;

/// Row-level operations on the `tasks` table.
///
/// Anything that has to be atomic (the claim, the idempotent upsert, the
/// two-column terminal writes) is a single method here so implementations
/// can wrap it in one transaction.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
  async fn ping(&self) -> Result<()>;

  /// Inserts a PENDING row, or rewrites name/group/payload of an existing one.
  async fn upsert(&self, record: &TaskRecord) -> Result<()>;

  /// Unconsumed rows whose name is in `names`, oldest first.
  async fn pending(&self, names: &[String]) -> Result<Vec<TaskRecord>>;

  /// Locks the oldest claimable row, marks it consumed and commits.
  async fn claim_next(&self, names: &[String]) -> Result<Option<TaskRecord>>;

  async fn set_state(&self, task_id: &str, state: State) -> Result<u64>;

  async fn set_success(&self, task_id: &str, result: &serde_json::Value) -> Result<u64>;

  async fn set_failure(&self, task_id: &str, error: &str) -> Result<u64>;

  async fn fetch(&self, task_id: &str) -> Result<Option<TaskRecord>>;

  async fn fetch_group(&self, group_id: &str) -> Result<Vec<TaskRecord>>;

  /// Creates a placeholder row for every id not yet present.
  async fn insert_placeholders(&self, group_id: &str, task_ids: &[String]) -> Result<()>;

  async fn delete(&self, task_id: &str) -> Result<u64>;

  async fn delete_group(&self, group_id: &str) -> Result<u64>;

  async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
