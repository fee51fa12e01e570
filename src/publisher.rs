use tracing::info;
use crate::error::Result;
use crate::models::{TaskRecord, TaskSignature};
use crate::store::DynStore;

/// Enqueues task definitions as rows.
#[derive(Clone)]
pub struct Publisher {
  store: DynStore,
}

impl Publisher {
  pub fn new(store: DynStore) -> Self {
    Self { store }
  }

  /// Inserts the task as PENDING, or rewrites name, group and payload of an
  /// existing row with the same id. Progress already made is kept.
  pub async fn publish(&self, task: &TaskSignature) -> Result<()> {
    let record = TaskRecord::from_signature(task)?;
    self.store.upsert(&record).await?;
    info!("Published task {} ({})", task.id, task.name);
    Ok(())
  }

  /// Tasks still waiting to be claimed. Read-only; claiming goes through the poller.
  pub async fn get_pending_tasks(&self, names: &[String]) -> Result<Vec<TaskSignature>> {
    let records = self.store.pending(names).await?;
    records.iter().map(TaskRecord::signature).collect()
  }
}
