use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use crate::error::{QueueError, Result};
use crate::models::{State, TaskRecord};
use super::TaskStore;

const COLUMNS: &str =
  "id, group_id, name, payload, consumed, state, result, error, created_at, updated_at";

#[derive(Clone)]
pub struct PgTaskStore {
  pool: PgPool,
}

impl PgTaskStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

fn db_err(op: &'static str) -> impl Fn(sqlx::Error) -> QueueError {
  move |e| QueueError::from_sqlx(op, e)
}

fn claim_err(e: sqlx::Error) -> QueueError {
  match QueueError::from_sqlx("claim", e) {
    err @ QueueError::Connectivity { .. } => err,
    err => QueueError::Claim(err.to_string()),
  }
}

#[async_trait]
impl TaskStore for PgTaskStore {
  async fn ping(&self) -> Result<()> {
    sqlx::query("SELECT 1")
      .execute(&self.pool)
      .await
      .map_err(|e| QueueError::Connectivity { op: "ping", message: e.to_string() })?;
    Ok(())
  }

  async fn upsert(&self, record: &TaskRecord) -> Result<()> {
    let mut tx = self.pool.begin().await.map_err(db_err("publish"))?;
    sqlx::query(
      "INSERT INTO tasks (id, group_id, name, payload, consumed, state, created_at, updated_at)
       VALUES ($1, $2, $3, $4, FALSE, $5, NOW(), NOW())
       ON CONFLICT (id) DO UPDATE
       SET name = EXCLUDED.name, group_id = EXCLUDED.group_id, payload = EXCLUDED.payload, updated_at = NOW()",
    )
      .bind(&record.id)
      .bind(&record.group_id)
      .bind(&record.name)
      .bind(&record.payload)
      .bind(State::Pending.as_str())
      .execute(&mut *tx)
      .await
      .map_err(db_err("publish"))?;
    tx.commit().await.map_err(db_err("publish"))?;
    Ok(())
  }

  async fn pending(&self, names: &[String]) -> Result<Vec<TaskRecord>> {
    let sql = format!(
      "SELECT {} FROM tasks WHERE consumed = FALSE AND name = ANY($1) ORDER BY created_at",
      COLUMNS
    );
    sqlx::query_as::<_, TaskRecord>(&sql)
      .bind(names)
      .fetch_all(&self.pool)
      .await
      .map_err(db_err("get_pending_tasks"))
  }

  async fn claim_next(&self, names: &[String]) -> Result<Option<TaskRecord>> {
    let mut tx = self.pool.begin().await.map_err(claim_err)?;

    // SKIP LOCKED lets a competing poller move on instead of queueing behind us.
    let sql = format!(
      "SELECT {} FROM tasks
       WHERE consumed = FALSE AND payload <> '{{}}'::jsonb AND name = ANY($1)
       ORDER BY created_at
       LIMIT 1
       FOR UPDATE SKIP LOCKED",
      COLUMNS
    );
    let task = sqlx::query_as::<_, TaskRecord>(&sql)
      .bind(names)
      .fetch_optional(&mut *tx)
      .await
      .map_err(claim_err)?;

    if let Some(task) = &task {
      sqlx::query("UPDATE tasks SET consumed = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(&task.id)
        .execute(&mut *tx)
        .await
        .map_err(claim_err)?;
    }

    // A claim we cannot commit durably must not be handed out.
    if let Err(e) = self.ping().await {
      let _ = tx.rollback().await;
      return Err(e);
    }
    tx.commit().await.map_err(claim_err)?;

    match task {
      Some(mut task) => {
        info!("Claimed task {} ({})", task.id, task.name);
        task.consumed = true;
        Ok(Some(task))
      }
      None => {
        debug!("No claimable task");
        Ok(None)
      }
    }
  }

  async fn set_state(&self, task_id: &str, state: State) -> Result<u64> {
    let done = sqlx::query("UPDATE tasks SET state = $2, updated_at = NOW() WHERE id = $1")
      .bind(task_id)
      .bind(state.as_str())
      .execute(&self.pool)
      .await
      .map_err(db_err("set_state"))?;
    Ok(done.rows_affected())
  }

  async fn set_success(&self, task_id: &str, result: &serde_json::Value) -> Result<u64> {
    let done = sqlx::query("UPDATE tasks SET state = $2, result = $3, updated_at = NOW() WHERE id = $1")
      .bind(task_id)
      .bind(State::Success.as_str())
      .bind(result)
      .execute(&self.pool)
      .await
      .map_err(db_err("set_success"))?;
    Ok(done.rows_affected())
  }

  async fn set_failure(&self, task_id: &str, error: &str) -> Result<u64> {
    let done = sqlx::query("UPDATE tasks SET state = $2, error = $3, updated_at = NOW() WHERE id = $1")
      .bind(task_id)
      .bind(State::Failure.as_str())
      .bind(error)
      .execute(&self.pool)
      .await
      .map_err(db_err("set_failure"))?;
    Ok(done.rows_affected())
  }

  async fn fetch(&self, task_id: &str) -> Result<Option<TaskRecord>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = $1", COLUMNS);
    sqlx::query_as::<_, TaskRecord>(&sql)
      .bind(task_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_err("get_state"))
  }

  async fn fetch_group(&self, group_id: &str) -> Result<Vec<TaskRecord>> {
    let sql = format!("SELECT {} FROM tasks WHERE group_id = $1 ORDER BY created_at", COLUMNS);
    sqlx::query_as::<_, TaskRecord>(&sql)
      .bind(group_id)
      .fetch_all(&self.pool)
      .await
      .map_err(db_err("group_states"))
  }

  async fn insert_placeholders(&self, group_id: &str, task_ids: &[String]) -> Result<()> {
    let mut tx = self.pool.begin().await.map_err(db_err("init_group"))?;
    for task_id in task_ids {
      let placeholder = TaskRecord::placeholder(task_id, group_id);
      sqlx::query(
        "INSERT INTO tasks (id, group_id, name, payload, consumed, state, created_at, updated_at)
         VALUES ($1, $2, $3, $4, FALSE, $5, NOW(), NOW())
         ON CONFLICT (id) DO NOTHING",
      )
        .bind(&placeholder.id)
        .bind(&placeholder.group_id)
        .bind(&placeholder.name)
        .bind(&placeholder.payload)
        .bind(&placeholder.state)
        .execute(&mut *tx)
        .await
        .map_err(db_err("init_group"))?;
    }
    tx.commit().await.map_err(db_err("init_group"))?;
    Ok(())
  }

  async fn delete(&self, task_id: &str) -> Result<u64> {
    let done = sqlx::query("DELETE FROM tasks WHERE id = $1")
      .bind(task_id)
      .execute(&self.pool)
      .await
      .map_err(db_err("purge_state"))?;
    Ok(done.rows_affected())
  }

  async fn delete_group(&self, group_id: &str) -> Result<u64> {
    let done = sqlx::query("DELETE FROM tasks WHERE group_id = $1")
      .bind(group_id)
      .execute(&self.pool)
      .await
      .map_err(db_err("purge_group_meta"))?;
    Ok(done.rows_affected())
  }

  async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let done = sqlx::query("DELETE FROM tasks WHERE state = $1 AND created_at < $2")
      .bind(State::Success.as_str())
      .bind(cutoff)
      .execute(&self.pool)
      .await
      .map_err(db_err("cleanup"))?;
    Ok(done.rows_affected())
  }
}
