use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use crate::models::{TaskResult, TaskSignature};
use crate::registry::HandlerRegistry;

/// Returns the task's arguments unchanged.
pub async fn process_echo_task(task: TaskSignature) -> Result<Vec<TaskResult>> {
  info!("Processing echo task {}", task.id);
  Ok(task
    .args
    .into_iter()
    .map(|arg| TaskResult { kind: arg.kind, value: arg.value })
    .collect())
}

/// Waits `args[0]` milliseconds, then reports how long it slept.
pub async fn process_sleep_task(task: TaskSignature) -> Result<Vec<TaskResult>> {
  let millis = task
    .args
    .first()
    .and_then(|arg| arg.value.as_u64())
    .ok_or(anyhow!("Missing duration in sleep task {}", task.id))?;
  info!("Processing sleep task {} ({} ms)", task.id, millis);
  sleep(Duration::from_millis(millis)).await;
  Ok(vec![TaskResult { kind: "uint64".into(), value: millis.into() }])
}

pub fn builtin_registry() -> HandlerRegistry {
  let mut registry = HandlerRegistry::new();
  registry
    .register("echo", process_echo_task)
    .register("sleep", process_sleep_task);
  registry
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dispatcher::TaskProcessor;
  use serde_json::json;

  #[tokio::test]
  async fn echo_returns_args() {
    let task = TaskSignature::new("t1", "echo").with_arg("string", json!("hi"));
    let results = builtin_registry().process(&task).await.unwrap();
    assert_eq!(results, vec![TaskResult { kind: "string".into(), value: json!("hi") }]);
  }

  #[tokio::test(start_paused = true)]
  async fn sleep_waits_for_its_argument() {
    let task = TaskSignature::new("t1", "sleep").with_arg("uint64", json!(1500));
    let started = tokio::time::Instant::now();
    let results = process_sleep_task(task).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(results[0].value, json!(1500));
  }

  #[tokio::test]
  async fn sleep_without_duration_fails() {
    assert!(process_sleep_task(TaskSignature::new("t1", "sleep")).await.is_err());
  }
}
