use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use crate::dispatcher::TaskProcessor;
use crate::models::{TaskResult, TaskSignature};

type Handler = Arc<dyn Fn(TaskSignature) -> BoxFuture<'static, anyhow::Result<Vec<TaskResult>>> + Send + Sync>;

/// Routes each task to the handler registered under its name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
  where
    F: Fn(TaskSignature) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<TaskResult>>> + Send + 'static,
  {
    self.handlers.insert(name.into(), Arc::new(move |task| handler(task).boxed()));
    self
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.handlers.keys().cloned().collect();
    names.sort();
    names
  }
}

#[async_trait]
impl TaskProcessor for HandlerRegistry {
  async fn process(&self, task: &TaskSignature) -> anyhow::Result<Vec<TaskResult>> {
    let handler = self
      .handlers
      .get(&task.name)
      .ok_or_else(|| anyhow!("no handler registered for task '{}'", task.name))?;
    handler(task.clone()).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn routes_by_task_name() {
    let mut registry = HandlerRegistry::new();
    registry
      .register("add", |task: TaskSignature| async move {
        let sum: i64 = task.args.iter().filter_map(|a| a.value.as_i64()).sum();
        Ok::<_, anyhow::Error>(vec![TaskResult { kind: "int64".into(), value: json!(sum) }])
      })
      .register("noop", |_task: TaskSignature| async move { Ok::<_, anyhow::Error>(Vec::new()) });

    assert_eq!(registry.names(), vec!["add", "noop"]);
    let task = TaskSignature::new("t1", "add").with_arg("int64", json!(2)).with_arg("int64", json!(3));
    let results = registry.process(&task).await.unwrap();
    assert_eq!(results[0].value, json!(5));
  }

  #[tokio::test]
  async fn unknown_names_fail() {
    let registry = HandlerRegistry::new();
    let err = registry.process(&TaskSignature::new("t1", "mystery")).await.unwrap_err();
    assert!(err.to_string().contains("mystery"));
  }
}
