use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use crate::backend::Backend;
use crate::error::{QueueError, Result};
use crate::models::{TaskRecord, TaskResult, TaskSignature};

pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 6;

/// Executes one claimed task. An `Err` marks the task FAILURE; it does not
/// stop consumption unless the broker runs with `TaskErrorPolicy::Stop`.
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
  async fn process(&self, task: &TaskSignature) -> anyhow::Result<Vec<TaskResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskErrorPolicy {
  /// Record FAILURE and keep consuming.
  #[default]
  RecordFailure,
  /// Record FAILURE, then stop consuming with the task's error.
  Stop,
}

impl std::str::FromStr for TaskErrorPolicy {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "record" => Ok(TaskErrorPolicy::RecordFailure),
      "stop" => Ok(TaskErrorPolicy::Stop),
      other => Err(format!("unknown task error policy '{}'", other)),
    }
  }
}

/// Bounded set of execution permits. Resizing swaps in a fresh semaphore, so
/// tasks already holding a permit of the old one run to completion untouched.
pub struct PermitPool {
  semaphore: Mutex<Arc<Semaphore>>,
  width: AtomicUsize,
}

impl PermitPool {
  pub fn new(width: usize) -> Self {
    let width = width.max(1);
    Self {
      semaphore: Mutex::new(Arc::new(Semaphore::new(width))),
      width: AtomicUsize::new(width),
    }
  }

  pub fn width(&self) -> usize {
    self.width.load(Ordering::SeqCst)
  }

  pub fn resize(&self, width: usize) {
    let width = width.max(1);
    let mut semaphore = self.semaphore.lock().unwrap_or_else(PoisonError::into_inner);
    *semaphore = Arc::new(Semaphore::new(width));
    self.width.store(width, Ordering::SeqCst);
  }

  pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
    let semaphore = self.semaphore.lock().unwrap_or_else(PoisonError::into_inner).clone();
    semaphore
      .acquire_owned()
      .await
      .map_err(|_| QueueError::Claim("permit pool closed".into()))
  }
}

/// Runs claimed tasks on the permit pool. Per-task outcomes are written
/// through the backend; anything that should end consumption goes to `fatal`.
pub struct Dispatcher {
  backend: Backend,
  processor: Arc<dyn TaskProcessor>,
  pool: Arc<PermitPool>,
  policy: TaskErrorPolicy,
  fatal: mpsc::UnboundedSender<QueueError>,
  running: JoinSet<()>,
}

impl Dispatcher {
  pub fn new(
    backend: Backend,
    processor: Arc<dyn TaskProcessor>,
    pool: Arc<PermitPool>,
    policy: TaskErrorPolicy,
    fatal: mpsc::UnboundedSender<QueueError>,
  ) -> Self {
    Self {
      backend,
      processor,
      pool,
      policy,
      fatal,
      running: JoinSet::new(),
    }
  }

  /// Waits for a permit, then starts the task in the background.
  pub async fn dispatch(&mut self, record: TaskRecord) -> Result<()> {
    let permit = self.pool.acquire().await?;
    let backend = self.backend.clone();
    let processor = self.processor.clone();
    let policy = self.policy;
    let fatal = self.fatal.clone();
    self.running.spawn(async move {
      let task_id = record.id.clone();
      if let Err(err) = execute(&backend, processor.as_ref(), policy, &record).await {
        error!("Task {} stopped consumption: {}", task_id, err);
        let _ = fatal.send(err);
      }
      drop(permit);
    });
    Ok(())
  }

  pub fn in_flight(&self) -> usize {
    self.running.len()
  }

  /// Waits for the next running task to finish. A panic is reported as fatal.
  pub async fn reap_one(&mut self) -> Option<QueueError> {
    match self.running.join_next().await {
      Some(Err(join_err)) if join_err.is_panic() => {
        error!("Processor panicked: {}", join_err);
        Some(QueueError::TaskPanicked(join_err.to_string()))
      }
      _ => None,
    }
  }

  /// Waits for every running task. Returns the first panic, if any.
  pub async fn drain(&mut self) -> Option<QueueError> {
    let mut first = None;
    while !self.running.is_empty() {
      if let Some(err) = self.reap_one().await {
        first.get_or_insert(err);
      }
    }
    first
  }
}

async fn execute(
  backend: &Backend,
  processor: &dyn TaskProcessor,
  policy: TaskErrorPolicy,
  record: &TaskRecord,
) -> Result<()> {
  info!("Received new message: {} - {}", record.id, record.name);
  backend.set_received(&record.id).await?;

  let task = match record.signature() {
    Ok(task) => task,
    Err(err) => return fail(backend, policy, &record.id, err.to_string()).await,
  };

  backend.set_started(&record.id).await?;
  match processor.process(&task).await {
    Ok(results) => {
      backend.set_success(&record.id, &results).await?;
      info!("Task {} processed successfully", record.id);
      Ok(())
    }
    Err(err) => fail(backend, policy, &record.id, format!("{:#}", err)).await,
  }
}

async fn fail(backend: &Backend, policy: TaskErrorPolicy, task_id: &str, message: String) -> Result<()> {
  warn!("Task {} failed: {}", task_id, message);
  backend.set_failure(task_id, &message).await?;
  match policy {
    TaskErrorPolicy::RecordFailure => Ok(()),
    TaskErrorPolicy::Stop => Err(QueueError::TaskFailed { task_id: task_id.to_string(), message }),
  }
}
