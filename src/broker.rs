use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use crate::backend::Backend;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, PermitPool, TaskErrorPolicy, TaskProcessor, DEFAULT_MAX_PARALLEL_TASKS};
use crate::error::{ConsumeError, QueueError, Result};
use crate::models::TaskSignature;
use crate::poller::{Poller, DEFAULT_POLL_INTERVAL};
use crate::publisher::Publisher;
use crate::store::DynStore;

struct Consuming {
  stop: Arc<watch::Sender<bool>>,
  done: watch::Receiver<bool>,
}

/// Consumer lifecycle over a shared task table: publishing, claiming and
/// bounded execution. One broker runs at most one consuming loop at a time.
pub struct Broker {
  store: DynStore,
  backend: Backend,
  publisher: Publisher,
  registered: RwLock<Vec<String>>,
  pool: Arc<PermitPool>,
  poll_interval: Duration,
  error_policy: TaskErrorPolicy,
  retry: AtomicBool,
  consuming: Mutex<Option<Consuming>>,
}

impl Broker {
  pub fn new(store: DynStore) -> Self {
    Self {
      backend: Backend::new(store.clone()),
      publisher: Publisher::new(store.clone()),
      store,
      registered: RwLock::new(Vec::new()),
      pool: Arc::new(PermitPool::new(DEFAULT_MAX_PARALLEL_TASKS)),
      poll_interval: DEFAULT_POLL_INTERVAL,
      error_policy: TaskErrorPolicy::default(),
      retry: AtomicBool::new(true),
      consuming: Mutex::new(None),
    }
  }

  pub fn from_config(store: DynStore, config: &Config) -> Self {
    let broker = Self::new(store)
      .with_poll_interval(config.poll_interval)
      .with_error_policy(config.task_error_policy);
    broker.set_max_parallel_tasks(config.max_parallel_tasks);
    broker.set_registered_task_names(config.registered_tasks.clone());
    broker
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn with_error_policy(mut self, error_policy: TaskErrorPolicy) -> Self {
    self.error_policy = error_policy;
    self
  }

  pub fn backend(&self) -> &Backend {
    &self.backend
  }

  pub fn publisher(&self) -> &Publisher {
    &self.publisher
  }

  pub fn max_parallel_tasks(&self) -> usize {
    self.pool.width()
  }

  /// Takes effect for the next claimed task; running tasks keep their permits.
  pub fn set_max_parallel_tasks(&self, n: usize) {
    self.pool.resize(n);
    info!("Max parallel tasks set to {}", self.pool.width());
  }

  pub fn set_registered_task_names(&self, names: Vec<String>) {
    *self.registered.write().unwrap_or_else(PoisonError::into_inner) = names;
  }

  pub fn registered_task_names(&self) -> Vec<String> {
    self.registered.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn is_task_registered(&self, name: &str) -> bool {
    self.registered.read().unwrap_or_else(PoisonError::into_inner).iter().any(|n| n == name)
  }

  pub async fn publish(&self, task: &TaskSignature) -> Result<()> {
    self.publisher.publish(task).await
  }

  /// Unclaimed tasks among the registered names.
  pub async fn get_pending_tasks(&self) -> Result<Vec<TaskSignature>> {
    self.publisher.get_pending_tasks(&self.registered_task_names()).await
  }

  /// Polls for registered tasks and executes them until `stop_consuming` is
  /// called (`Ok`) or something fatal happens (`Err`). The error's `retry`
  /// flag tells the caller whether to back off and call again; it turns false
  /// for good once `stop_consuming` has been called. Once stopped, a broker
  /// returns `Ok` without claiming anything. Only one loop runs per broker; a
  /// second concurrent call fails with `AlreadyConsuming`.
  pub async fn start_consuming(
    &self,
    consumer_tag: &str,
    processor: Arc<dyn TaskProcessor>,
  ) -> std::result::Result<(), ConsumeError> {
    if let Err(err) = self.store.ping().await {
      warn!("Consumer {} cannot reach the store: {}", consumer_tag, err);
      return Err(self.consume_error(err));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let (done_tx, done_rx) = watch::channel(false);
    {
      let mut consuming = self.consuming.lock().unwrap_or_else(PoisonError::into_inner);
      // `stop_consuming` flips `retry` before taking this lock.
      if self.is_stopped() {
        info!("Consumer {} not started: broker already stopped", consumer_tag);
        return Ok(());
      }
      if consuming.is_some() {
        warn!("Consumer {} not started: broker is already consuming", consumer_tag);
        return Err(ConsumeError { retry: false, source: QueueError::AlreadyConsuming });
      }
      *consuming = Some(Consuming {
        stop: stop_tx.clone(),
        done: done_rx,
      });
    }

    let (deliveries_tx, mut deliveries) = mpsc::channel(1);
    let (fatal_tx, mut fatal) = mpsc::unbounded_channel();
    let names: Arc<[String]> = self.registered_task_names().into();
    let poller = Poller::new(self.store.clone(), names, self.poll_interval)
      .spawn(deliveries_tx, fatal_tx.clone(), stop_rx);
    let mut dispatcher = Dispatcher::new(
      self.backend.clone(),
      processor,
      self.pool.clone(),
      self.error_policy,
      fatal_tx,
    );
    info!("Consumer {} started", consumer_tag);

    let mut outcome: Result<()> = loop {
      tokio::select! {
        biased;
        Some(err) = fatal.recv() => break Err(err),
        Some(err) = dispatcher.reap_one(), if dispatcher.in_flight() > 0 => break Err(err),
        delivery = deliveries.recv() => match delivery {
          Some(record) => {
            if let Err(err) = dispatcher.dispatch(record).await {
              break Err(err);
            }
          }
          None => break Ok(()),
        },
      }
    };

    // Stop claiming, but run whatever the poller already claimed.
    stop_tx.send_replace(true);
    while let Some(record) = deliveries.recv().await {
      if let Err(err) = dispatcher.dispatch(record).await {
        error!("Consumer {} could not run claimed task: {}", consumer_tag, err);
      }
    }
    if let Err(err) = poller.await {
      error!("Poller task failed: {}", err);
    }
    let panicked = dispatcher.drain().await;

    if outcome.is_ok() {
      if let Ok(err) = fatal.try_recv() {
        outcome = Err(err);
      } else if let Some(err) = panicked {
        outcome = Err(err);
      }
    }

    done_tx.send_replace(true);
    {
      let mut consuming = self.consuming.lock().unwrap_or_else(PoisonError::into_inner);
      if consuming.as_ref().is_some_and(|c| Arc::ptr_eq(&c.stop, &stop_tx)) {
        *consuming = None;
      }
    }

    match outcome {
      Ok(()) => {
        info!("Consumer {} stopped", consumer_tag);
        Ok(())
      }
      Err(err) => {
        error!("Consumer {} stopped: {}", consumer_tag, err);
        Err(self.consume_error(err))
      }
    }
  }

  /// Stops claiming, disables retry and waits until every dispatched task
  /// has finished.
  pub async fn stop_consuming(&self) {
    self.retry.store(false, Ordering::SeqCst);
    let consuming = {
      self.consuming.lock().unwrap_or_else(PoisonError::into_inner).take()
    };
    if let Some(Consuming { stop, mut done }) = consuming {
      stop.send_replace(true);
      let _ = done.wait_for(|finished| *finished).await;
    }
  }

  /// True once `stop_consuming` has been called.
  pub fn is_stopped(&self) -> bool {
    !self.retry.load(Ordering::SeqCst)
  }

  fn consume_error(&self, source: QueueError) -> ConsumeError {
    ConsumeError {
      retry: self.retry.load(Ordering::SeqCst),
      source,
    }
  }
}
