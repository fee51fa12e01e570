use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{error, info, warn};
use pgtq::{
  broker::Broker,
  config::Config,
  database::setup_database,
  store::PgTaskStore,
  worker_processing::builtin_registry,
};

const MAX_RESTART_DELAY: Duration = Duration::from_secs(30);
/// A run at least this long counts as healthy and resets the restart delay.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

struct RestartBackoff {
  strategy: ExponentialBackoff,
}

impl RestartBackoff {
  fn new() -> Self {
    Self { strategy: Self::strategy() }
  }

  fn strategy() -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2).factor(100).max_delay(MAX_RESTART_DELAY)
  }

  /// Delay before the next restart, given how long the failed run lasted.
  fn next_delay(&mut self, ran_for: Duration) -> Duration {
    if ran_for >= HEALTHY_RUN {
      self.strategy = Self::strategy();
    }
    self.strategy.next().unwrap_or(MAX_RESTART_DELAY)
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url).await?;

  let registry = builtin_registry();
  let mut config = config;
  if config.registered_tasks.is_empty() {
    config.registered_tasks = registry.names();
  }
  let broker = Arc::new(Broker::from_config(Arc::new(PgTaskStore::new(db_pool)), &config));
  info!("Worker {} consuming {:?}", config.worker_id, broker.registered_task_names());

  let shutdown = {
    let broker = broker.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down, waiting for running tasks");
        broker.stop_consuming().await;
      }
    })
  };

  let processor = Arc::new(registry);
  let mut backoff = RestartBackoff::new();
  while !broker.is_stopped() {
    let started = Instant::now();
    match broker.start_consuming(&config.worker_id, processor.clone()).await {
      Ok(()) => break,
      Err(e) if e.should_retry() => {
        let delay = backoff.next_delay(started.elapsed());
        warn!("Consuming interrupted: {}. Retrying in {:?}", e, delay);
        tokio::time::sleep(delay).await;
      }
      Err(e) => {
        error!("Consuming stopped: {}", e);
        shutdown.abort();
        return Err(e.into());
      }
    }
  }

  let _ = shutdown.await;
  Ok(())
}
