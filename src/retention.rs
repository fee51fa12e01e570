use chrono::Utc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};
use crate::error::{QueueError, Result};
use crate::store::DynStore;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodically hard-deletes SUCCESS rows older than the retention window.
/// FAILURE rows are kept for inspection.
pub struct CleanupRoutine {
  store: DynStore,
  interval: Duration,
  retention: Duration,
  running: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl CleanupRoutine {
  pub fn new(store: DynStore) -> Self {
    Self {
      store,
      interval: DEFAULT_CLEANUP_INTERVAL,
      retention: DEFAULT_RETENTION,
      running: Mutex::new(None),
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_retention(mut self, retention: Duration) -> Self {
    self.retention = retention;
    self
  }

  pub async fn sweep_once(&self) -> Result<u64> {
    sweep(&self.store, self.retention).await
  }

  /// Sweeps once right away, then every interval until stopped. Calling it
  /// while already running does nothing.
  pub async fn start(&self) {
    if self.is_running() {
      return;
    }
    if let Err(err) = self.sweep_once().await {
      error!("Cleanup failed: {}", err);
    }

    let (quit_tx, mut quit_rx) = oneshot::channel();
    let store = self.store.clone();
    let retention = self.retention;
    let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let handle = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = &mut quit_rx => break,
          _ = ticker.tick() => {
            if let Err(err) = sweep(&store, retention).await {
              error!("Cleanup failed: {}", err);
            }
          }
        }
      }
    });
    *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some((quit_tx, handle));
    info!("Cleanup routine started (every {:?}, retention {:?})", self.interval, self.retention);
  }

  pub async fn stop(&self) {
    let running = {
      self.running.lock().unwrap_or_else(PoisonError::into_inner).take()
    };
    if let Some((quit, handle)) = running {
      let _ = quit.send(());
      if let Err(err) = handle.await {
        error!("Cleanup routine failed: {}", err);
      }
      info!("Cleanup routine stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.lock().unwrap_or_else(PoisonError::into_inner).is_some()
  }
}

async fn sweep(store: &DynStore, retention: Duration) -> Result<u64> {
  let retention = chrono::Duration::from_std(retention)
    .map_err(|e| QueueError::Storage { op: "cleanup", message: e.to_string() })?;
  let deleted = store.delete_succeeded_before(Utc::now() - retention).await?;
  if deleted > 0 {
    info!("Deleted {} succeeded tasks", deleted);
  }
  Ok(deleted)
}
