use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use crate::error::{QueueError, Result};
use crate::models::TaskRecord;
use crate::store::DynStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Claims at most one task per tick and hands it to the consuming loop.
pub struct Poller {
  store: DynStore,
  names: Arc<[String]>,
  interval: Duration,
}

impl Poller {
  pub fn new(store: DynStore, names: Arc<[String]>, interval: Duration) -> Self {
    Self { store, names, interval }
  }

  /// One claim attempt: lock the oldest claimable row, mark it consumed, commit.
  pub async fn tick(&self) -> Result<Option<TaskRecord>> {
    self.store.claim_next(&self.names).await
  }

  /// Runs until `stop` flips to true, a claim fails, or the receiving side
  /// goes away. A tick that already started always finishes its handoff, so
  /// a claimed row is never dropped on the floor. Exiting drops `deliveries`.
  pub fn spawn(
    self,
    deliveries: mpsc::Sender<TaskRecord>,
    fatal: mpsc::UnboundedSender<QueueError>,
    mut stop: watch::Receiver<bool>,
  ) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = interval(self.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      info!("Waiting for tasks {:?}", self.names);

      loop {
        if *stop.borrow_and_update() {
          break;
        }
        tokio::select! {
          biased;
          changed = stop.changed() => {
            if changed.is_err() {
              break;
            }
            continue;
          }
          _ = ticker.tick() => {}
        }

        match self.tick().await {
          Ok(Some(record)) => {
            if deliveries.send(record).await.is_err() {
              break;
            }
          }
          Ok(None) => {}
          Err(err) => {
            error!("Polling failed: {}", err);
            let _ = fatal.send(err);
            break;
          }
        }
      }
      info!("Poller stopped");
    })
  }
}
