use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{watch, RwLock},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DuetError, Result},
    model::MachineModel,
    transport::StateFeed,
};

/// Background task keeping a [`MachineModel`] in step with the firmware.
///
/// One patch is pulled per poll interval. Wake times are scheduled from the
/// previous wake rather than from the end of the iteration so the cadence
/// does not drift.
pub struct ModelSynchronizer {
    handle: ModelHandle,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

/// Read side of a running synchronizer.
#[derive(Clone)]
pub struct ModelHandle {
    state: Arc<RwLock<SyncState>>,
    poll_interval: Duration,
}

struct SyncState {
    model: MachineModel,
    update_counter: u64,
    last_update_at: DateTime<Utc>,
    next_wake: Instant,
    running: bool,
}

impl ModelSynchronizer {
    /// Subscribes on `feed`, installs the full model it returns and spawns the
    /// update loop.
    pub async fn start(mut feed: Box<dyn StateFeed>, poll_interval: Duration) -> Result<Self> {
        let document = feed.subscribe().await?;
        let handle = ModelHandle {
            state: Arc::new(RwLock::new(SyncState {
                model: MachineModel::new(document),
                update_counter: 0,
                last_update_at: Utc::now(),
                next_wake: Instant::now(),
                running: true,
            })),
            poll_interval,
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_updates(feed, handle.clone(), stop_rx));
        info!(interval = ?poll_interval, "sync: object model subscription started");
        Ok(Self {
            handle,
            stop_tx,
            task: Some(task),
        })
    }

    pub fn handle(&self) -> ModelHandle {
        self.handle.clone()
    }

    /// Signals the loop and waits for it to finish. A receive in flight is
    /// abandoned rather than awaited.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "sync: update task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ModelSynchronizer {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn run_updates(
    mut feed: Box<dyn StateFeed>,
    handle: ModelHandle,
    mut stop: watch::Receiver<bool>,
) {
    let interval = handle.poll_interval;
    loop {
        if *stop.borrow() {
            break;
        }
        let received = tokio::select! {
            _ = stop.changed() => break,
            received = feed.next_patch() => received,
        };

        let wake = {
            let mut state = handle.state.write().await;
            match received {
                Ok(patch) => {
                    state.model.apply_patch(&patch);
                    state.update_counter += 1;
                    state.last_update_at = Utc::now();
                }
                Err(DuetError::Frame(err)) if err.is_recoverable() => {
                    warn!(%err, "sync: skipping unreadable patch");
                }
                Err(err) => {
                    error!(%err, "sync: state feed lost");
                    break;
                }
            }
            let scheduled = state.next_wake + interval;
            let now = Instant::now();
            state.next_wake = if scheduled <= now {
                warn!(
                    overrun = ?now.duration_since(scheduled),
                    "sync: update overran the poll interval"
                );
                now
            } else {
                scheduled
            };
            state.next_wake
        };

        tokio::select! {
            _ = stop.changed() => break,
            _ = sleep_until(wake) => {}
        }
    }
    feed.close().await;
    handle.state.write().await.running = false;
    debug!("sync: update loop finished");
}

impl ModelHandle {
    /// Consistent copy of the model as of the last applied patch.
    pub async fn snapshot(&self) -> MachineModel {
        self.state.read().await.model.clone()
    }

    pub async fn update_counter(&self) -> u64 {
        self.state.read().await.update_counter
    }

    /// When the loop is next scheduled to pull a patch. May lie in the past
    /// while a receive is in flight.
    pub async fn next_wake_time(&self) -> Instant {
        self.state.read().await.next_wake
    }

    pub async fn last_update_at(&self) -> DateTime<Utc> {
        self.state.read().await.last_update_at
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
