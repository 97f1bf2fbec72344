/// Periodic incremental upload driven by the `syncEnabled` and
/// `syncFrequency` settings.
///
/// The schedule re-arms itself when either setting changes in the key/value
/// store and stops for good on authentication or configuration failures.

use histsync_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::kv::{KeyValueStore, KvChange};
use crate::settings::{SyncSettings, SYNC_ENABLED_KEY, SYNC_FREQUENCY_KEY};

/// What a single scheduled tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// `syncEnabled` is off
    Disabled,
    /// Another operation holds the target
    Busy,
    /// Incremental upload ran; number of records uploaded
    Uploaded(usize),
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    kv: Arc<dyn KeyValueStore>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            engine,
            kv,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Start the periodic loop. A no-op while already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        // Subscribe before loading so no change slips between the two.
        let changes = self.kv.subscribe();
        let settings = SyncSettings::load(self.kv.as_ref()).await?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let task = ScheduleTask {
            engine: self.engine.clone(),
            kv: self.kv.clone(),
            settings,
            changes: Some(changes),
        };
        self.handle = Some(tokio::spawn(task.run(shutdown_rx)));
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| Error::Internal(format!("scheduler task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Runs one tick with the current settings, outside the loop.
    pub async fn tick_once(&self) -> Result<TickOutcome> {
        let settings = SyncSettings::load(self.kv.as_ref()).await?;
        run_tick(&self.engine, &settings).await
    }
}

struct ScheduleTask {
    engine: Arc<SyncEngine>,
    kv: Arc<dyn KeyValueStore>,
    settings: SyncSettings,
    changes: Option<broadcast::Receiver<KvChange>>,
}

impl ScheduleTask {
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut period = self.settings.schedule_period();
        let mut interval = new_interval(period);
        info!(
            period_secs = period.as_secs(),
            enabled = self.settings.sync_enabled,
            target = %self.engine.target(),
            "scheduled sync started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match run_tick(&self.engine, &self.settings).await {
                        Ok(TickOutcome::Uploaded(count)) => debug!(count, "scheduled upload done"),
                        Ok(outcome) => debug!(?outcome, "scheduled tick skipped"),
                        Err(e) if e.is_fatal_for_schedule() => {
                            error!(error = %e, code = e.code(), "stopping scheduled sync");
                            break;
                        }
                        Err(e) => warn!(error = %e, "scheduled upload failed"),
                    }
                }
                change = next_change(&mut self.changes) => {
                    match change {
                        Ok(change) if !(change.touches(SYNC_FREQUENCY_KEY) || change.touches(SYNC_ENABLED_KEY)) => {}
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            match SyncSettings::load(self.kv.as_ref()).await {
                                Ok(settings) => {
                                    let new_period = settings.schedule_period();
                                    if new_period != period {
                                        period = new_period;
                                        interval = new_interval(period);
                                    }
                                    info!(
                                        period_secs = period.as_secs(),
                                        enabled = settings.sync_enabled,
                                        "sync schedule re-armed"
                                    );
                                    self.settings = settings;
                                }
                                Err(e) => warn!(error = %e, "failed to reload sync settings"),
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("settings store closed, keeping current schedule");
                            self.changes = None;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduled sync shutting down");
                    break;
                }
            }
        }
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<KvChange>>,
) -> std::result::Result<KvChange, broadcast::error::RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// First tick one full period from now.
fn new_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run_tick(engine: &SyncEngine, settings: &SyncSettings) -> Result<TickOutcome> {
    if !settings.sync_enabled {
        return Ok(TickOutcome::Disabled);
    }
    if engine.is_busy() {
        return Ok(TickOutcome::Busy);
    }
    match engine.run_upload_incremental().await {
        Ok(outcome) => Ok(TickOutcome::Uploaded(outcome.uploaded)),
        Err(Error::SyncInProgress(_)) => Ok(TickOutcome::Busy),
        Err(e) => Err(e),
    }
}
