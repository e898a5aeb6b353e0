//! # Sync Scheduler
//!
//! Background task deciding when a sync cycle runs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scheduler Loop                                   │
//! │                                                                         │
//! │   interval.tick() ───────────► run_cycle(Scheduled)                    │
//! │   (AUTO mode only)                                                     │
//! │                                                                         │
//! │   trigger_rx ─┬─ ConnectivityRegained ─► run_cycle(Immediate)          │
//! │               └─ Manual ───────────────► run_cycle(Immediate)          │
//! │                                                                         │
//! │   shutdown_rx ───────────────► break                                   │
//! │                                                                         │
//! │   Cycles run inline, one at a time. Triggers that pile up while a      │
//! │   cycle runs collapse into a single follow-up cycle.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{DrainMode, SyncOrchestrator};

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Timer,
    ConnectivityRegained,
    Manual,
}

impl SyncTrigger {
    pub fn drain_mode(&self) -> DrainMode {
        match self {
            SyncTrigger::Timer => DrainMode::Scheduled,
            SyncTrigger::ConnectivityRegained | SyncTrigger::Manual => DrainMode::Immediate,
        }
    }
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    tenant_id: String,
    interval: Duration,
    /// When false only explicit triggers start a cycle.
    use_timer: bool,
    trigger_rx: mpsc::Receiver<SyncTrigger>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for poking a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncResult<()> {
        self.trigger_tx
            .send(trigger)
            .await
            .map_err(|_| SyncError::ChannelError("Trigger channel closed".into()))
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        tenant_id: impl Into<String>,
        interval: Duration,
        use_timer: bool,
    ) -> (Self, SchedulerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = SyncScheduler {
            orchestrator,
            tenant_id: tenant_id.into(),
            interval,
            use_timer,
            trigger_rx,
            shutdown_rx,
        };

        (scheduler, SchedulerHandle {
            trigger_tx,
            shutdown_tx,
        })
    }

    /// Runs the scheduler loop. Spawn this as a background task.
    pub async fn run(mut self) {
        info!(
            tenant_id = %self.tenant_id,
            interval_secs = self.interval.as_secs(),
            timer = self.use_timer,
            "Sync scheduler starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick(), if self.use_timer => {
                    self.cycle(SyncTrigger::Timer).await;
                }

                Some(trigger) = self.trigger_rx.recv() => {
                    let trigger = self.coalesce(trigger);
                    self.cycle(trigger).await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync scheduler shutting down");
                    break;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Folds queued triggers into one, keeping the most urgent.
    fn coalesce(&mut self, mut trigger: SyncTrigger) -> SyncTrigger {
        while let Ok(next) = self.trigger_rx.try_recv() {
            if trigger == SyncTrigger::Timer {
                trigger = next;
            }
        }
        trigger
    }

    async fn cycle(&self, trigger: SyncTrigger) {
        debug!(?trigger, "Sync cycle requested");
        if let Err(e) = self
            .orchestrator
            .run_cycle(&self.tenant_id, trigger.drain_mode())
            .await
        {
            error!(?e, ?trigger, "Sync cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::testing::RecordingLedger;

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn orchestrator(ledger: Arc<RecordingLedger>) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(Arc::new(MemoryLocalStore::new()), ledger))
    }

    #[test]
    fn test_trigger_modes() {
        assert_eq!(SyncTrigger::Timer.drain_mode(), DrainMode::Scheduled);
        assert_eq!(SyncTrigger::Manual.drain_mode(), DrainMode::Immediate);
        assert_eq!(
            SyncTrigger::ConnectivityRegained.drain_mode(),
            DrainMode::Immediate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_cycles() {
        let ledger = Arc::new(RecordingLedger::new());
        let orchestrator = orchestrator(ledger.clone());
        orchestrator.set_online(true).await;

        let (scheduler, handle) =
            SyncScheduler::new(orchestrator, "t1", Duration::from_secs(60), true);
        let task = tokio::spawn(scheduler.run());

        // First tick fires immediately
        wait_for(|| ledger.catalog_fetches() >= 1).await;
        assert_eq!(ledger.catalog_fetches(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for(|| ledger.catalog_fetches() >= 2).await;
        assert_eq!(ledger.catalog_fetches(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_mode_only_runs_on_trigger() {
        let ledger = Arc::new(RecordingLedger::new());
        let orchestrator = orchestrator(ledger.clone());
        orchestrator.set_online(true).await;

        let (scheduler, handle) =
            SyncScheduler::new(orchestrator, "t1", Duration::from_secs(60), false);
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(ledger.catalog_fetches(), 0);

        handle.trigger(SyncTrigger::Manual).await.unwrap();
        wait_for(|| ledger.catalog_fetches() >= 1).await;
        assert_eq!(ledger.catalog_fetches(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.trigger(SyncTrigger::Manual).await.is_err());
    }
}
