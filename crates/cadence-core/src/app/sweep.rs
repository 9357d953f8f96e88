//! Sweep - 定期実行ループ
//!
//! 1 tick = reclaim_stale()（死んだワーカーの SENDING を戻す）→ continue_due()（期日の来た実行を進める）
//! → process_due()（送信）。
//! 状態はすべてストアにあるので、tick の途中で止まっても次の tick で続きから動く。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::app::service::CadenceService;
use crate::domain::{CadenceError, ContinueReport, ProcessReport};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub reclaimed: u32,
    pub sequences: ContinueReport,
    pub dispatch: ProcessReport,
}

/// Runs one sweep pass over the service.
#[derive(Clone)]
pub struct Sweeper {
    service: Arc<CadenceService>,
}

impl Sweeper {
    pub fn new(service: Arc<CadenceService>) -> Self {
        Self { service }
    }

    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<SweepReport, CadenceError> {
        let reclaimed = self.service.queue().reclaim_stale().await?;
        let sequences = self.service.engine().continue_due().await?;
        let dispatch = self.service.process_due().await?;
        Ok(SweepReport {
            reclaimed,
            sequences,
            dispatch,
        })
    }
}

/// Sweep group handle.
/// - `request_shutdown()` で全ワーカーが次の tick を取らずに止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct SweepGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl SweepGroup {
    /// Spawn `workers` sweep loops ticking every `interval`.
    pub fn spawn(workers: usize, interval: Duration, sweeper: Sweeper) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..workers)
            .map(|worker_id| {
                let sweeper = sweeper.clone();
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    sweep_loop(worker_id, interval, sweeper, &mut rx).await;
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// In-flight ticks finish; no new tick starts.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "sweep worker panicked");
            }
        }
    }
}

async fn sweep_loop(
    worker_id: usize,
    interval: Duration,
    sweeper: Sweeper,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(worker_id, ?interval, "sweep worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = ticker.tick() => {}
        }

        match sweeper.tick().await {
            Ok(report) => debug!(worker_id, ?report, "sweep tick"),
            Err(e) => error!(worker_id, error = %e, "sweep tick failed"),
        }
    }
    info!(worker_id, "sweep worker stopped");
}
