use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use labstock_inventory::Component;

use crate::ledger_engine::{LedgerEngine, LedgerError};
use crate::store::LedgerStore;

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

/// Periodically reports components at or below their reorder threshold.
///
/// Read-only: it never moves stock, so a sweep cannot contend with
/// transactions for component locks.
#[derive(Debug)]
pub struct LowStockWatcher;

impl LowStockWatcher {
    /// Spawn a task that sweeps every `every`, starting immediately.
    pub fn spawn<S>(engine: Arc<LedgerEngine<S>>, every: Duration) -> WorkerHandle
    where
        S: LedgerStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = Self::sweep(&engine).await {
                            warn!(worker = "low_stock", error = %err, "low-stock sweep failed");
                        }
                    }
                }
            }
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// Run one sweep and log every low component.
    pub async fn sweep<S>(engine: &LedgerEngine<S>) -> Result<Vec<Component>, LedgerError>
    where
        S: LedgerStore,
    {
        let low = engine.low_stock().await?;
        for c in &low {
            warn!(
                component_id = %c.id,
                name = %c.name,
                quantity = c.quantity,
                reorder_threshold = c.reorder_threshold,
                "component at or below reorder threshold"
            );
        }
        info!(worker = "low_stock", count = low.len(), "low-stock sweep finished");
        Ok(low)
    }
}
