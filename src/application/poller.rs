//! Background watcher for on-chain deposits to the deposit channel address.

use super::reconciler::BalanceReconciler;
use crate::domain::balance::{Amount, Balance};
use crate::domain::channel::{Address, AssetId};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Receives the single trigger produced by a watch.
#[async_trait]
pub trait DepositHandler: Send + Sync {
    async fn on_deposit(&self, deposit_address: Address, amount: Amount);
}

struct ActiveWatch {
    generation: u64,
    stop: watch::Sender<bool>,
    /// `None` while the baseline is still being read.
    handle: Option<JoinHandle<()>>,
}

/// Polls total deposits at an address and fires once when they increase.
pub struct DepositPoller {
    reconciler: BalanceReconciler,
    active: Mutex<Option<ActiveWatch>>,
    generation: AtomicU64,
}

impl DepositPoller {
    pub fn new(reconciler: BalanceReconciler) -> Self {
        Self {
            reconciler,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Reads the baseline, then polls every `interval` until the deposits
    /// exceed it. The delta is handed to `handler` exactly once and the watch
    /// ends. Any previous watch is stopped first.
    ///
    /// Fails only when the baseline cannot be read; errors on later ticks are
    /// logged and the loop keeps going.
    pub async fn start_watching(
        &self,
        address: Address,
        asset_id: AssetId,
        interval: Duration,
        handler: Arc<dyn DepositHandler>,
    ) -> Result<Balance> {
        self.stop_watching();

        // Registered before the baseline read so a stop issued meanwhile
        // cancels this watch too.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.lock() = Some(ActiveWatch {
            generation,
            stop: stop_tx,
            handle: None,
        });

        let baseline = match self.reconciler.onchain_deposits(&address, &asset_id).await {
            Ok(baseline) => baseline,
            Err(e) => {
                self.release(generation);
                return Err(TransferError::engine("get_onchain_deposits", e));
            }
        };

        let mut active = self.lock();
        let Some(watch) = active.as_mut().filter(|w| w.generation == generation) else {
            debug!(address = %address, "Watch stopped before the baseline was read");
            return Ok(baseline);
        };
        info!(
            address = %address,
            asset_id = %asset_id,
            baseline = %baseline,
            interval_ms = interval.as_millis() as u64,
            "Watching for deposits"
        );

        let reconciler = self.reconciler.clone();
        watch.handle = Some(tokio::spawn(async move {
            let detected =
                poll_until_increase(&reconciler, &address, &asset_id, baseline, interval, stop_rx)
                    .await;
            if let Some(amount) = detected {
                handler.on_deposit(address, amount).await;
            }
        }));
        Ok(baseline)
    }

    /// Cancels the current watch. Safe to call when nothing is running.
    pub fn stop_watching(&self) {
        let previous = self.lock().take();
        if let Some(watch) = previous {
            // The receiver is gone once the loop has already returned.
            let _ = watch.stop.send(true);
            debug!("Stopped deposit watch");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|w| w.handle.as_ref().is_none_or(|h| !h.is_finished()))
    }

    /// Drops the registered watch if it is still the one from `generation`.
    fn release(&self, generation: u64) {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|w| w.generation == generation) {
            *active = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveWatch>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DepositPoller {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

async fn poll_until_increase(
    reconciler: &BalanceReconciler,
    address: &Address,
    asset_id: &AssetId,
    baseline: Balance,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> Option<Amount> {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return None;
                }
                continue;
            }
        }

        let current = match reconciler.onchain_deposits(address, asset_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(address = %address, error = %e, "Error fetching deposit balance");
                continue;
            }
        };
        if *stop.borrow() {
            return None;
        }
        debug!(address = %address, balance = %current, "Polled deposit balance");

        if let Some(delta) = current.increase_over(baseline) {
            info!(
                address = %address,
                baseline = %baseline,
                balance = %current,
                amount = %delta,
                "Deposit detected"
            );
            return Some(delta);
        }
    }
}
