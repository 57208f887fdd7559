//! Hosting surface: the one object a frontend or CLI talks to.

use super::board::SessionBoard;
use super::bootstrap::{ReadyCallback, ReadyChannels, Resume, SessionBootstrapper};
use super::mirror::{DepositSide, PhaseMirror};
use super::orchestrator::TransferOrchestrator;
use super::poller::{DepositHandler, DepositPoller};
use super::reconciler::BalanceReconciler;
use crate::config::TransferConfig;
use crate::domain::balance::{Amount, Balance};
use crate::domain::channel::{Address, AssetId, ChannelSnapshot};
use crate::domain::ports::{SharedChainReader, SharedEngine};
use crate::domain::session::{Phase, SessionId, SessionStatus};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How `open` left things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// A transfer of funds found in the deposit channel is running.
    Resumed { amount: Amount },
    /// A withdrawal of funds found in the withdraw channel is running.
    WithdrawalResumed { amount: Amount },
    /// Waiting for the user to fund `deposit_address` on-chain.
    AwaitingDeposit { deposit_address: Address },
}

pub struct TransferController {
    engine: SharedEngine,
    config: Arc<TransferConfig>,
    board: Arc<SessionBoard>,
    orchestrator: Arc<TransferOrchestrator>,
    bootstrapper: SessionBootstrapper,
    poller: Arc<DepositPoller>,
    mirror: Mutex<Option<PhaseMirror>>,
    on_ready: Mutex<Option<ReadyCallback>>,
    /// Bumped by `close`; deposit watches from an older epoch do not restart.
    epoch: Arc<AtomicU64>,
}

impl TransferController {
    pub fn new(engine: SharedEngine, chain: SharedChainReader, config: TransferConfig) -> Self {
        let config = Arc::new(config);
        let board = Arc::new(SessionBoard::new());
        let orchestrator = Arc::new(TransferOrchestrator::new(
            Arc::clone(&engine),
            Arc::clone(&config),
            Arc::clone(&board),
        ));
        Self {
            bootstrapper: SessionBootstrapper::new(Arc::clone(&engine), Arc::clone(&config)),
            poller: Arc::new(DepositPoller::new(BalanceReconciler::new(chain))),
            engine,
            config,
            board,
            orchestrator,
            mirror: Mutex::new(None),
            on_ready: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Called with both channel addresses as soon as they are known.
    pub fn on_ready(&self, callback: impl Fn(&ReadyChannels) + Send + Sync + 'static) {
        *self.on_ready.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Connects, resumes whatever the balances say is pending, or starts
    /// watching for a deposit. Failures are also published as status.
    pub async fn open(&self) -> Result<Activation> {
        let on_ready = self
            .on_ready
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let bootstrapped = match self.bootstrapper.bootstrap(on_ready.as_ref()).await {
            Ok(bootstrapped) => bootstrapped,
            Err(err) => {
                error!(error = %err, "Bootstrap failed");
                self.board.fail_idle(&err);
                return Err(err);
            }
        };

        self.start_mirror(&bootstrapped.channels.deposit);

        match bootstrapped.resume {
            Resume::Transfer {
                amount,
                deposit_channel,
            } => {
                spawn_transfer(Arc::clone(&self.orchestrator), amount, deposit_channel);
                Ok(Activation::Resumed { amount })
            }
            Resume::WithdrawOnly {
                amount,
                withdraw_channel,
            } => {
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::spawn(async move {
                    if let Err(err) = orchestrator.resume_withdrawal(amount, withdraw_channel).await
                    {
                        error!(error = %err, "Could not resume withdrawal");
                    }
                });
                Ok(Activation::WithdrawalResumed { amount })
            }
            Resume::AwaitDeposit { deposit_channel } => {
                let deposit_address = deposit_channel.channel_address.clone();
                self.board.set_deposit_address(deposit_address.clone());
                let watch = Arc::new(DepositWatch {
                    orchestrator: Arc::clone(&self.orchestrator),
                    poller: Arc::downgrade(&self.poller),
                    deposit_channel,
                    asset_id: self.config.deposit.asset_id.clone(),
                    interval: self.config.timeouts.poll_interval(),
                    epoch: Arc::clone(&self.epoch),
                    opened_in: self.epoch.load(Ordering::SeqCst),
                });
                watch
                    .start(&self.poller)
                    .await
                    .inspect_err(|err| self.board.fail_idle(err))?;
                Ok(Activation::AwaitingDeposit { deposit_address })
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.board.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.board.subscribe()
    }

    /// Phase the engine notifications suggest for `session_id`.
    pub fn mirrored_phase(&self, session_id: &SessionId) -> Option<Phase> {
        self.mirror
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|m| m.phase(session_id))
    }

    pub fn is_watching(&self) -> bool {
        self.poller.is_watching()
    }

    /// Resolves once the published status reaches COMPLETE or ERROR.
    pub async fn wait_for_terminal(&self, timeout: Option<Duration>) -> Result<SessionStatus> {
        let mut status = self.board.subscribe();
        let terminal = async {
            status
                .wait_for(SessionStatus::is_terminal)
                .await
                .map(|s| s.clone())
                .map_err(|_| TransferError::EventStreamClosed)
        };
        match timeout {
            None => terminal.await,
            Some(limit) => tokio::time::timeout(limit, terminal)
                .await
                .map_err(|_| TransferError::EventTimeout(limit))?,
        }
    }

    /// Stops watching and forgets the current session. An in-flight run
    /// keeps going but nothing it reports is published.
    pub fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.poller.stop_watching();
        if let Some(mirror) = self.mirror.lock().unwrap_or_else(|e| e.into_inner()).take() {
            mirror.stop();
        }
        self.board.reset();
        info!("Transfer controller closed");
    }

    fn start_mirror(&self, deposit_channel: &Address) {
        let mirror = PhaseMirror::spawn(
            &self.engine,
            DepositSide {
                chain_id: self.config.deposit.chain_id,
                channel_address: deposit_channel.clone(),
            },
        );
        let previous = self
            .mirror
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(mirror);
        if let Some(previous) = previous {
            previous.stop();
        }
    }
}

fn spawn_transfer(
    orchestrator: Arc<TransferOrchestrator>,
    amount: Amount,
    deposit_channel: ChannelSnapshot,
) {
    tokio::spawn(async move {
        if let Err(err) = orchestrator.transfer(amount, deposit_channel).await {
            error!(error = %err, "Could not start transfer");
        }
    });
}

/// Turns each poller trigger into a transfer run and watches again once the
/// run completes, so a later deposit starts a new session.
#[derive(Clone)]
struct DepositWatch {
    orchestrator: Arc<TransferOrchestrator>,
    poller: Weak<DepositPoller>,
    deposit_channel: ChannelSnapshot,
    asset_id: AssetId,
    interval: Duration,
    epoch: Arc<AtomicU64>,
    opened_in: u64,
}

impl DepositWatch {
    async fn start(self: &Arc<Self>, poller: &DepositPoller) -> Result<Balance> {
        poller
            .start_watching(
                self.deposit_channel.channel_address.clone(),
                self.asset_id.clone(),
                self.interval,
                Arc::clone(self) as Arc<dyn DepositHandler>,
            )
            .await
    }

    fn is_open(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.opened_in
    }

    async fn run(self: Arc<Self>, amount: Amount) {
        let session = match self
            .orchestrator
            .transfer(amount, self.deposit_channel.clone())
            .await
        {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "Could not start transfer");
                return;
            }
        };
        if session.phase() != Phase::Complete || !self.is_open() {
            return;
        }
        // On-chain totals only grow, so the fresh baseline covers every
        // deposit already moved.
        let Some(poller) = self.poller.upgrade() else {
            return;
        };
        match self.start(&poller).await {
            Ok(baseline) => {
                debug!(session_id = %session.id(), baseline = %baseline, "Watching for the next deposit");
            }
            Err(err) => warn!(error = %err, "Could not resume deposit watch"),
        }
    }
}

#[async_trait]
impl DepositHandler for DepositWatch {
    async fn on_deposit(&self, deposit_address: Address, amount: Amount) {
        let Some(poller) = self.poller.upgrade() else {
            return;
        };
        poller.stop_watching();
        if !self.is_open() {
            return;
        }
        info!(deposit_address = %deposit_address, amount = %amount, "Deposit detected, starting transfer");
        tokio::spawn(Arc::new(self.clone()).run(amount));
    }
}
