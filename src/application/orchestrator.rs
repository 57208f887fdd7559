//! Transfer Orchestrator
//!
//! Drives one session through the cross-chain protocol:
//!
//! ```text
//! INITIAL → DEPOSITING → TRANSFERRING → WITHDRAWING → COMPLETE
//!    ↓           ↓             ↓              ↓
//!  ERROR       ERROR         ERROR          ERROR
//! ```
//!
//! # Invariants
//!
//! 1. **Call-then-advance**: a phase is entered only after the engine call of
//!    the previous phase returned and its confirming event (if any) was seen.
//! 2. **Attach-then-call**: event filters are attached before the call that
//!    can trigger the event.
//! 3. **Stall timer**: every fatal step of a phase must finish before
//!    `phase entry + stall`; the deadline re-arms on each phase change.
//! 4. **No retries**: any failure ends the session in ERROR. Recovery is a
//!    fresh bootstrap, which re-derives the resume point from balances.

use super::board::SessionBoard;
use super::events::EventFilter;
use crate::config::TransferConfig;
use crate::domain::balance::Amount;
use crate::domain::channel::{ChainId, ChannelSnapshot, PublicIdentifier};
use crate::domain::ports::SharedEngine;
use crate::domain::session::{Phase, SessionId, TransferSession};
use crate::domain::transfer::{
    ConditionalTransferRequest, EngineEvent, TransferResolver, WithdrawRequest,
};
use crate::error::{EngineError, Result, TransferError, WaitError};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a drive loop stopped early.
enum Halt {
    Failed(TransferError),
    /// The session stopped being current (board reset); results are dropped.
    Abandoned,
}

impl From<TransferError> for Halt {
    fn from(err: TransferError) -> Self {
        Halt::Failed(err)
    }
}

impl From<WaitError> for Halt {
    fn from(err: WaitError) -> Self {
        Halt::Failed(err.into())
    }
}

type Step<T = ()> = std::result::Result<T, Halt>;

/// The filters one transfer session waits on, keyed by its id.
struct SessionFilters {
    /// Router's hash-locked transfer to us on the withdraw chain.
    router_offer: EventFilter<EngineEvent>,
    /// That transfer resolved in our favour.
    receiver_resolved: EventFilter<EngineEvent>,
    /// Router cancelled our sender-side transfer.
    sender_cancelled: EventFilter<EngineEvent>,
    /// Router resolved our sender-side transfer, either way.
    sender_reclaimed: EventFilter<EngineEvent>,
}

impl SessionFilters {
    fn attach(
        engine: &SharedEngine,
        session_id: &SessionId,
        router: &PublicIdentifier,
        deposit_chain: ChainId,
        withdraw_chain: ChainId,
    ) -> Self {
        let events = engine.events();
        let for_session = |id: SessionId| move |e: &EngineEvent| e.is_session(&id);

        let offer_router = router.clone();
        let router_offer = events
            .filter(for_session(session_id.clone()))
            .and(move |e| {
                e.created().is_some_and(|t| {
                    t.initiator == offer_router && t.chain_id == withdraw_chain
                })
            });

        let receiver_router = router.clone();
        let receiver_resolved = events
            .filter(for_session(session_id.clone()))
            .and(move |e| {
                e.resolved().is_some_and(|t| {
                    t.initiator == receiver_router
                        && t.chain_id == withdraw_chain
                        && !t.is_cancelled()
                })
            });

        let cancel_router = router.clone();
        let sender_cancelled = events
            .filter(for_session(session_id.clone()))
            .and(move |e| {
                e.resolved().is_some_and(|t| {
                    t.responder == cancel_router && t.chain_id == deposit_chain && t.is_cancelled()
                })
            });

        let reclaim_router = router.clone();
        let sender_reclaimed = events
            .filter(for_session(session_id.clone()))
            .and(move |e| {
                e.resolved()
                    .is_some_and(|t| t.responder == reclaim_router && t.chain_id == deposit_chain)
            });

        Self {
            router_offer,
            receiver_resolved,
            sender_cancelled,
            sender_reclaimed,
        }
    }
}

/// Owns and mutates transfer sessions; the only writer of session state.
pub struct TransferOrchestrator {
    engine: SharedEngine,
    config: Arc<TransferConfig>,
    board: Arc<SessionBoard>,
}

impl TransferOrchestrator {
    pub fn new(engine: SharedEngine, config: Arc<TransferConfig>, board: Arc<SessionBoard>) -> Self {
        Self {
            engine,
            config,
            board,
        }
    }

    /// Moves `amount` from the deposit channel to the withdrawal address.
    ///
    /// Returns the session in its final phase. Fails without starting when
    /// another session for the same deposit address is still running.
    pub async fn transfer(
        &self,
        amount: Amount,
        deposit_channel: ChannelSnapshot,
    ) -> Result<TransferSession> {
        let mut session = TransferSession::new(amount);
        session.deposit_channel = Some(deposit_channel);
        self.board.begin(&session)?;
        info!(session_id = %session.id(), amount = %amount, "Starting transfer");

        let outcome = self.drive_transfer(&mut session).await;
        Ok(self.finish(session, outcome))
    }

    /// Withdraws `amount` already sitting in the withdraw channel, skipping
    /// the deposit and transfer legs.
    pub async fn resume_withdrawal(
        &self,
        amount: Amount,
        withdraw_channel: ChannelSnapshot,
    ) -> Result<TransferSession> {
        let mut session = TransferSession::new(amount);
        session.withdraw_channel = Some(withdraw_channel);
        self.board.begin(&session)?;
        info!(session_id = %session.id(), amount = %amount, "Resuming withdrawal");

        let outcome = match self.enter(&mut session, Phase::Withdrawing) {
            Ok(()) => self.withdraw(&mut session).await,
            Err(halt) => Err(halt),
        };
        Ok(self.finish(session, outcome))
    }

    async fn drive_transfer(&self, session: &mut TransferSession) -> Step {
        let id = session.id().clone();
        let router = self.config.router_identifier.clone();
        let deposit = &self.config.deposit;
        let withdraw = &self.config.withdraw;
        let (deposit_chain, withdraw_chain) = (deposit.chain_id, withdraw.chain_id);
        let stall = self.config.timeouts.stall();

        let mut filters =
            SessionFilters::attach(&self.engine, &id, &router, deposit_chain, withdraw_chain);

        // INITIAL: credit the on-chain deposit, then re-read the channel.
        let deadline = session.stall_deadline(stall);
        let channel_address = match &session.deposit_channel {
            Some(channel) => channel.channel_address.clone(),
            None => {
                let engine = Arc::clone(&self.engine);
                let router = router.clone();
                self.call(&id, deadline, "get_channel", async move {
                    engine.get_channel(&router, deposit_chain).await
                })
                .await?
                .channel_address
            }
        };
        {
            let engine = Arc::clone(&self.engine);
            let asset = deposit.asset_id.clone();
            self.call(&id, deadline, "reconcile_deposit", async move {
                engine.reconcile_deposit(&channel_address, &asset).await
            })
            .await?;
        }
        let deposit_channel = {
            let engine = Arc::clone(&self.engine);
            let router = router.clone();
            self.call(&id, deadline, "get_channel", async move {
                engine.get_channel(&router, deposit_chain).await
            })
            .await?
        };
        session.deposit_channel = Some(deposit_channel.clone());
        self.enter(session, Phase::Depositing)?;

        // DEPOSITING: hash-locked transfer to the router.
        let deadline = session.stall_deadline(stall);
        let request = ConditionalTransferRequest {
            channel_address: deposit_channel.channel_address.clone(),
            from_asset_id: deposit.asset_id.clone(),
            amount: session.amount(),
            to_chain_id: withdraw_chain,
            to_asset_id: withdraw.asset_id.clone(),
            session_id: id.clone(),
        };
        let created = {
            let engine = Arc::clone(&self.engine);
            self.call(&id, deadline, "create_conditional_transfer", async move {
                engine.create_conditional_transfer(request).await
            })
            .await?
        };
        info!(session_id = %id, transfer_id = %created.transfer_id, "Conditional transfer created");
        session.set_pre_image(created.pre_image);
        self.enter(session, Phase::Transferring)?;

        // TRANSFERRING: unlock the router's offer unless it cancels first.
        let deadline = session.stall_deadline(stall);
        let Some(pre_image) = session.take_pre_image() else {
            return Err(TransferError::engine(
                "resolve_conditional_transfer",
                EngineError::Rejected("preimage already consumed".into()),
            )
            .into());
        };
        let SessionFilters {
            router_offer,
            receiver_resolved,
            sender_cancelled,
            sender_reclaimed,
        } = &mut filters;

        let forward = async {
            let offer = router_offer
                .wait_for(None)
                .await?
                .created()
                .cloned()
                .ok_or(TransferError::EventStreamClosed)?;
            debug!(session_id = %id, transfer_id = %offer.transfer_id, "Router offered transfer");
            let engine = Arc::clone(&self.engine);
            self.call(&id, deadline, "resolve_conditional_transfer", async move {
                engine
                    .resolve_conditional_transfer(
                        &offer.channel_address,
                        &offer.transfer_id,
                        TransferResolver::PreImage(pre_image),
                    )
                    .await
            })
            .await?;
            receiver_resolved.wait_for(None).await?;
            Ok::<(), Halt>(())
        };
        let cancelled = async {
            sender_cancelled.wait_for(None).await?;
            Err::<(), Halt>(
                TransferError::CancelledByCounterparty {
                    session_id: id.clone(),
                }
                .into(),
            )
        };
        let race = async {
            tokio::select! {
                forwarded = forward => forwarded,
                cancelled = cancelled => cancelled,
            }
        };
        self.guarded(&id, deadline, race).await?;
        info!(session_id = %id, "Receiver side resolved");

        // Advisory: the router reclaiming its sender-side funds is not needed
        // for our withdrawal, so a missing event only gets logged.
        match sender_reclaimed
            .wait_for(Some(self.config.timeouts.reclaim()))
            .await
        {
            Ok(event) if event.resolved().is_some_and(|t| t.is_cancelled()) => {
                warn!(session_id = %id, "Router cancelled sender-side transfer after receiver resolved");
            }
            Ok(_) => debug!(session_id = %id, "Router reclaimed sender-side transfer"),
            Err(e) => warn!(
                session_id = %id,
                error = %e,
                "Did not find reclaim event from router, proceeding with withdrawal"
            ),
        }
        session.rearm();

        let deadline = session.stall_deadline(stall);
        let withdraw_channel = {
            let engine = Arc::clone(&self.engine);
            let router = router.clone();
            self.call(&id, deadline, "get_channel", async move {
                engine.get_channel(&router, withdraw_chain).await
            })
            .await?
        };
        session.withdraw_channel = Some(withdraw_channel);
        self.enter(session, Phase::Withdrawing)?;

        self.withdraw(session).await
    }

    /// WITHDRAWING → COMPLETE.
    async fn withdraw(&self, session: &mut TransferSession) -> Step {
        let id = session.id().clone();
        let deadline = session.stall_deadline(self.config.timeouts.stall());
        let Some(channel) = &session.withdraw_channel else {
            return Err(TransferError::engine(
                "withdraw",
                EngineError::NotFound("withdraw channel".into()),
            )
            .into());
        };
        let request = WithdrawRequest {
            channel_address: channel.channel_address.clone(),
            asset_id: self.config.withdraw.asset_id.clone(),
            recipient: self.config.withdrawal_address.clone(),
            session_id: Some(id.clone()),
        };

        let engine = Arc::clone(&self.engine);
        let receipt = self
            .call(&id, deadline, "withdraw", async move {
                engine.withdraw(request).await
            })
            .await?;
        info!(
            session_id = %id,
            tx_hash = %receipt.transaction_hash,
            amount = %receipt.amount,
            "Withdrawal submitted"
        );
        session.record_withdrawal(receipt);
        self.enter(session, Phase::Complete)
    }

    fn enter(&self, session: &mut TransferSession, phase: Phase) -> Step {
        if !self.board.is_current(session.id()) {
            return Err(Halt::Abandoned);
        }
        if session.advance(phase) {
            info!(session_id = %session.id(), phase = %phase, "Phase advanced");
            self.board.publish(session);
        }
        Ok(())
    }

    fn finish(&self, mut session: TransferSession, outcome: Step) -> TransferSession {
        match outcome {
            Ok(()) => {}
            Err(Halt::Abandoned) => {
                info!(session_id = %session.id(), phase = %session.phase(), "Session reset, result discarded");
            }
            Err(Halt::Failed(err)) => {
                error!(
                    session_id = %session.id(),
                    phase = %session.phase(),
                    error = %err,
                    "Transfer failed"
                );
                session.fail(&err);
                self.board.publish(&session);
            }
        }
        session
    }

    /// Runs an engine call on its own task under the phase deadline.
    ///
    /// A call that outlives the deadline keeps running detached; whatever it
    /// returns is dropped. Results for a session that is no longer current
    /// are discarded too.
    async fn call<T, F>(
        &self,
        session_id: &SessionId,
        deadline: Instant,
        operation: &'static str,
        call: F,
    ) -> Step<T>
    where
        F: Future<Output = std::result::Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(call);
        let joined = tokio::time::timeout_at(deadline, handle)
            .await
            .map_err(|_| self.stalled(session_id))?;
        let result = joined.map_err(|e| {
            TransferError::engine(operation, EngineError::Transport(e.to_string()))
        })?;
        if !self.board.is_current(session_id) {
            return Err(Halt::Abandoned);
        }
        result.map_err(|e| TransferError::engine(operation, e).into())
    }

    async fn guarded<T>(
        &self,
        session_id: &SessionId,
        deadline: Instant,
        step: impl Future<Output = Step<T>>,
    ) -> Step<T> {
        match tokio::time::timeout_at(deadline, step).await {
            Ok(result) => result,
            Err(_) => Err(self.stalled(session_id)),
        }
    }

    fn stalled(&self, session_id: &SessionId) -> Halt {
        Halt::Failed(TransferError::Timeout {
            session_id: session_id.clone(),
            after: self.config.timeouts.stall(),
        })
    }
}
