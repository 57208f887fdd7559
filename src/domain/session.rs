use super::balance::Amount;
use super::channel::{Address, ChannelSnapshot};
use super::transfer::WithdrawalReceipt;
use crate::error::TransferError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Correlation id of one transfer attempt, carried in engine transfer metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mints a fresh random 32-byte id, hex encoded with a `0x` prefix.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret that unlocks a conditional transfer. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct PreImage([u8; 32]);

impl PreImage {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for PreImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreImage(..)")
    }
}

/// Transfer session phases.
///
/// ```text
/// INITIAL → DEPOSITING → TRANSFERRING → WITHDRAWING → COMPLETE
///    ↓           ↓             ↓              ↓
///  ERROR       ERROR         ERROR          ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initial,
    Depositing,
    Transferring,
    Withdrawing,
    Complete,
    Error,
}

impl Phase {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            Phase::Initial => 0,
            Phase::Depositing => 1,
            Phase::Transferring => 2,
            Phase::Withdrawing => 3,
            Phase::Complete => 4,
            Phase::Error => 5,
        }
    }

    /// Forward-only: any later phase, or `Error` from a non-terminal phase.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Phase::Error || next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "INITIAL",
            Phase::Depositing => "DEPOSITING",
            Phase::Transferring => "TRANSFERRING",
            Phase::Withdrawing => "WITHDRAWING",
            Phase::Complete => "COMPLETE",
            Phase::Error => "ERROR",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user can do about a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Nothing left the deposit side; restarting is free.
    FundsPreserved,
    /// Funds sit in the withdraw-side channel; only the withdrawal needs retrying.
    RetryWithdrawal,
    /// State cannot be resumed automatically.
    ManualRecovery,
    Unknown,
}

impl Recovery {
    pub fn funds_safe(&self) -> bool {
        matches!(self, Recovery::FundsPreserved | Recovery::RetryWithdrawal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub message: String,
    pub recovery: Recovery,
    /// Phase the session was in when it failed.
    pub failed_in: Phase,
}

impl SessionError {
    pub fn new(failed_in: Phase, err: &TransferError) -> Self {
        let recovery = match err {
            TransferError::CancelledByCounterparty { .. }
            | TransferError::UnsupportedRoute { .. }
            | TransferError::Connection(_)
            | TransferError::StorageUnavailable(_) => Recovery::FundsPreserved,
            TransferError::AmbiguousState { .. } => Recovery::ManualRecovery,
            _ if failed_in == Phase::Withdrawing => Recovery::RetryWithdrawal,
            _ => Recovery::Unknown,
        };
        Self {
            message: err.to_string(),
            recovery,
            failed_in,
        }
    }
}

/// One attempt to move `amount` end to end.
#[derive(Debug, Clone)]
pub struct TransferSession {
    id: SessionId,
    phase: Phase,
    amount: Amount,
    phase_entered_at: Instant,
    pub deposit_channel: Option<ChannelSnapshot>,
    pub withdraw_channel: Option<ChannelSnapshot>,
    pre_image: Option<PreImage>,
    error: Option<SessionError>,
    withdrawal: Option<WithdrawalReceipt>,
}

impl TransferSession {
    pub fn new(amount: Amount) -> Self {
        Self {
            id: SessionId::random(),
            phase: Phase::Initial,
            amount,
            phase_entered_at: Instant::now(),
            deposit_channel: None,
            withdraw_channel: None,
            pre_image: None,
            error: None,
            withdrawal: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn withdrawal(&self) -> Option<&WithdrawalReceipt> {
        self.withdrawal.as_ref()
    }

    /// Moves to `next` and re-arms the stall deadline. Returns false, leaving
    /// the session untouched, when the transition would go backwards.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                session_id = %self.id,
                from = %self.phase,
                to = %next,
                "Ignoring invalid phase transition"
            );
            return false;
        }
        self.phase = next;
        self.phase_entered_at = Instant::now();
        true
    }

    pub fn fail(&mut self, err: &TransferError) {
        let failed_in = self.phase;
        if self.advance(Phase::Error) {
            self.error = Some(SessionError::new(failed_in, err));
        }
    }

    /// Instant after which the current phase counts as stalled.
    pub fn stall_deadline(&self, stall: Duration) -> Instant {
        self.phase_entered_at + stall
    }

    /// Restarts the stall window without changing phase.
    pub fn rearm(&mut self) {
        self.phase_entered_at = Instant::now();
    }

    pub fn set_pre_image(&mut self, pre_image: PreImage) {
        self.pre_image = Some(pre_image);
    }

    /// Hands out the preimage; a second call returns `None`.
    pub fn take_pre_image(&mut self) -> Option<PreImage> {
        self.pre_image.take()
    }

    pub fn record_withdrawal(&mut self, receipt: WithdrawalReceipt) {
        self.withdrawal = Some(receipt);
    }

    pub fn status(&self, deposit_address: Option<Address>) -> SessionStatus {
        SessionStatus {
            session_id: Some(self.id.clone()),
            phase: self.phase,
            amount: Some(self.amount),
            error: self.error.clone(),
            deposit_address,
            withdrawal: self.withdrawal.clone(),
        }
    }
}

/// Read-only view published to the hosting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub amount: Option<Amount>,
    pub error: Option<SessionError>,
    pub deposit_address: Option<Address>,
    pub withdrawal: Option<WithdrawalReceipt>,
}

impl SessionStatus {
    pub fn idle(deposit_address: Option<Address>) -> Self {
        Self {
            session_id: None,
            phase: Phase::Initial,
            amount: None,
            error: None,
            deposit_address,
            withdrawal: None,
        }
    }

    pub fn failed(deposit_address: Option<Address>, err: &TransferError) -> Self {
        Self {
            error: Some(SessionError::new(Phase::Initial, err)),
            phase: Phase::Error,
            ..Self::idle(deposit_address)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
