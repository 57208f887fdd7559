//! Conditional transfers and the events the channel engine emits about them.

use super::balance::{Amount, Balance};
use super::channel::{Address, AssetId, ChainId, PublicIdentifier, TransferId};
use super::session::{PreImage, SessionId};
use serde::Serialize;

/// Metadata attached to every engine operation a session performs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferMeta {
    pub session_id: Option<SessionId>,
}

impl TransferMeta {
    pub fn for_session(session_id: &SessionId) -> Self {
        Self {
            session_id: Some(session_id.clone()),
        }
    }

    pub fn is_session(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }
}

/// How a conditional transfer was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResolver {
    /// Unlocked with the secret; value moves to the responder.
    PreImage(PreImage),
    /// Zero resolver; value returns to the initiator.
    Cancel,
}

impl TransferResolver {
    pub fn is_cancel(&self) -> bool {
        match self {
            TransferResolver::Cancel => true,
            TransferResolver::PreImage(p) => p.is_zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub channel_address: Address,
    pub chain_id: ChainId,
    pub asset_id: AssetId,
    pub amount: Balance,
    pub initiator: PublicIdentifier,
    pub responder: PublicIdentifier,
    pub meta: TransferMeta,
    pub resolver: Option<TransferResolver>,
}

impl TransferRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.resolver.as_ref().is_some_and(TransferResolver::is_cancel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    DepositReconciled {
        channel_address: Address,
        asset_id: AssetId,
        /// User-side off-chain balance after the reconcile.
        balance: Balance,
        meta: TransferMeta,
    },
    ConditionalTransferCreated {
        transfer: TransferRecord,
    },
    ConditionalTransferResolved {
        transfer: TransferRecord,
    },
    WithdrawalReconciled {
        channel_address: Address,
        transfer_id: TransferId,
        transaction_hash: String,
        meta: TransferMeta,
    },
}

impl EngineEvent {
    pub fn meta(&self) -> &TransferMeta {
        match self {
            EngineEvent::DepositReconciled { meta, .. }
            | EngineEvent::WithdrawalReconciled { meta, .. } => meta,
            EngineEvent::ConditionalTransferCreated { transfer }
            | EngineEvent::ConditionalTransferResolved { transfer } => &transfer.meta,
        }
    }

    pub fn is_session(&self, session_id: &SessionId) -> bool {
        self.meta().is_session(session_id)
    }

    pub fn created(&self) -> Option<&TransferRecord> {
        match self {
            EngineEvent::ConditionalTransferCreated { transfer } => Some(transfer),
            _ => None,
        }
    }

    pub fn resolved(&self) -> Option<&TransferRecord> {
        match self {
            EngineEvent::ConditionalTransferResolved { transfer } => Some(transfer),
            _ => None,
        }
    }
}

/// Parameters of the hash-locked transfer from the user to the router.
#[derive(Debug, Clone)]
pub struct ConditionalTransferRequest {
    pub channel_address: Address,
    pub from_asset_id: AssetId,
    pub amount: Amount,
    pub to_chain_id: ChainId,
    pub to_asset_id: AssetId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone)]
pub struct CreatedTransfer {
    pub transfer_id: TransferId,
    pub pre_image: PreImage,
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub channel_address: Address,
    pub asset_id: AssetId,
    pub recipient: Address,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    pub transaction_hash: String,
    pub amount: Balance,
}
