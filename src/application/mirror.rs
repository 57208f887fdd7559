use crate::domain::channel::{Address, ChainId, PublicIdentifier};
use crate::domain::ports::SharedEngine;
use crate::domain::session::{Phase, SessionId};
use crate::domain::transfer::EngineEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type PhaseMap = Arc<RwLock<HashMap<SessionId, Phase>>>;

/// Where the deposit side lives, so refunds are not read as completions.
#[derive(Debug, Clone)]
pub struct DepositSide {
    pub chain_id: ChainId,
    pub channel_address: Address,
}

/// Derives a per-session phase from raw engine notifications.
///
/// Advisory only: it never drives a session and the last notification seen
/// wins.
pub struct PhaseMirror {
    phases: PhaseMap,
    handle: JoinHandle<()>,
}

impl PhaseMirror {
    pub fn spawn(engine: &SharedEngine, deposit: DepositSide) -> Self {
        let phases: PhaseMap = Arc::default();
        let me = engine.public_identifier();
        let mut all = engine.events().attach();

        let map = Arc::clone(&phases);
        let handle = tokio::spawn(async move {
            while let Ok(event) = all.wait_for(None).await {
                let Some(session_id) = event.meta().session_id.clone() else {
                    trace!("Ignoring event without session metadata");
                    continue;
                };
                let Some(phase) = mirrored_phase(&event, &me, &deposit) else {
                    continue;
                };
                debug!(session_id = %session_id, phase = %phase, "Mirrored phase");
                map.write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(session_id, phase);
            }
        });

        Self { phases, handle }
    }

    pub fn phase(&self, session_id: &SessionId) -> Option<Phase> {
        self.phases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .copied()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PhaseMirror {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mirrored_phase(
    event: &EngineEvent,
    me: &PublicIdentifier,
    deposit: &DepositSide,
) -> Option<Phase> {
    match event {
        // Reconciles are not tied to a session.
        EngineEvent::DepositReconciled { .. } => None,
        EngineEvent::ConditionalTransferCreated { transfer } => {
            (transfer.initiator == *me).then_some(Phase::Transferring)
        }
        EngineEvent::ConditionalTransferResolved { transfer } => {
            if transfer.chain_id == deposit.chain_id && transfer.is_cancelled() {
                Some(Phase::Error)
            } else {
                Some(Phase::Withdrawing)
            }
        }
        EngineEvent::WithdrawalReconciled {
            channel_address, ..
        } => (*channel_address != deposit.channel_address).then_some(Phase::Complete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::balance::Balance;
    use crate::domain::channel::{AssetId, TransferId};
    use crate::domain::transfer::{TransferMeta, TransferRecord, TransferResolver};
    use rust_decimal_macros::dec;

    fn deposit() -> DepositSide {
        DepositSide {
            chain_id: ChainId(1),
            channel_address: Address::new("0xdeposit"),
        }
    }

    fn record(chain: u64, initiator: &str, resolver: Option<TransferResolver>) -> TransferRecord {
        TransferRecord {
            transfer_id: TransferId::new("t"),
            channel_address: Address::new("0xchannel"),
            chain_id: ChainId(chain),
            asset_id: AssetId::new("0xasset"),
            amount: Balance::new(dec!(1)),
            initiator: PublicIdentifier::new(initiator),
            responder: PublicIdentifier::new("other"),
            meta: TransferMeta::for_session(&SessionId::random()),
            resolver,
        }
    }

    #[test]
    fn test_phase_mapping() {
        let me = PublicIdentifier::new("user");
        let created = EngineEvent::ConditionalTransferCreated {
            transfer: record(1, "user", None),
        };
        assert_eq!(mirrored_phase(&created, &me, &deposit()), Some(Phase::Transferring));

        let router_created = EngineEvent::ConditionalTransferCreated {
            transfer: record(137, "router", None),
        };
        assert_eq!(mirrored_phase(&router_created, &me, &deposit()), None);

        let cancelled = EngineEvent::ConditionalTransferResolved {
            transfer: record(1, "user", Some(TransferResolver::Cancel)),
        };
        assert_eq!(mirrored_phase(&cancelled, &me, &deposit()), Some(Phase::Error));

        let refund = EngineEvent::WithdrawalReconciled {
            channel_address: Address::new("0xdeposit"),
            transfer_id: TransferId::new("w"),
            transaction_hash: "0xtx".into(),
            meta: TransferMeta::default(),
        };
        assert_eq!(mirrored_phase(&refund, &me, &deposit()), None);

        let reconciled = EngineEvent::DepositReconciled {
            channel_address: Address::new("0xdeposit"),
            asset_id: AssetId::new("0xasset"),
            balance: Balance::new(dec!(1)),
            meta: TransferMeta::for_session(&SessionId::random()),
        };
        assert_eq!(mirrored_phase(&reconciled, &me, &deposit()), None);
    }
}
