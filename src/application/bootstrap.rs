//! Connects to the engine and works out where an interrupted transfer left
//! off, using nothing but channel balances.

use super::reconciler::BalanceReconciler;
use crate::config::TransferConfig;
use crate::domain::balance::Amount;
use crate::domain::channel::{Address, ChannelSnapshot, Party};
use crate::domain::ports::SharedEngine;
use crate::domain::transfer::TransferResolver;
use crate::error::{EngineError, Result, TransferError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Channel addresses handed to the ready callback once both are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyChannels {
    pub deposit: Address,
    pub withdraw: Address,
}

pub type ReadyCallback = Arc<dyn Fn(&ReadyChannels) + Send + Sync>;

/// What to do next, derived from the user's off-chain balances.
#[derive(Debug, Clone)]
pub enum Resume {
    /// Funds are in the deposit channel; run the full transfer.
    Transfer {
        amount: Amount,
        deposit_channel: ChannelSnapshot,
    },
    /// Funds already crossed over; only the withdrawal is missing.
    WithdrawOnly {
        amount: Amount,
        withdraw_channel: ChannelSnapshot,
    },
    /// Nothing to resume; wait for an on-chain deposit.
    AwaitDeposit { deposit_channel: ChannelSnapshot },
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub channels: ReadyChannels,
    pub resume: Resume,
}

pub struct SessionBootstrapper {
    engine: SharedEngine,
    config: Arc<TransferConfig>,
}

impl SessionBootstrapper {
    pub fn new(engine: SharedEngine, config: Arc<TransferConfig>) -> Self {
        Self { engine, config }
    }

    pub async fn bootstrap(&self, on_ready: Option<&ReadyCallback>) -> Result<Bootstrapped> {
        let config = &self.config;
        let router = &config.router_identifier;

        self.engine
            .connect(&config.connect_params())
            .await
            .map_err(|e| match e {
                EngineError::StorageUnavailable(reason) => {
                    TransferError::StorageUnavailable(reason)
                }
                other => TransferError::Connection(other),
            })?;
        info!(router = %router, "Connected to channel engine");

        let deposit_channel = self
            .engine
            .get_channel(router, config.deposit.chain_id)
            .await
            .map_err(|e| TransferError::engine("get_channel", e))?;
        let withdraw_channel = self
            .engine
            .get_channel(router, config.withdraw.chain_id)
            .await
            .map_err(|e| TransferError::engine("get_channel", e))?;

        let channels = ReadyChannels {
            deposit: deposit_channel.channel_address.clone(),
            withdraw: withdraw_channel.channel_address.clone(),
        };
        if let Some(callback) = on_ready {
            callback(&channels);
        }

        let pair = config.swap_pair();
        let router_config = self
            .engine
            .get_router_config(router)
            .await
            .map_err(|e| TransferError::engine("get_router_config", e))?;
        if !router_config.supports(&pair) {
            return Err(TransferError::UnsupportedRoute {
                router: router.clone(),
                from_chain: pair.from_chain_id,
                from_asset: pair.from_asset_id,
                to_chain: pair.to_chain_id,
                to_asset: pair.to_asset_id,
            });
        }

        self.cancel_stale_transfers(&withdraw_channel).await?;

        self.engine
            .reconcile_deposit(&deposit_channel.channel_address, &config.deposit.asset_id)
            .await
            .map_err(|e| TransferError::engine("reconcile_deposit", e))?;
        let deposit_channel = self
            .engine
            .get_channel(router, config.deposit.chain_id)
            .await
            .map_err(|e| TransferError::engine("get_channel", e))?;

        let me = self.engine.public_identifier();
        let deposit_party = deposit_channel.party_of(&me).unwrap_or(Party::Bob);
        let withdraw_party = withdraw_channel.party_of(&me).unwrap_or(Party::Bob);
        let deposit_balance = BalanceReconciler::offchain_balance(
            &deposit_channel,
            &config.deposit.asset_id,
            deposit_party,
        );
        let withdraw_balance = BalanceReconciler::offchain_balance(
            &withdraw_channel,
            &config.withdraw.asset_id,
            withdraw_party,
        );
        debug!(deposit = %deposit_balance, withdraw = %withdraw_balance, "Off-chain balances");

        let resume = match (
            Amount::try_from(deposit_balance),
            Amount::try_from(withdraw_balance),
        ) {
            (Ok(_), Ok(_)) => {
                return Err(TransferError::AmbiguousState {
                    deposit: deposit_balance,
                    withdraw: withdraw_balance,
                });
            }
            (Ok(amount), Err(_)) => {
                info!(amount = %amount, "Found funds in deposit channel, resuming transfer");
                Resume::Transfer {
                    amount,
                    deposit_channel,
                }
            }
            (Err(_), Ok(amount)) => {
                info!(amount = %amount, "Found funds in withdraw channel, resuming withdrawal");
                Resume::WithdrawOnly {
                    amount,
                    withdraw_channel,
                }
            }
            (Err(_), Err(_)) => Resume::AwaitDeposit { deposit_channel },
        };
        Ok(Bootstrapped { channels, resume })
    }

    /// Cancels router offers on the withdraw side left over from earlier
    /// sessions. Their preimages are lost, so they can never be unlocked.
    async fn cancel_stale_transfers(&self, withdraw_channel: &ChannelSnapshot) -> Result<()> {
        let active = self
            .engine
            .get_active_transfers(&withdraw_channel.channel_address)
            .await
            .map_err(|e| TransferError::engine("get_active_transfers", e))?;

        let stale = active.into_iter().filter(|t| {
            t.initiator == self.config.router_identifier
                && t.meta.session_id.is_some()
                && !t.is_resolved()
        });
        for transfer in stale {
            warn!(
                transfer_id = %transfer.transfer_id,
                amount = %transfer.amount,
                "Cancelling stale transfer from router"
            );
            self.engine
                .resolve_conditional_transfer(
                    &transfer.channel_address,
                    &transfer.transfer_id,
                    TransferResolver::Cancel,
                )
                .await
                .map_err(|e| TransferError::engine("resolve_conditional_transfer", e))?;
        }
        Ok(())
    }
}
