use crate::domain::balance::Balance;
use crate::domain::channel::{Address, AssetId, ChannelSnapshot, Party};
use crate::domain::ports::SharedChainReader;
use crate::error::EngineError;

/// Read-only balance queries against channel snapshots and the deposit chain.
#[derive(Clone)]
pub struct BalanceReconciler {
    chain: SharedChainReader,
}

impl BalanceReconciler {
    pub fn new(chain: SharedChainReader) -> Self {
        Self { chain }
    }

    /// Off-chain balance of `party` for `asset_id` in `channel`.
    pub fn offchain_balance(channel: &ChannelSnapshot, asset_id: &AssetId, party: Party) -> Balance {
        channel.balance_of(asset_id, party)
    }

    /// Total deposits of `asset_id` ever made to `address` on the deposit chain.
    pub async fn onchain_deposits(
        &self,
        address: &Address,
        asset_id: &AssetId,
    ) -> Result<Balance, EngineError> {
        self.chain.total_deposits(address, asset_id).await
    }
}
