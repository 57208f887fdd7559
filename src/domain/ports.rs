use super::balance::Balance;
use super::channel::{Address, AssetId, ChainId, ChannelSnapshot, PublicIdentifier, RouterConfig, TransferId};
use super::transfer::{
    ConditionalTransferRequest, CreatedTransfer, EngineEvent, TransferRecord, TransferResolver,
    WithdrawRequest, WithdrawalReceipt,
};
use crate::application::events::EventStream;
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything needed to bring the engine up against both chains.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub router: PublicIdentifier,
    pub deposit_chain_id: ChainId,
    pub withdraw_chain_id: ChainId,
    pub deposit_provider_url: String,
    pub withdraw_provider_url: String,
}

/// Client of the external state-channel engine.
///
/// Implementations publish their notifications on the stream returned by
/// [`ChannelEngine::events`]; callers attach filters to it before issuing the
/// call that can trigger a notification.
#[async_trait]
pub trait ChannelEngine: Send + Sync {
    /// Identity of the local party (the `bob` side of every channel).
    fn public_identifier(&self) -> PublicIdentifier;

    fn events(&self) -> EventStream<EngineEvent>;

    async fn connect(&self, params: &ConnectParams) -> Result<(), EngineError>;

    async fn get_channel(
        &self,
        counterparty: &PublicIdentifier,
        chain_id: ChainId,
    ) -> Result<ChannelSnapshot, EngineError>;

    async fn reconcile_deposit(
        &self,
        channel_address: &Address,
        asset_id: &AssetId,
    ) -> Result<(), EngineError>;

    async fn create_conditional_transfer(
        &self,
        request: ConditionalTransferRequest,
    ) -> Result<CreatedTransfer, EngineError>;

    async fn resolve_conditional_transfer(
        &self,
        channel_address: &Address,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<(), EngineError>;

    /// Unresolved transfers in the channel.
    async fn get_active_transfers(
        &self,
        channel_address: &Address,
    ) -> Result<Vec<TransferRecord>, EngineError>;

    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<TransferRecord, EngineError>;

    async fn get_router_config(
        &self,
        router: &PublicIdentifier,
    ) -> Result<RouterConfig, EngineError>;

    async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawalReceipt, EngineError>;
}

/// Read access to on-chain state of the deposit chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Total historical deposits of `asset_id` made to `address`.
    async fn total_deposits(
        &self,
        address: &Address,
        asset_id: &AssetId,
    ) -> Result<Balance, EngineError>;
}

pub type SharedEngine = Arc<dyn ChannelEngine>;
pub type SharedChainReader = Arc<dyn ChainReader>;
