//! In-process stand-in for the state-channel engine and the deposit chain.
//!
//! Keeps both channels, the router's behaviour and on-chain deposit totals in
//! one shared ledger. Used by the CLI's simulated run and by tests.

use crate::application::events::EventStream;
use crate::config::TransferConfig;
use crate::domain::balance::{Amount, Balance};
use crate::domain::channel::{
    Address, AssetId, ChainId, ChannelSnapshot, Party, PublicIdentifier, RouterConfig, TransferId,
};
use crate::domain::ports::{ChainReader, ChannelEngine, ConnectParams};
use crate::domain::session::PreImage;
use crate::domain::transfer::{
    ConditionalTransferRequest, CreatedTransfer, EngineEvent, TransferMeta, TransferRecord,
    TransferResolver, WithdrawRequest, WithdrawalReceipt,
};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Engine operations that can be made to fail or lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    GetChannel,
    ReconcileDeposit,
    CreateTransfer,
    ResolveTransfer,
    GetActiveTransfers,
    GetTransfer,
    GetRouterConfig,
    Withdraw,
    TotalDeposits,
}

/// What the simulated router does with a transfer sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterBehaviour {
    /// Offers the same amount on the target chain.
    #[default]
    Forward,
    /// Cancels the sender-side transfer, refunding the sender.
    Cancel,
    /// Does nothing.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSim {
    pub behaviour: RouterBehaviour,
    /// Whether the router unlocks the sender-side transfer once it learns the
    /// preimage.
    pub reclaim: bool,
    pub reaction_delay: Duration,
}

impl Default for RouterSim {
    fn default() -> Self {
        Self {
            behaviour: RouterBehaviour::Forward,
            reclaim: true,
            reaction_delay: Duration::ZERO,
        }
    }
}

/// An on-chain withdrawal the engine submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub recipient: Address,
    pub asset_id: AssetId,
    pub amount: Balance,
    pub transaction_hash: String,
}

#[derive(Default)]
struct Ledger {
    connected: bool,
    storage_unavailable: bool,
    channels: Vec<ChannelSnapshot>,
    onchain: HashMap<(Address, AssetId), Balance>,
    credited: HashMap<(Address, AssetId), Balance>,
    transfers: HashMap<TransferId, TransferRecord>,
    /// Secrets of transfers created by the user.
    locks: HashMap<TransferId, PreImage>,
    /// Target chain and asset of each user transfer.
    routes: HashMap<TransferId, (ChainId, AssetId)>,
    /// Router offer id to the user transfer it mirrors.
    offers: HashMap<TransferId, TransferId>,
    router_config: RouterConfig,
    router: RouterSim,
    failures: HashMap<Operation, EngineError>,
    latencies: HashMap<Operation, Duration>,
    withdrawals: Vec<Withdrawal>,
    next_id: u64,
}

impl Ledger {
    fn check(&self, operation: Operation) -> Result<(), EngineError> {
        if let Some(err) = self.failures.get(&operation) {
            return Err(err.clone());
        }
        let needs_connection = !matches!(operation, Operation::Connect | Operation::TotalDeposits);
        if needs_connection && !self.connected {
            return Err(EngineError::NotConnected);
        }
        Ok(())
    }

    fn channel_index(&self, address: &Address) -> Result<usize, EngineError> {
        self.channels
            .iter()
            .position(|c| c.channel_address == *address)
            .ok_or_else(|| EngineError::NotFound(format!("channel {address}")))
    }

    fn channel_on(&mut self, chain_id: ChainId) -> Result<&mut ChannelSnapshot, EngineError> {
        self.channels
            .iter_mut()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| EngineError::NotFound(format!("channel on chain {chain_id}")))
    }

    fn next_transfer_id(&mut self) -> TransferId {
        self.next_id += 1;
        TransferId::new(format!("0xtransfer{:04}", self.next_id))
    }

    /// Resolves an open transfer and pays out to whichever side the
    /// resolver picks.
    fn settle(
        &mut self,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<TransferRecord, EngineError> {
        let transfer = self
            .transfers
            .get(transfer_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.is_resolved() {
            return Err(EngineError::Rejected(format!(
                "transfer {transfer_id} already resolved"
            )));
        }
        if !resolver.is_cancel() {
            let lock_id = self.offers.get(transfer_id).unwrap_or(transfer_id);
            let unlocks = match (&resolver, self.locks.get(lock_id)) {
                (TransferResolver::PreImage(given), Some(expected)) => given == expected,
                _ => false,
            };
            if !unlocks {
                return Err(EngineError::Rejected("invalid preimage".into()));
            }
        }

        let index = self.channel_index(&transfer.channel_address)?;
        let channel = &mut self.channels[index];
        let beneficiary = if resolver.is_cancel() {
            &transfer.initiator
        } else {
            &transfer.responder
        };
        let party = channel
            .party_of(beneficiary)
            .ok_or_else(|| EngineError::NotFound(format!("party {beneficiary}")))?;
        *channel.asset_entry(&transfer.asset_id).of_mut(party) += transfer.amount;
        channel.nonce += 1;

        let record = self
            .transfers
            .get_mut(transfer_id)
            .ok_or_else(|| EngineError::NotFound(format!("transfer {transfer_id}")))?;
        record.resolver = Some(resolver);
        Ok(record.clone())
    }
}

/// Simulated engine plus router plus deposit chain. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct InMemoryEngine {
    user: PublicIdentifier,
    router: PublicIdentifier,
    ledger: Arc<RwLock<Ledger>>,
    events: EventStream<EngineEvent>,
}

impl InMemoryEngine {
    /// Opens one channel per leg of `config`, publishes the configured swap
    /// and gives the router `liquidity` on the withdraw side.
    pub fn for_config(config: &TransferConfig, user: PublicIdentifier, liquidity: Balance) -> Self {
        let router = config.router_identifier.clone();
        let mut ledger = Ledger::default();
        for leg in [&config.deposit, &config.withdraw] {
            ledger.channels.push(ChannelSnapshot::new(
                Address::new(format!("0xchannel-{}", leg.chain_id)),
                leg.chain_id,
                router.clone(),
                user.clone(),
            ));
        }
        if let Ok(withdraw) = ledger.channel_on(config.withdraw.chain_id) {
            withdraw.asset_entry(&config.withdraw.asset_id).alice = liquidity;
        }
        ledger.router_config.supported_swaps.push(config.swap_pair());

        Self {
            user,
            router,
            ledger: Arc::new(RwLock::new(ledger)),
            events: EventStream::new(config.event_capacity),
        }
    }

    pub async fn set_router(&self, sim: RouterSim) {
        self.ledger.write().await.router = sim;
    }

    pub async fn set_router_config(&self, config: RouterConfig) {
        self.ledger.write().await.router_config = config;
    }

    pub async fn set_storage_available(&self, available: bool) {
        self.ledger.write().await.storage_unavailable = !available;
    }

    /// Makes `operation` fail with `err` until cleared.
    pub async fn fail(&self, operation: Operation, err: EngineError) {
        self.ledger.write().await.failures.insert(operation, err);
    }

    pub async fn clear_failure(&self, operation: Operation) {
        self.ledger.write().await.failures.remove(&operation);
    }

    /// Makes every `operation` call wait `delay` before it touches the
    /// ledger. A zero delay removes the latency.
    pub async fn set_latency(&self, operation: Operation, delay: Duration) {
        let mut ledger = self.ledger.write().await;
        if delay.is_zero() {
            ledger.latencies.remove(&operation);
        } else {
            ledger.latencies.insert(operation, delay);
        }
    }

    async fn lag(&self, operation: Operation) {
        let delay = self.ledger.read().await.latencies.get(&operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Simulates an on-chain transfer into `address`.
    pub async fn deposit_onchain(&self, address: &Address, asset_id: &AssetId, amount: Amount) {
        let mut ledger = self.ledger.write().await;
        *ledger
            .onchain
            .entry((address.clone(), asset_id.clone()))
            .or_default() += Balance::from(amount);
    }

    /// Overwrites an off-chain balance, e.g. to stage an interrupted run.
    pub async fn set_offchain_balance(
        &self,
        chain_id: ChainId,
        asset_id: &AssetId,
        party: Party,
        balance: Balance,
    ) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        *ledger.channel_on(chain_id)?.asset_entry(asset_id).of_mut(party) = balance;
        Ok(())
    }

    pub async fn channel_on(&self, chain_id: ChainId) -> Option<ChannelSnapshot> {
        self.ledger
            .read()
            .await
            .channels
            .iter()
            .find(|c| c.chain_id == chain_id)
            .cloned()
    }

    pub async fn withdrawals(&self) -> Vec<Withdrawal> {
        self.ledger.read().await.withdrawals.clone()
    }

    /// Router mirrors user transfer `sender_id` on its target chain.
    pub async fn router_offer(&self, sender_id: &TransferId) -> Result<TransferId, EngineError> {
        let mut ledger = self.ledger.write().await;
        let sender = ledger
            .transfers
            .get(sender_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("transfer {sender_id}")))?;
        let (to_chain, to_asset) = ledger
            .routes
            .get(sender_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("route for {sender_id}")))?;
        let offer_id = ledger.next_transfer_id();

        let channel = ledger.channel_on(to_chain)?;
        let liquidity = channel.asset_entry(&to_asset).of_mut(Party::Alice);
        if *liquidity < sender.amount {
            return Err(EngineError::Rejected("router has insufficient liquidity".into()));
        }
        *liquidity -= sender.amount;
        channel.nonce += 1;
        let offer = TransferRecord {
            transfer_id: offer_id.clone(),
            channel_address: channel.channel_address.clone(),
            chain_id: to_chain,
            asset_id: to_asset,
            amount: sender.amount,
            initiator: self.router.clone(),
            responder: self.user.clone(),
            meta: sender.meta.clone(),
            resolver: None,
        };
        ledger.transfers.insert(offer_id.clone(), offer.clone());
        ledger.offers.insert(offer_id.clone(), sender_id.clone());
        drop(ledger);

        debug!(transfer_id = %offer_id, "Router offered transfer");
        self.events
            .emit(EngineEvent::ConditionalTransferCreated { transfer: offer });
        Ok(offer_id)
    }

    /// Router cancels user transfer `sender_id`, refunding the user.
    pub async fn router_cancel(&self, sender_id: &TransferId) -> Result<(), EngineError> {
        let record = self
            .ledger
            .write()
            .await
            .settle(sender_id, TransferResolver::Cancel)?;
        debug!(transfer_id = %sender_id, "Router cancelled transfer");
        self.events
            .emit(EngineEvent::ConditionalTransferResolved { transfer: record });
        Ok(())
    }

    /// Router places an offer on `chain_id` that no user transfer backs.
    pub async fn inject_router_offer(
        &self,
        chain_id: ChainId,
        asset_id: &AssetId,
        amount: Amount,
        meta: TransferMeta,
    ) -> Result<TransferId, EngineError> {
        let mut ledger = self.ledger.write().await;
        let transfer_id = ledger.next_transfer_id();
        let channel = ledger.channel_on(chain_id)?;
        *channel.asset_entry(asset_id).of_mut(Party::Alice) -= Balance::from(amount);
        let offer = TransferRecord {
            transfer_id: transfer_id.clone(),
            channel_address: channel.channel_address.clone(),
            chain_id,
            asset_id: asset_id.clone(),
            amount: Balance::from(amount),
            initiator: self.router.clone(),
            responder: self.user.clone(),
            meta,
            resolver: None,
        };
        ledger.transfers.insert(transfer_id.clone(), offer);
        Ok(transfer_id)
    }

    async fn router_reclaim(
        &self,
        sender_id: &TransferId,
        pre_image: PreImage,
    ) -> Result<(), EngineError> {
        let record = self
            .ledger
            .write()
            .await
            .settle(sender_id, TransferResolver::PreImage(pre_image))?;
        debug!(transfer_id = %sender_id, "Router reclaimed transfer");
        self.events
            .emit(EngineEvent::ConditionalTransferResolved { transfer: record });
        Ok(())
    }

    fn react(&self, delay: Duration, action: RouterAction) {
        let engine = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = match &action {
                RouterAction::Offer(id) => engine.router_offer(id).await.map(|_| ()),
                RouterAction::Cancel(id) => engine.router_cancel(id).await,
                RouterAction::Reclaim(id, pre_image) => {
                    engine.router_reclaim(id, pre_image.clone()).await
                }
            };
            if let Err(e) = outcome {
                warn!(action = ?action, error = %e, "Simulated router step failed");
            }
        });
    }
}

#[derive(Debug)]
enum RouterAction {
    Offer(TransferId),
    Cancel(TransferId),
    Reclaim(TransferId, PreImage),
}

#[async_trait]
impl ChannelEngine for InMemoryEngine {
    fn public_identifier(&self) -> PublicIdentifier {
        self.user.clone()
    }

    fn events(&self) -> EventStream<EngineEvent> {
        self.events.clone()
    }

    async fn connect(&self, params: &ConnectParams) -> Result<(), EngineError> {
        self.lag(Operation::Connect).await;
        let mut ledger = self.ledger.write().await;
        ledger.check(Operation::Connect)?;
        if ledger.storage_unavailable {
            return Err(EngineError::StorageUnavailable(
                "persistent storage is blocked".into(),
            ));
        }
        if params.router != self.router {
            return Err(EngineError::NotFound(format!("router {}", params.router)));
        }
        ledger.connected = true;
        Ok(())
    }

    async fn get_channel(
        &self,
        counterparty: &PublicIdentifier,
        chain_id: ChainId,
    ) -> Result<ChannelSnapshot, EngineError> {
        self.lag(Operation::GetChannel).await;
        let ledger = self.ledger.read().await;
        ledger.check(Operation::GetChannel)?;
        ledger
            .channels
            .iter()
            .find(|c| c.chain_id == chain_id && c.alice_identifier == *counterparty)
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!("channel with {counterparty} on chain {chain_id}"))
            })
    }

    async fn reconcile_deposit(
        &self,
        channel_address: &Address,
        asset_id: &AssetId,
    ) -> Result<(), EngineError> {
        self.lag(Operation::ReconcileDeposit).await;
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;
        ledger.check(Operation::ReconcileDeposit)?;
        let index = ledger.channel_index(channel_address)?;

        let key = (channel_address.clone(), asset_id.clone());
        let total = ledger.onchain.get(&key).copied().unwrap_or_default();
        let credited = ledger.credited.get(&key).copied().unwrap_or_default();
        let channel = &mut ledger.channels[index];
        if let Some(delta) = total.increase_over(credited) {
            let party = channel.party_of(&self.user).unwrap_or(Party::Bob);
            *channel.asset_entry(asset_id).of_mut(party) += Balance::from(delta);
            channel.nonce += 1;
            ledger.credited.insert(key, total);
        }
        let balance = channel.balance_of(asset_id, Party::Bob);
        drop(guard);

        self.events.emit(EngineEvent::DepositReconciled {
            channel_address: channel_address.clone(),
            asset_id: asset_id.clone(),
            balance,
            meta: TransferMeta::default(),
        });
        Ok(())
    }

    async fn create_conditional_transfer(
        &self,
        request: ConditionalTransferRequest,
    ) -> Result<CreatedTransfer, EngineError> {
        self.lag(Operation::CreateTransfer).await;
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;
        ledger.check(Operation::CreateTransfer)?;
        let index = ledger.channel_index(&request.channel_address)?;
        let transfer_id = ledger.next_transfer_id();

        let channel = &mut ledger.channels[index];
        let amount = Balance::from(request.amount);
        let available = channel.asset_entry(&request.from_asset_id).of_mut(Party::Bob);
        if *available < amount {
            return Err(EngineError::Rejected(format!(
                "insufficient balance: {available} < {amount}"
            )));
        }
        *available -= amount;
        channel.nonce += 1;

        let record = TransferRecord {
            transfer_id: transfer_id.clone(),
            channel_address: channel.channel_address.clone(),
            chain_id: channel.chain_id,
            asset_id: request.from_asset_id.clone(),
            amount,
            initiator: self.user.clone(),
            responder: self.router.clone(),
            meta: TransferMeta::for_session(&request.session_id),
            resolver: None,
        };
        let pre_image = PreImage::random();
        ledger.transfers.insert(transfer_id.clone(), record.clone());
        ledger.locks.insert(transfer_id.clone(), pre_image.clone());
        ledger
            .routes
            .insert(transfer_id.clone(), (request.to_chain_id, request.to_asset_id));
        let sim = ledger.router;
        drop(guard);

        self.events
            .emit(EngineEvent::ConditionalTransferCreated { transfer: record });
        match sim.behaviour {
            RouterBehaviour::Forward => {
                self.react(sim.reaction_delay, RouterAction::Offer(transfer_id.clone()))
            }
            RouterBehaviour::Cancel => {
                self.react(sim.reaction_delay, RouterAction::Cancel(transfer_id.clone()))
            }
            RouterBehaviour::Ignore => {}
        }

        Ok(CreatedTransfer {
            transfer_id,
            pre_image,
        })
    }

    async fn resolve_conditional_transfer(
        &self,
        channel_address: &Address,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<(), EngineError> {
        self.lag(Operation::ResolveTransfer).await;
        let mut ledger = self.ledger.write().await;
        ledger.check(Operation::ResolveTransfer)?;
        let in_channel = ledger
            .transfers
            .get(transfer_id)
            .is_some_and(|t| t.channel_address == *channel_address);
        if !in_channel {
            return Err(EngineError::NotFound(format!(
                "transfer {transfer_id} in channel {channel_address}"
            )));
        }
        let record = ledger.settle(transfer_id, resolver.clone())?;
        let sender_id = ledger.offers.get(transfer_id).cloned();
        let sim = ledger.router;
        drop(ledger);

        self.events
            .emit(EngineEvent::ConditionalTransferResolved { transfer: record });

        // The router follows up on its own sender-side transfer.
        if let Some(sender_id) = sender_id {
            match resolver {
                TransferResolver::PreImage(pre_image) if !pre_image.is_zero() => {
                    if sim.reclaim {
                        self.react(
                            sim.reaction_delay,
                            RouterAction::Reclaim(sender_id, pre_image),
                        );
                    }
                }
                _ => self.react(sim.reaction_delay, RouterAction::Cancel(sender_id)),
            }
        }
        Ok(())
    }

    async fn get_active_transfers(
        &self,
        channel_address: &Address,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        self.lag(Operation::GetActiveTransfers).await;
        let ledger = self.ledger.read().await;
        ledger.check(Operation::GetActiveTransfers)?;
        let mut active: Vec<_> = ledger
            .transfers
            .values()
            .filter(|t| t.channel_address == *channel_address && !t.is_resolved())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.transfer_id.cmp(&b.transfer_id));
        Ok(active)
    }

    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<TransferRecord, EngineError> {
        self.lag(Operation::GetTransfer).await;
        let ledger = self.ledger.read().await;
        ledger.check(Operation::GetTransfer)?;
        ledger
            .transfers
            .get(transfer_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("transfer {transfer_id}")))
    }

    async fn get_router_config(
        &self,
        router: &PublicIdentifier,
    ) -> Result<RouterConfig, EngineError> {
        self.lag(Operation::GetRouterConfig).await;
        let ledger = self.ledger.read().await;
        ledger.check(Operation::GetRouterConfig)?;
        if *router != self.router {
            return Err(EngineError::NotFound(format!("router {router}")));
        }
        Ok(ledger.router_config.clone())
    }

    async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawalReceipt, EngineError> {
        self.lag(Operation::Withdraw).await;
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;
        ledger.check(Operation::Withdraw)?;
        let index = ledger.channel_index(&request.channel_address)?;
        let transfer_id = ledger.next_transfer_id();

        let channel = &mut ledger.channels[index];
        let party = channel.party_of(&self.user).unwrap_or(Party::Bob);
        let held = channel.asset_entry(&request.asset_id).of_mut(party);
        let amount = *held;
        if !amount.is_positive() {
            return Err(EngineError::Rejected("nothing to withdraw".into()));
        }
        *held = Balance::ZERO;
        channel.nonce += 1;

        let transaction_hash = format!("0x{}", hex::encode(rand::random::<[u8; 32]>()));
        ledger.withdrawals.push(Withdrawal {
            recipient: request.recipient.clone(),
            asset_id: request.asset_id.clone(),
            amount,
            transaction_hash: transaction_hash.clone(),
        });
        drop(guard);

        self.events.emit(EngineEvent::WithdrawalReconciled {
            channel_address: request.channel_address,
            transfer_id,
            transaction_hash: transaction_hash.clone(),
            meta: TransferMeta {
                session_id: request.session_id,
            },
        });
        Ok(WithdrawalReceipt {
            transaction_hash,
            amount,
        })
    }
}

#[async_trait]
impl ChainReader for InMemoryEngine {
    async fn total_deposits(
        &self,
        address: &Address,
        asset_id: &AssetId,
    ) -> Result<Balance, EngineError> {
        self.lag(Operation::TotalDeposits).await;
        let ledger = self.ledger.read().await;
        ledger.check(Operation::TotalDeposits)?;
        Ok(ledger
            .onchain
            .get(&(address.clone(), asset_id.clone()))
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionId;
    use rust_decimal_macros::dec;

    const CONFIG: &str = r#"{
        "router_identifier": "router",
        "deposit": { "chain_id": 1, "provider_url": "http://localhost:8545", "asset_id": "0xaaa" },
        "withdraw": { "chain_id": 137, "provider_url": "http://localhost:8546", "asset_id": "0xbbb" },
        "withdrawal_address": "0xrecipient"
    }"#;

    async fn connected() -> (InMemoryEngine, TransferConfig) {
        let config = TransferConfig::from_json(CONFIG).unwrap();
        let engine = InMemoryEngine::for_config(
            &config,
            PublicIdentifier::new("user"),
            Balance::new(dec!(1000)),
        );
        engine.connect(&config.connect_params()).await.unwrap();
        (engine, config)
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_calls_require_connection() {
        let config = TransferConfig::from_json(CONFIG).unwrap();
        let engine =
            InMemoryEngine::for_config(&config, PublicIdentifier::new("user"), Balance::ZERO);
        let err = engine
            .get_channel(&config.router_identifier, ChainId(1))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotConnected);
    }

    #[tokio::test]
    async fn test_storage_unavailable_on_connect() {
        let config = TransferConfig::from_json(CONFIG).unwrap();
        let engine =
            InMemoryEngine::for_config(&config, PublicIdentifier::new("user"), Balance::ZERO);
        engine.set_storage_available(false).await;
        assert!(matches!(
            engine.connect(&config.connect_params()).await,
            Err(EngineError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_credits_each_deposit_once() {
        let (engine, config) = connected().await;
        let channel = engine.channel_on(ChainId(1)).await.unwrap();
        let asset = &config.deposit.asset_id;

        engine
            .deposit_onchain(&channel.channel_address, asset, amount(dec!(5)))
            .await;
        engine
            .reconcile_deposit(&channel.channel_address, asset)
            .await
            .unwrap();
        engine
            .reconcile_deposit(&channel.channel_address, asset)
            .await
            .unwrap();

        let channel = engine.channel_on(ChainId(1)).await.unwrap();
        assert_eq!(channel.balance_of(asset, Party::Bob), Balance::new(dec!(5)));
    }

    #[tokio::test]
    async fn test_offer_unlocks_with_sender_pre_image() {
        let (engine, config) = connected().await;
        engine
            .set_router(RouterSim {
                behaviour: RouterBehaviour::Ignore,
                ..RouterSim::default()
            })
            .await;
        engine
            .set_offchain_balance(ChainId(1), &config.deposit.asset_id, Party::Bob, Balance::new(dec!(3)))
            .await
            .unwrap();
        let deposit = engine.channel_on(ChainId(1)).await.unwrap();
        let session_id = SessionId::random();

        let created = engine
            .create_conditional_transfer(ConditionalTransferRequest {
                channel_address: deposit.channel_address.clone(),
                from_asset_id: config.deposit.asset_id.clone(),
                amount: amount(dec!(3)),
                to_chain_id: ChainId(137),
                to_asset_id: config.withdraw.asset_id.clone(),
                session_id: session_id.clone(),
            })
            .await
            .unwrap();
        let offer_id = engine.router_offer(&created.transfer_id).await.unwrap();
        let offer = engine.get_transfer(&offer_id).await.unwrap();
        assert_eq!(offer.meta, TransferMeta::for_session(&session_id));

        let wrong = engine
            .resolve_conditional_transfer(
                &offer.channel_address,
                &offer_id,
                TransferResolver::PreImage(PreImage::random()),
            )
            .await;
        assert_eq!(wrong, Err(EngineError::Rejected("invalid preimage".into())));

        engine
            .resolve_conditional_transfer(
                &offer.channel_address,
                &offer_id,
                TransferResolver::PreImage(created.pre_image),
            )
            .await
            .unwrap();
        let withdraw = engine.channel_on(ChainId(137)).await.unwrap();
        assert_eq!(
            withdraw.balance_of(&config.withdraw.asset_id, Party::Bob),
            Balance::new(dec!(3))
        );
        assert!(engine
            .get_active_transfers(&withdraw.channel_address)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_empties_user_balance() {
        let (engine, config) = connected().await;
        engine
            .set_offchain_balance(ChainId(137), &config.withdraw.asset_id, Party::Bob, Balance::new(dec!(7)))
            .await
            .unwrap();
        let channel = engine.channel_on(ChainId(137)).await.unwrap();
        let request = WithdrawRequest {
            channel_address: channel.channel_address.clone(),
            asset_id: config.withdraw.asset_id.clone(),
            recipient: config.withdrawal_address.clone(),
            session_id: None,
        };

        let receipt = engine.withdraw(request.clone()).await.unwrap();
        assert_eq!(receipt.amount, Balance::new(dec!(7)));
        assert!(receipt.transaction_hash.starts_with("0x"));
        assert_eq!(engine.withdrawals().await.len(), 1);

        assert!(matches!(
            engine.withdraw(request).await,
            Err(EngineError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_until_cleared() {
        let (engine, config) = connected().await;
        engine
            .fail(Operation::GetRouterConfig, EngineError::Transport("down".into()))
            .await;
        assert!(engine.get_router_config(&config.router_identifier).await.is_err());
        engine.clear_failure(Operation::GetRouterConfig).await;
        let router_config = engine
            .get_router_config(&config.router_identifier)
            .await
            .unwrap();
        assert!(router_config.supports(&config.swap_pair()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_call_until_removed() {
        let (engine, config) = connected().await;
        engine
            .set_latency(Operation::GetRouterConfig, Duration::from_secs(5))
            .await;

        let started = tokio::time::Instant::now();
        engine.get_router_config(&config.router_identifier).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));

        engine
            .set_latency(Operation::GetRouterConfig, Duration::ZERO)
            .await;
        let started = tokio::time::Instant::now();
        engine.get_router_config(&config.router_identifier).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
