#![allow(dead_code)]

use async_trait::async_trait;
use channel_bridge::config::TransferConfig;
use channel_bridge::domain::balance::{Amount, Balance};
use channel_bridge::domain::channel::{Address, AssetId, ChainId, PublicIdentifier};
use channel_bridge::domain::ports::{ChainReader, ChannelEngine, SharedChainReader, SharedEngine};
use channel_bridge::error::EngineError;
use channel_bridge::infrastructure::in_memory::{InMemoryEngine, RouterSim};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEPOSIT_CHAIN: ChainId = ChainId(1);
pub const WITHDRAW_CHAIN: ChainId = ChainId(137);

pub const CONFIG_JSON: &str = r#"{
    "router_identifier": "router",
    "deposit": { "chain_id": 1, "provider_url": "http://localhost:8545", "asset_id": "0xaaa" },
    "withdraw": { "chain_id": 137, "provider_url": "http://localhost:8546", "asset_id": "0xbbb" },
    "withdrawal_address": "0xrecipient"
}"#;

pub fn config() -> TransferConfig {
    TransferConfig::from_json(CONFIG_JSON).unwrap()
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub fn user() -> PublicIdentifier {
    PublicIdentifier::new("user")
}

pub struct Harness {
    pub engine: InMemoryEngine,
    pub config: TransferConfig,
}

impl Harness {
    pub async fn new(router: RouterSim) -> Self {
        let config = config();
        let engine = InMemoryEngine::for_config(&config, user(), Balance::new(Decimal::from(1_000)));
        engine.set_router(router).await;
        Self { engine, config }
    }

    pub async fn connected(router: RouterSim) -> Self {
        let harness = Self::new(router).await;
        harness
            .engine
            .connect(&harness.config.connect_params())
            .await
            .unwrap();
        harness
    }

    pub fn shared(&self) -> SharedEngine {
        Arc::new(self.engine.clone())
    }

    pub fn chain(&self) -> SharedChainReader {
        Arc::new(self.engine.clone())
    }

    pub fn deposit_asset(&self) -> &AssetId {
        &self.config.deposit.asset_id
    }

    pub fn withdraw_asset(&self) -> &AssetId {
        &self.config.withdraw.asset_id
    }

    pub fn deposit_address(&self) -> Address {
        Address::new(format!("0xchannel-{DEPOSIT_CHAIN}"))
    }

    pub fn withdraw_address(&self) -> Address {
        Address::new(format!("0xchannel-{WITHDRAW_CHAIN}"))
    }

    /// Funds the deposit channel address on-chain, not yet reconciled.
    pub async fn deposit_onchain(&self, value: Decimal) {
        self.engine
            .deposit_onchain(&self.deposit_address(), self.deposit_asset(), amount(value))
            .await;
    }
}

/// Chain reader replaying a fixed list of answers; the last one repeats.
pub struct ScriptedChain {
    answers: Mutex<VecDeque<Result<Balance, EngineError>>>,
    reads: AtomicUsize,
    delay: Duration,
}

impl ScriptedChain {
    pub fn new(answers: Vec<Result<Balance, EngineError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            reads: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    /// Like [`ScriptedChain::balances`], but every read takes `delay`.
    pub fn slow(values: &[i64], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(
                values
                    .iter()
                    .map(|v| Ok(Balance::new(Decimal::from(*v))))
                    .collect(),
            ),
            reads: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn balances(values: &[i64]) -> Arc<Self> {
        Self::new(
            values
                .iter()
                .map(|v| Ok(Balance::new(Decimal::from(*v))))
                .collect(),
        )
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn total_deposits(
        &self,
        _address: &Address,
        _asset_id: &AssetId,
    ) -> Result<Balance, EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            answers.pop_front().unwrap()
        } else {
            answers.front().cloned().unwrap()
        }
    }
}
