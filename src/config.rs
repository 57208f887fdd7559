use crate::application::events::DEFAULT_EVENT_CAPACITY;
use crate::domain::channel::{Address, AssetId, ChainId, PublicIdentifier, SwapPair};
use crate::domain::ports::ConnectParams;
use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One side of the transfer: where funds enter or leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLeg {
    pub chain_id: ChainId,
    pub provider_url: String,
    pub asset_id: AssetId,
}

/// Bounds on the orchestrator's waits, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// A phase that has not advanced after this long fails the session.
    pub stall_ms: u64,
    /// How long to wait for the router to reclaim its sender-side transfer.
    pub reclaim_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stall_ms: 30_000,
            reclaim_ms: 45_000,
            poll_interval_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn stall(&self) -> Duration {
        Duration::from_millis(self.stall_ms)
    }

    pub fn reclaim(&self) -> Duration {
        Duration::from_millis(self.reclaim_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// Coordinates of one cross-chain transfer flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    pub router_identifier: PublicIdentifier,
    pub deposit: ChainLeg,
    pub withdraw: ChainLeg,
    pub withdrawal_address: Address,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl TransferConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the event stream and the poller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(TransferError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(TransferError::InvalidConfig(
                "timeouts.poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            router: self.router_identifier.clone(),
            deposit_chain_id: self.deposit.chain_id,
            withdraw_chain_id: self.withdraw.chain_id,
            deposit_provider_url: self.deposit.provider_url.clone(),
            withdraw_provider_url: self.withdraw.provider_url.clone(),
        }
    }

    pub fn swap_pair(&self) -> SwapPair {
        SwapPair {
            from_chain_id: self.deposit.chain_id,
            from_asset_id: self.deposit.asset_id.clone(),
            to_chain_id: self.withdraw.chain_id,
            to_asset_id: self.withdraw.asset_id.clone(),
        }
    }
}
