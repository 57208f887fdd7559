use super::balance::Balance;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// An on-chain address (channel contract, withdrawal destination).
    Address
);
string_id!(
    /// Token contract address; the zero address denotes the native asset.
    AssetId
);
string_id!(
    /// Engine-level identity of a channel participant (user or router).
    PublicIdentifier
);
string_id!(TransferId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side of a channel. The router is always `Alice`, the local user `Bob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Alice,
    Bob,
}

/// Per-asset balance split between the two channel parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset_id: AssetId,
    pub alice: Balance,
    pub bob: Balance,
}

impl AssetBalance {
    pub fn of(&self, party: Party) -> Balance {
        match party {
            Party::Alice => self.alice,
            Party::Bob => self.bob,
        }
    }

    pub fn of_mut(&mut self, party: Party) -> &mut Balance {
        match party {
            Party::Alice => &mut self.alice,
            Party::Bob => &mut self.bob,
        }
    }
}

/// Point-in-time view of one bilateral channel, as reported by the engine.
///
/// Snapshots are never updated in place by this crate; callers re-fetch after
/// any mutating engine call because the engine is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_address: Address,
    pub chain_id: ChainId,
    pub alice_identifier: PublicIdentifier,
    pub bob_identifier: PublicIdentifier,
    pub balances: Vec<AssetBalance>,
    pub nonce: u64,
}

impl ChannelSnapshot {
    pub fn new(
        channel_address: Address,
        chain_id: ChainId,
        router: PublicIdentifier,
        user: PublicIdentifier,
    ) -> Self {
        Self {
            channel_address,
            chain_id,
            alice_identifier: router,
            bob_identifier: user,
            balances: Vec::new(),
            nonce: 0,
        }
    }

    /// Balance held by `party` for `asset_id`; zero when the asset is unknown.
    pub fn balance_of(&self, asset_id: &AssetId, party: Party) -> Balance {
        self.balances
            .iter()
            .find(|b| b.asset_id == *asset_id)
            .map(|b| b.of(party))
            .unwrap_or(Balance::ZERO)
    }

    pub fn asset_entry(&mut self, asset_id: &AssetId) -> &mut AssetBalance {
        let index = match self
            .balances
            .iter()
            .position(|b| b.asset_id == *asset_id)
        {
            Some(index) => index,
            None => {
                self.balances.push(AssetBalance {
                    asset_id: asset_id.clone(),
                    alice: Balance::ZERO,
                    bob: Balance::ZERO,
                });
                self.balances.len() - 1
            }
        };
        &mut self.balances[index]
    }

    /// Which party `identifier` is in this channel, if any.
    pub fn party_of(&self, identifier: &PublicIdentifier) -> Option<Party> {
        if *identifier == self.alice_identifier {
            Some(Party::Alice)
        } else if *identifier == self.bob_identifier {
            Some(Party::Bob)
        } else {
            None
        }
    }
}

/// One allowed (chain, asset) → (chain, asset) swap published by a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPair {
    pub from_chain_id: ChainId,
    pub from_asset_id: AssetId,
    pub to_chain_id: ChainId,
    pub to_asset_id: AssetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    pub supported_swaps: Vec<SwapPair>,
}

impl RouterConfig {
    pub fn supports(&self, pair: &SwapPair) -> bool {
        self.supported_swaps.iter().any(|s| s == pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn channel() -> ChannelSnapshot {
        ChannelSnapshot::new(
            Address::new("0xchannel"),
            ChainId(1),
            PublicIdentifier::new("router"),
            PublicIdentifier::new("user"),
        )
    }

    #[test]
    fn test_balance_of_unknown_asset_is_zero() {
        let channel = channel();
        assert_eq!(
            channel.balance_of(&AssetId::new("0xtoken"), Party::Bob),
            Balance::ZERO
        );
    }

    #[test]
    fn test_asset_entry_creates_once() {
        let mut channel = channel();
        let asset = AssetId::new("0xtoken");
        channel.asset_entry(&asset).bob += Balance::new(dec!(3));
        channel.asset_entry(&asset).bob += Balance::new(dec!(4));

        assert_eq!(channel.balances.len(), 1);
        assert_eq!(channel.balance_of(&asset, Party::Bob), Balance::new(dec!(7)));
        assert_eq!(channel.balance_of(&asset, Party::Alice), Balance::ZERO);
    }

    #[test]
    fn test_party_of() {
        let channel = channel();
        assert_eq!(
            channel.party_of(&PublicIdentifier::new("router")),
            Some(Party::Alice)
        );
        assert_eq!(
            channel.party_of(&PublicIdentifier::new("user")),
            Some(Party::Bob)
        );
        assert_eq!(channel.party_of(&PublicIdentifier::new("other")), None);
    }
}
