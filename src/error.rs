use crate::domain::channel::{Address, AssetId, ChainId, PublicIdentifier};
use crate::domain::balance::Balance;
use crate::domain::session::SessionId;
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the channel engine and chain reader ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("not connected")]
    NotConnected,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures of a single event wait.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("no matching event within {0:?}")]
    Timeout(Duration),
    #[error("event stream closed")]
    Closed,
}

#[derive(Error, Diagnostic, Debug)]
pub enum TransferError {
    #[error("could not connect to the channel engine: {0}")]
    #[diagnostic(code(channel_bridge::connection))]
    Connection(#[source] EngineError),

    #[error("channel engine storage is not available: {0}")]
    #[diagnostic(
        code(channel_bridge::storage_unavailable),
        help(
            "the engine keeps channel state in local storage; allow persistent storage (disable shields, ad blockers or private mode) and try again"
        )
    )]
    StorageUnavailable(String),

    #[error("{operation} failed: {source}")]
    #[diagnostic(code(channel_bridge::engine_call))]
    EngineCall {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("no updates within {}s for session {session_id}", .after.as_secs())]
    #[diagnostic(code(channel_bridge::timeout))]
    Timeout { session_id: SessionId, after: Duration },

    #[error("timed out after {0:?} waiting for an engine event")]
    #[diagnostic(code(channel_bridge::event_timeout))]
    EventTimeout(Duration),

    #[error("engine event stream closed")]
    #[diagnostic(code(channel_bridge::event_stream_closed))]
    EventStreamClosed,

    #[error(
        "transfer was cancelled, funds are preserved in the state channel, please refresh and try again"
    )]
    #[diagnostic(code(channel_bridge::cancelled))]
    CancelledByCounterparty { session_id: SessionId },

    #[error("balance exists in both channels (deposit: {deposit}, withdraw: {withdraw})")]
    #[diagnostic(
        code(channel_bridge::ambiguous_state),
        help("withdraw from both channels manually before starting a new transfer")
    )]
    AmbiguousState { deposit: Balance, withdraw: Balance },

    #[error("router {router} does not support swapping {from_asset} on chain {from_chain} to {to_asset} on chain {to_chain}")]
    #[diagnostic(code(channel_bridge::unsupported_route))]
    UnsupportedRoute {
        router: PublicIdentifier,
        from_chain: ChainId,
        from_asset: AssetId,
        to_chain: ChainId,
        to_asset: AssetId,
    },

    #[error("a transfer session is already active for deposit address {0}")]
    #[diagnostic(code(channel_bridge::session_active))]
    SessionActive(Address),

    #[error("invalid amount: {0}")]
    #[diagnostic(code(channel_bridge::invalid_amount))]
    InvalidAmount(String),

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(channel_bridge::config))]
    Config(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(channel_bridge::config))]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn engine(operation: &'static str, source: EngineError) -> Self {
        Self::EngineCall { operation, source }
    }
}

impl From<WaitError> for TransferError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout(after) => Self::EventTimeout(after),
            WaitError::Closed => Self::EventStreamClosed,
        }
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
