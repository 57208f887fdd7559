//! Domain model: balances, channels, transfer sessions and the ports through
//! which the external channel engine and chain are reached.

pub mod balance;
pub mod channel;
pub mod ports;
pub mod session;
pub mod transfer;
