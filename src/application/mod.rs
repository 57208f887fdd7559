//! Application layer: everything that drives a transfer session.
//!
//! The [`controller::TransferController`] is the entry point. It bootstraps,
//! then either resumes a pending transfer or watches for a deposit, and hands
//! each session to the [`orchestrator::TransferOrchestrator`].

pub mod board;
pub mod bootstrap;
pub mod controller;
pub mod events;
pub mod mirror;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
