mod common;

use channel_bridge::application::bootstrap::{ReadyCallback, ReadyChannels, Resume, SessionBootstrapper};
use channel_bridge::domain::balance::Balance;
use channel_bridge::domain::channel::{Party, RouterConfig};
use channel_bridge::domain::ports::ChannelEngine;
use channel_bridge::domain::session::SessionId;
use channel_bridge::domain::transfer::TransferMeta;
use channel_bridge::error::{EngineError, TransferError};
use channel_bridge::infrastructure::in_memory::{Operation, RouterSim};
use common::{amount, Harness, DEPOSIT_CHAIN, WITHDRAW_CHAIN};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

fn bootstrapper(harness: &Harness) -> SessionBootstrapper {
    SessionBootstrapper::new(harness.shared(), Arc::new(harness.config.clone()))
}

async fn stage(harness: &Harness, deposit: rust_decimal::Decimal, withdraw: rust_decimal::Decimal) {
    harness
        .engine
        .set_offchain_balance(DEPOSIT_CHAIN, harness.deposit_asset(), Party::Bob, Balance::new(deposit))
        .await
        .unwrap();
    harness
        .engine
        .set_offchain_balance(WITHDRAW_CHAIN, harness.withdraw_asset(), Party::Bob, Balance::new(withdraw))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_balance_in_both_channels_is_ambiguous() {
    let harness = Harness::new(RouterSim::default()).await;
    stage(&harness, dec!(2), dec!(3)).await;

    let err = bootstrapper(&harness).bootstrap(None).await.unwrap_err();

    match err {
        TransferError::AmbiguousState { deposit, withdraw } => {
            assert_eq!(deposit, Balance::new(dec!(2)));
            assert_eq!(withdraw, Balance::new(dec!(3)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreconciled_deposit_resumes_transfer() {
    let harness = Harness::new(RouterSim::default()).await;
    harness.deposit_onchain(dec!(4)).await;

    let bootstrapped = bootstrapper(&harness).bootstrap(None).await.unwrap();

    match bootstrapped.resume {
        Resume::Transfer {
            amount: found,
            deposit_channel,
        } => {
            assert_eq!(found, amount(dec!(4)));
            assert_eq!(
                deposit_channel.balance_of(harness.deposit_asset(), Party::Bob),
                Balance::new(dec!(4))
            );
        }
        other => panic!("unexpected resume: {other:?}"),
    }
}

#[tokio::test]
async fn test_withdraw_side_balance_resumes_withdrawal() {
    let harness = Harness::new(RouterSim::default()).await;
    stage(&harness, dec!(0), dec!(6)).await;

    let bootstrapped = bootstrapper(&harness).bootstrap(None).await.unwrap();

    assert!(matches!(
        bootstrapped.resume,
        Resume::WithdrawOnly { amount: found, .. } if found == amount(dec!(6))
    ));
}

#[tokio::test]
async fn test_empty_channels_await_deposit() {
    let harness = Harness::new(RouterSim::default()).await;

    let bootstrapped = bootstrapper(&harness).bootstrap(None).await.unwrap();

    match bootstrapped.resume {
        Resume::AwaitDeposit { deposit_channel } => {
            assert_eq!(deposit_channel.channel_address, harness.deposit_address());
        }
        other => panic!("unexpected resume: {other:?}"),
    }
}

#[tokio::test]
async fn test_blocked_storage_is_reported_distinctly() {
    let harness = Harness::new(RouterSim::default()).await;
    harness.engine.set_storage_available(false).await;

    let err = bootstrapper(&harness).bootstrap(None).await.unwrap_err();

    assert!(matches!(err, TransferError::StorageUnavailable(_)));
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let harness = Harness::new(RouterSim::default()).await;
    harness
        .engine
        .fail(Operation::Connect, EngineError::Transport("refused".into()))
        .await;

    let err = bootstrapper(&harness).bootstrap(None).await.unwrap_err();

    assert!(matches!(err, TransferError::Connection(EngineError::Transport(_))));
}

#[tokio::test]
async fn test_unsupported_route_fails_before_funds_move() {
    let harness = Harness::new(RouterSim::default()).await;
    harness.deposit_onchain(dec!(4)).await;
    harness
        .engine
        .set_router_config(RouterConfig::default())
        .await;

    let err = bootstrapper(&harness).bootstrap(None).await.unwrap_err();

    assert!(matches!(err, TransferError::UnsupportedRoute { .. }));
    let deposit = harness.engine.channel_on(DEPOSIT_CHAIN).await.unwrap();
    assert_eq!(
        deposit.balance_of(harness.deposit_asset(), Party::Bob),
        Balance::ZERO
    );
}

#[tokio::test]
async fn test_stale_router_offers_are_cancelled() {
    let harness = Harness::connected(RouterSim::default()).await;
    let stale = harness
        .engine
        .inject_router_offer(
            WITHDRAW_CHAIN,
            harness.withdraw_asset(),
            amount(dec!(3)),
            TransferMeta::for_session(&SessionId::random()),
        )
        .await
        .unwrap();
    let untagged = harness
        .engine
        .inject_router_offer(
            WITHDRAW_CHAIN,
            harness.withdraw_asset(),
            amount(dec!(1)),
            TransferMeta::default(),
        )
        .await
        .unwrap();

    let bootstrapper = bootstrapper(&harness);
    bootstrapper.bootstrap(None).await.unwrap();

    let active = harness
        .engine
        .get_active_transfers(&harness.withdraw_address())
        .await
        .unwrap();
    let ids: Vec<_> = active.iter().map(|t| t.transfer_id.clone()).collect();
    assert_eq!(ids, vec![untagged]);
    assert!(harness.engine.get_transfer(&stale).await.unwrap().is_cancelled());

    // Nothing left to cancel the second time around.
    bootstrapper.bootstrap(None).await.unwrap();
}

#[tokio::test]
async fn test_ready_callback_receives_both_channels() {
    let harness = Harness::new(RouterSim::default()).await;
    let seen: Arc<Mutex<Vec<ReadyChannels>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let callback: ReadyCallback = Arc::new(move |channels: &ReadyChannels| sink.lock().unwrap().push(channels.clone()));

    bootstrapper(&harness).bootstrap(Some(&callback)).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![ReadyChannels {
            deposit: harness.deposit_address(),
            withdraw: harness.withdraw_address(),
        }]
    );
}
