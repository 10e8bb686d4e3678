#![allow(non_snake_case)]

use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use pool_session::{
    PoolError,
    amount::Amount,
    client::{
        ActiveConnection,
        AppController,
        CancelToken,
    },
    connection::SessionTransport,
    estimate::{
        Cadence,
        DrawingSchedule,
    },
    identity::SessionMetadata,
    store::SessionStore,
    test_helpers::{
        FakeChain,
        StaticIdentity,
        test_addresses,
        test_config,
        test_now,
        test_proxy,
        test_user,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};

// Hardhat account #0
const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn metadata() -> SessionMetadata {
    SessionMetadata {
        email: Some("saver@example.com".to_string()),
        public_address: test_user(),
    }
}

fn controller(identity: StaticIdentity) -> AppController<StaticIdentity> {
    AppController::new(test_config(), identity, Arc::new(SessionStore::new()))
}

/// Controller whose schedule has drawings after the wall clock, for `watch`.
fn live_controller(identity: StaticIdentity) -> AppController<StaticIdentity> {
    let mut config = test_config();
    config.schedule = DrawingSchedule::recurring(
        Utc::now() + chrono::Duration::hours(1),
        Cadence::Weekly,
        4,
    );
    AppController::new(config, identity, Arc::new(SessionStore::new()))
}

#[tokio::test]
async fn sync_session__logged_in_user_gets_proxy_and_balances_in_the_store() {
    // given
    let app = controller(StaticIdentity::logged_in(test_user(), Some("saver@example.com")));
    let chain = FakeChain::funded(&test_addresses());
    let cancel = CancelToken::new();

    // when
    let data = app
        .sync_session(&chain, Some(&metadata()), &cancel)
        .await
        .unwrap();

    // then
    assert!(data.session.is_authenticated);
    assert_eq!(data.session.public_address, Some(test_user()));
    assert_eq!(data.binding.and_then(|b| b.proxy), Some(test_proxy()));
    let balances = data.balances.clone().unwrap();
    assert_eq!(balances.total_balance, Amount::from_whole(140));
    assert_eq!(app.store().view().session, Some(data));
}

#[tokio::test]
async fn sync_session__user_without_proxy_has_no_balances() {
    // given
    let addresses = test_addresses();
    let app = controller(StaticIdentity::logged_in(test_user(), None));
    let chain = FakeChain::funded(&addresses).with_proxy(&addresses, None);

    // when
    let data = app
        .sync_session(&chain, Some(&metadata()), &CancelToken::new())
        .await
        .unwrap();

    // then
    let binding = data.binding.unwrap();
    assert!(!binding.is_deployed());
    assert!(data.balances.is_none());
}

#[tokio::test]
async fn sync_session__logged_out_skips_the_chain_entirely() {
    let app = controller(StaticIdentity::logged_out());
    let chain = FakeChain::new(&test_addresses());

    let data = app
        .sync_session(&chain, None, &CancelToken::new())
        .await
        .unwrap();

    assert!(!data.session.is_authenticated);
    assert!(data.binding.is_none());
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn sync_pool__stores_snapshot_and_estimate() {
    // given
    let app = controller(StaticIdentity::logged_out());
    let chain = FakeChain::funded(&test_addresses()).with_block(777);

    // when
    let data = app
        .sync_pool(&chain, test_now(), &CancelToken::new())
        .await
        .unwrap();

    // then
    let estimate = &data.estimate;
    assert_eq!(estimate.sponsored_amount, Amount::from_whole(50));
    assert_eq!(estimate.sponsorship_deficit, None);
    assert_eq!(estimate.total_earning_interest, Amount::from_whole(900));
    // 100 Dai of interest less the 10% draw fee
    assert_eq!(estimate.accrued_prize, Amount::from_whole(90));
    assert!(estimate.estimated_prize > estimate.accrued_prize);
    // one hour at 15s blocks
    assert_eq!(estimate.remaining_blocks.blocks, 240);
    assert_eq!(app.store().view().pool.unwrap().snapshot.block_number, 777);
}

#[tokio::test]
async fn sync_pool__exhausted_schedule_leaves_the_store_untouched() {
    // given
    let mut config = test_config();
    config.schedule = DrawingSchedule::new(Vec::new());
    let app = AppController::new(
        config,
        StaticIdentity::logged_out(),
        Arc::new(SessionStore::new()),
    );
    let chain = FakeChain::funded(&test_addresses());

    // when
    let err = app
        .sync_pool(&chain, test_now(), &CancelToken::new())
        .await
        .unwrap_err();

    // then
    assert!(matches!(err, PoolError::ScheduleExhausted { .. }));
    assert!(app.store().view().pool.is_none());
}

#[tokio::test]
async fn sync_pool__cancelled_flow_does_not_write() {
    // given
    let app = controller(StaticIdentity::logged_out());
    let chain = FakeChain::funded(&test_addresses());
    let cancel = CancelToken::new();
    cancel.cancel();

    // when
    let err = app.sync_pool(&chain, test_now(), &cancel).await.unwrap_err();

    // then
    assert!(matches!(err, PoolError::Cancelled));
    assert!(app.store().view().pool.is_none());
}

#[tokio::test]
async fn sync_pool__decode_failure_keeps_the_previous_snapshot() {
    // given
    let addresses = test_addresses();
    let app = controller(StaticIdentity::logged_out());
    let healthy = FakeChain::funded(&addresses).with_block(1);
    let broken = FakeChain::funded(&addresses).dropping_payloads(2);
    let cancel = CancelToken::new();
    app.sync_pool(&healthy, test_now(), &cancel).await.unwrap();

    // when
    let err = app.sync_pool(&broken, test_now(), &cancel).await.unwrap_err();

    // then
    assert!(matches!(err, PoolError::Decode { .. }));
    assert_eq!(app.store().view().pool.unwrap().snapshot.block_number, 1);
}

#[tokio::test]
async fn connect__logged_out_builds_the_default_connection() {
    // given
    let identity = StaticIdentity::logged_out();
    let app = controller(identity);

    // when
    let active = app.connect().await.unwrap();

    // then
    assert!(matches!(active, ActiveConnection::Anonymous(_)));
    assert!(active.metadata().is_none());
    assert!(matches!(
        active.signer(),
        Err(PoolError::AuthUnavailable(_))
    ));
    assert_eq!(app.identity().preloads(), 1);
}

#[tokio::test]
async fn connect__logged_in_without_transport_is_auth_unavailable() {
    let app = controller(StaticIdentity::logged_in(test_user(), None));

    let result = app.connect().await;

    assert!(matches!(result, Err(PoolError::AuthUnavailable(_))));
}

#[tokio::test]
async fn connect__logged_in_binds_the_session_signer() {
    // given
    let signer: PrivateKeySigner = TEST_KEY.parse().unwrap();
    let address = signer.address();
    let transport = SessionTransport {
        rpc_url: "http://127.0.0.1:1".parse().unwrap(),
        signer,
    };
    let app = controller(StaticIdentity::logged_out().with_transport(transport));

    // when
    let active = app.connect().await.unwrap();

    // then
    assert_eq!(active.metadata().map(|m| m.public_address), Some(address));
    assert!(active.signer().is_ok());
}

#[tokio::test]
async fn logout__clears_a_synced_session() {
    // given
    let app = controller(StaticIdentity::logged_in(test_user(), None));
    let chain = FakeChain::funded(&test_addresses());
    let cancel = CancelToken::new();
    app.sync_session(&chain, Some(&metadata()), &cancel)
        .await
        .unwrap();

    // when
    app.store().logout();

    // then
    assert!(app.store().view().session.is_none());
}

#[tokio::test]
async fn watch_with__delivers_an_update_on_every_tick() {
    // given
    let app = live_controller(StaticIdentity::logged_out());
    let chain = FakeChain::funded(&test_addresses());
    let cancel = CancelToken::new();
    let mut updates = 0;

    // when
    let result = app
        .watch_with(&chain, None, &cancel, |_| {
            updates += 1;
            if updates == 3 {
                cancel.cancel();
            }
        })
        .await;

    // then
    assert!(result.is_ok());
    assert_eq!(updates, 3);
    assert!(app.store().view().pool.is_some());
}

#[tokio::test]
async fn watch_with__failed_tick_is_reported_and_the_next_tick_succeeds() {
    // given
    let app = live_controller(StaticIdentity::logged_out());
    let chain = FakeChain::funded(&test_addresses()).failing_next_aggregates(1);
    let cancel = CancelToken::new();
    let mut updates = 0;

    // when
    let result = app
        .watch_with(&chain, None, &cancel, |_| {
            updates += 1;
            cancel.cancel();
        })
        .await;

    // then
    assert!(result.is_ok());
    assert_eq!(updates, 1);
    // failed first batch, then the two batches of a full snapshot
    assert_eq!(chain.calls().len(), 3);
}

#[tokio::test]
async fn watch_with__cancel_ends_the_loop_cleanly() {
    // given
    let app = live_controller(StaticIdentity::logged_in(test_user(), None));
    let chain = FakeChain::funded(&test_addresses());
    let cancel = CancelToken::new();
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    };

    // when
    let metadata = metadata();
    let (result, ()) = tokio::join!(
        app.watch_with(&chain, Some(&metadata), &cancel, |_| {}),
        canceller
    );

    // then
    assert!(result.is_ok());
    assert!(cancel.is_cancelled());
    assert!(app.store().view().session.is_some());
}
