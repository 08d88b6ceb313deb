//! End-to-end scenario tests: admission, the event pipeline, and revelation
//! driven through the broker over oracle fakes and a real RocksDB store.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use common::{MockAssets, MockChain, dutch_submission, fixed_submission, outpoint, spending_tx};
use veiling_core::oracle::ChainEvent;
use veiling_core::reveal::HiddenKind;
use veiling_core::store::ListingStore;
use veiling_core::types::ListingStatus;
use veiling_node::storage::RocksStore;
use veiling_node::{Broker, Config};

struct Env {
    broker: Arc<Broker>,
    chain: Arc<MockChain>,
    assets: Arc<MockAssets>,
    store: Arc<RocksStore>,
    _dir: tempfile::TempDir,
}

fn test_config() -> Config {
    Config {
        api_key: "secret".to_string(),
        bitcoin_rpc_host: "127.0.0.1".to_string(),
        bitcoin_rpc_port: 8332,
        bitcoin_rpc_user: "rpc".to_string(),
        bitcoin_rpc_password: "rpc".to_string(),
        zmq_block_url: "tcp://127.0.0.1:28332".to_string(),
        zmq_tx_url: "tcp://127.0.0.1:28333".to_string(),
        zmq_enabled: false,
        counterparty_host: "127.0.0.1".to_string(),
        counterparty_port: 4000,
        database_path: PathBuf::from("unused"),
        block_poll_interval_secs: 300,
        utxo_poll_interval_secs: 300,
        spend_scan_depth: 144,
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
    }
}

fn env(tip: u64) -> Env {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksStore::open(dir.path().join("listings")).unwrap());
    let chain = Arc::new(MockChain::new(tip));
    let assets = Arc::new(MockAssets::new());
    let broker = Arc::new(Broker::new(
        store.clone(),
        chain.clone(),
        assets.clone(),
        test_config(),
    ));
    Env { broker, chain, assets, store, _dir: dir }
}

/// Seed utxo `0x01:0` with an indivisible RAREPEPE and admit the S1-shaped
/// Dutch listing.
async fn admit_dutch(env: &Env) -> u64 {
    env.chain.add_utxo(outpoint(0x01, 0), 600, 3, Some("bc1qseller"));
    env.assets.bind(outpoint(0x01, 0), "RAREPEPE", "1", false);
    let listing = env.broker.admit(dutch_submission(outpoint(0x01, 0))).await.unwrap();
    assert_eq!(listing.status, ListingStatus::Upcoming);
    listing.id
}

fn status_of(env: &Env, id: u64) -> ListingStatus {
    env.store.get(id).unwrap().unwrap().status
}

#[tokio::test]
async fn dutch_auction_happy_path() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;

    // Nothing is revealed before the start.
    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    assert!(reveal.step.is_none());
    assert_eq!(reveal.kind, Some(HiddenKind::NotStarted));

    env.chain.set_tip(850_000);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, id), ListingStatus::Active);

    // Mid-auction the current block's step is exposed, and only that one.
    env.chain.set_tip(850_002);
    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    let step = reveal.step.unwrap();
    assert_eq!(step.block_number, 850_002);
    assert_eq!(step.price_sats, 80_000);

    // Past the end, the listing finishes and the final step stays
    // purchasable through the grace window.
    env.chain.set_tip(850_005);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, id), ListingStatus::Finished);
    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    let step = reveal.step.unwrap();
    assert_eq!(step.block_number, 850_004);
    assert_eq!(step.price_sats, 60_000);

    // Grace exhausted: expired, nothing revealed.
    env.chain.set_tip(850_149);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, id), ListingStatus::Expired);
    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    assert!(reveal.step.is_none());
    assert_eq!(reveal.kind, Some(HiddenKind::Expired));
}

#[tokio::test]
async fn fixed_price_listing_with_and_without_grace() {
    let env = env(899_999);
    env.chain.add_utxo(outpoint(0x01, 0), 600, 3, Some("bc1qseller"));
    env.assets.bind(outpoint(0x01, 0), "RAREPEPE", "1", false);
    env.chain.add_utxo(outpoint(0x02, 0), 600, 3, Some("bc1qseller"));
    env.assets.bind(outpoint(0x02, 0), "RAREPEPE", "1", false);

    let no_grace = env
        .broker
        .admit(fixed_submission(outpoint(0x01, 0), 900_000, 0))
        .await
        .unwrap()
        .id;
    let with_grace = env
        .broker
        .admit(fixed_submission(outpoint(0x02, 0), 900_000, 144))
        .await
        .unwrap()
        .id;

    env.chain.set_tip(900_000);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, no_grace), ListingStatus::Active);
    let reveal = env.broker.current_psbt(no_grace).await.unwrap().unwrap();
    assert_eq!(reveal.step.unwrap().price_sats, 50_000);

    env.chain.set_tip(900_001);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, no_grace), ListingStatus::Expired);
    let reveal = env.broker.current_psbt(no_grace).await.unwrap().unwrap();
    assert_eq!(reveal.kind, Some(HiddenKind::Expired));

    assert_eq!(status_of(&env, with_grace), ListingStatus::Finished);
    let reveal = env.broker.current_psbt(with_grace).await.unwrap().unwrap();
    assert_eq!(reveal.step.unwrap().block_number, 900_000);
}

#[tokio::test]
async fn matching_spend_classifies_as_sold() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;

    env.chain.set_tip(850_002);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, id), ListingStatus::Active);

    // An output matching the 80k step settles the auction.
    let tx = spending_tx(0xaa, 850_002, &[(80_000, Some("bc1qbuyer")), (2_000, Some("bc1qchange"))]);
    env.chain.spend(outpoint(0x01, 0), tx.clone());
    env.broker.sweep_spends().await;

    let listing = env.store.get(id).unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Sold);
    let spend = listing.spend.unwrap();
    assert_eq!(spend.txid, tx.txid);
    assert_eq!(spend.block_height, 850_002);
    assert_eq!(spend.recipient.as_deref(), Some("bc1qbuyer"));

    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    assert!(reveal.step.is_none());
    assert_eq!(reveal.kind, Some(HiddenKind::Sold));
}

#[tokio::test]
async fn non_matching_spend_classifies_as_closed() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;

    env.chain.set_tip(850_002);
    env.broker.sweep_blocks().await;

    let tx = spending_tx(0xbb, 850_002, &[(123_456, Some("bc1qelsewhere"))]);
    env.chain.spend(outpoint(0x01, 0), tx);
    env.broker.sweep_spends().await;

    let listing = env.store.get(id).unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Closed);
    assert_eq!(listing.spend.unwrap().recipient.as_deref(), Some("bc1qelsewhere"));

    let reveal = env.broker.current_psbt(id).await.unwrap().unwrap();
    assert_eq!(reveal.kind, Some(HiddenKind::Closed));
}

#[tokio::test]
async fn push_path_detects_spends_and_tolerates_duplicates() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;
    env.chain.set_tip(850_001);
    env.broker.sweep_blocks().await;

    let tx = spending_tx(0xcc, 850_001, &[(90_000, Some("bc1qbuyer"))]);
    env.chain.spend(outpoint(0x01, 0), tx);

    // A pushed tx event for an unwatched outpoint is a no-op.
    env.broker.handle_tx_inputs(&[outpoint(0x09, 2)]).await;
    assert_eq!(status_of(&env, id), ListingStatus::Active);

    env.broker.handle_tx_inputs(&[outpoint(0x01, 0)]).await;
    assert_eq!(status_of(&env, id), ListingStatus::Sold);

    // Redundant delivery (push again, then the poll sweep) changes nothing:
    // the store's progression check is the dedup.
    env.broker.handle_tx_inputs(&[outpoint(0x01, 0)]).await;
    env.broker.sweep_spends().await;
    let listing = env.store.get(id).unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Sold);
    assert_eq!(listing.spend.unwrap().recipient.as_deref(), Some("bc1qbuyer"));
}

#[tokio::test]
async fn spend_before_start_closes_an_upcoming_listing() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;

    let tx = spending_tx(0xdd, 849_999, &[(42, None)]);
    env.chain.spend(outpoint(0x01, 0), tx);
    env.broker.sweep_spends().await;

    let listing = env.store.get(id).unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Closed);
    assert!(listing.spend.unwrap().recipient.is_none());
}

#[tokio::test]
async fn transient_oracle_failure_skips_the_cycle() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;

    env.chain.set_tip(850_000);
    env.chain.set_transient_failure(true);
    env.broker.sweep_blocks().await;
    env.broker.sweep_spends().await;
    assert_eq!(status_of(&env, id), ListingStatus::Upcoming);

    // Next tick succeeds: eventual progress.
    env.chain.set_transient_failure(false);
    env.broker.sweep_blocks().await;
    assert_eq!(status_of(&env, id), ListingStatus::Active);
}

#[tokio::test]
async fn event_loop_processes_push_events_and_shuts_down() {
    let env = env(849_999);
    let id = admit_dutch(&env).await;
    env.chain.set_tip(850_000);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = tokio::spawn(env.broker.clone().run(event_rx, shutdown_rx));

    event_tx.send(ChainEvent::NewBlock).unwrap();
    // Give the loop a moment to drain the event.
    for _ in 0..50 {
        if status_of(&env, id) == ListingStatus::Active {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status_of(&env, id), ListingStatus::Active);

    shutdown_tx.send(true).unwrap();
    pipeline.await.unwrap();
}
