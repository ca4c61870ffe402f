//! Rounds survive a restart: RocksDB state is reopened and recovery resumes
//! each round at the stage it was stored in.

use chrono::Duration;
use std::sync::Arc;
use tempfile::tempdir;
use wagerline::common::traits::{Clock, ManualClock};
use wagerline::common::types::Party;
use wagerline::config::EngineConfig;
use wagerline::engine::WagerEngine;
use wagerline::fairness::local::LocalBeacon;
use wagerline::games::types::WheelSegment;
use wagerline::games::GameOrchestrator;
use wagerline::round::RoundState;
use wagerline::round_store;
use wagerline::storage::{KvBackend, RocksStorage};

fn open_engine(path: &std::path::Path, clock: Arc<ManualClock>) -> WagerEngine {
    let mut config = EngineConfig::development();
    config.storage.in_memory = false;
    config.storage.data_directory = path.to_string_lossy().into_owned();

    let store: Arc<dyn KvBackend> = Arc::new(RocksStorage::open(path).unwrap());
    let beacon = LocalBeacon::load_or_create(store.as_ref()).unwrap();
    WagerEngine::with_parts(config, store, Arc::new(beacon), clock).unwrap()
}

#[tokio::test]
async fn test_resolved_round_settles_after_restart_without_reroll() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let started = clock.now();

    let (round_id, outcome) = {
        let engine = open_engine(dir.path(), clock.clone());
        engine
            .gateway()
            .with_transaction(|txn| txn.adjust_balance("alice", 1_000))
            .unwrap();
        let view = engine.wheel().place_bet("alice", 250, WheelSegment::Pink).unwrap();

        clock.advance_secs(10);
        engine.wheel().tick().await.unwrap();
        clock.advance_secs(3);
        engine.wheel().tick().await.unwrap();

        let round = round_store::require_round(engine.gateway().store().as_ref(), &view.id).unwrap();
        assert_eq!(round.state, RoundState::Resolving);
        assert_eq!(engine.gateway().account("alice").unwrap().balance, 750);
        (view.id, round.outcome.unwrap())
    };

    // Come back well after the settle delay
    let clock = Arc::new(ManualClock::new(started + Duration::hours(1)));
    let engine = open_engine(dir.path(), clock);
    assert_eq!(engine.recover().await.unwrap(), 1);

    let store = engine.gateway().store().as_ref();
    let round = round_store::require_round(store, &round_id).unwrap();
    assert_eq!(round.state, RoundState::Settled);
    assert_eq!(round.outcome.as_ref(), Some(&outcome));

    let transfers = engine.gateway().transfers_for_round(&round_id).unwrap();
    let escrow_net: i64 = transfers
        .iter()
        .map(|t| match (&t.from, &t.to) {
            (_, Party::Escrow) => t.amount,
            (Party::Escrow, _) => -t.amount,
            _ => 0,
        })
        .sum();
    assert_eq!(escrow_net, 0);
    let paid = round.settlement.as_ref().unwrap().paid_to_winners;
    assert_eq!(engine.gateway().account("alice").unwrap().balance, 750 + paid);

    // Nothing left to resume, and a second pass writes nothing
    assert_eq!(engine.recover().await.unwrap(), 0);
    assert_eq!(engine.gateway().transfers_for_round(&round_id).unwrap().len(), transfers.len());
    assert_eq!(engine.wheel().history(5).unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_round_resumes_and_locks_after_restart() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());

    let round_id = {
        let engine = open_engine(dir.path(), clock.clone());
        engine
            .gateway()
            .with_transaction(|txn| txn.adjust_balance("bob", 500))
            .unwrap();
        engine.wheel().place_bet("bob", 100, WheelSegment::Black).unwrap().id
    };

    clock.advance_secs(10);
    let engine = open_engine(dir.path(), clock.clone());
    engine.recover().await.unwrap();

    let store = engine.gateway().store().as_ref();
    assert_eq!(round_store::require_round(store, &round_id).unwrap().state, RoundState::Locked);
    // Stakes stay reserved across the restart
    assert_eq!(engine.gateway().account("bob").unwrap().balance, 400);
    assert_eq!(
        engine.wheel().current_round_view().unwrap().map(|v| v.id),
        Some(round_id)
    );
}

#[test]
fn test_local_beacon_key_is_stable() {
    let dir = tempdir().unwrap();
    let first = {
        let store = RocksStorage::open(dir.path()).unwrap();
        LocalBeacon::load_or_create(&store).unwrap().public_key_hex()
    };
    let store = RocksStorage::open(dir.path()).unwrap();
    let second = LocalBeacon::load_or_create(&store).unwrap().public_key_hex();
    assert_eq!(first, second);
}
