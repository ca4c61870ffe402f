//! Persistent round and bet records.
//!
//! Key layout:
//! - `round:record:{id}`                      round JSON
//! - `round:state:{state}:{kind}:{id}`        index of rounds by current state
//! - `round:history:{kind}:` inv_ms(be) id    terminal rounds, newest first
//! - `round:bet:{round}:{seq:010}`            bets in placement order
//! - `round:current:{kind}`                   id of the live wheel/pot round
//!
//! Writes go through a `LedgerTxn` so round changes commit together with the
//! balance and item movements they describe.

use crate::common::types::{GameKind, RoundId};
use crate::errors::{StorageError, TransitionError, WagerError, WagerResult};
use crate::games::types::Bet;
use crate::ledger::LedgerTxn;
use crate::round::{Round, RoundState};
use crate::storage::KvRead;
use serde::de::DeserializeOwned;

const ROUND_RECORD_PREFIX: &str = "round:record:";
const ROUND_STATE_PREFIX: &str = "round:state:";
const ROUND_HISTORY_PREFIX: &str = "round:history:";
const BET_PREFIX: &str = "round:bet:";
const CURRENT_ROUND_PREFIX: &str = "round:current:";

fn round_key(id: &RoundId) -> Vec<u8> {
    format!("{}{}", ROUND_RECORD_PREFIX, id).into_bytes()
}

fn state_prefix(state: RoundState, kind: Option<GameKind>) -> Vec<u8> {
    match kind {
        Some(kind) => format!("{}{}:{}:", ROUND_STATE_PREFIX, state, kind).into_bytes(),
        None => format!("{}{}:", ROUND_STATE_PREFIX, state).into_bytes(),
    }
}

fn state_index_key(state: RoundState, kind: GameKind, id: &RoundId) -> Vec<u8> {
    let mut key = state_prefix(state, Some(kind));
    key.extend_from_slice(id.to_string().as_bytes());
    key
}

fn history_prefix(kind: GameKind) -> Vec<u8> {
    format!("{}{}:", ROUND_HISTORY_PREFIX, kind).into_bytes()
}

fn history_key(round: &Round) -> Vec<u8> {
    // Newest first: inverted end time as the primary sort key.
    // Key layout: prefix | inv_millis(be) | round id
    let ended = round
        .settled_at
        .or(round.cancelled_at)
        .unwrap_or(round.created_at)
        .timestamp_millis()
        .max(0) as u64;
    let inv = u64::MAX - ended;
    let mut key = history_prefix(round.kind);
    key.extend_from_slice(&inv.to_be_bytes());
    key.extend_from_slice(round.id.0.as_bytes());
    key
}

fn bet_prefix(round_id: &RoundId) -> Vec<u8> {
    format!("{}{}:", BET_PREFIX, round_id).into_bytes()
}

fn bet_key(round_id: &RoundId, seq: u32) -> Vec<u8> {
    format!("{}{}:{:010}", BET_PREFIX, round_id, seq).into_bytes()
}

fn current_key(kind: GameKind) -> Vec<u8> {
    format!("{}{}", CURRENT_ROUND_PREFIX, kind).into_bytes()
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StorageError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
}

fn id_from_index_key(key: &[u8], prefix_len: usize) -> Option<RoundId> {
    let raw = std::str::from_utf8(key.get(prefix_len..)?).ok()?;
    raw.parse().ok().map(RoundId)
}

pub fn load_round<R: KvRead + ?Sized>(reader: &R, id: &RoundId) -> WagerResult<Option<Round>> {
    match reader.read(&round_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, &format!("round {}", id))?)),
        None => Ok(None),
    }
}

pub fn require_round<R: KvRead + ?Sized>(reader: &R, id: &RoundId) -> WagerResult<Round> {
    load_round(reader, id)?.ok_or_else(|| TransitionError::RoundNotFound(*id).into())
}

/// Load a round for a conditional write. Fails if another writer moved it on.
pub fn load_for_update(txn: &LedgerTxn<'_>, id: &RoundId, expected: RoundState) -> WagerResult<Round> {
    let round = require_round(txn, id)?;
    if round.state != expected {
        return Err(TransitionError::StateConflict {
            expected,
            actual: round.state,
        }
        .into());
    }
    Ok(round)
}

pub fn insert_round(txn: &mut LedgerTxn<'_>, round: &mut Round) -> WagerResult<()> {
    round.version = 1;
    txn.put_json(round_key(&round.id), round)?;
    txn.put_raw(state_index_key(round.state, round.kind, &round.id), Vec::new());
    tracing::debug!(round_id = %round.id, game = %round.kind, state = %round.state, "Round created");
    Ok(())
}

/// Persist `round`, keeping the state and history indexes in step.
/// `previous` is the state the round was loaded in.
pub fn update_round(txn: &mut LedgerTxn<'_>, previous: RoundState, round: &mut Round) -> WagerResult<()> {
    round.version += 1;
    txn.put_json(round_key(&round.id), round)?;

    if previous != round.state {
        txn.delete(state_index_key(previous, round.kind, &round.id));
        txn.put_raw(state_index_key(round.state, round.kind, &round.id), Vec::new());
        if round.state.is_terminal() {
            txn.put_raw(history_key(round), Vec::new());
        }
        tracing::debug!(
            round_id = %round.id,
            game = %round.kind,
            from = %previous,
            to = %round.state,
            version = round.version,
            "Round state changed"
        );
    }
    Ok(())
}

pub fn put_bet(txn: &mut LedgerTxn<'_>, bet: &Bet) -> WagerResult<()> {
    txn.put_json(bet_key(&bet.round_id, bet.seq), bet)
}

/// Bets of a round in placement order
pub fn load_bets<R: KvRead + ?Sized>(reader: &R, round_id: &RoundId) -> WagerResult<Vec<Bet>> {
    reader
        .scan(&bet_prefix(round_id))?
        .into_iter()
        .map(|(_, bytes)| decode::<Bet>(&bytes, "bet").map_err(WagerError::from))
        .collect()
}

/// Ids of rounds currently in `state`, optionally for one game
pub fn rounds_in_state<R: KvRead + ?Sized>(
    reader: &R,
    state: RoundState,
    kind: Option<GameKind>,
) -> WagerResult<Vec<RoundId>> {
    let prefix = state_prefix(state, kind);
    let mut ids = Vec::new();
    for (key, _) in reader.scan(&prefix)? {
        // The kind segment is variable length when scanning across games
        let id = match kind {
            Some(_) => id_from_index_key(&key, prefix.len()),
            None => key
                .iter()
                .rposition(|b| *b == b':')
                .and_then(|pos| id_from_index_key(&key, pos + 1)),
        };
        match id {
            Some(id) => ids.push(id),
            None => tracing::warn!(key = %String::from_utf8_lossy(&key), "Skipping malformed state index key"),
        }
    }
    Ok(ids)
}

/// Every round that has not reached a terminal state
pub fn active_rounds<R: KvRead + ?Sized>(reader: &R, kind: Option<GameKind>) -> WagerResult<Vec<RoundId>> {
    let mut ids = Vec::new();
    for state in RoundState::ALL.iter().filter(|s| !s.is_terminal()) {
        ids.extend(rounds_in_state(reader, *state, kind)?);
    }
    Ok(ids)
}

/// Terminal rounds of a game, newest first
pub fn load_history<R: KvRead + ?Sized>(reader: &R, kind: GameKind, limit: usize) -> WagerResult<Vec<Round>> {
    let prefix = history_prefix(kind);
    let mut rounds = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;

    while rounds.len() < limit {
        let want = limit - rounds.len();
        let page = reader.scan_page(&prefix, cursor.as_deref(), want)?;
        let exhausted = page.len() < want;
        cursor = page.last().map(|(key, _)| key.clone());

        for (key, _) in page {
            let Some(id_bytes) = key.get(prefix.len() + 8..) else {
                continue;
            };
            let Ok(uuid) = uuid::Uuid::from_slice(id_bytes) else {
                tracing::warn!("Skipping malformed history key");
                continue;
            };
            if let Some(round) = load_round(reader, &RoundId(uuid))? {
                rounds.push(round);
            }
        }
        if exhausted || cursor.is_none() {
            break;
        }
    }
    Ok(rounds)
}

pub fn set_current(txn: &mut LedgerTxn<'_>, kind: GameKind, id: &RoundId) -> WagerResult<()> {
    txn.put_json(current_key(kind), id)
}

pub fn current_round_id<R: KvRead + ?Sized>(reader: &R, kind: GameKind) -> WagerResult<Option<RoundId>> {
    match reader.read(&current_key(kind))? {
        Some(bytes) => Ok(Some(decode(&bytes, "current round pointer")?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::fairness::outcome::commitment_hash;
    use crate::ledger::LedgerGateway;
    use crate::storage::{KvBackend, MemoryStorage, WriteOp};
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn new_round(kind: GameKind) -> Round {
        Round::new(
            kind,
            GameConfig::default_for(kind),
            "seed".into(),
            commitment_hash("seed"),
            Utc::now(),
        )
    }

    #[test]
    fn test_state_index_follows_transitions() {
        let gateway = LedgerGateway::new(Arc::new(MemoryStorage::new()));
        let mut round = new_round(GameKind::Pot);
        let id = round.id;

        gateway.with_transaction(|txn| insert_round(txn, &mut round)).unwrap();
        let store = gateway.store().as_ref();
        assert_eq!(rounds_in_state(store, RoundState::Waiting, None).unwrap(), vec![id]);
        assert_eq!(
            rounds_in_state(store, RoundState::Waiting, Some(GameKind::Pot)).unwrap(),
            vec![id]
        );
        assert!(rounds_in_state(store, RoundState::Waiting, Some(GameKind::Wheel))
            .unwrap()
            .is_empty());

        gateway
            .with_transaction(|txn| {
                let mut round = load_for_update(txn, &id, RoundState::Waiting)?;
                round.transition(RoundState::Open, Utc::now())?;
                update_round(txn, RoundState::Waiting, &mut round)
            })
            .unwrap();

        assert!(rounds_in_state(store, RoundState::Waiting, None).unwrap().is_empty());
        assert_eq!(active_rounds(store, None).unwrap(), vec![id]);
        assert_eq!(load_round(store, &id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_conditional_load_detects_conflict() {
        let gateway = LedgerGateway::new(Arc::new(MemoryStorage::new()));
        let mut round = new_round(GameKind::Wheel);
        let id = round.id;
        gateway.with_transaction(|txn| insert_round(txn, &mut round)).unwrap();

        let err = gateway
            .with_transaction(|txn| load_for_update(txn, &id, RoundState::Open).map(|_| ()))
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");

        let missing = gateway
            .with_transaction(|txn| require_round(txn, &RoundId::new()).map(|_| ()))
            .unwrap_err();
        assert_eq!(missing.code(), "ROUND_NOT_FOUND");
    }

    #[test]
    fn test_history_is_newest_first() {
        let gateway = LedgerGateway::new(Arc::new(MemoryStorage::new()));
        let start = Utc::now();
        let mut ids = Vec::new();

        for i in 0..3 {
            let mut round = new_round(GameKind::Wheel);
            ids.push(round.id);
            gateway
                .with_transaction(|txn| {
                    insert_round(txn, &mut round)?;
                    round.transition(RoundState::Cancelled, start + Duration::seconds(i))?;
                    update_round(txn, RoundState::Waiting, &mut round)
                })
                .unwrap();
        }

        let history = load_history(gateway.store().as_ref(), GameKind::Wheel, 2).unwrap();
        let got: Vec<RoundId> = history.iter().map(|r| r.id).collect();
        assert_eq!(got, vec![ids[2], ids[1]]);
        assert!(load_history(gateway.store().as_ref(), GameKind::Pot, 10).unwrap().is_empty());
    }

    /// Memory store that counts rows handed out by prefix scans
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStorage,
        scanned: AtomicUsize,
    }

    impl KvBackend for CountingStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn scan_prefix(
            &self,
            prefix: &[u8],
            start_after: Option<&[u8]>,
            limit: usize,
        ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
            let rows = self.inner.scan_prefix(prefix, start_after, limit)?;
            self.scanned.fetch_add(rows.len(), Ordering::SeqCst);
            Ok(rows)
        }

        fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
            self.inner.write_batch(ops)
        }
    }

    #[test]
    fn test_history_reads_only_requested_rows() {
        let store = Arc::new(CountingStore::default());
        let gateway = LedgerGateway::new(store.clone());
        let start = Utc::now();

        for i in 0..20 {
            let mut round = new_round(GameKind::Pot);
            gateway
                .with_transaction(|txn| {
                    insert_round(txn, &mut round)?;
                    round.transition(RoundState::Cancelled, start + Duration::seconds(i))?;
                    update_round(txn, RoundState::Waiting, &mut round)
                })
                .unwrap();
        }

        store.scanned.store(0, Ordering::SeqCst);
        let history = load_history(store.as_ref(), GameKind::Pot, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(store.scanned.load(Ordering::SeqCst), 3);

        store.scanned.store(0, Ordering::SeqCst);
        assert_eq!(load_history(store.as_ref(), GameKind::Pot, 50).unwrap().len(), 20);
        assert_eq!(store.scanned.load(Ordering::SeqCst), 20);
    }
}
