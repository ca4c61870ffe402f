//! Round view cache
//!
//! Views are derived data. The store stays the single source of truth; an entry
//! is only served while its version stamp matches the round it was built from.

use crate::common::types::RoundId;
use crate::errors::WagerResult;
use crate::games::types::Bet;
use crate::round::{Round, RoundView};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub struct ViewCache {
    entries: Mutex<LruCache<RoundId, RoundView>>,
}

impl ViewCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// View of `round`, rebuilt when the cached copy is from an older version
    pub fn view<F>(&self, round: &Round, now: DateTime<Utc>, load_bets: F) -> WagerResult<RoundView>
    where
        F: FnOnce() -> WagerResult<Vec<Bet>>,
    {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(cached) = entries.get(&round.id) {
                if cached.version == round.version {
                    let mut view = cached.clone();
                    // Countdown depends on the caller's clock, not the version
                    view.seconds_until_lock = round
                        .lock_deadline
                        .filter(|_| round.state.accepts_bets())
                        .map(|d| (d - now).num_seconds().max(0));
                    return Ok(view);
                }
            }
        }

        let view = round.view(load_bets()?, now);
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(round.id, view.clone());
        }
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::GameKind;
    use crate::config::GameConfig;
    use crate::fairness::outcome::commitment_hash;
    use crate::round::RoundState;
    use std::cell::Cell;

    fn round() -> Round {
        Round::new(
            GameKind::Wheel,
            GameConfig::wheel(),
            "seed".into(),
            commitment_hash("seed"),
            Utc::now(),
        )
    }

    #[test]
    fn test_cache_hit_until_version_changes() {
        let cache = ViewCache::new(8);
        let mut round = round();
        round.version = 1;
        let loads = Cell::new(0);
        let loader = || {
            loads.set(loads.get() + 1);
            Ok(Vec::new())
        };

        cache.view(&round, Utc::now(), loader).unwrap();
        cache.view(&round, Utc::now(), loader).unwrap();
        assert_eq!(loads.get(), 1);

        round.transition(RoundState::Open, Utc::now()).unwrap();
        round.version = 2;
        let view = cache.view(&round, Utc::now(), loader).unwrap();
        assert_eq!(loads.get(), 2);
        assert_eq!(view.state, RoundState::Open);
        assert!(view.seconds_until_lock.is_some());
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = ViewCache::new(2);
        for _ in 0..3 {
            let round = round();
            cache.view(&round, Utc::now(), || Ok(Vec::new())).unwrap();
        }
        assert_eq!(cache.len(), 2);
    }
}
