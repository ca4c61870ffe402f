//! Background driver that ticks every game on a fixed interval.
//!
//! All timing lives in round records, so a tick is always safe to repeat and a
//! restarted scheduler simply picks up where the last one left off.

use crate::games::GameOrchestrator;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct RoundScheduler {
    games: Vec<Arc<dyn GameOrchestrator>>,
    interval: Duration,
    running: Arc<AtomicBool>,
    passes: AtomicU64,
}

impl RoundScheduler {
    pub fn new(games: Vec<Arc<dyn GameOrchestrator>>, interval: Duration) -> Self {
        Self {
            games,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            passes: AtomicU64::new(0),
        }
    }

    /// Start ticking in the background
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            tracing::info!(
                games = self.games.len(),
                interval_ms = self.interval.as_millis() as u64,
                "Round scheduler started"
            );
            let mut tick = tokio::time::interval(self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                self.tick_once().await;
            }
            tracing::info!("Round scheduler stopped");
        })
    }

    /// One pass over every game. Games tick concurrently; a failing game
    /// does not hold up the others.
    pub async fn tick_once(&self) {
        let results = join_all(self.games.iter().map(|game| game.tick())).await;
        for (game, result) in self.games.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(game = %game.kind(), code = e.code(), "Game tick failed: {}", e);
            }
        }
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}
