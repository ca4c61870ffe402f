//! wagerline - round settlement engine for real-money games
//!
//! Drives coinflip, wheel and pot rounds through a provably fair lifecycle:
//! a server seed is committed when a round opens, combined with signed
//! external randomness once betting locks, and the resulting payout is
//! applied to balances and inventory in a single atomic ledger transaction.

pub mod common;
pub mod errors;
pub mod config;
pub mod storage;
pub mod ledger;
pub mod round_store;
pub mod fairness;
pub mod round;
pub mod bets;
pub mod payout;
pub mod games;
pub mod events;
pub mod metrics;
pub mod cache;
pub mod scheduler;
pub mod engine;

pub use engine::WagerEngine;
pub use errors::{WagerError, WagerResult};
