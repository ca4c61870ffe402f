//! Common utilities and shared functionality
//!
//! Identifiers, money, clocks and configuration loading shared across the engine.

pub mod types;
pub mod config;
pub mod traits;
