//! Round lifecycle: persistent record, legal states and the driver that moves
//! rounds through them.

pub mod machine;
pub mod record;
pub mod state;

pub use machine::RoundStateMachine;
pub use record::{CancelReason, FlipTerms, Hold, RetryState, Round, RoundView, SettlementSummary};
pub use state::RoundState;
