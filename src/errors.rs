//! Error types for the wagerline settlement engine
//!
//! Every error carries a stable machine-readable code alongside its message so
//! rejections can be surfaced to bettors and operators unchanged.

use crate::common::types::{ItemId, Money, RoundId, UserId};
use crate::round::RoundState;
use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum WagerError {
    #[error("Bet rejected: {0}")]
    Validation(#[from] BetRejection),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Fairness error: {0}")]
    Fairness(#[from] FairnessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Round transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Reasons a bet is refused before anything is reserved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetRejection {
    #[error("Betting too fast, retry in {retry_after_ms}ms")]
    TooFast { retry_after_ms: u64 },

    #[error("This game is currently disabled")]
    GameDisabled,

    #[error("Round is not accepting bets (state {state})")]
    RoundNotAcceptingBets { state: RoundState },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Unsupported stake: {0}")]
    UnsupportedStake(String),

    #[error("Stake is empty")]
    EmptyStake,

    #[error("Bet of {actual} is below the minimum of {min}")]
    BelowMinBet { min: Money, actual: Money },

    #[error("Total of {total} would exceed the maximum of {max} per round")]
    ExceedsMaxBet { max: Money, total: Money },

    #[error("Item limit of {max} exceeded")]
    MaxItemsExceeded { max: u32 },

    #[error("Bet limit of {max} per round exceeded")]
    MaxBetsExceeded { max: u32 },

    #[error("Round already has the maximum of {max} players")]
    MaxParticipantsReached { max: u32 },

    #[error("Stake of {actual} is outside the join range {low}..={high}")]
    OutsideJoinRange { low: Money, high: Money, actual: Money },

    #[error("Cannot join your own round")]
    CannotJoinOwnRound,

    #[error("Open round limit of {max} reached")]
    TooManyOpenRounds { max: u32 },

    #[error("Only the round creator can do that")]
    NotRoundCreator,
}

/// Balance and inventory mutation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {user}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        balance: Money,
        requested: Money,
    },

    #[error("Item {item} is not owned by the expected party")]
    ItemNotOwned { item: ItemId },

    #[error("Item {item} is already reserved in round {round}")]
    ItemAlreadyReserved { item: ItemId, round: RoundId },

    #[error("Unknown item {0}")]
    UnknownItem(ItemId),
}

/// Randomness and verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FairnessError {
    #[error("External randomness unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("Beacon returned an invalid response: {0}")]
    InvalidBeaconResponse(String),

    #[error("Commitment mismatch: expected {expected}, computed {computed}")]
    CommitmentMismatch { expected: String, computed: String },

    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Signing key error: {0}")]
    Key(String),
}

/// Persistence failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Failed to open database: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Accounting checks that must hold before a settlement commits
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Escrow does not net to zero: in {staked}, out {paid_out}")]
    Conservation { staked: Money, paid_out: Money },

    #[error("Rake {rake} exceeds cap {cap}")]
    RakeExceedsCap { rake: Money, cap: Money },

    #[error("Negative house take {0}")]
    NegativeRake(Money),

    #[error("Item set mismatch: {0}")]
    ItemMismatch(String),

    #[error("Winner could not be determined: {0}")]
    NoWinner(String),
}

/// Round lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Round {0} not found")]
    RoundNotFound(RoundId),

    #[error("Illegal transition {from} -> {to}")]
    Illegal { from: RoundState, to: RoundState },

    #[error("Round state changed concurrently: expected {expected}, found {actual}")]
    StateConflict {
        expected: RoundState,
        actual: RoundState,
    },

    #[error("Round {0} is held for manual intervention")]
    Held(RoundId),
}

/// Configuration and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Result type alias for engine operations
pub type WagerResult<T> = Result<T, WagerError>;

impl WagerError {
    /// Stable code for clients and alerting
    pub fn code(&self) -> &'static str {
        match self {
            WagerError::Validation(e) => e.code(),
            WagerError::Ledger(e) => e.code(),
            WagerError::Fairness(e) => e.code(),
            WagerError::Storage(_) => "PERSISTENCE_UNAVAILABLE",
            WagerError::Invariant(_) => "INVARIANT_VIOLATION",
            WagerError::Transition(e) => e.code(),
            WagerError::Configuration(_) => "INVALID_CONFIGURATION",
        }
    }

    /// Infra failures that a later attempt may get past
    pub fn is_retryable(&self) -> bool {
        match self {
            WagerError::Fairness(e) => matches!(
                e,
                FairnessError::RandomnessUnavailable(_) | FairnessError::InvalidBeaconResponse(_)
            ),
            WagerError::Storage(e) => !matches!(e, StorageError::CorruptedData(_)),
            WagerError::Transition(TransitionError::StateConflict { .. }) => true,
            _ => false,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WagerError::Invariant(_))
    }
}

impl BetRejection {
    pub fn code(&self) -> &'static str {
        match self {
            BetRejection::TooFast { .. } => "TOO_FAST",
            BetRejection::GameDisabled => "GAME_DISABLED",
            BetRejection::RoundNotAcceptingBets { .. } => "ROUND_NOT_ACCEPTING_BETS",
            BetRejection::InvalidSelector(_) => "INVALID_SELECTOR",
            BetRejection::UnsupportedStake(_) => "UNSUPPORTED_STAKE",
            BetRejection::EmptyStake => "EMPTY_STAKE",
            BetRejection::BelowMinBet { .. } => "BELOW_MIN_BET",
            BetRejection::ExceedsMaxBet { .. } => "EXCEEDS_MAX_BET",
            BetRejection::MaxItemsExceeded { .. } => "MAX_ITEMS_EXCEEDED",
            BetRejection::MaxBetsExceeded { .. } => "MAX_BETS_EXCEEDED",
            BetRejection::MaxParticipantsReached { .. } => "MAX_PARTICIPANTS_REACHED",
            BetRejection::OutsideJoinRange { .. } => "OUTSIDE_JOIN_RANGE",
            BetRejection::CannotJoinOwnRound => "CANNOT_JOIN_OWN_ROUND",
            BetRejection::TooManyOpenRounds { .. } => "TOO_MANY_OPEN_ROUNDS",
            BetRejection::NotRoundCreator => "NOT_ROUND_CREATOR",
        }
    }
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::ItemNotOwned { .. } => "ITEM_NOT_OWNED",
            LedgerError::ItemAlreadyReserved { .. } => "ITEM_ALREADY_RESERVED",
            LedgerError::UnknownItem(_) => "UNKNOWN_ITEM",
        }
    }
}

impl FairnessError {
    pub fn code(&self) -> &'static str {
        match self {
            FairnessError::RandomnessUnavailable(_) | FairnessError::InvalidBeaconResponse(_) => {
                "RANDOMNESS_UNAVAILABLE"
            }
            FairnessError::CommitmentMismatch { .. } => "COMMITMENT_MISMATCH",
            FairnessError::InvalidSignature(_) => "INVALID_SIGNATURE",
            FairnessError::Key(_) => "SIGNING_KEY_ERROR",
        }
    }
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            TransitionError::Illegal { .. } => "ILLEGAL_TRANSITION",
            TransitionError::StateConflict { .. } => "STATE_CONFLICT",
            TransitionError::Held(_) => "ROUND_HELD",
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::WriteFailed(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::CorruptedData(err.to_string())
    }
}

impl From<std::io::Error> for ConfigurationError {
    fn from(err: std::io::Error) -> Self {
        ConfigurationError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(err: toml::de::Error) -> Self {
        ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for ConfigurationError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigurationError::SaveFailed(format!("Failed to serialize TOML: {}", err))
    }
}
