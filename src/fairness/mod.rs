//! Provable fairness: commit to a server seed, resolve with external signed
//! randomness, and let anyone verify the result.
//!
//! Flow per round:
//! 1. `commit()` when the round is created; only the hash is published.
//! 2. `resolve()` after lock; the beacon signs randomness bound to the hash.
//! 3. `verify()` recomputes everything from public data after reveal.

pub mod beacon;
pub mod local;
pub mod outcome;

use crate::common::types::{Money, RoundId};
use crate::config::FairnessMode;
use crate::errors::{ConfigurationError, FairnessError};
use beacon::{BeaconDraw, BeaconSource, RandomBeacon};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque handle to a committed seed
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitmentToken {
    seed: String,
}

impl CommitmentToken {
    /// Rebuild a token from a persisted seed
    pub(crate) fn restore(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }

    pub(crate) fn seed(&self) -> &str {
        &self.seed
    }

    pub fn commitment_hash(&self) -> String {
        outcome::commitment_hash(&self.seed)
    }
}

impl fmt::Debug for CommitmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommitmentToken(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub struct Commitment {
    pub hash: String,
    pub token: CommitmentToken,
}

/// Public facts about the round at resolution time
#[derive(Clone, Debug)]
pub struct PublicInput {
    pub round_id: RoundId,
    pub commitment_hash: String,
    pub pot_total: Money,
}

/// Everything needed to audit a resolved round
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionResult {
    pub raw_outcome_value: u64,
    /// `hex(sha256("{seed}-{external}"))`
    pub outcome_hash: String,
    pub revealed_seed: String,
    pub draw: BeaconDraw,
}

impl ResolutionResult {
    pub fn ticket(&self, pot: Money) -> Money {
        outcome::ticket(self.raw_outcome_value, pot)
    }

    pub fn fraction(&self) -> f64 {
        outcome::fraction(self.raw_outcome_value)
    }

    pub fn roll(&self, slots: u32) -> u32 {
        outcome::roll(self.raw_outcome_value, slots)
    }
}

/// Result of recomputing a round from public data
#[derive(Clone, Debug, PartialEq)]
pub struct Verification {
    pub commitment_hash: String,
    pub outcome_hash: String,
    pub raw_outcome_value: u64,
    pub fraction: f64,
}

pub struct FairnessOracle {
    beacon: Arc<dyn RandomBeacon>,
    mode: FairnessMode,
}

impl FairnessOracle {
    pub fn new(beacon: Arc<dyn RandomBeacon>, mode: FairnessMode) -> Result<Self, ConfigurationError> {
        if mode == FairnessMode::Production && beacon.source() != BeaconSource::RandomOrg {
            return Err(ConfigurationError::ValidationFailed(
                "production fairness mode requires an external beacon".to_string(),
            ));
        }
        Ok(Self { beacon, mode })
    }

    pub fn mode(&self) -> FairnessMode {
        self.mode
    }

    /// Generate a fresh server seed and its public commitment
    pub fn commit(&self) -> Commitment {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = CommitmentToken {
            seed: hex::encode(bytes),
        };
        Commitment {
            hash: token.commitment_hash(),
            token,
        }
    }

    /// Combine the committed seed with beacon randomness.
    ///
    /// Fails with `RandomnessUnavailable` when the beacon cannot be reached;
    /// there is no silent fallback to local randomness.
    pub async fn resolve(
        &self,
        token: &CommitmentToken,
        input: &PublicInput,
    ) -> Result<ResolutionResult, FairnessError> {
        let computed = token.commitment_hash();
        if computed != input.commitment_hash {
            return Err(FairnessError::CommitmentMismatch {
                expected: input.commitment_hash.clone(),
                computed,
            });
        }

        let draw = self.beacon.draw(&input.commitment_hash).await?;
        let digest = outcome::outcome_digest(token.seed(), &draw.randomness);
        let raw_outcome_value = outcome::raw_value(&digest);

        tracing::info!(
            round_id = %input.round_id,
            source = ?draw.source,
            pot_total = input.pot_total,
            "Round outcome resolved"
        );

        Ok(ResolutionResult {
            raw_outcome_value,
            outcome_hash: hex::encode(digest),
            revealed_seed: token.seed().to_string(),
            draw,
        })
    }
}

/// Recompute a round's commitment and outcome from its revealed inputs
pub fn verify(
    seed: &str,
    commitment_hash: &str,
    external_randomness: &str,
) -> Result<Verification, FairnessError> {
    let computed = outcome::commitment_hash(seed);
    if computed != commitment_hash {
        return Err(FairnessError::CommitmentMismatch {
            expected: commitment_hash.to_string(),
            computed,
        });
    }
    let digest = outcome::outcome_digest(seed, external_randomness);
    let raw_outcome_value = outcome::raw_value(&digest);
    Ok(Verification {
        commitment_hash: computed,
        outcome_hash: hex::encode(digest),
        raw_outcome_value,
        fraction: outcome::fraction(raw_outcome_value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::local::LocalBeacon;
    use async_trait::async_trait;

    struct DownBeacon;

    #[async_trait]
    impl RandomBeacon for DownBeacon {
        fn source(&self) -> BeaconSource {
            BeaconSource::RandomOrg
        }

        async fn draw(&self, _user_data: &str) -> Result<BeaconDraw, FairnessError> {
            Err(FairnessError::RandomnessUnavailable("connection refused".into()))
        }
    }

    fn input(commitment: &Commitment) -> PublicInput {
        PublicInput {
            round_id: RoundId::new(),
            commitment_hash: commitment.hash.clone(),
            pot_total: 10_000,
        }
    }

    #[tokio::test]
    async fn test_resolve_then_verify() {
        let oracle =
            FairnessOracle::new(Arc::new(LocalBeacon::new_random()), FairnessMode::Development).unwrap();
        let commitment = oracle.commit();
        assert_eq!(commitment.hash.len(), 64);

        let result = oracle.resolve(&commitment.token, &input(&commitment)).await.unwrap();
        assert!(LocalBeacon::verify_draw(&result.draw, &commitment.hash).unwrap());

        let verified = verify(&result.revealed_seed, &commitment.hash, &result.draw.randomness).unwrap();
        assert_eq!(verified.raw_outcome_value, result.raw_outcome_value);
        assert_eq!(verified.outcome_hash, result.outcome_hash);
    }

    #[tokio::test]
    async fn test_unavailable_beacon_has_no_fallback() {
        let oracle = FairnessOracle::new(Arc::new(DownBeacon), FairnessMode::Production).unwrap();
        let commitment = oracle.commit();
        let err = oracle.resolve(&commitment.token, &input(&commitment)).await.unwrap_err();
        assert!(matches!(err, FairnessError::RandomnessUnavailable(_)));
    }

    #[test]
    fn test_production_rejects_local_beacon() {
        assert!(
            FairnessOracle::new(Arc::new(LocalBeacon::new_random()), FairnessMode::Production).is_err()
        );
    }

    #[test]
    fn test_verify_rejects_wrong_seed() {
        let hash = outcome::commitment_hash("real-seed");
        assert!(verify("real-seed", &hash, "abc").is_ok());
        assert!(matches!(
            verify("fake-seed", &hash, "abc"),
            Err(FairnessError::CommitmentMismatch { .. })
        ));
    }

    #[test]
    fn test_token_debug_hides_seed() {
        let token = CommitmentToken::restore("super-secret");
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
