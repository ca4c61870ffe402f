//! Affiliate revenue share
//!
//! Pure computation. Shares are paid by the house out of its take, never out of
//! a winner's payout.

use crate::common::types::{apply_bps, BasisPoints, Money, UserId, BPS_DENOMINATOR};
use crate::errors::ConfigurationError;
use crate::ledger::AffiliateLink;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AffiliatePolicy {
    pub enabled: bool,
    /// Shares are only paid when house take / pot reaches this
    pub min_take_bps: BasisPoints,
    /// Bonus on wagered amount, indexed by affiliate tier
    pub tier_bonus_bps: Vec<BasisPoints>,
    /// Share of rake paid to the winner's elite affiliate
    pub elite_bps: BasisPoints,
}

impl Default for AffiliatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_take_bps: 500,
            tier_bonus_bps: vec![25, 50, 75, 100, 150],
            elite_bps: 1_000,
        }
    }
}

impl AffiliatePolicy {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_take_bps as i64 > BPS_DENOMINATOR {
            return Err(ConfigurationError::InvalidValue {
                field: "affiliates.min_take_bps".to_string(),
                value: self.min_take_bps.to_string(),
                reason: "must be <= 10000".to_string(),
            });
        }
        if self.elite_bps as i64 > BPS_DENOMINATOR {
            return Err(ConfigurationError::InvalidValue {
                field: "affiliates.elite_bps".to_string(),
                value: self.elite_bps.to_string(),
                reason: "must be <= 10000".to_string(),
            });
        }
        if self.enabled && self.tier_bonus_bps.is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "affiliates.tier_bonus_bps (at least one tier)".to_string(),
            ));
        }
        if let Some(bps) = self.tier_bonus_bps.iter().find(|b| **b as i64 > BPS_DENOMINATOR) {
            return Err(ConfigurationError::InvalidValue {
                field: "affiliates.tier_bonus_bps".to_string(),
                value: bps.to_string(),
                reason: "must be <= 10000".to_string(),
            });
        }
        Ok(())
    }

    /// Tiers past the end of the table earn the top rate
    fn tier_bps(&self, tier: u8) -> BasisPoints {
        self.tier_bonus_bps
            .get(tier as usize)
            .or_else(|| self.tier_bonus_bps.last())
            .copied()
            .unwrap_or(0)
    }
}

/// One bettor's contribution to the round
#[derive(Clone, Debug)]
pub struct Wagered {
    pub bettor: UserId,
    pub amount: Money,
    pub link: Option<AffiliateLink>,
}

/// Link of the round winner, for the elite reward
#[derive(Clone, Debug)]
pub struct WinnerAffiliation {
    pub link: AffiliateLink,
    /// Elite affiliates winning their own referral's round earn nothing extra
    pub winner_is_elite: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffiliateShare {
    pub affiliate: UserId,
    pub amount: Money,
    pub elite: bool,
}

/// Revenue shares owed to affiliates for one settled round.
///
/// Returns nothing when the policy is off or the house take is below
/// `min_take_bps` of the pot. The total never exceeds `house_take`; shares
/// are trimmed in order once the budget runs out.
pub fn affiliate_shares(
    wagers: &[Wagered],
    policy: &AffiliatePolicy,
    house_take: Money,
    rake: Money,
    pot: Money,
    winner: Option<&WinnerAffiliation>,
) -> Vec<AffiliateShare> {
    if !policy.enabled || pot <= 0 || house_take <= 0 {
        return Vec::new();
    }
    let take_bps = (house_take as i128 * BPS_DENOMINATOR as i128) / pot as i128;
    if take_bps < policy.min_take_bps as i128 {
        return Vec::new();
    }

    let mut budget = house_take;
    let mut shares = Vec::new();
    let mut push = |affiliate: &str, amount: Money, elite: bool| {
        let amount = amount.min(budget);
        if amount > 0 {
            budget -= amount;
            shares.push(AffiliateShare {
                affiliate: affiliate.to_string(),
                amount,
                elite,
            });
        }
    };

    for wager in wagers {
        if let Some(link) = &wager.link {
            if link.affiliate == wager.bettor {
                continue;
            }
            push(&link.affiliate, apply_bps(wager.amount, policy.tier_bps(link.tier)), false);
        }
    }

    if let Some(winner) = winner {
        if winner.link.elite && !winner.winner_is_elite {
            push(&winner.link.affiliate, apply_bps(rake, policy.elite_bps), true);
        }
    }

    shares
}
