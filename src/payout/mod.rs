//! Payout calculation
//!
//! Turns a resolved round into a plan of ledger transfers. Everything here is
//! pure and deterministic: the same bets and outcome always give the same plan,
//! which is what lets a settlement be replayed after a restart.

pub mod affiliate;

use crate::common::types::{apply_bps, BasisPoints, ItemId, Money, Party, RoundId};
use crate::errors::InvariantViolation;
use crate::games::types::{Bet, CoinSide, ItemSnapshot, Selector, WheelSegment};
use crate::ledger::{Transfer, TransferReason};
use crate::round::SettlementSummary;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A transfer before it is numbered and written.
/// Either `items` is non-empty and `amount` is their value, or it moves balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub from: Party,
    pub to: Party,
    pub amount: Money,
    pub items: Vec<ItemId>,
    pub reason: TransferReason,
}

impl PlannedTransfer {
    fn balance(from: Party, to: Party, amount: Money, reason: TransferReason) -> Self {
        Self {
            from,
            to,
            amount,
            items: Vec::new(),
            reason,
        }
    }

    fn items(from: Party, to: Party, items: &[&ItemSnapshot], reason: TransferReason) -> Self {
        Self {
            from,
            to,
            amount: items.iter().map(|i| i.price).sum(),
            items: items.iter().map(|i| i.id.clone()).collect(),
            reason,
        }
    }

    pub fn is_item_transfer(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn into_transfer(self, round_id: RoundId, seq: u32, at: DateTime<Utc>) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            round_id,
            seq,
            from: self.from,
            to: self.to,
            amount: self.amount,
            items: self.items,
            reason: self.reason,
            created_at: at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayoutPlan {
    pub transfers: Vec<PlannedTransfer>,
    /// Value that went into escrow through stakes
    pub staked: Money,
    pub staked_items: Vec<ItemId>,
    pub rake_cap: Money,
}

impl PayoutPlan {
    fn new(bets: &[Bet], rake_bps: BasisPoints) -> Self {
        let staked = bets.iter().map(Bet::value).sum();
        Self {
            transfers: Vec::new(),
            staked,
            staked_items: bets
                .iter()
                .flat_map(|b| b.stake.items().iter().map(|i| i.id.clone()))
                .collect(),
            rake_cap: apply_bps(staked, rake_bps),
        }
    }

    fn push(&mut self, transfer: PlannedTransfer) {
        if transfer.amount > 0 || transfer.is_item_transfer() {
            self.transfers.push(transfer);
        }
    }

    pub fn total(&self, reason: TransferReason) -> Money {
        self.transfers
            .iter()
            .filter(|t| t.reason == reason)
            .map(|t| t.amount)
            .sum()
    }

    pub fn paid_to_winners(&self) -> Money {
        self.total(TransferReason::Winnings)
    }

    pub fn rake(&self) -> Money {
        self.total(TransferReason::Rake)
    }

    pub fn house_retained(&self) -> Money {
        self.total(TransferReason::HouseRetained)
    }

    pub fn house_cover(&self) -> Money {
        self.total(TransferReason::HouseCover)
    }

    /// What the house keeps from escrow before affiliate shares
    pub fn house_take(&self) -> Money {
        self.rake() + self.house_retained()
    }

    pub fn summary(&self, affiliate_paid: Money, transfer_count: u32) -> SettlementSummary {
        SettlementSummary {
            paid_to_winners: self.paid_to_winners(),
            rake: self.rake(),
            house_retained: self.house_retained(),
            house_cover: self.house_cover(),
            affiliate_paid,
            transfer_count,
        }
    }

    /// Accounting checks that must pass before the plan is committed:
    /// escrow nets to zero, every staked item leaves escrow exactly once, and
    /// the rake stays within its cap.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let escrow_in = self.staked
            + self
                .transfers
                .iter()
                .filter(|t| t.to == Party::Escrow)
                .map(|t| t.amount)
                .sum::<Money>();
        let escrow_out: Money = self
            .transfers
            .iter()
            .filter(|t| t.from == Party::Escrow)
            .map(|t| t.amount)
            .sum();
        if escrow_in != escrow_out {
            return Err(InvariantViolation::Conservation {
                staked: escrow_in,
                paid_out: escrow_out,
            });
        }

        if let Some(t) = self.transfers.iter().find(|t| t.amount < 0) {
            return Err(InvariantViolation::NegativeRake(t.amount));
        }
        let rake = self.rake();
        if rake > self.rake_cap {
            return Err(InvariantViolation::RakeExceedsCap {
                rake,
                cap: self.rake_cap,
            });
        }

        let mut staked_items = self.staked_items.clone();
        let mut released: Vec<ItemId> = self
            .transfers
            .iter()
            .filter(|t| t.from == Party::Escrow)
            .flat_map(|t| t.items.iter().cloned())
            .collect();
        staked_items.sort();
        released.sort();
        if staked_items != released {
            return Err(InvariantViolation::ItemMismatch(format!(
                "{} items staked, {} released",
                staked_items.len(),
                released.len()
            )));
        }
        Ok(())
    }
}

/// Side A (heads) wins when the ticket falls in `[0, heads_stake)`
pub fn flip_winning_side(ticket: Money, heads_stake: Money) -> CoinSide {
    if ticket < heads_stake {
        CoinSide::Heads
    } else {
        CoinSide::Tails
    }
}

/// Bet whose cumulative interval `[before, before + stake)` contains `ticket`.
/// `bets` must be in placement order.
pub fn pot_winner(bets: &[Bet], ticket: Money) -> Option<&Bet> {
    let mut before: Money = 0;
    for bet in bets {
        let after = before + bet.value();
        if ticket >= before && ticket < after {
            return Some(bet);
        }
        before = after;
    }
    None
}

/// Greedy rake fill over the items of the whole pot, cheapest first.
/// An item is raked when its price fits in what is left of the cap.
fn split_items_for_rake(bets: &[Bet], cap: Money) -> (Vec<&ItemSnapshot>, Vec<&ItemSnapshot>) {
    let mut items: Vec<&ItemSnapshot> = bets.iter().flat_map(|b| b.stake.items()).collect();
    items.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id)));

    let mut remaining = cap;
    let mut raked = Vec::new();
    let mut won = Vec::new();
    for item in items {
        if item.price <= remaining {
            remaining -= item.price;
            raked.push(item);
        } else {
            won.push(item);
        }
    }
    (raked, won)
}

/// Winner takes the pot's items minus the raked ones
fn winner_takes_items(bets: &[Bet], winner: &str, rake_bps: BasisPoints) -> PayoutPlan {
    let mut plan = PayoutPlan::new(bets, rake_bps);
    let (raked, won) = split_items_for_rake(bets, plan.rake_cap);

    plan.push(PlannedTransfer::items(
        Party::Escrow,
        Party::user(winner),
        &won,
        TransferReason::Winnings,
    ));
    plan.push(PlannedTransfer::items(
        Party::Escrow,
        Party::House,
        &raked,
        TransferReason::Rake,
    ));
    plan
}

/// Coinflip: the winner gets every item in the pot that is not raked
pub fn flip_payout(
    winner_bets: &[Bet],
    loser_bets: &[Bet],
    rake_bps: BasisPoints,
) -> Result<PayoutPlan, InvariantViolation> {
    let winner = winner_bets
        .first()
        .map(|b| b.bettor.clone())
        .ok_or_else(|| InvariantViolation::NoWinner("coinflip has no winning bet".to_string()))?;
    let bets: Vec<Bet> = winner_bets.iter().chain(loser_bets).cloned().collect();
    Ok(winner_takes_items(&bets, &winner, rake_bps))
}

/// Pot: the bet holding `ticket` takes every item that is not raked
pub fn pot_payout(bets: &[Bet], ticket: Money, rake_bps: BasisPoints) -> Result<PayoutPlan, InvariantViolation> {
    let winner = pot_winner(bets, ticket).ok_or_else(|| {
        InvariantViolation::NoWinner(format!("ticket {} outside pot of {} bets", ticket, bets.len()))
    })?;
    Ok(winner_takes_items(bets, &winner.bettor, rake_bps))
}

/// Wheel: every bet on `segment` is paid `stake * multiplier`.
///
/// When winners are owed more than the pot the house tops escrow up with a
/// `HouseCover` transfer. Whatever escrow holds after winnings is house take:
/// rake up to the cap, the rest retained.
pub fn wheel_payout(
    bets: &[Bet],
    segment: WheelSegment,
    multiplier_bps: BasisPoints,
    rake_bps: BasisPoints,
) -> PayoutPlan {
    let mut plan = PayoutPlan::new(bets, rake_bps);

    let winnings: Vec<(&Bet, Money)> = bets
        .iter()
        .filter(|b| matches!(b.selector, Selector::Wheel { segment: s } if s == segment))
        .map(|b| (b, apply_bps(b.value(), multiplier_bps)))
        .collect();
    let owed: Money = winnings.iter().map(|(_, amount)| amount).sum();

    let cover = (owed - plan.staked).max(0);
    plan.push(PlannedTransfer::balance(
        Party::House,
        Party::Escrow,
        cover,
        TransferReason::HouseCover,
    ));
    for (bet, amount) in winnings {
        plan.push(PlannedTransfer::balance(
            Party::Escrow,
            Party::user(bet.bettor.clone()),
            amount,
            TransferReason::Winnings,
        ));
    }

    let remainder = plan.staked + cover - owed;
    let rake = remainder.min(plan.rake_cap);
    plan.push(PlannedTransfer::balance(Party::Escrow, Party::House, rake, TransferReason::Rake));
    plan.push(PlannedTransfer::balance(
        Party::Escrow,
        Party::House,
        remainder - rake,
        TransferReason::HouseRetained,
    ));
    plan
}

/// Return every stake to its bettor
pub fn refund_plan(bets: &[Bet]) -> PayoutPlan {
    let mut plan = PayoutPlan::new(bets, 0);
    for bet in bets {
        let to = Party::user(bet.bettor.clone());
        let transfer = match bet.stake.items() {
            [] => PlannedTransfer::balance(Party::Escrow, to, bet.value(), TransferReason::Refund),
            items => {
                let items: Vec<&ItemSnapshot> = items.iter().collect();
                PlannedTransfer::items(Party::Escrow, to, &items, TransferReason::Refund)
            }
        };
        plan.push(transfer);
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{BetId, RoundId};
    use crate::games::types::Stake;
    use chrono::Utc;

    fn item_bet(seq: u32, bettor: &str, selector: Selector, prices: &[(&str, Money)]) -> Bet {
        Bet {
            id: BetId::new(),
            round_id: RoundId::default(),
            seq,
            bettor: bettor.into(),
            stake: Stake::Items {
                items: prices
                    .iter()
                    .map(|(id, price)| ItemSnapshot {
                        id: id.to_string(),
                        name: id.to_string(),
                        price: *price,
                    })
                    .collect(),
            },
            selector,
            placed_at: Utc::now(),
        }
    }

    fn wheel_bet(seq: u32, bettor: &str, segment: WheelSegment, amount: Money) -> Bet {
        Bet {
            id: BetId::new(),
            round_id: RoundId::default(),
            seq,
            bettor: bettor.into(),
            stake: Stake::Balance { amount },
            selector: Selector::Wheel { segment },
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_flip_rake_fill() {
        let heads = Selector::Coinflip { side: CoinSide::Heads };
        let tails = Selector::Coinflip { side: CoinSide::Tails };
        let alice = item_bet(0, "alice", heads, &[("a1", 6_000), ("a2", 4_000)]);
        let bob = item_bet(1, "bob", tails, &[("b1", 400), ("b2", 500), ("b3", 9_600)]);

        let plan = flip_payout(&[alice], &[bob], 500).unwrap();
        plan.validate().unwrap();

        assert_eq!(plan.staked, 20_500);
        assert_eq!(plan.rake_cap, 1_025);
        assert_eq!(plan.rake(), 900);
        assert_eq!(plan.paid_to_winners(), 20_500 - 900);

        let rake = plan.transfers.iter().find(|t| t.reason == TransferReason::Rake).unwrap();
        assert_eq!(rake.items, vec!["b1".to_string(), "b2".to_string()]);
        let win = plan.transfers.iter().find(|t| t.reason == TransferReason::Winnings).unwrap();
        assert_eq!(win.to, Party::user("alice"));
        assert_eq!(win.items.len(), 3);
    }

    #[test]
    fn test_rake_skips_items_above_remaining_cap() {
        let alice = item_bet(0, "alice", Selector::Pot, &[("a1", 600), ("a2", 700), ("a3", 8_700)]);
        let plan = pot_payout(&[alice], 0, 1_000).unwrap();
        // cap 1000: 600 fits, 700 does not fit the remaining 400
        assert_eq!(plan.rake(), 600);
        assert!(plan.rake() <= plan.rake_cap);
        plan.validate().unwrap();
    }

    #[test]
    fn test_flip_without_winner_is_violation() {
        let bob = item_bet(0, "bob", Selector::Pot, &[("b1", 100)]);
        assert!(matches!(
            flip_payout(&[], &[bob], 500),
            Err(InvariantViolation::NoWinner(_))
        ));
    }

    #[test]
    fn test_flip_side_boundaries() {
        assert_eq!(flip_winning_side(0, 10_000), CoinSide::Heads);
        assert_eq!(flip_winning_side(9_999, 10_000), CoinSide::Heads);
        assert_eq!(flip_winning_side(10_000, 10_000), CoinSide::Tails);
    }

    #[test]
    fn test_pot_winner_by_interval() {
        let bets = vec![
            item_bet(0, "a", Selector::Pot, &[("i1", 100)]),
            item_bet(1, "b", Selector::Pot, &[("i2", 250)]),
            item_bet(2, "c", Selector::Pot, &[("i3", 50)]),
        ];
        assert_eq!(pot_winner(&bets, 120).unwrap().bettor, "b");
        assert_eq!(pot_winner(&bets, 0).unwrap().bettor, "a");
        assert_eq!(pot_winner(&bets, 99).unwrap().bettor, "a");
        assert_eq!(pot_winner(&bets, 100).unwrap().bettor, "b");
        assert_eq!(pot_winner(&bets, 399).unwrap().bettor, "c");
        assert!(pot_winner(&bets, 400).is_none());

        let plan = pot_payout(&bets, 120, 500).unwrap();
        plan.validate().unwrap();
        // cap 20, no item cheap enough
        assert_eq!(plan.rake(), 0);
        assert_eq!(plan.paid_to_winners(), 400);
    }

    #[test]
    fn test_wheel_gold_needs_house_cover() {
        let bets = vec![
            wheel_bet(0, "a", WheelSegment::Black, 100),
            wheel_bet(1, "b", WheelSegment::Black, 100),
            wheel_bet(2, "c", WheelSegment::Black, 100),
            wheel_bet(3, "d", WheelSegment::Gold, 20),
            wheel_bet(4, "e", WheelSegment::Gold, 30),
        ];
        let plan = wheel_payout(&bets, WheelSegment::Gold, 300_000, 0);
        plan.validate().unwrap();

        assert_eq!(plan.staked, 350);
        assert_eq!(plan.paid_to_winners(), 1_500);
        assert_eq!(plan.house_cover(), 1_150);
        assert_eq!(plan.house_take(), 0);
    }

    #[test]
    fn test_wheel_black_leaves_house_take() {
        let bets = vec![
            wheel_bet(0, "a", WheelSegment::Black, 100),
            wheel_bet(1, "b", WheelSegment::Black, 100),
            wheel_bet(2, "c", WheelSegment::Black, 100),
            wheel_bet(3, "d", WheelSegment::Gold, 20),
            wheel_bet(4, "e", WheelSegment::Gold, 30),
        ];
        let plan = wheel_payout(&bets, WheelSegment::Black, 20_000, 0);
        plan.validate().unwrap();
        assert_eq!(plan.paid_to_winners(), 600);
        assert_eq!(plan.house_cover(), 250);

        let lost = vec![wheel_bet(0, "a", WheelSegment::Black, 1_000), wheel_bet(1, "b", WheelSegment::Gold, 100)];
        let plan = wheel_payout(&lost, WheelSegment::Purple, 30_000, 500);
        plan.validate().unwrap();
        assert_eq!(plan.paid_to_winners(), 0);
        assert_eq!(plan.rake(), 55);
        assert_eq!(plan.house_retained(), 1_045);
    }

    #[test]
    fn test_validate_catches_broken_plan() {
        let bets = vec![item_bet(0, "a", Selector::Pot, &[("i1", 100)])];
        let mut plan = pot_payout(&bets, 0, 0).unwrap();
        plan.transfers[0].amount = 90;
        assert!(matches!(plan.validate(), Err(InvariantViolation::Conservation { .. })));

        let mut plan = pot_payout(&bets, 0, 0).unwrap();
        plan.transfers[0].items.push("ghost".into());
        assert!(matches!(plan.validate(), Err(InvariantViolation::ItemMismatch(_))));
    }

    #[test]
    fn test_refund_plan_returns_everything() {
        let bets = vec![
            item_bet(0, "a", Selector::Pot, &[("i1", 100), ("i2", 50)]),
            wheel_bet(1, "b", WheelSegment::Black, 70),
        ];
        let plan = refund_plan(&bets);
        plan.validate().unwrap();
        assert_eq!(plan.total(TransferReason::Refund), 220);
        assert_eq!(plan.transfers.len(), 2);
    }
}
