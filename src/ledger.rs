//! Transactional balance and inventory ledger.
//!
//! Every mutation happens through a [`LedgerTxn`] handed out by
//! [`LedgerGateway::with_transaction`]. Writes are staged in memory, visible to
//! later reads in the same transaction, and committed as one atomic batch only
//! when the closure returns `Ok`. Transactions are serialized by the gateway's
//! commit lock.

use crate::common::types::{ItemId, Money, Party, RoundId, UserId};
use crate::errors::{LedgerError, StorageError, WagerError, WagerResult};
use crate::storage::{KvBackend, KvRead, WriteOp};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const ACCOUNT_PREFIX: &str = "ledger:account:";
const ITEM_PREFIX: &str = "ledger:item:";
const TRANSFER_PREFIX: &str = "ledger:transfer:";

fn account_key(user: &str) -> Vec<u8> {
    format!("{}{}", ACCOUNT_PREFIX, user).into_bytes()
}

fn item_key(id: &str) -> Vec<u8> {
    format!("{}{}", ITEM_PREFIX, id).into_bytes()
}

fn transfer_prefix(round_id: &RoundId) -> Vec<u8> {
    format!("{}{}:", TRANSFER_PREFIX, round_id).into_bytes()
}

fn transfer_key(round_id: &RoundId, seq: u32) -> Vec<u8> {
    // Zero-padded so lexicographic order matches append order
    format!("{}{}:{:010}", TRANSFER_PREFIX, round_id, seq).into_bytes()
}

/// Referral relationship used for revenue share
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffiliateLink {
    pub affiliate: UserId,
    /// Index into the configured tier bonus table
    pub tier: u8,
    /// Elite affiliates also earn a share of rake on their referrals' wins
    #[serde(default)]
    pub elite: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    pub user_id: UserId,
    pub balance: Money,
    pub wagered: Money,
    pub won: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate: Option<AffiliateLink>,
    /// Whether this user is itself an elite affiliate
    #[serde(default)]
    pub is_elite: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub price: Money,
    pub owner: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_in: Option<RoundId>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    /// Bettor to escrow at placement
    Stake,
    Winnings,
    Rake,
    /// House edge kept from a wheel round beyond the rake
    HouseRetained,
    /// House bankroll topping up escrow when winners are owed more than the pot
    HouseCover,
    Refund,
    AffiliateShare,
}

/// Append-only record of value moving between parties
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub id: Uuid,
    pub round_id: RoundId,
    pub seq: u32,
    pub from: Party,
    pub to: Party,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemId>,
    pub reason: TransferReason,
    pub created_at: DateTime<Utc>,
}

/// Entry point for all ledger mutations
pub struct LedgerGateway {
    store: Arc<dyn KvBackend>,
    commit_lock: Mutex<()>,
}

impl LedgerGateway {
    pub fn new(store: Arc<dyn KvBackend>) -> Self {
        Self {
            store,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvBackend> {
        &self.store
    }

    /// Run `f` as one atomic unit. Nothing is written unless `f` returns `Ok`.
    pub fn with_transaction<T, F>(&self, f: F) -> WagerResult<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> WagerResult<T>,
    {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("ledger commit lock poisoned".into()))?;

        let mut txn = LedgerTxn {
            store: self.store.as_ref(),
            staged: BTreeMap::new(),
        };
        let value = f(&mut txn)?;

        let ops = txn.into_ops();
        if !ops.is_empty() {
            let count = ops.len();
            self.store.write_batch(ops)?;
            tracing::trace!(ops = count, "Ledger transaction committed");
        }
        Ok(value)
    }

    pub fn account(&self, user: &str) -> WagerResult<UserAccount> {
        self.with_transaction(|txn| txn.account(user))
    }

    pub fn item(&self, id: &str) -> WagerResult<Option<Item>> {
        Ok(read_json(self.store.as_ref(), &item_key(id))?)
    }

    /// Every transfer recorded for a round, in append order
    pub fn transfers_for_round(&self, round_id: &RoundId) -> WagerResult<Vec<Transfer>> {
        let rows = self
            .store
            .scan_prefix(&transfer_prefix(round_id), None, usize::MAX)?;
        rows.into_iter()
            .map(|(_, bytes)| {
                serde_json::from_slice::<Transfer>(&bytes)
                    .map_err(|e| WagerError::from(StorageError::from(e)))
            })
            .collect()
    }
}

fn read_json<T: DeserializeOwned>(store: &dyn KvBackend, key: &[u8]) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::CorruptedData(format!(
                "Failed to decode {}: {}",
                String::from_utf8_lossy(key),
                e
            ))
        })?)),
        None => Ok(None),
    }
}

/// Handle for one in-flight ledger transaction
pub struct LedgerTxn<'a> {
    store: &'a dyn KvBackend,
    /// `None` marks a staged delete
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> LedgerTxn<'a> {
    fn into_ops(self) -> Vec<WriteOp> {
        self.staged
            .into_iter()
            .map(|(key, value)| match value {
                Some(v) => WriteOp::Put(key, v),
                None => WriteOp::Delete(key),
            })
            .collect()
    }

    pub fn get_raw(&self, key: &[u8]) -> WagerResult<Option<Vec<u8>>> {
        Ok(self.read(key)?)
    }

    pub fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.staged.insert(key, None);
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> WagerResult<Option<T>> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::CorruptedData(format!(
                    "Failed to decode {}: {}",
                    String::from_utf8_lossy(key),
                    e
                ))
            })?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> WagerResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to encode {}: {}",
                String::from_utf8_lossy(&key),
                e
            ))
        })?;
        self.put_raw(key, bytes);
        Ok(())
    }

    /// Prefix scan over committed data with this transaction's writes applied
    pub fn scan_prefix(&self, prefix: &[u8]) -> WagerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan(prefix)?)
    }

    pub fn account(&self, user: &str) -> WagerResult<UserAccount> {
        Ok(self
            .get_json::<UserAccount>(&account_key(user))?
            .unwrap_or_else(|| UserAccount {
                user_id: user.to_string(),
                ..Default::default()
            }))
    }

    pub fn put_account(&mut self, account: &UserAccount) -> WagerResult<()> {
        self.put_json(account_key(&account.user_id), account)
    }

    /// Credit (positive) or debit (negative) a user's balance.
    pub fn adjust_balance(&mut self, user: &str, delta: Money) -> WagerResult<Money> {
        let mut account = self.account(user)?;
        let next = account.balance + delta;
        if next < 0 {
            return Err(LedgerError::InsufficientFunds {
                user: user.to_string(),
                balance: account.balance,
                requested: -delta,
            }
            .into());
        }
        account.balance = next;
        self.put_account(&account)?;
        Ok(next)
    }

    /// Bump lifetime wagered/won counters
    pub fn record_activity(&mut self, user: &str, wagered: Money, won: Money) -> WagerResult<()> {
        let mut account = self.account(user)?;
        account.wagered += wagered;
        account.won += won;
        self.put_account(&account)
    }

    pub fn item(&self, id: &str) -> WagerResult<Item> {
        self.get_json::<Item>(&item_key(id))?
            .ok_or_else(|| LedgerError::UnknownItem(id.to_string()).into())
    }

    pub fn put_item(&mut self, item: &Item) -> WagerResult<()> {
        self.put_json(item_key(&item.id), item)
    }

    /// Move ownership of `ids` from one party to another.
    ///
    /// Moving into escrow reserves the item in `round`; moving out of escrow
    /// requires the item to be reserved in that same round.
    pub fn move_items(
        &mut self,
        ids: &[ItemId],
        from: &Party,
        to: &Party,
        round: &RoundId,
    ) -> WagerResult<Vec<Item>> {
        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            let mut item = self.item(id)?;
            if &item.owner != from {
                return Err(LedgerError::ItemNotOwned { item: id.clone() }.into());
            }
            match from {
                Party::Escrow => {
                    if item.reserved_in.as_ref() != Some(round) {
                        return Err(LedgerError::ItemNotOwned { item: id.clone() }.into());
                    }
                }
                _ => {
                    if let Some(reserved) = item.reserved_in {
                        return Err(LedgerError::ItemAlreadyReserved {
                            item: id.clone(),
                            round: reserved,
                        }
                        .into());
                    }
                }
            }

            item.owner = to.clone();
            item.reserved_in = match to {
                Party::Escrow => Some(*round),
                _ => None,
            };
            self.put_item(&item)?;
            moved.push(item);
        }
        Ok(moved)
    }

    pub fn append_transfer(&mut self, transfer: &Transfer) -> WagerResult<()> {
        self.put_json(transfer_key(&transfer.round_id, transfer.seq), transfer)
    }

    /// Apply a transfer's effect and record it.
    ///
    /// Item transfers move ownership; the rest move balance. Escrow and house
    /// balances are implied by the transfer log, so only user accounts change.
    pub fn post_transfer(&mut self, transfer: Transfer) -> WagerResult<Transfer> {
        if transfer.items.is_empty() {
            if let Party::User(user) = &transfer.from {
                self.adjust_balance(user, -transfer.amount)?;
            }
            if let Party::User(user) = &transfer.to {
                self.adjust_balance(user, transfer.amount)?;
            }
        } else {
            self.move_items(&transfer.items, &transfer.from, &transfer.to, &transfer.round_id)?;
        }
        self.append_transfer(&transfer)?;
        Ok(transfer)
    }
}

impl KvRead for LedgerTxn<'_> {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        self.store.get(key)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .store
            .scan_prefix(prefix, None, usize::MAX)?
            .into_iter()
            .collect();

        for (key, value) in self
            .staged
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}
