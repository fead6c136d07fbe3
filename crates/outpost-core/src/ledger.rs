//! Resource ledger: the collaborator that holds each owner's currency.
//!
//! The engine only ever debits inside a conditional queue transition, so a
//! ledger implementation must make `debit` itself atomic (check and subtract
//! in one step). [`InMemoryLedger`] keeps a journal of every movement so
//! callers can audit that an item was charged at most once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::id::OwnerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("no ledger account for owner {0}")]
    UnknownAccount(OwnerId),

    #[error("owner {owner} needs {required} but holds {available}")]
    InsufficientFunds {
        owner: OwnerId,
        required: u64,
        available: u64,
    },

    #[error("balance of owner {0} would overflow")]
    Overflow(OwnerId),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

pub trait ResourceLedger: Send + Sync {
    fn balance(&self, owner: OwnerId) -> Result<u64, LedgerError>;

    /// Atomically subtract `amount`, failing with `InsufficientFunds`
    /// without side effects. Returns the new balance.
    fn debit(&self, owner: OwnerId, amount: u64) -> Result<u64, LedgerError>;

    /// Add `amount` (refunds). Returns the new balance.
    fn credit(&self, owner: OwnerId, amount: u64) -> Result<u64, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Debit,
    Credit,
}

/// One recorded currency movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub owner: OwnerId,
    pub kind: EntryKind,
    pub amount: u64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    accounts: HashMap<OwnerId, u64>,
    journal: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }

    /// Create or overwrite an account.
    pub fn set_balance(&self, owner: OwnerId, balance: u64) -> Result<(), LedgerError> {
        self.lock()?.accounts.insert(owner, balance);
        Ok(())
    }

    /// Remove an account, as when an owner leaves the simulation.
    pub fn close_account(&self, owner: OwnerId) -> Result<(), LedgerError> {
        self.lock()?.accounts.remove(&owner);
        Ok(())
    }

    pub fn journal(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.lock()?.journal.clone())
    }

    /// Number of debits recorded for an owner.
    pub fn debit_count(&self, owner: OwnerId) -> Result<usize, LedgerError> {
        Ok(self
            .lock()?
            .journal
            .iter()
            .filter(|e| e.owner == owner && e.kind == EntryKind::Debit)
            .count())
    }
}

impl ResourceLedger for InMemoryLedger {
    fn balance(&self, owner: OwnerId) -> Result<u64, LedgerError> {
        self.lock()?
            .accounts
            .get(&owner)
            .copied()
            .ok_or(LedgerError::UnknownAccount(owner))
    }

    fn debit(&self, owner: OwnerId, amount: u64) -> Result<u64, LedgerError> {
        let mut inner = self.lock()?;
        let balance = inner
            .accounts
            .get_mut(&owner)
            .ok_or(LedgerError::UnknownAccount(owner))?;
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                owner,
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        let remaining = *balance;
        inner.journal.push(LedgerEntry {
            owner,
            kind: EntryKind::Debit,
            amount,
        });
        Ok(remaining)
    }

    fn credit(&self, owner: OwnerId, amount: u64) -> Result<u64, LedgerError> {
        let mut inner = self.lock()?;
        let balance = inner
            .accounts
            .get_mut(&owner)
            .ok_or(LedgerError::UnknownAccount(owner))?;
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(owner))?;
        let updated = *balance;
        inner.journal.push(LedgerEntry {
            owner,
            kind: EntryKind::Credit,
            amount,
        });
        Ok(updated)
    }
}
