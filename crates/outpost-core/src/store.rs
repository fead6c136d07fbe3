//! Persistent queue store with conditional transitions.
//!
//! Every status change goes through [`QueueStore::transition`], which checks
//! the expected current status, the completion claim, the optional slot
//! limit and the optional energy floor, and then runs a caller closure, all
//! under the store's lock. The closure is where currency moves: a debit
//! that fails declines the transition and leaves the item untouched, so an
//! item can never be charged twice even when admission and a tick race.
//!
//! Lock order is store, then ledger. Closures must not call back into the
//! store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::debug;

use crate::fixed::Fixed64;
use crate::id::{IdentityKey, LocationId, OwnerId, QueueItemId};
use crate::ledger::LedgerError;
use crate::queue::{GroupKey, ItemPatch, QueueItem, QueueItemDraft, QueueStatus};
use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a queue store snapshot.
pub const STORE_SNAPSHOT_MAGIC: u32 = 0x0B05_7001;

/// Current snapshot format version.
pub const STORE_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("queue store lock poisoned")]
    Poisoned,

    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    #[error("queue item {0:?} not found")]
    NotFound(QueueItemId),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: QueueStatus, to: QueueStatus },

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl StoreError {
    /// Transient failures worth retrying on the read path.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(QueueItem),
    /// An in-flight item already holds the identity key.
    Conflict(QueueItem),
}

/// Which completion-claim state a transition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimRule {
    #[default]
    Any,
    MustBeUnclaimed,
    MustBeClaimed,
}

/// Energy floor checked at activation: the location's balance plus the
/// energy reserved by its active items plus the item's own delta must stay
/// at or above `floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyGate {
    pub balance: Fixed64,
    pub floor: Fixed64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionGuard {
    pub expect: QueueStatus,
    pub next: QueueStatus,
    pub claim: ClaimRule,
    /// Maximum number of active items in the item's group.
    pub slot_limit: Option<u32>,
    pub energy: Option<EnergyGate>,
}

impl TransitionGuard {
    pub fn new(expect: QueueStatus, next: QueueStatus) -> Self {
        Self {
            expect,
            next,
            claim: ClaimRule::Any,
            slot_limit: None,
            energy: None,
        }
    }

    pub fn claim(mut self, claim: ClaimRule) -> Self {
        self.claim = claim;
        self
    }

    pub fn slot_limit(mut self, limit: Option<u32>) -> Self {
        self.slot_limit = limit;
        self
    }

    pub fn energy(mut self, gate: Option<EnergyGate>) -> Self {
        self.energy = gate;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition happened; carries the updated item.
    Applied(QueueItem),
    /// The item was no longer in the expected status.
    Stale(QueueItem),
    /// The completion claim did not match the rule.
    ClaimConflict(QueueItem),
    /// The group already runs `slot_limit` active items.
    NoSlot,
    /// Activation would push projected energy below the floor.
    NoEnergy { projected: Fixed64 },
    /// The closure refused; nothing was written.
    Declined { item: QueueItem, error: LedgerError },
}

/// Closure run inside a transition's critical section.
pub type Decide<'a> = &'a mut dyn FnMut(&QueueItem) -> Result<ItemPatch, LedgerError>;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait QueueStore: Send + Sync {
    /// Insert a new pending item unless an in-flight item shares its
    /// identity key.
    fn insert_if_absent(&self, draft: QueueItemDraft) -> Result<InsertOutcome, StoreError>;

    fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, StoreError>;

    /// Every item of a group, in FIFO order.
    fn list_group(&self, group: GroupKey) -> Result<Vec<QueueItem>, StoreError>;

    /// Every item of an owner, in FIFO order.
    fn list_owner(&self, owner: OwnerId) -> Result<Vec<QueueItem>, StoreError>;

    /// Pending and active items at a location, across kinds.
    fn in_flight_at(&self, location: LocationId) -> Result<Vec<QueueItem>, StoreError>;

    /// Groups holding at least one item with `status`.
    fn groups_with_status(&self, status: QueueStatus) -> Result<Vec<GroupKey>, StoreError>;

    fn transition(
        &self,
        id: QueueItemId,
        guard: TransitionGuard,
        decide: Decide<'_>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Mark a due, active, unclaimed item as claimed for completion.
    /// Returns the claimed item, or `None` if another pass got there first
    /// or the item is no longer due.
    fn claim_completion(
        &self,
        id: QueueItemId,
        now: Timestamp,
    ) -> Result<Option<QueueItem>, StoreError>;

    fn pending_in_group(&self, group: GroupKey) -> Result<Vec<QueueItem>, StoreError> {
        let mut items = self.list_group(group)?;
        items.retain(|item| item.status == QueueStatus::Pending);
        Ok(items)
    }

    fn due_in_group(&self, group: GroupKey, now: Timestamp) -> Result<Vec<QueueItem>, StoreError> {
        let mut items = self.list_group(group)?;
        items.retain(|item| item.is_due(now) && !item.completion_claimed);
        Ok(items)
    }
}

/// Energy held back by active items: the sum of their negative deltas.
pub fn reserved_energy<'a>(items: impl IntoIterator<Item = &'a QueueItem>) -> Fixed64 {
    items
        .into_iter()
        .filter(|item| item.status == QueueStatus::Active && item.energy_delta < Fixed64::ZERO)
        .fold(Fixed64::ZERO, |acc, item| acc.saturating_add(item.energy_delta))
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreInner {
    items: SlotMap<QueueItemId, QueueItem>,
    /// Identity keys of in-flight items only.
    identity: HashMap<IdentityKey, QueueItemId>,
    next_seq: u64,
}

impl StoreInner {
    fn sorted(&self, mut filter: impl FnMut(&QueueItem) -> bool) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> =
            self.items.values().filter(|i| filter(i)).cloned().collect();
        items.sort_by_key(QueueItem::fifo_key);
        items
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    magic: u32,
    version: u32,
    next_seq: u64,
    items: SlotMap<QueueItemId, QueueItem>,
}

/// A [`QueueStore`] held behind a single mutex.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.items.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.items.is_empty())
    }

    /// Encode every item, terminal ones included, with a versioned header.
    pub fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        let inner = self.lock()?;
        let snapshot = StoreSnapshot {
            magic: STORE_SNAPSHOT_MAGIC,
            version: STORE_FORMAT_VERSION,
            next_seq: inner.next_seq,
            items: inner.items.clone(),
        };
        bitcode::serialize(&snapshot).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Rebuild a store from [`snapshot`](Self::snapshot) bytes. The identity
    /// index is recomputed from the in-flight items.
    pub fn restore(data: &[u8]) -> Result<Self, StoreError> {
        let snapshot: StoreSnapshot =
            bitcode::deserialize(data).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        if snapshot.magic != STORE_SNAPSHOT_MAGIC {
            return Err(StoreError::Snapshot(format!(
                "invalid magic number 0x{:08X}",
                snapshot.magic
            )));
        }
        if snapshot.version != STORE_FORMAT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported format version {}",
                snapshot.version
            )));
        }

        let mut identity = HashMap::new();
        for (id, item) in &snapshot.items {
            if item.status.is_in_flight()
                && identity.insert(item.identity_key.clone(), id).is_some()
            {
                return Err(StoreError::Snapshot(format!(
                    "identity key {} held by two in-flight items",
                    item.identity_key
                )));
            }
        }

        debug!(
            target: "outpost::store",
            items = snapshot.items.len(),
            in_flight = identity.len(),
            next_seq = snapshot.next_seq,
            "store.restored"
        );
        Ok(Self {
            inner: Mutex::new(StoreInner {
                items: snapshot.items,
                identity,
                next_seq: snapshot.next_seq,
            }),
        })
    }
}

impl QueueStore for InMemoryQueueStore {
    fn insert_if_absent(&self, draft: QueueItemDraft) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.lock()?;
        if let Some(&existing) = inner.identity.get(&draft.identity_key)
            && let Some(item) = inner.items.get(existing)
        {
            return Ok(InsertOutcome::Conflict(item.clone()));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let identity_key = draft.identity_key.clone();
        let id = inner
            .items
            .insert_with_key(|id| QueueItem::from_draft(id, seq, draft));
        inner.identity.insert(identity_key, id);
        let item = inner.items[id].clone();
        Ok(InsertOutcome::Inserted(item))
    }

    fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.lock()?.items.get(id).cloned())
    }

    fn list_group(&self, group: GroupKey) -> Result<Vec<QueueItem>, StoreError> {
        Ok(self.lock()?.sorted(|item| item.group() == group))
    }

    fn list_owner(&self, owner: OwnerId) -> Result<Vec<QueueItem>, StoreError> {
        Ok(self.lock()?.sorted(|item| item.owner == owner))
    }

    fn in_flight_at(&self, location: LocationId) -> Result<Vec<QueueItem>, StoreError> {
        Ok(self
            .lock()?
            .sorted(|item| item.location == location && item.status.is_in_flight()))
    }

    fn groups_with_status(&self, status: QueueStatus) -> Result<Vec<GroupKey>, StoreError> {
        let inner = self.lock()?;
        let mut groups: Vec<GroupKey> = inner
            .items
            .values()
            .filter(|item| item.status == status)
            .map(QueueItem::group)
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    fn transition(
        &self,
        id: QueueItemId,
        guard: TransitionGuard,
        decide: Decide<'_>,
    ) -> Result<TransitionOutcome, StoreError> {
        if !guard.expect.can_transition_to(guard.next) {
            return Err(StoreError::IllegalTransition {
                from: guard.expect,
                to: guard.next,
            });
        }

        let mut inner = self.lock()?;
        let item = inner.items.get(id).ok_or(StoreError::NotFound(id))?;
        if item.status != guard.expect {
            return Ok(TransitionOutcome::Stale(item.clone()));
        }
        let claim_ok = match guard.claim {
            ClaimRule::Any => true,
            ClaimRule::MustBeUnclaimed => !item.completion_claimed,
            ClaimRule::MustBeClaimed => item.completion_claimed,
        };
        if !claim_ok {
            return Ok(TransitionOutcome::ClaimConflict(item.clone()));
        }

        let group = item.group();
        let location = item.location;
        let delta = item.energy_delta;

        if let Some(limit) = guard.slot_limit {
            let active = inner
                .items
                .values()
                .filter(|other| other.status == QueueStatus::Active && other.group() == group)
                .count();
            if active >= limit as usize {
                return Ok(TransitionOutcome::NoSlot);
            }
        }

        if let Some(gate) = guard.energy {
            let reserved =
                reserved_energy(inner.items.values().filter(|other| other.location == location));
            let projected = gate.balance.saturating_add(reserved);
            if projected.saturating_add(delta) < gate.floor {
                return Ok(TransitionOutcome::NoEnergy { projected });
            }
        }

        let item = &inner.items[id];
        let patch = match decide(item) {
            Ok(patch) => patch,
            Err(error) => {
                return Ok(TransitionOutcome::Declined {
                    item: item.clone(),
                    error,
                });
            }
        };

        let item = &mut inner.items[id];
        patch.apply_to(item);
        item.status = guard.next;
        let updated = item.clone();
        if guard.next.is_terminal() {
            inner.identity.remove(&updated.identity_key);
        }
        Ok(TransitionOutcome::Applied(updated))
    }

    fn claim_completion(
        &self,
        id: QueueItemId,
        now: Timestamp,
    ) -> Result<Option<QueueItem>, StoreError> {
        let mut inner = self.lock()?;
        let item = inner.items.get_mut(id).ok_or(StoreError::NotFound(id))?;
        if !item.is_due(now) || item.completion_claimed {
            return Ok(None);
        }
        item.completion_claimed = true;
        Ok(Some(item.clone()))
    }
}
