//! Queue kinds, item lifecycle and the status state machine.
//!
//! A [`QueueItem`] is the persistent record of one requested action. Its
//! status only ever moves forward:
//!
//! ```text
//! pending ──► active ──► completed
//!    │           │
//!    └──► cancelled ◄──┘
//! ```
//!
//! Terminal items (completed, cancelled) are immutable and are never
//! deleted, so their identity keys stay auditable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::{IdentityKey, ItemKey, LocationId, OwnerId, QueueItemId};
use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Queue kinds and their behavior table
// ---------------------------------------------------------------------------

/// The four independent queues a location runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Construction,
    Production,
    Research,
    DefenseProduction,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        QueueKind::Construction,
        QueueKind::Production,
        QueueKind::Research,
        QueueKind::DefenseProduction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueKind::Construction => "construction",
            QueueKind::Production => "production",
            QueueKind::Research => "research",
            QueueKind::DefenseProduction => "defense_production",
        }
    }

    /// Per-kind behavior: how targets are interpreted and which effect a
    /// completed item applies.
    pub fn behavior(self) -> &'static KindBehavior {
        &BEHAVIORS[self as usize]
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a submission's `target` is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The level the item will reach (buildings, technologies).
    Level,
    /// The number of units to produce.
    Quantity,
}

/// The effect applied to collaborator state when an item completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    RaiseBuildingLevel,
    RaiseTechnologyLevel,
    SpawnUnits,
    BuildDefenses,
}

#[derive(Debug)]
pub struct KindBehavior {
    pub target: TargetKind,
    pub effect: EffectKind,
    /// Whether items of this kind may change a location's energy budget.
    pub alters_energy: bool,
}

static BEHAVIORS: [KindBehavior; 4] = [
    KindBehavior {
        target: TargetKind::Level,
        effect: EffectKind::RaiseBuildingLevel,
        alters_energy: true,
    },
    KindBehavior {
        target: TargetKind::Quantity,
        effect: EffectKind::SpawnUnits,
        alters_energy: false,
    },
    KindBehavior {
        target: TargetKind::Level,
        effect: EffectKind::RaiseTechnologyLevel,
        alters_energy: false,
    },
    KindBehavior {
        target: TargetKind::Quantity,
        effect: EffectKind::BuildDefenses,
        alters_energy: true,
    },
];

// ---------------------------------------------------------------------------
// Status state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }

    /// Pending or active: the item still holds its identity key.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Active)
                | (QueueStatus::Pending, QueueStatus::Cancelled)
                | (QueueStatus::Active, QueueStatus::Completed)
                | (QueueStatus::Active, QueueStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Active => "active",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item ended up cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The owner asked for it.
    Requested,
    /// Applying the completion effect failed.
    EffectFailed(String),
}

// ---------------------------------------------------------------------------
// Queue item
// ---------------------------------------------------------------------------

/// Groups items that compete for the same queue: one location, one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub location: LocationId,
    pub kind: QueueKind,
}

/// Everything the admission controller knows about a new item before the
/// store assigns it an id and a sequence number.
#[derive(Debug, Clone)]
pub struct QueueItemDraft {
    pub identity_key: IdentityKey,
    pub kind: QueueKind,
    pub owner: OwnerId,
    pub location: LocationId,
    pub item_key: ItemKey,
    pub target: u32,
    /// Currency charged on activation; also the work the queue must perform.
    pub cost: u64,
    /// Net energy change once the item completes (negative = consumes).
    pub energy_delta: Fixed64,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub identity_key: IdentityKey,
    pub kind: QueueKind,
    pub status: QueueStatus,
    pub owner: OwnerId,
    pub location: LocationId,
    pub item_key: ItemKey,
    pub target: u32,
    pub cost: u64,
    pub energy_delta: Fixed64,
    /// Set once, when currency is debited. Never cleared; refunds are
    /// recorded in `refunded` instead.
    pub cost_charged: bool,
    pub created_at: Timestamp,
    /// Store-assigned insertion order; breaks `created_at` ties.
    pub seq: u64,
    pub scheduled_start: Option<Timestamp>,
    pub scheduled_completion: Option<Timestamp>,
    /// Set by the completion pass before it applies the item's effect.
    pub completion_claimed: bool,
    pub refunded: Option<u64>,
    pub cancel_reason: Option<CancelReason>,
    pub finished_at: Option<Timestamp>,
}

impl QueueItem {
    pub fn from_draft(id: QueueItemId, seq: u64, draft: QueueItemDraft) -> Self {
        Self {
            id,
            identity_key: draft.identity_key,
            kind: draft.kind,
            status: QueueStatus::Pending,
            owner: draft.owner,
            location: draft.location,
            item_key: draft.item_key,
            target: draft.target,
            cost: draft.cost,
            energy_delta: draft.energy_delta,
            cost_charged: false,
            created_at: draft.created_at,
            seq,
            scheduled_start: None,
            scheduled_completion: None,
            completion_claimed: false,
            refunded: None,
            cancel_reason: None,
            finished_at: None,
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey {
            location: self.location,
            kind: self.kind,
        }
    }

    /// FIFO ordering key within a group.
    pub fn fifo_key(&self) -> (Timestamp, u64) {
        (self.created_at, self.seq)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == QueueStatus::Active
            && self.scheduled_completion.is_some_and(|at| at <= now)
    }

    /// Planned work time, once the item has been activated.
    pub fn scheduled_duration_millis(&self) -> Option<u64> {
        let start = self.scheduled_start?;
        let end = self.scheduled_completion?;
        Some(end.millis_since(start))
    }
}

// ---------------------------------------------------------------------------
// Patches written by conditional transitions
// ---------------------------------------------------------------------------

/// Field changes that accompany a status transition.
///
/// A patch can only add facts to an item: it never clears `cost_charged`,
/// and it cannot touch identity, owner, cost or creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub charge: bool,
    pub scheduled_start: Option<Timestamp>,
    pub scheduled_completion: Option<Timestamp>,
    pub refunded: Option<u64>,
    pub cancel_reason: Option<CancelReason>,
    pub finished_at: Option<Timestamp>,
}

impl ItemPatch {
    pub fn activate(start: Timestamp, completion: Timestamp) -> Self {
        Self {
            charge: true,
            scheduled_start: Some(start),
            scheduled_completion: Some(completion),
            ..Self::default()
        }
    }

    pub fn complete(at: Timestamp) -> Self {
        Self {
            finished_at: Some(at),
            ..Self::default()
        }
    }

    pub fn cancel(at: Timestamp, reason: CancelReason, refund: Option<u64>) -> Self {
        Self {
            refunded: refund,
            cancel_reason: Some(reason),
            finished_at: Some(at),
            ..Self::default()
        }
    }

    pub fn apply_to(self, item: &mut QueueItem) {
        if self.charge {
            item.cost_charged = true;
        }
        if self.scheduled_start.is_some() {
            item.scheduled_start = self.scheduled_start;
        }
        if self.scheduled_completion.is_some() {
            item.scheduled_completion = self.scheduled_completion;
        }
        if self.refunded.is_some() {
            item.refunded = self.refunded;
        }
        if self.cancel_reason.is_some() {
            item.cancel_reason = self.cancel_reason;
        }
        if self.finished_at.is_some() {
            item.finished_at = self.finished_at;
        }
    }
}
