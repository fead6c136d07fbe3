//! Pending -> active, shared by admission and the tick.
//!
//! Capacity is read fresh, the completion time is fixed from it, and then
//! the store runs the conditional transition with the debit inside it.

use outpost_core::capacity::{CapacityError, CapacityRate};
use outpost_core::event::QueueEvent;
use outpost_core::fixed::Fixed64;
use outpost_core::ledger::LedgerError;
use outpost_core::queue::{ItemPatch, QueueItem, QueueStatus};
use outpost_core::store::{
    ClaimRule, EnergyGate, StoreError, TransitionGuard, TransitionOutcome,
};
use outpost_core::time::work_duration_millis;
use outpost_power::EnergyError;

use crate::context::SchedulerContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResult {
    Activated { item: QueueItem, rate: CapacityRate },
    InsufficientFunds { required: u64, available: u64 },
    /// The queue's capacity is zero; nothing in the group can start.
    NoCapacity,
    NoSlot,
    NoEnergy { projected: Fixed64 },
    /// Someone else moved the item first.
    Stale(QueueItem),
}

impl ActivationResult {
    pub fn is_activated(&self) -> bool {
        matches!(self, ActivationResult::Activated { .. })
    }

    /// Whether later items of the same group cannot activate either.
    pub fn blocks_group(&self) -> bool {
        matches!(self, ActivationResult::NoSlot | ActivationResult::NoCapacity)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Energy(#[from] EnergyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger: {0}")]
    Ledger(LedgerError),
}

pub(crate) fn try_activate(
    ctx: &SchedulerContext,
    item: &QueueItem,
) -> Result<ActivationResult, ActivationError> {
    let rate = ctx.capacity().rate(item.location, item.kind)?;
    let Some(duration) = work_duration_millis(item.cost, rate.per_hour) else {
        return Ok(ActivationResult::NoCapacity);
    };

    let gate = match ctx.config.deficit_limit() {
        Some(limit) if item.energy_delta < Fixed64::ZERO => {
            let (produced, consumed) = ctx.projector().balance(item.location)?;
            Some(EnergyGate {
                balance: produced.saturating_sub(consumed),
                floor: -limit,
            })
        }
        _ => None,
    };

    let now = ctx.clock.now();
    let completion = now.saturating_add_millis(duration);
    let guard = TransitionGuard::new(QueueStatus::Pending, QueueStatus::Active)
        .claim(ClaimRule::Any)
        .slot_limit(ctx.config.slot_limit(item.kind))
        .energy(gate);

    let outcome = ctx.store.transition(item.id, guard, &mut |current| {
        ctx.ledger.debit(current.owner, current.cost)?;
        Ok(ItemPatch::activate(now, completion))
    })?;

    Ok(match outcome {
        TransitionOutcome::Applied(activated) => {
            ctx.events.push(QueueEvent::Activated {
                item: activated.id,
                cost: activated.cost,
                scheduled_completion: completion,
                at: now,
            });
            ActivationResult::Activated {
                item: activated,
                rate,
            }
        }
        TransitionOutcome::Declined {
            error:
                LedgerError::InsufficientFunds {
                    required,
                    available,
                    ..
                },
            ..
        } => ActivationResult::InsufficientFunds {
            required,
            available,
        },
        TransitionOutcome::Declined { error, .. } => {
            return Err(ActivationError::Ledger(error));
        }
        TransitionOutcome::NoSlot => ActivationResult::NoSlot,
        TransitionOutcome::NoEnergy { projected } => ActivationResult::NoEnergy { projected },
        TransitionOutcome::Stale(current) | TransitionOutcome::ClaimConflict(current) => {
            ActivationResult::Stale(current)
        }
    })
}
