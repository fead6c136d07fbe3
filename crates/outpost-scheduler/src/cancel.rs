//! Cancellation and refunds.
//!
//! A pending item was never charged, so cancelling it is free. An active
//! item is refunded according to the configured [`RefundPolicy`]; the
//! credit happens inside the conditional `active -> cancelled` transition,
//! so a cancel that loses the race against completion refunds nothing.

use outpost_core::event::QueueEvent;
use outpost_core::id::QueueItemId;
use outpost_core::ledger::LedgerError;
use outpost_core::queue::{CancelReason, ItemPatch, QueueItem, QueueStatus};
use outpost_core::store::{ClaimRule, StoreError, TransitionGuard, TransitionOutcome};
use outpost_core::time::Timestamp;
use tracing::info;

use crate::config::RefundPolicy;
use crate::context::SchedulerContext;

/// Amount to credit back when cancelling `item` at `now`. Uncharged items
/// get nothing.
pub fn refund_amount(policy: RefundPolicy, item: &QueueItem, now: Timestamp) -> u64 {
    if !item.cost_charged {
        return 0;
    }
    let scaled = |num: u64, den: u64| -> u64 {
        if den == 0 {
            return 0;
        }
        let value = u128::from(item.cost) * u128::from(num) / u128::from(den);
        u64::try_from(value).unwrap_or(item.cost)
    };
    match policy {
        RefundPolicy::Full => item.cost,
        RefundPolicy::NoRefund => 0,
        RefundPolicy::Percent(p) => scaled(u64::from(p.min(100)), 100),
        RefundPolicy::ProRata => {
            match (item.scheduled_duration_millis(), item.scheduled_completion) {
                (Some(total), Some(end)) => scaled(end.millis_since(now).min(total), total),
                _ => item.cost,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { item: QueueItem, refund: u64 },
    /// The item had already completed or been cancelled; nothing changed.
    AlreadyTerminal { status: QueueStatus },
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("queue item {0:?} not found")]
    NotFound(QueueItemId),

    #[error("queue item {0:?} is being completed and can no longer be cancelled")]
    Finalizing(QueueItemId),

    #[error("refund failed: {0}")]
    Refund(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn cancel_item(
    ctx: &SchedulerContext,
    id: QueueItemId,
) -> Result<CancelOutcome, CancelError> {
    // Status only moves forward, so a stale read can repeat at most twice.
    for _ in 0..3 {
        let item = ctx
            .read(|| ctx.store.get(id))?
            .ok_or(CancelError::NotFound(id))?;
        let now = ctx.clock.now();

        let outcome = match item.status {
            QueueStatus::Completed | QueueStatus::Cancelled => {
                return Ok(CancelOutcome::AlreadyTerminal {
                    status: item.status,
                });
            }
            QueueStatus::Pending => ctx.store.transition(
                id,
                TransitionGuard::new(QueueStatus::Pending, QueueStatus::Cancelled),
                &mut |_| Ok(ItemPatch::cancel(now, CancelReason::Requested, None)),
            )?,
            QueueStatus::Active => {
                if item.completion_claimed {
                    return Err(CancelError::Finalizing(id));
                }
                let policy = ctx.config.refund;
                ctx.store.transition(
                    id,
                    TransitionGuard::new(QueueStatus::Active, QueueStatus::Cancelled)
                        .claim(ClaimRule::MustBeUnclaimed),
                    &mut |current| {
                        let refund = refund_amount(policy, current, now);
                        if refund > 0 {
                            ctx.ledger.credit(current.owner, refund)?;
                        }
                        Ok(ItemPatch::cancel(now, CancelReason::Requested, Some(refund)))
                    },
                )?
            }
        };

        match outcome {
            TransitionOutcome::Applied(cancelled) => {
                let refund = cancelled.refunded.unwrap_or(0);
                info!(
                    target: "outpost::cancel",
                    item_key = %cancelled.item_key,
                    from = %item.status,
                    refund,
                    "item.cancelled"
                );
                ctx.events.push(QueueEvent::Cancelled {
                    item: id,
                    from: item.status,
                    refund: cancelled.refunded,
                    at: now,
                });
                return Ok(CancelOutcome::Cancelled {
                    item: cancelled,
                    refund,
                });
            }
            TransitionOutcome::ClaimConflict(_) => return Err(CancelError::Finalizing(id)),
            TransitionOutcome::Declined { error, .. } => return Err(CancelError::Refund(error)),
            TransitionOutcome::Stale(_)
            | TransitionOutcome::NoSlot
            | TransitionOutcome::NoEnergy { .. } => continue,
        }
    }
    Err(CancelError::Store(StoreError::Unavailable(
        "item kept changing during cancellation".to_string(),
    )))
}
