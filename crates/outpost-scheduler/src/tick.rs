//! The tick processor: a non-reentrant pass over every queue group.
//!
//! Each tick runs two passes:
//!
//! 1. **Completion** -- due active items are claimed, their effect applied,
//!    and then finalized as completed (or cancelled with a refund if the
//!    effect failed).
//! 2. **Activation** -- pending items are tried in FIFO order against fresh
//!    capacity, funds and energy.
//!
//! Completion runs first so that slots freed this tick are usable by the
//! activation pass. A tick that starts while another is running is skipped,
//! not queued.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;

use outpost_core::event::QueueEvent;
use outpost_core::fixed::fixed64_to_f64;
use outpost_core::id::LocationId;
use outpost_core::queue::{CancelReason, ItemPatch, QueueItem, QueueStatus};
use outpost_core::store::{ClaimRule, StoreError, TransitionGuard, TransitionOutcome};
use outpost_core::time::Timestamp;
use outpost_core::world::CompletionEffect;
use outpost_power::{DeficitTracker, EnergyTransition};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activation::{ActivationResult, try_activate};
use crate::context::SchedulerContext;

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("tick state lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub now: Timestamp,
    pub completed: usize,
    pub effect_failures: usize,
    pub activated: usize,
    pub deferred: usize,
    /// Items skipped because a collaborator or the store failed on them.
    pub item_errors: usize,
    /// Claimed items still waiting for their final write after this tick.
    pub awaiting_finalize: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(TickReport),
    /// Another tick was still running.
    Skipped,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Ran(report) => Some(report),
            TickOutcome::Skipped => None,
        }
    }
}

/// How a claimed item's effect went.
#[derive(Debug, Clone)]
enum EffectOutcome {
    Applied,
    Failed(String),
}

/// A claimed item whose effect has run but whose final transition is not
/// written yet.
#[derive(Debug, Clone)]
struct Unfinalized {
    item: QueueItem,
    outcome: EffectOutcome,
    /// When the effect ran; used as the finish time on a later retry too.
    at: Timestamp,
}

/// State owned by the tick loop.
#[derive(Debug, Default)]
struct TickState {
    ticks: u64,
    deficits: DeficitTracker,
    /// Retried at the start of every completion pass.
    unfinalized: Vec<Unfinalized>,
}

pub struct TickProcessor {
    ctx: Arc<SchedulerContext>,
    state: Mutex<TickState>,
}

impl TickProcessor {
    pub fn new(ctx: Arc<SchedulerContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(TickState::default()),
        }
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    /// Number of ticks that actually ran.
    pub fn ticks_run(&self) -> u64 {
        self.state.lock().map(|s| s.ticks).unwrap_or(0)
    }

    pub fn tick(&self) -> Result<TickOutcome, TickError> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                debug!(target: "outpost::tick", "tick.skipped=already_running");
                return Ok(TickOutcome::Skipped);
            }
            Err(TryLockError::Poisoned(_)) => return Err(TickError::Poisoned),
        };

        state.ticks += 1;
        let mut report = TickReport {
            tick: state.ticks,
            now: self.ctx.clock.now(),
            ..TickReport::default()
        };
        let mut touched = BTreeSet::new();

        let state = &mut *state;
        self.completion_pass(&mut state.unfinalized, &mut report, &mut touched)?;
        self.activation_pass(&mut report, &mut touched)?;
        self.track_energy(&mut state.deficits, &touched);
        report.awaiting_finalize = state.unfinalized.len();

        debug!(
            target: "outpost::tick",
            tick = report.tick,
            completed = report.completed,
            effect_failures = report.effect_failures,
            activated = report.activated,
            deferred = report.deferred,
            item_errors = report.item_errors,
            awaiting_finalize = report.awaiting_finalize,
            "tick.done"
        );
        Ok(TickOutcome::Ran(report))
    }

    // -----------------------------------------------------------------------
    // Completion pass
    // -----------------------------------------------------------------------

    fn completion_pass(
        &self,
        unfinalized: &mut Vec<Unfinalized>,
        report: &mut TickReport,
        touched: &mut BTreeSet<LocationId>,
    ) -> Result<(), TickError> {
        let ctx = &self.ctx;
        let now = report.now;

        // Claims whose effect already ran are settled before new work.
        for pending in std::mem::take(unfinalized) {
            self.settle(pending, unfinalized, report, touched);
        }

        let groups = ctx.read(|| ctx.store.groups_with_status(QueueStatus::Active))?;
        for group in groups {
            let due = match ctx.read(|| ctx.store.due_in_group(group, now)) {
                Ok(due) => due,
                Err(e) => {
                    warn!(
                        target: "outpost::tick",
                        location = %group.location,
                        kind = %group.kind,
                        error = %e,
                        "completion.group_read_failed"
                    );
                    report.item_errors += 1;
                    continue;
                }
            };
            for item in due {
                match self.claim_and_apply(&item, now) {
                    Ok(Some(pending)) => self.settle(pending, unfinalized, report, touched),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            target: "outpost::tick",
                            item_key = %item.item_key,
                            error = %e,
                            "completion.claim_failed"
                        );
                        report.item_errors += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the final transition for a claimed item. If the store refuses
    /// the write, the item is kept for the next tick; its effect is never
    /// applied again.
    fn settle(
        &self,
        pending: Unfinalized,
        unfinalized: &mut Vec<Unfinalized>,
        report: &mut TickReport,
        touched: &mut BTreeSet<LocationId>,
    ) {
        let location = pending.item.location;
        let result = match &pending.outcome {
            EffectOutcome::Applied => self.finalize_completed(&pending.item, pending.at),
            EffectOutcome::Failed(reason) => {
                self.finalize_failed(&pending.item, pending.at, reason)
            }
        };
        match result {
            Ok(Some(true)) => {
                report.completed += 1;
                touched.insert(location);
            }
            Ok(Some(false)) => {
                report.effect_failures += 1;
                touched.insert(location);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    target: "outpost::tick",
                    item_key = %pending.item.item_key,
                    error = %e,
                    "completion.finalize_deferred"
                );
                report.item_errors += 1;
                unfinalized.push(pending);
            }
        }
    }

    /// Claim a due item and apply its effect. `None` when another pass owns
    /// the item.
    fn claim_and_apply(
        &self,
        item: &QueueItem,
        now: Timestamp,
    ) -> Result<Option<Unfinalized>, StoreError> {
        let ctx = &self.ctx;
        let Some(claimed) = ctx.store.claim_completion(item.id, now)? else {
            return Ok(None);
        };

        let effect = CompletionEffect {
            item: claimed.id,
            owner: claimed.owner,
            location: claimed.location,
            key: claimed.item_key.clone(),
            effect: claimed.kind.behavior().effect,
            target: claimed.target,
        };
        let timeout = ctx.config.item_timeout();
        let started = Instant::now();
        let applied = ctx.effects.apply(&effect, started + timeout);
        let elapsed = started.elapsed();
        if elapsed > timeout {
            warn!(
                target: "outpost::tick",
                item_key = %claimed.item_key,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = ctx.config.item_timeout_ms,
                "completion.effect_slow"
            );
        }

        let outcome = match applied {
            Ok(()) => EffectOutcome::Applied,
            Err(e) => {
                warn!(
                    target: "outpost::tick",
                    item_key = %claimed.item_key,
                    error = %e,
                    "completion.effect_failed"
                );
                EffectOutcome::Failed(e.to_string())
            }
        };
        Ok(Some(Unfinalized {
            item: claimed,
            outcome,
            at: now,
        }))
    }

    fn finalize_completed(
        &self,
        item: &QueueItem,
        now: Timestamp,
    ) -> Result<Option<bool>, StoreError> {
        let ctx = &self.ctx;
        let outcome = ctx.store.transition(
            item.id,
            TransitionGuard::new(QueueStatus::Active, QueueStatus::Completed)
                .claim(ClaimRule::MustBeClaimed),
            &mut |_| Ok(ItemPatch::complete(now)),
        )?;
        match outcome {
            TransitionOutcome::Applied(done) => {
                info!(
                    target: "outpost::tick",
                    item_key = %done.item_key,
                    target = done.target,
                    location = %done.location,
                    "item.completed"
                );
                ctx.events.push(QueueEvent::Completed {
                    item: done.id,
                    at: now,
                });
                Ok(Some(true))
            }
            other => {
                warn!(
                    target: "outpost::tick",
                    item_key = %item.item_key,
                    outcome = ?other,
                    "completion.finalize_lost"
                );
                Ok(None)
            }
        }
    }

    /// Cancel an item whose effect failed, refunding its charged cost in
    /// full. A failed refund is logged and recorded as no refund.
    fn finalize_failed(
        &self,
        item: &QueueItem,
        now: Timestamp,
        reason: &str,
    ) -> Result<Option<bool>, StoreError> {
        let ctx = &self.ctx;
        let outcome = ctx.store.transition(
            item.id,
            TransitionGuard::new(QueueStatus::Active, QueueStatus::Cancelled)
                .claim(ClaimRule::MustBeClaimed),
            &mut |current| {
                let refund = if current.cost_charged {
                    match ctx.ledger.credit(current.owner, current.cost) {
                        Ok(_) => Some(current.cost),
                        Err(e) => {
                            warn!(
                                target: "outpost::tick",
                                item_key = %current.item_key,
                                error = %e,
                                "completion.refund_failed"
                            );
                            None
                        }
                    }
                } else {
                    None
                };
                Ok(ItemPatch::cancel(
                    now,
                    CancelReason::EffectFailed(reason.to_string()),
                    refund,
                ))
            },
        )?;
        match outcome {
            TransitionOutcome::Applied(cancelled) => {
                ctx.events.push(QueueEvent::EffectFailed {
                    item: cancelled.id,
                    reason: reason.to_string(),
                    at: now,
                });
                ctx.events.push(QueueEvent::Cancelled {
                    item: cancelled.id,
                    from: QueueStatus::Active,
                    refund: cancelled.refunded,
                    at: now,
                });
                Ok(Some(false))
            }
            other => {
                warn!(
                    target: "outpost::tick",
                    item_key = %item.item_key,
                    outcome = ?other,
                    "completion.cancel_lost"
                );
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Activation pass
    // -----------------------------------------------------------------------

    fn activation_pass(
        &self,
        report: &mut TickReport,
        touched: &mut BTreeSet<LocationId>,
    ) -> Result<(), TickError> {
        let ctx = &self.ctx;
        let groups = ctx.read(|| ctx.store.groups_with_status(QueueStatus::Pending))?;
        for group in groups {
            let pending = match ctx.read(|| ctx.store.pending_in_group(group)) {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(
                        target: "outpost::tick",
                        location = %group.location,
                        kind = %group.kind,
                        error = %e,
                        "activation.group_read_failed"
                    );
                    report.item_errors += 1;
                    continue;
                }
            };
            let mut remaining = pending.len();
            for item in &pending {
                remaining -= 1;
                match try_activate(ctx, item) {
                    Ok(ActivationResult::Activated { .. }) => {
                        report.activated += 1;
                        touched.insert(item.location);
                    }
                    Ok(ActivationResult::Stale(_)) => {}
                    Ok(result) if result.blocks_group() => {
                        report.deferred += remaining + 1;
                        break;
                    }
                    Ok(_) => report.deferred += 1,
                    Err(e) => {
                        warn!(
                            target: "outpost::tick",
                            item_key = %item.item_key,
                            error = %e,
                            "activation.failed"
                        );
                        report.item_errors += 1;
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Energy tracking
    // -----------------------------------------------------------------------

    fn track_energy(&self, deficits: &mut DeficitTracker, touched: &BTreeSet<LocationId>) {
        let projector = self.ctx.projector();
        for &location in touched {
            let budget = match projector.budget(location) {
                Ok(budget) => budget,
                Err(e) => {
                    debug!(
                        target: "outpost::tick",
                        %location,
                        error = %e,
                        "energy.budget_unavailable"
                    );
                    continue;
                }
            };
            match deficits.observe(location, &budget) {
                Some(EnergyTransition::DeficitStarted { projected, .. }) => {
                    warn!(
                        target: "outpost::energy",
                        %location,
                        projected = fixed64_to_f64(projected),
                        "energy.deficit_started"
                    );
                }
                Some(EnergyTransition::DeficitCleared { .. }) => {
                    info!(target: "outpost::energy", %location, "energy.deficit_cleared");
                }
                None => {}
            }
        }
    }
}
