//! Store writes that fail or lose a race in the middle of a scheduling
//! decision. Every item must still end completed or cancelled, charged and
//! applied at most once.

use std::sync::{Arc, Mutex};

use outpost_core::fixed::Fixed64;
use outpost_core::id::{LocationId, OwnerId, QueueItemId};
use outpost_core::queue::{
    CancelReason, GroupKey, ItemPatch, QueueItem, QueueItemDraft, QueueStatus,
};
use outpost_core::store::{
    Decide, InMemoryQueueStore, InsertOutcome, QueueStore, StoreError, TransitionGuard,
    TransitionOutcome,
};
use outpost_core::test_utils::*;
use outpost_core::time::{MILLIS_PER_HOUR, Timestamp};
use outpost_core::world::WorldView;
use outpost_scheduler::admission::DecisionOutcome;
use outpost_scheduler::test_utils::{Harness, START};
use outpost_scheduler::{CancelError, SchedulerConfig, SubmitRequest, cancel_item};
use serde_json::json;

// ---------------------------------------------------------------------------
// Scripted store
// ---------------------------------------------------------------------------

/// One-shot interference with the next matching store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The next transition into this status fails without touching the item.
    FailTransitionTo(QueueStatus),
    /// The next completion claim fails without claiming.
    FailClaim,
    /// The next activation finds its item already cancelled by another
    /// writer.
    CancelBeforeActivation,
}

/// Delegates to an in-memory store, consuming `script` as calls match.
struct ScriptedStore {
    inner: Arc<InMemoryQueueStore>,
    script: Mutex<Vec<Step>>,
}

impl ScriptedStore {
    fn take(&self, step: Step) -> bool {
        let mut script = self.script.lock().unwrap();
        match script.iter().position(|s| *s == step) {
            Some(i) => {
                script.remove(i);
                true
            }
            None => false,
        }
    }
}

impl QueueStore for ScriptedStore {
    fn insert_if_absent(&self, draft: QueueItemDraft) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_if_absent(draft)
    }

    fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, StoreError> {
        self.inner.get(id)
    }

    fn list_group(&self, group: GroupKey) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.list_group(group)
    }

    fn list_owner(&self, owner: OwnerId) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.list_owner(owner)
    }

    fn in_flight_at(&self, location: LocationId) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.in_flight_at(location)
    }

    fn groups_with_status(&self, status: QueueStatus) -> Result<Vec<GroupKey>, StoreError> {
        self.inner.groups_with_status(status)
    }

    fn transition(
        &self,
        id: QueueItemId,
        guard: TransitionGuard,
        decide: Decide<'_>,
    ) -> Result<TransitionOutcome, StoreError> {
        if self.take(Step::FailTransitionTo(guard.next)) {
            return Err(StoreError::Unavailable(format!("write to {} refused", guard.next)));
        }
        if guard.next == QueueStatus::Active && self.take(Step::CancelBeforeActivation) {
            self.inner.transition(
                id,
                TransitionGuard::new(QueueStatus::Pending, QueueStatus::Cancelled),
                &mut |_| Ok(ItemPatch::cancel(START, CancelReason::Requested, None)),
            )?;
        }
        self.inner.transition(id, guard, decide)
    }

    fn claim_completion(
        &self,
        id: QueueItemId,
        now: Timestamp,
    ) -> Result<Option<QueueItem>, StoreError> {
        if self.take(Step::FailClaim) {
            return Err(StoreError::Unavailable("claim refused".to_string()));
        }
        self.inner.claim_completion(id, now)
    }
}

fn scripted(balance: u64, steps: &[Step]) -> Harness {
    let script = Mutex::new(steps.to_vec());
    Harness::with_store(
        balance,
        SchedulerConfig::default(),
        move |inner| -> Arc<dyn QueueStore> { Arc::new(ScriptedStore { inner, script }) },
    )
}

// ---------------------------------------------------------------------------
// Completion pass
// ---------------------------------------------------------------------------

#[test]
fn refused_completion_write_is_finalized_next_tick() {
    let h = scripted(1_000, &[Step::FailTransitionTo(QueueStatus::Completed)]);
    let item = h.submit(smelter(), 1).unwrap().item;
    assert_eq!(item.status, QueueStatus::Active);
    assert_eq!(h.balance(OWNER), 920);

    h.advance_hours(48);
    let first = h.tick();
    assert_eq!(first.completed, 0);
    assert_eq!(first.item_errors, 1);
    assert_eq!(first.awaiting_finalize, 1);
    let held = h.item(item.id);
    assert_eq!(held.status, QueueStatus::Active);
    assert!(held.completion_claimed);
    assert!(matches!(
        cancel_item(&h.ctx, item.id),
        Err(CancelError::Finalizing(_))
    ));

    h.advance_hours(1);
    let second = h.tick();
    assert_eq!(second.completed, 1);
    assert_eq!(second.item_errors, 0);
    assert_eq!(second.awaiting_finalize, 0);

    let done = h.item(item.id);
    assert_eq!(done.status, QueueStatus::Completed);
    // Finish time is when the effect ran, not when the write succeeded.
    assert_eq!(done.finished_at, Some(START.saturating_add_millis(48 * MILLIS_PER_HOUR)));
    assert_eq!(h.world.applied_effects().unwrap().len(), 1);
    assert_eq!(h.world.building_level(HOME, &smelter()).unwrap(), 1);

    let budget = h.ctx.projector().budget(HOME).unwrap();
    assert_eq!(budget.balance, fixed(-2.0));
    assert_eq!(budget.reserved, Fixed64::ZERO);
    assert_eq!(budget.projected_balance, fixed(-2.0));

    // The identity key is free again.
    assert!(h.submit(smelter(), 2).is_ok());
    assert_eq!(h.tick().completed, 0);
    assert_eq!(h.world.applied_effects().unwrap().len(), 1);
}

#[test]
fn refused_cancel_after_failed_effect_refunds_once() {
    let h = scripted(1_000, &[Step::FailTransitionTo(QueueStatus::Cancelled)]);
    let item = h.submit_as(OWNER, FRONTIER, drone(), 2).unwrap().item;
    assert_eq!(h.balance(OWNER), 900);
    h.world.remove_location(FRONTIER).unwrap();

    h.advance_hours(10);
    let first = h.tick();
    assert_eq!(first.effect_failures, 0);
    assert_eq!(first.item_errors, 1);
    assert_eq!(h.balance(OWNER), 900);

    let second = h.tick();
    assert_eq!(second.effect_failures, 1);
    let third = h.tick();
    assert_eq!(third.effect_failures, 0);
    assert_eq!(third.awaiting_finalize, 0);

    let cancelled = h.item(item.id);
    assert_eq!(cancelled.status, QueueStatus::Cancelled);
    assert_eq!(cancelled.refunded, Some(100));
    assert!(matches!(cancelled.cancel_reason, Some(CancelReason::EffectFailed(_))));
    assert_eq!(h.balance(OWNER), 1_000);
    assert!(h.world.applied_effects().unwrap().is_empty());
}

#[test]
fn refused_claim_leaves_item_for_next_tick() {
    let h = scripted(1_000, &[Step::FailClaim]);
    let item = h.submit(habitat(), 1).unwrap().item;

    h.advance_hours(5);
    let first = h.tick();
    assert_eq!(first.completed, 0);
    assert_eq!(first.item_errors, 1);
    assert_eq!(first.awaiting_finalize, 0);
    assert!(!h.item(item.id).completion_claimed);

    assert_eq!(h.tick().completed, 1);
    assert_eq!(h.item(item.id).status, QueueStatus::Completed);
    assert_eq!(h.world.applied_effects().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

#[test]
fn refused_activation_write_charges_nothing() {
    let h = scripted(1_000, &[Step::FailTransitionTo(QueueStatus::Active)]);
    let admission = h.submit(habitat(), 1).unwrap();
    assert_eq!(admission.decision.outcome, DecisionOutcome::PendingDeferred);
    assert_eq!(admission.item.status, QueueStatus::Pending);
    assert_eq!(h.ledger.debit_count(OWNER).unwrap(), 0);
    assert_eq!(h.balance(OWNER), 1_000);

    let report = h.tick();
    assert_eq!(report.activated, 1);
    assert_eq!(h.item(admission.item.id).status, QueueStatus::Active);
    assert_eq!(h.ledger.debit_count(OWNER).unwrap(), 1);
    assert_eq!(h.balance(OWNER), 900);
}

#[test]
fn cancel_landing_before_activation_is_reported_as_cancelled() {
    let h = scripted(1_000, &[Step::CancelBeforeActivation]);
    let body = serde_json::to_value(h.service.submit(SubmitRequest {
        owner: OWNER,
        location: HOME,
        item_key: habitat(),
        target: 1,
    }))
    .unwrap();

    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["item"]["status"], json!("cancelled"));
    assert_eq!(body["data"]["decision"]["outcome"], json!("cancelled_concurrently"));
    assert!(body["message"].as_str().unwrap().contains("cancelled"));
    assert_eq!(h.ledger.debit_count(OWNER).unwrap(), 0);

    // Nothing holds the identity key; the same request goes through.
    let again = h.submit(habitat(), 1).unwrap();
    assert_eq!(again.decision.outcome, DecisionOutcome::Activated);
    assert_eq!(h.balance(OWNER), 900);
}
