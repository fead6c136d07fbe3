use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use outpost_core::event::EventKind;
use outpost_core::ledger::ResourceLedger;
use outpost_core::queue::{CancelReason, QueueKind, QueueStatus};
use outpost_core::store::{InMemoryQueueStore, QueueStore};
use outpost_core::test_utils::*;
use outpost_core::time::{MILLIS_PER_HOUR, ManualClock};
use outpost_core::world::{CompletionEffect, EffectSink, InMemoryWorld, WorldError, WorldView};
use outpost_scheduler::test_utils::{Harness, START};
use outpost_scheduler::{
    AdmissionController, SchedulerConfig, SchedulerContext, SubmitRequest, TickOutcome,
    TickProcessor, TickRunner,
};

#[test]
fn pending_items_activate_in_submission_order() {
    let h = Harness::new(0);
    let a = h.submit(habitat(), 1).unwrap().item;
    let b = h.submit(smelter(), 1).unwrap().item;
    let c = h.submit(solar_array(), 1).unwrap().item;

    h.ledger.set_balance(OWNER, 100).unwrap();
    assert_eq!(h.tick().activated, 1);
    assert_eq!(h.item(a.id).status, QueueStatus::Active);
    assert_eq!(h.item(b.id).status, QueueStatus::Pending);
    assert_eq!(h.item(c.id).status, QueueStatus::Pending);

    h.ledger.credit(OWNER, 80).unwrap();
    assert_eq!(h.tick().activated, 1);
    assert_eq!(h.item(b.id).status, QueueStatus::Active);
    assert_eq!(h.item(c.id).status, QueueStatus::Pending);

    h.ledger.credit(OWNER, 60).unwrap();
    assert_eq!(h.tick().activated, 1);
    assert_eq!(h.item(c.id).status, QueueStatus::Active);
    assert_eq!(h.balance(OWNER), 0);

    let starts: Vec<_> = [a.id, b.id, c.id]
        .iter()
        .map(|&id| h.item(id).scheduled_start)
        .collect();
    assert!(starts.iter().all(Option::is_some));
}

#[test]
fn unaffordable_head_does_not_block_cheaper_items() {
    let h = Harness::new(0);
    let a = h.submit(habitat(), 1).unwrap().item;
    let c = h.submit(solar_array(), 1).unwrap().item;

    h.ledger.set_balance(OWNER, 70).unwrap();
    let report = h.tick();
    assert_eq!(report.activated, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(h.item(a.id).status, QueueStatus::Pending);
    assert_eq!(h.item(c.id).status, QueueStatus::Active);
    assert_eq!(h.balance(OWNER), 10);
}

#[test]
fn due_items_complete_and_apply_once() {
    let h = Harness::new(1_000);
    let item = h.submit(habitat(), 1).unwrap().item;

    h.advance_millis(5 * MILLIS_PER_HOUR - 1);
    assert_eq!(h.tick().completed, 0);

    h.advance_millis(1);
    let report = h.tick();
    assert_eq!(report.completed, 1);
    let done = h.item(item.id);
    assert_eq!(done.status, QueueStatus::Completed);
    assert_eq!(done.finished_at, Some(START.saturating_add_millis(5 * MILLIS_PER_HOUR)));
    assert_eq!(h.world.building_level(HOME, &habitat()).unwrap(), 1);

    h.advance_hours(1);
    assert_eq!(h.tick().completed, 0);
    assert_eq!(h.world.applied_effects().unwrap().len(), 1);

    let kinds: Vec<_> = h
        .ctx
        .events
        .for_item(item.id)
        .iter()
        .map(|e| e.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![EventKind::Admitted, EventKind::Activated, EventKind::Completed]
    );
}

#[test]
fn completion_time_is_fixed_at_activation() {
    let h = Harness::new(1_000);
    let item = h.submit(habitat(), 1).unwrap().item;

    // Rate doubles after activation; the item keeps its 5h schedule.
    h.world
        .set_building_level(HOME, &assembly_yard(), 2)
        .unwrap();
    h.advance_hours(4);
    assert_eq!(h.tick().completed, 0);
    assert_eq!(h.item(item.id).scheduled_completion, item.scheduled_completion);

    h.advance_hours(1);
    assert_eq!(h.tick().completed, 1);
}

#[test]
fn stale_level_effect_cancels_with_full_refund() {
    let h = Harness::new(1_000);
    let item = h.submit(habitat(), 1).unwrap().item;
    assert_eq!(h.balance(OWNER), 900);

    h.world.set_building_level(HOME, &habitat(), 1).unwrap();
    h.advance_hours(5);
    let report = h.tick();
    assert_eq!(report.completed, 0);
    assert_eq!(report.effect_failures, 1);

    let cancelled = h.item(item.id);
    assert_eq!(cancelled.status, QueueStatus::Cancelled);
    assert_eq!(cancelled.refunded, Some(100));
    assert!(matches!(
        cancelled.cancel_reason,
        Some(CancelReason::EffectFailed(_))
    ));
    assert_eq!(h.balance(OWNER), 1_000);

    let kinds: Vec<_> = h
        .ctx
        .events
        .for_item(item.id)
        .iter()
        .map(|e| e.kind())
        .collect();
    assert!(kinds.contains(&EventKind::EffectFailed));
    assert!(kinds.contains(&EventKind::Cancelled));
}

#[test]
fn effect_failure_is_isolated_per_item() {
    let h = Harness::new(1_000);
    let lost = h.submit_as(OWNER, FRONTIER, drone(), 2).unwrap().item;
    let kept = h.submit(drone(), 2).unwrap().item;
    assert_eq!(h.balance(OWNER), 800);

    h.world.remove_location(FRONTIER).unwrap();
    h.advance_hours(10);
    let report = h.tick();
    assert_eq!(report.completed, 1);
    assert_eq!(report.effect_failures, 1);

    assert_eq!(h.item(lost.id).status, QueueStatus::Cancelled);
    assert_eq!(h.item(kept.id).status, QueueStatus::Completed);
    assert_eq!(h.world.unit_count(HOME, &drone()).unwrap(), 2);
    assert_eq!(h.balance(OWNER), 900);
}

#[test]
fn zero_capacity_defers_whole_group_until_restored() {
    let h = Harness::new(1_000);
    h.world
        .set_environment_bonus(HOME, QueueKind::Construction, fixed(-100.0))
        .unwrap();
    h.submit(habitat(), 1).unwrap();
    h.submit(smelter(), 1).unwrap();

    let report = h.tick();
    assert_eq!(report.activated, 0);
    assert_eq!(report.deferred, 2);

    h.world
        .set_environment_bonus(HOME, QueueKind::Construction, fixed(0.0))
        .unwrap();
    let report = h.tick();
    assert_eq!(report.activated, 2);
    assert_eq!(h.balance(OWNER), 820);
}

#[test]
fn completion_frees_slot_in_same_tick() {
    let mut config = SchedulerConfig::default();
    config.slots.insert(QueueKind::Construction, 1);
    let h = Harness::with_config(1_000, config);
    h.submit(habitat(), 1).unwrap();
    let next = h.submit(solar_array(), 1).unwrap().item;

    h.advance_hours(5);
    let report = h.tick();
    assert_eq!(report.completed, 1);
    assert_eq!(report.activated, 1);
    let active = h.item(next.id);
    assert_eq!(
        active.scheduled_start,
        Some(START.saturating_add_millis(5 * MILLIS_PER_HOUR))
    );
}

#[test]
fn tick_numbers_increase() {
    let h = Harness::new(0);
    assert_eq!(h.tick().tick, 1);
    assert_eq!(h.tick().tick, 2);
    assert_eq!(h.processor.ticks_run(), 2);
}

// ---------------------------------------------------------------------------
// Overlap
// ---------------------------------------------------------------------------

/// Parks inside `apply` until the test releases it.
struct ParkedSink {
    world: Arc<InMemoryWorld>,
    entered: Barrier,
    release: Barrier,
}

impl EffectSink for ParkedSink {
    fn apply(&self, effect: &CompletionEffect, deadline: Instant) -> Result<(), WorldError> {
        self.entered.wait();
        self.release.wait();
        self.world.apply(effect, deadline)
    }
}

#[test]
fn overlapping_tick_is_skipped() {
    let world = Arc::new(scenario_world());
    let sink = Arc::new(ParkedSink {
        world: world.clone(),
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(InMemoryQueueStore::new());
    let ctx = Arc::new(
        SchedulerContext::new(
            Arc::new(scenario_catalog()),
            store.clone(),
            Arc::new(funded_ledger(1_000)),
            world.clone(),
            sink.clone(),
        )
        .with_clock(clock.clone()),
    );
    let item = AdmissionController::new(&ctx)
        .submit(SubmitRequest {
            owner: OWNER,
            location: HOME,
            item_key: habitat(),
            target: 1,
        })
        .unwrap()
        .item;
    clock.advance_hours(5);

    let processor = TickProcessor::new(ctx);
    thread::scope(|s| {
        let running = s.spawn(|| processor.tick().unwrap());
        sink.entered.wait();
        assert_eq!(processor.tick().unwrap(), TickOutcome::Skipped);
        sink.release.wait();
        let outcome = running.join().unwrap();
        assert_eq!(outcome.report().map(|r| r.completed), Some(1));
    });

    assert_eq!(processor.ticks_run(), 1);
    assert_eq!(
        store.get(item.id).unwrap().map(|i| i.status),
        Some(QueueStatus::Completed)
    );
    assert_eq!(world.building_level(HOME, &habitat()).unwrap(), 1);
}

#[test]
fn runner_ticks_until_shutdown() {
    let h = Harness::new(1_000);
    h.submit(habitat(), 1).unwrap();
    h.advance_hours(5);

    let runner = TickRunner::spawn(h.processor.clone(), Duration::from_millis(5)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.processor.ticks_run() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let ran = runner.shutdown();
    assert!(ran >= 1);
    assert_eq!(h.world.building_level(HOME, &habitat()).unwrap(), 1);
}
