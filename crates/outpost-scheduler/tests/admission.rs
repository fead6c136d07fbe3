use outpost_core::event::EventKind;
use outpost_core::fixed::Fixed64;
use outpost_core::id::{IdentityKey, LocationId};
use outpost_core::queue::{QueueKind, QueueStatus};
use outpost_core::test_utils::*;
use outpost_core::time::{MILLIS_PER_HOUR, Timestamp};
use outpost_core::world::WorldView;
use outpost_scheduler::admission::DecisionOutcome;
use outpost_scheduler::test_utils::{Harness, START};
use outpost_scheduler::{AdmissionError, SchedulerConfig};

#[test]
fn funded_submission_activates_immediately() {
    let h = Harness::new(1_000);
    let admission = h.submit(habitat(), 1).unwrap();
    let item = admission.item;

    assert_eq!(admission.decision.outcome, DecisionOutcome::Activated);
    assert_eq!(item.status, QueueStatus::Active);
    assert!(item.cost_charged);
    assert_eq!(item.cost, 100);
    assert_eq!(item.scheduled_start, Some(START));
    // 100 work-units at 20/h.
    assert_eq!(
        item.scheduled_completion,
        Some(START.saturating_add_millis(5 * MILLIS_PER_HOUR))
    );
    assert_eq!(h.balance(OWNER), 900);
}

#[test]
fn unfunded_submission_stays_pending_without_charge() {
    let h = Harness::new(50);
    let admission = h.submit(habitat(), 1).unwrap();
    assert_eq!(
        admission.decision.outcome,
        DecisionOutcome::PendingInsufficientFunds
    );
    assert_eq!(admission.item.status, QueueStatus::Pending);
    assert!(!admission.item.cost_charged);
    assert!(admission.item.scheduled_completion.is_none());
    assert_eq!(h.balance(OWNER), 50);
    assert_eq!(h.ledger.debit_count(OWNER).unwrap(), 0);
}

#[test]
fn duplicate_submission_is_already_in_progress() {
    let h = Harness::new(0);
    let first = h.submit(habitat(), 1).unwrap().item;
    let err = h.submit(habitat(), 1).unwrap_err();
    match err {
        AdmissionError::AlreadyInProgress {
            identity_key,
            existing,
        } => {
            assert_eq!(identity_key, first.identity_key);
            assert_eq!(
                identity_key,
                IdentityKey::derive(OWNER, HOME, &habitat(), 1)
            );
            assert_eq!(existing, first.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(h.store.len().unwrap(), 1);
}

#[test]
fn same_item_at_another_location_is_independent() {
    let h = Harness::new(1_000);
    h.submit(habitat(), 1).unwrap();
    let other = h.submit_as(OWNER, FRONTIER, habitat(), 1).unwrap();
    assert_eq!(other.item.status, QueueStatus::Active);
}

#[test]
fn validation_errors() {
    let h = Harness::new(1_000);
    assert!(matches!(
        h.submit("moon_base".into(), 1),
        Err(AdmissionError::UnknownItem(_))
    ));
    assert!(matches!(
        h.submit(habitat(), 2),
        Err(AdmissionError::InvalidTarget { target: 2, .. })
    ));
    assert!(matches!(
        h.submit(drone(), 0),
        Err(AdmissionError::InvalidTarget { target: 0, .. })
    ));
    assert!(matches!(
        h.submit_as(RIVAL, HOME, habitat(), 1),
        Err(AdmissionError::NotOwner { .. })
    ));
    assert!(matches!(
        h.submit_as(OWNER, LocationId(999), habitat(), 1),
        Err(AdmissionError::UnknownLocation(LocationId(999)))
    ));
    assert!(h.store.is_empty().unwrap());
}

#[test]
fn max_level_is_enforced() {
    let h = Harness::new(1_000);
    h.world.set_building_level(HOME, &habitat(), 30).unwrap();
    let err = h.submit(habitat(), 31).unwrap_err();
    match err {
        AdmissionError::InvalidTarget { reason, .. } => assert!(reason.contains("maximum")),
        other => panic!("expected invalid target, got {other:?}"),
    }
}

#[test]
fn prerequisites_are_checked() {
    let h = Harness::new(10_000);
    match h.submit(survey_tech(), 1).unwrap_err() {
        AdmissionError::PrerequisiteNotMet {
            required,
            level,
            actual,
            ..
        } => {
            assert_eq!(required, habitat());
            assert_eq!(level, 2);
            assert_eq!(actual, 0);
        }
        other => panic!("expected prerequisite error, got {other:?}"),
    }

    h.world.set_building_level(HOME, &habitat(), 2).unwrap();
    let admission = h.submit(survey_tech(), 1).unwrap();
    assert_eq!(admission.item.kind, QueueKind::Research);
    assert_eq!(admission.item.cost, 200);
}

#[test]
fn energy_is_reserved_from_activation() {
    let h = Harness::new(1_000);
    let admission = h.submit(smelter(), 1).unwrap();
    let budget = admission.decision.budget;
    assert_eq!(admission.decision.energy_delta, fixed(-2.0));
    assert_eq!(budget.balance, Fixed64::ZERO);
    assert_eq!(budget.reserved, fixed(-2.0));
    assert_eq!(budget.projected_balance, fixed(-2.0));

    // 80 work-units at 20/h.
    h.advance_hours(4);
    let report = h.tick();
    assert_eq!(report.completed, 1);

    let after = h.ctx.projector().budget(HOME).unwrap();
    assert_eq!(after.consumed, fixed(2.0));
    assert_eq!(after.balance, fixed(-2.0));
    assert_eq!(after.reserved, Fixed64::ZERO);
    assert_eq!(after.projected_balance, fixed(-2.0));
}

#[test]
fn pending_items_reserve_no_energy() {
    let h = Harness::new(0);
    let admission = h.submit(smelter(), 1).unwrap();
    assert_eq!(admission.decision.budget.reserved, Fixed64::ZERO);
    assert_eq!(admission.item.energy_delta, fixed(-2.0));
}

#[test]
fn producers_do_not_raise_projection_until_complete() {
    let h = Harness::new(1_000);
    let admission = h.submit(solar_array(), 1).unwrap();
    assert_eq!(admission.decision.energy_delta, fixed(5.0));
    assert_eq!(admission.decision.budget.projected_balance, Fixed64::ZERO);
}

#[test]
fn deficit_limit_defers_consumers() {
    let config = SchedulerConfig {
        energy_deficit_limit: Some(1.0),
        ..SchedulerConfig::default()
    };
    let h = Harness::with_config(1_000, config);
    let admission = h.submit(smelter(), 1).unwrap();
    assert_eq!(admission.decision.outcome, DecisionOutcome::PendingEnergy);
    assert!(!admission.item.cost_charged);

    h.world.set_building_level(HOME, &solar_array(), 1).unwrap();
    let report = h.tick();
    assert_eq!(report.activated, 1);
    assert_eq!(h.item(admission.item.id).status, QueueStatus::Active);
}

#[test]
fn slot_limit_queues_behind_active_item() {
    let mut config = SchedulerConfig::default();
    config.slots.insert(QueueKind::Construction, 1);
    let h = Harness::with_config(1_000, config);

    let first = h.submit(habitat(), 1).unwrap();
    assert_eq!(first.decision.outcome, DecisionOutcome::Activated);
    let second = h.submit(smelter(), 1).unwrap();
    assert_eq!(second.decision.outcome, DecisionOutcome::PendingNoSlot);
    let third = h.submit(solar_array(), 1).unwrap();
    assert_eq!(third.decision.outcome, DecisionOutcome::PendingBehindQueue);

    // Other queues are unaffected.
    let drones = h.submit(drone(), 2).unwrap();
    assert_eq!(drones.decision.outcome, DecisionOutcome::Activated);

    h.advance_hours(5);
    let report = h.tick();
    assert_eq!(report.completed, 1);
    assert_eq!(report.activated, 1);
    assert_eq!(h.item(second.item.id).status, QueueStatus::Active);
    assert_eq!(h.item(third.item.id).status, QueueStatus::Pending);
}

#[test]
fn zero_capacity_leaves_item_pending() {
    let h = Harness::new(1_000);
    h.world
        .set_environment_bonus(HOME, QueueKind::Construction, fixed(-100.0))
        .unwrap();
    let admission = h.submit(habitat(), 1).unwrap();
    assert_eq!(admission.decision.outcome, DecisionOutcome::PendingNoCapacity);
    assert_eq!(h.balance(OWNER), 1_000);
}

#[test]
fn admission_records_events() {
    let h = Harness::new(1_000);
    let item = h.submit(habitat(), 1).unwrap().item;
    let events = h.ctx.events.for_item(item.id);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind(), EventKind::Admitted);
    assert_eq!(events[1].kind(), EventKind::Activated);
}

#[test]
fn quantity_items_cost_per_unit() {
    let h = Harness::new(1_000);
    let admission = h.submit(turret(), 3).unwrap();
    let item = admission.item;
    assert_eq!(item.cost, 90);
    assert_eq!(item.energy_delta, fixed(-3.0));
    // 90 work-units at 10/h.
    assert_eq!(
        item.scheduled_completion,
        Some(Timestamp(START.0 + 9 * MILLIS_PER_HOUR))
    );
    assert_eq!(h.world.unit_count(HOME, &turret()).unwrap(), 0);
}
