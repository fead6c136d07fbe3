//! Integration test: concurrent admissions, ticks and cancellations
//!
//! Several threads hit one scheduler context at once, released together by
//! a `Barrier`. Every scenario checks the same ledger and world invariants:
//! an item is charged at most once, its effect is applied at most once, and
//! a cancelled item never also completes.

use std::sync::{Arc, Barrier};
use std::thread;

use outpost_core::id::{IdentityKey, LocationId, QueueItemId};
use outpost_core::ledger::EntryKind;
use outpost_core::queue::QueueStatus;
use outpost_core::store::QueueStore;
use outpost_core::test_utils::*;
use outpost_core::world::WorldView;
use outpost_scheduler::test_utils::Harness;
use outpost_scheduler::{
    AdmissionError, CancelError, CancelOutcome, TickOutcome, TickProcessor, cancel_item,
};

const THREADS: usize = 8;

/// Adds `n` extra locations owned by OWNER and returns their ids.
fn add_locations(h: &Harness, n: u64) -> Vec<LocationId> {
    (0..n)
        .map(|i| {
            let location = LocationId(100 + i);
            h.world.add_location(location, OWNER).unwrap();
            location
        })
        .collect()
}

fn debits(h: &Harness) -> usize {
    h.ledger
        .journal()
        .unwrap()
        .iter()
        .filter(|e| e.owner == OWNER && e.kind == EntryKind::Debit)
        .count()
}

#[test]
fn identical_submissions_create_one_item() {
    let h = Harness::new(1_000);
    let barrier = Barrier::new(THREADS);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    h.submit(habitat(), 1)
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(created.len(), 1);
    let winner = &created[0].item;

    let expected = IdentityKey::derive(OWNER, HOME, &habitat(), 1);
    for result in &results {
        match result {
            Ok(admission) => assert_eq!(admission.item.identity_key, expected),
            Err(AdmissionError::AlreadyInProgress {
                identity_key,
                existing,
            }) => {
                assert_eq!(*identity_key, expected);
                assert_eq!(*existing, winner.id);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(h.store.len().unwrap(), 1);
    assert_eq!(h.ledger.debit_count(OWNER).unwrap(), 1);
    assert_eq!(h.balance(OWNER), 900);
}

#[test]
fn admissions_and_ticks_never_double_charge() {
    let h = Harness::new(0);
    let locations = add_locations(&h, 24);
    for &location in &locations {
        h.submit_as(OWNER, location, habitat(), 1).unwrap();
    }
    // Enough for every item exactly once.
    h.ledger.set_balance(OWNER, 100 * 24).unwrap();

    let processors: Vec<_> = (0..3)
        .map(|_| Arc::new(TickProcessor::new(h.ctx.clone())))
        .collect();
    let barrier = Barrier::new(processors.len() + 2);

    thread::scope(|s| {
        for processor in &processors {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    processor.tick().unwrap();
                }
            });
        }
        // Clients retrying the same submissions while the ticks run.
        for _ in 0..2 {
            s.spawn(|| {
                barrier.wait();
                for &location in &locations {
                    match h.submit_as(OWNER, location, habitat(), 1) {
                        Ok(_) | Err(AdmissionError::AlreadyInProgress { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            });
        }
    });

    let items = h.service.list_by_owner(OWNER);
    let items = items.data().unwrap();
    assert_eq!(items.len(), 24);
    assert!(items.iter().all(|i| i.status == QueueStatus::Active));
    assert!(items.iter().all(|i| i.cost_charged));
    assert_eq!(debits(&h), 24);
    assert_eq!(h.balance(OWNER), 0);
}

#[test]
fn overlapping_processors_complete_each_item_once() {
    let h = Harness::new(1_000_000);
    let locations = add_locations(&h, 40);
    for &location in &locations {
        h.submit_as(OWNER, location, habitat(), 1).unwrap();
        h.submit_as(OWNER, location, drone(), 3).unwrap();
    }
    h.advance_hours(24);

    let processors: Vec<_> = (0..4)
        .map(|_| Arc::new(TickProcessor::new(h.ctx.clone())))
        .collect();
    let barrier = Barrier::new(processors.len());

    let completed: usize = thread::scope(|s| {
        let handles: Vec<_> = processors
            .iter()
            .map(|processor| {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let mut completed = 0;
                    for _ in 0..3 {
                        if let TickOutcome::Ran(report) = processor.tick().unwrap() {
                            completed += report.completed;
                        }
                    }
                    completed
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).sum()
    });

    assert_eq!(completed, 80);
    assert_eq!(h.world.applied_effects().unwrap().len(), 80);
    for &location in &locations {
        assert_eq!(h.world.building_level(location, &habitat()).unwrap(), 1);
        assert_eq!(h.world.unit_count(location, &drone()).unwrap(), 3);
    }
}

#[test]
fn cancel_racing_completion_has_one_winner() {
    let h = Harness::new(100 * 32);
    let locations = add_locations(&h, 32);
    let ids: Vec<QueueItemId> = locations
        .iter()
        .map(|&location| h.submit_as(OWNER, location, habitat(), 1).unwrap().item.id)
        .collect();
    assert_eq!(h.balance(OWNER), 0);
    h.advance_hours(5);

    let barrier = Barrier::new(2);
    let cancel_results: Vec<Result<CancelOutcome, CancelError>> = thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            h.processor.tick().unwrap();
        });
        let canceller = s.spawn(|| {
            barrier.wait();
            ids.iter()
                .map(|&id| cancel_item(&h.ctx, id))
                .collect()
        });
        canceller.join().unwrap()
    });

    let mut cancelled = 0;
    for result in &cancel_results {
        match result {
            Ok(CancelOutcome::Cancelled { refund, .. }) => {
                assert_eq!(*refund, 100);
                cancelled += 1;
            }
            Ok(CancelOutcome::AlreadyTerminal { status }) => {
                assert_eq!(*status, QueueStatus::Completed)
            }
            Err(CancelError::Finalizing(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Let any tick that lost the race finish the rest.
    h.tick();

    let mut completed = 0;
    for &id in &ids {
        let item = h.store.get(id).unwrap().unwrap();
        match item.status {
            QueueStatus::Completed => {
                completed += 1;
                assert!(item.refunded.is_none());
            }
            QueueStatus::Cancelled => assert_eq!(item.refunded, Some(100)),
            other => panic!("item left {other}"),
        }
    }
    assert_eq!(completed + cancelled, 32);
    assert_eq!(h.world.applied_effects().unwrap().len(), completed);
    assert_eq!(h.balance(OWNER), 100 * cancelled as u64);
}
