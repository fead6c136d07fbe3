#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use outpost_core::fixed::Fixed64;
use outpost_core::id::{IdentityKey, ItemKey, LocationId, QueueItemId};
use outpost_core::queue::{CancelReason, ItemPatch, QueueItemDraft, QueueKind, QueueStatus};
use outpost_core::store::{
    ClaimRule, InMemoryQueueStore, InsertOutcome, QueueStore, TransitionGuard,
};
use outpost_core::test_utils::*;
use outpost_core::time::Timestamp;

/// A structured store operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Submit { location: u8, target: u8 },
    Activate { index: u8, slots: Option<u8> },
    Claim { index: u8 },
    Complete { index: u8 },
    Cancel { index: u8 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fn pick(ids: &[QueueItemId], index: u8) -> Option<QueueItemId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[index as usize % ids.len()])
    }
}

fuzz_target!(|input: FuzzInput| {
    let store = InMemoryQueueStore::new();
    let mut ids: Vec<QueueItemId> = Vec::new();
    let now = Timestamp(1_000);

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for op in &input.ops[..max_ops] {
        match op {
            FuzzOp::Submit { location, target } => {
                let location = LocationId(u64::from(location % 4));
                let target = u32::from(target % 3) + 1;
                let key = ItemKey::new("habitat");
                let draft = QueueItemDraft {
                    identity_key: IdentityKey::derive(OWNER, location, &key, target),
                    kind: QueueKind::Construction,
                    owner: OWNER,
                    location,
                    item_key: key,
                    target,
                    cost: 100,
                    energy_delta: Fixed64::ZERO,
                    created_at: now,
                };
                if let Ok(InsertOutcome::Inserted(item)) = store.insert_if_absent(draft) {
                    ids.push(item.id);
                }
            }
            FuzzOp::Activate { index, slots } => {
                if let Some(id) = pick(&ids, *index) {
                    let _ = store.transition(
                        id,
                        TransitionGuard::new(QueueStatus::Pending, QueueStatus::Active)
                            .slot_limit(slots.map(|s| u32::from(s % 3) + 1)),
                        &mut |_| Ok(ItemPatch::activate(now, now)),
                    );
                }
            }
            FuzzOp::Claim { index } => {
                if let Some(id) = pick(&ids, *index) {
                    let _ = store.claim_completion(id, now);
                }
            }
            FuzzOp::Complete { index } => {
                if let Some(id) = pick(&ids, *index) {
                    let _ = store.transition(
                        id,
                        TransitionGuard::new(QueueStatus::Active, QueueStatus::Completed)
                            .claim(ClaimRule::MustBeClaimed),
                        &mut |_| Ok(ItemPatch::complete(now)),
                    );
                }
            }
            FuzzOp::Cancel { index } => {
                if let Some(id) = pick(&ids, *index) {
                    let _ = store.transition(
                        id,
                        TransitionGuard::new(QueueStatus::Active, QueueStatus::Cancelled)
                            .claim(ClaimRule::MustBeUnclaimed),
                        &mut |_| Ok(ItemPatch::cancel(now, CancelReason::Requested, Some(0))),
                    );
                }
            }
        }

        // Restore re-checks that no identity key is held twice in flight.
        let bytes = store.snapshot().expect("snapshot");
        InMemoryQueueStore::restore(&bytes).expect("store invariants hold");
    }
});
