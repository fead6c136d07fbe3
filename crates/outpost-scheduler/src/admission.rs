//! Admission controller: validates a submission, records it exactly once,
//! and activates it on the spot when the owner can pay.
//!
//! Running out of currency is not an error. The item is admitted as
//! pending and the tick activates it later, in FIFO order.

use outpost_core::catalog::{ItemDef, Prerequisite};
use outpost_core::event::QueueEvent;
use outpost_core::fixed::{Fixed64, fixed64_to_f64};
use outpost_core::id::{IdentityKey, ItemKey, LocationId, OwnerId, QueueItemId};
use outpost_core::queue::{EffectKind, QueueItem, QueueItemDraft, QueueStatus, TargetKind};
use outpost_core::store::{InsertOutcome, StoreError};
use outpost_core::world::WorldError;
use outpost_power::{EnergyBudget, EnergyError, energy_delta};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activation::{ActivationResult, try_activate};
use crate::context::SchedulerContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub owner: OwnerId,
    pub location: LocationId,
    pub item_key: ItemKey,
    /// Level to reach, or quantity to produce.
    pub target: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("unknown item '{0}'")]
    UnknownItem(ItemKey),

    #[error("invalid target {target} for '{key}': {reason}")]
    InvalidTarget {
        key: ItemKey,
        target: u32,
        reason: String,
    },

    #[error("location {0} does not exist")]
    UnknownLocation(LocationId),

    #[error("location {location} is not owned by {owner}")]
    NotOwner { owner: OwnerId, location: LocationId },

    #[error("'{key}' requires '{required}' at level {level}, found {actual}")]
    PrerequisiteNotMet {
        key: ItemKey,
        required: ItemKey,
        level: u32,
        actual: u32,
    },

    #[error("an item with identity key {identity_key} is already in progress")]
    AlreadyInProgress {
        identity_key: IdentityKey,
        existing: QueueItemId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    World(WorldError),

    #[error(transparent)]
    Energy(#[from] EnergyError),
}

impl From<WorldError> for AdmissionError {
    fn from(e: WorldError) -> Self {
        match e {
            WorldError::UnknownLocation(location) => AdmissionError::UnknownLocation(location),
            other => AdmissionError::World(other),
        }
    }
}

/// What admission did with an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Activated,
    PendingInsufficientFunds,
    PendingNoCapacity,
    PendingNoSlot,
    PendingEnergy,
    /// Older pending items hold the group's slots; the tick will decide.
    PendingBehindQueue,
    /// The tick activated it between insert and activation.
    ActivatedConcurrently,
    /// A cancellation landed between insert and activation.
    CancelledConcurrently,
    /// A collaborator failed during activation; the tick will retry.
    PendingDeferred,
}

impl DecisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionOutcome::Activated => "activated",
            DecisionOutcome::PendingInsufficientFunds => "pending_insufficient_funds",
            DecisionOutcome::PendingNoCapacity => "pending_no_capacity",
            DecisionOutcome::PendingNoSlot => "pending_no_slot",
            DecisionOutcome::PendingEnergy => "pending_energy",
            DecisionOutcome::PendingBehindQueue => "pending_behind_queue",
            DecisionOutcome::ActivatedConcurrently => "activated_concurrently",
            DecisionOutcome::CancelledConcurrently => "cancelled_concurrently",
            DecisionOutcome::PendingDeferred => "pending_deferred",
        }
    }
}

/// The structured record of one admission, as logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub item_key: ItemKey,
    pub energy_delta: Fixed64,
    pub budget: EnergyBudget,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub item: QueueItem,
    pub decision: AdmissionDecision,
}

pub struct AdmissionController<'a> {
    ctx: &'a SchedulerContext,
}

impl<'a> AdmissionController<'a> {
    pub fn new(ctx: &'a SchedulerContext) -> Self {
        Self { ctx }
    }

    pub fn submit(&self, request: SubmitRequest) -> Result<Admission, AdmissionError> {
        let ctx = self.ctx;
        let def = ctx
            .catalog
            .get(&request.item_key)
            .ok_or_else(|| AdmissionError::UnknownItem(request.item_key.clone()))?;

        let owner = ctx.world.location_owner(request.location)?;
        if owner != request.owner {
            return Err(AdmissionError::NotOwner {
                owner: request.owner,
                location: request.location,
            });
        }

        let current = self.current_amount(def, &request)?;
        validate_target(def, current, request.target)?;
        self.check_prerequisites(def, &request)?;

        let delta = energy_delta(def, current, request.target);
        let draft = QueueItemDraft {
            identity_key: IdentityKey::derive(
                request.owner,
                request.location,
                &request.item_key,
                request.target,
            ),
            kind: def.kind,
            owner: request.owner,
            location: request.location,
            item_key: request.item_key.clone(),
            target: request.target,
            cost: def.cost.cost_for(request.target),
            energy_delta: delta,
            created_at: ctx.clock.now(),
        };

        let item = match ctx.store.insert_if_absent(draft)? {
            InsertOutcome::Inserted(item) => item,
            InsertOutcome::Conflict(existing) => {
                info!(
                    target: "outpost::admission",
                    item_key = %request.item_key,
                    identity_key = %existing.identity_key,
                    outcome = "already_in_progress",
                    "admission.decision"
                );
                return Err(AdmissionError::AlreadyInProgress {
                    identity_key: existing.identity_key,
                    existing: existing.id,
                });
            }
        };
        ctx.events.push(QueueEvent::Admitted {
            item: item.id,
            owner: item.owner,
            location: item.location,
            kind: item.kind,
            at: item.created_at,
        });

        let (item, outcome) = self.activate_now(item)?;
        let budget = ctx.projector().budget(request.location)?;
        let decision = AdmissionDecision {
            item_key: request.item_key,
            energy_delta: delta,
            budget,
            outcome,
        };
        log_decision(&decision);
        Ok(Admission { item, decision })
    }

    /// Try to activate a freshly inserted item. Any activation failure after
    /// the insert leaves a valid pending item for the tick to pick up.
    fn activate_now(
        &self,
        item: QueueItem,
    ) -> Result<(QueueItem, DecisionOutcome), AdmissionError> {
        let ctx = self.ctx;
        if ctx.config.slot_limit(item.kind).is_some() {
            let pending = ctx.read(|| ctx.store.pending_in_group(item.group()))?;
            if pending.iter().any(|other| other.fifo_key() < item.fifo_key()) {
                return Ok((item, DecisionOutcome::PendingBehindQueue));
            }
        }

        let result = match try_activate(ctx, &item) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    target: "outpost::admission",
                    item_key = %item.item_key,
                    error = %e,
                    "admission.activation_failed"
                );
                return Ok((item, DecisionOutcome::PendingDeferred));
            }
        };
        Ok(match result {
            ActivationResult::Activated { item, .. } => (item, DecisionOutcome::Activated),
            ActivationResult::InsufficientFunds { .. } => {
                (item, DecisionOutcome::PendingInsufficientFunds)
            }
            ActivationResult::NoCapacity => (item, DecisionOutcome::PendingNoCapacity),
            ActivationResult::NoSlot => (item, DecisionOutcome::PendingNoSlot),
            ActivationResult::NoEnergy { .. } => (item, DecisionOutcome::PendingEnergy),
            ActivationResult::Stale(current) => {
                let outcome = concurrent_outcome(current.status);
                (current, outcome)
            }
        })
    }

    /// Current level (level kinds) or unit count (quantity kinds).
    fn current_amount(&self, def: &ItemDef, request: &SubmitRequest) -> Result<u64, WorldError> {
        let world = self.ctx.world.as_ref();
        match def.kind.behavior().effect {
            EffectKind::RaiseBuildingLevel => world
                .building_level(request.location, &def.key)
                .map(u64::from),
            EffectKind::RaiseTechnologyLevel => world
                .technology_level(request.owner, &def.key)
                .map(u64::from),
            EffectKind::SpawnUnits | EffectKind::BuildDefenses => {
                world.unit_count(request.location, &def.key)
            }
        }
    }

    fn check_prerequisites(
        &self,
        def: &ItemDef,
        request: &SubmitRequest,
    ) -> Result<(), AdmissionError> {
        let world = self.ctx.world.as_ref();
        for prereq in &def.prerequisites {
            let actual = match prereq {
                Prerequisite::Building { key, .. } => world.building_level(request.location, key)?,
                Prerequisite::Technology { key, .. } => world.technology_level(request.owner, key)?,
            };
            if actual < prereq.level() {
                return Err(AdmissionError::PrerequisiteNotMet {
                    key: def.key.clone(),
                    required: prereq.key().clone(),
                    level: prereq.level(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Outcome for an item another writer moved before admission could
/// activate it.
fn concurrent_outcome(status: QueueStatus) -> DecisionOutcome {
    match status {
        QueueStatus::Active | QueueStatus::Completed => DecisionOutcome::ActivatedConcurrently,
        QueueStatus::Cancelled => DecisionOutcome::CancelledConcurrently,
        QueueStatus::Pending => DecisionOutcome::PendingDeferred,
    }
}

fn validate_target(def: &ItemDef, current: u64, target: u32) -> Result<(), AdmissionError> {
    let invalid = |reason: String| AdmissionError::InvalidTarget {
        key: def.key.clone(),
        target,
        reason,
    };
    match def.kind.behavior().target {
        TargetKind::Level => {
            if u64::from(target) != current + 1 {
                return Err(invalid(format!("current level is {current}")));
            }
            if let Some(max) = def.max_level
                && target > max
            {
                return Err(invalid(format!("maximum level is {max}")));
            }
        }
        TargetKind::Quantity => {
            if target == 0 {
                return Err(invalid("quantity must be at least 1".to_string()));
            }
        }
    }
    Ok(())
}

fn log_decision(decision: &AdmissionDecision) {
    let budget = &decision.budget;
    info!(
        target: "outpost::admission",
        item_key = %decision.item_key,
        energy_delta = fixed64_to_f64(decision.energy_delta),
        produced = fixed64_to_f64(budget.produced),
        consumed = fixed64_to_f64(budget.consumed),
        balance = fixed64_to_f64(budget.balance),
        reserved = fixed64_to_f64(budget.reserved),
        projected_balance = fixed64_to_f64(budget.projected_balance),
        outcome = decision.outcome.as_str(),
        "admission.decision"
    );
}

