//! Energy budgets for outpost locations.
//!
//! A location's energy balance is what its buildings and defenses produce
//! minus what they consume, read from the catalog's energy curves at the
//! current levels and unit counts. Active queue items that will consume
//! energy once complete hold it back as a *reservation*:
//!
//! ```text
//! balance   = Σ produced(n) - Σ consumed(n)
//! reserved  = Σ energy_delta of active items with a negative delta
//! projected = balance + reserved
//! ```
//!
//! # Design
//!
//! - The projector is stateless; every call reads the world and the store.
//! - Deficit tracking fires only on *transitions*, not on every check.

use std::collections::HashMap;

use outpost_core::catalog::{Catalog, ItemDef};
use outpost_core::fixed::{Fixed64, fixed64_to_f64};
use outpost_core::id::LocationId;
use outpost_core::queue::TargetKind;
use outpost_core::store::{EnergyGate, QueueStore, StoreError, reserved_energy};
use outpost_core::world::{WorldError, WorldView};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EnergyError {
    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Energy state of one location at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyBudget {
    pub produced: Fixed64,
    pub consumed: Fixed64,
    pub balance: Fixed64,
    /// Sum of the negative deltas of active items (zero or negative).
    pub reserved: Fixed64,
    pub projected_balance: Fixed64,
}

impl EnergyBudget {
    /// Whether an item with `delta` may activate under `deficit_limit`.
    /// Without a limit every item is admitted.
    pub fn admits(&self, delta: Fixed64, deficit_limit: Option<Fixed64>) -> bool {
        match deficit_limit {
            None => true,
            Some(limit) => self.projected_balance.saturating_add(delta) >= -limit,
        }
    }

    /// The gate the store re-checks atomically at activation.
    pub fn gate(&self, deficit_limit: Option<Fixed64>) -> Option<EnergyGate> {
        deficit_limit.map(|limit| EnergyGate {
            balance: self.balance,
            floor: -limit,
        })
    }

    pub fn is_deficit(&self) -> bool {
        self.projected_balance < Fixed64::ZERO
    }

    /// Display form for logs and API responses.
    pub fn to_f64(&self) -> [f64; 5] {
        [
            fixed64_to_f64(self.produced),
            fixed64_to_f64(self.consumed),
            fixed64_to_f64(self.balance),
            fixed64_to_f64(self.reserved),
            fixed64_to_f64(self.projected_balance),
        ]
    }
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

/// Net energy change of taking `def` from `current` to the submission's
/// `target` (a level, or a quantity to add). Items without an energy
/// profile have a zero delta.
pub fn energy_delta(def: &ItemDef, current: u64, target: u32) -> Fixed64 {
    let Some(profile) = def.energy.as_ref() else {
        return Fixed64::ZERO;
    };
    let to = match def.kind.behavior().target {
        TargetKind::Level => u64::from(target),
        TargetKind::Quantity => current.saturating_add(u64::from(target)),
    };
    profile.delta(current, to)
}

pub struct EnergyProjector<'a> {
    catalog: &'a Catalog,
    world: &'a dyn WorldView,
    store: &'a dyn QueueStore,
}

impl<'a> EnergyProjector<'a> {
    pub fn new(catalog: &'a Catalog, world: &'a dyn WorldView, store: &'a dyn QueueStore) -> Self {
        Self {
            catalog,
            world,
            store,
        }
    }

    /// Current level (level items) or unit count (quantity items) of `def`
    /// at `location`.
    pub fn current_amount(&self, location: LocationId, def: &ItemDef) -> Result<u64, WorldError> {
        match def.kind.behavior().target {
            TargetKind::Level => Ok(u64::from(self.world.building_level(location, &def.key)?)),
            TargetKind::Quantity => self.world.unit_count(location, &def.key),
        }
    }

    /// Produced and consumed energy from what is built, without reservations.
    pub fn balance(&self, location: LocationId) -> Result<(Fixed64, Fixed64), EnergyError> {
        let mut produced = Fixed64::ZERO;
        let mut consumed = Fixed64::ZERO;
        for (def, profile) in self.catalog.energy_items() {
            let n = self.current_amount(location, def)?;
            produced = produced.saturating_add(profile.produced_at(n));
            consumed = consumed.saturating_add(profile.consumed_at(n));
        }
        Ok((produced, consumed))
    }

    pub fn budget(&self, location: LocationId) -> Result<EnergyBudget, EnergyError> {
        let (produced, consumed) = self.balance(location)?;
        let balance = produced.saturating_sub(consumed);
        let in_flight = self.store.in_flight_at(location)?;
        let reserved = reserved_energy(&in_flight);
        Ok(EnergyBudget {
            produced,
            consumed,
            balance,
            reserved,
            projected_balance: balance.saturating_add(reserved),
        })
    }
}

// ---------------------------------------------------------------------------
// Deficit tracking
// ---------------------------------------------------------------------------

/// Emitted when a location's projected balance crosses zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyTransition {
    DeficitStarted {
        location: LocationId,
        projected: Fixed64,
    },
    DeficitCleared {
        location: LocationId,
    },
}

/// Remembers which locations were in deficit at their last observation.
#[derive(Debug, Default)]
pub struct DeficitTracker {
    in_deficit: HashMap<LocationId, bool>,
}

impl DeficitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh budget. Returns a transition only when the deficit
    /// state differs from the previous observation. Locations start out
    /// not in deficit.
    pub fn observe(
        &mut self,
        location: LocationId,
        budget: &EnergyBudget,
    ) -> Option<EnergyTransition> {
        let now = budget.is_deficit();
        let was = self.in_deficit.insert(location, now).unwrap_or(false);
        match (was, now) {
            (false, true) => Some(EnergyTransition::DeficitStarted {
                location,
                projected: budget.projected_balance,
            }),
            (true, false) => Some(EnergyTransition::DeficitCleared { location }),
            _ => None,
        }
    }

    pub fn is_in_deficit(&self, location: LocationId) -> bool {
        self.in_deficit.get(&location).copied().unwrap_or(false)
    }
}
