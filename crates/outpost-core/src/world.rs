//! Collaborator interfaces onto the simulated world.
//!
//! [`WorldView`] answers the read questions the engine asks: current
//! building levels, technology levels, unit counts, environmental bonuses
//! and location ownership. It doubles as the prerequisite checker.
//! [`EffectSink`] receives the effect of a completed queue item.
//!
//! Queue items refer to their targets only by stable keys (owner, location,
//! item key), never by in-memory references.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::fixed::Fixed64;
use crate::id::{ItemKey, LocationId, OwnerId, QueueItemId};
use crate::queue::{EffectKind, QueueKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("unknown location {0}")]
    UnknownLocation(LocationId),

    #[error("unknown owner {0}")]
    UnknownOwner(OwnerId),

    #[error("'{key}' is at level {actual}, expected {expected}")]
    StaleTarget {
        key: ItemKey,
        expected: u32,
        actual: u32,
    },

    #[error("world unavailable: {0}")]
    Unavailable(String),
}

/// Read access to collaborator state.
pub trait WorldView: Send + Sync {
    fn location_owner(&self, location: LocationId) -> Result<OwnerId, WorldError>;
    fn building_level(&self, location: LocationId, key: &ItemKey) -> Result<u32, WorldError>;
    fn unit_count(&self, location: LocationId, key: &ItemKey) -> Result<u64, WorldError>;
    fn technology_level(&self, owner: OwnerId, key: &ItemKey) -> Result<u32, WorldError>;
    /// Environmental bonus for a queue at a location, in percent.
    fn environment_bonus(&self, location: LocationId, kind: QueueKind)
    -> Result<Fixed64, WorldError>;
}

/// What a completed item does to the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEffect {
    pub item: QueueItemId,
    pub owner: OwnerId,
    pub location: LocationId,
    pub key: ItemKey,
    pub effect: EffectKind,
    pub target: u32,
}

/// Applies completion effects. Implementations that perform I/O should
/// give up once `deadline` has passed rather than stall the tick.
pub trait EffectSink: Send + Sync {
    fn apply(&self, effect: &CompletionEffect, deadline: Instant) -> Result<(), WorldError>;
}

// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LocationState {
    owner: OwnerId,
    buildings: HashMap<ItemKey, u32>,
    units: HashMap<ItemKey, u64>,
    environment: HashMap<QueueKind, Fixed64>,
}

#[derive(Debug, Default)]
struct WorldInner {
    locations: HashMap<LocationId, LocationState>,
    technologies: HashMap<(OwnerId, ItemKey), u32>,
    applied: Vec<CompletionEffect>,
}

/// A world held in memory. Implements both [`WorldView`] and
/// [`EffectSink`], and records every applied effect.
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    inner: Mutex<WorldInner>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorldInner>, WorldError> {
        self.inner
            .lock()
            .map_err(|_| WorldError::Unavailable("world lock poisoned".to_string()))
    }

    pub fn add_location(&self, location: LocationId, owner: OwnerId) -> Result<(), WorldError> {
        self.lock()?.locations.insert(
            location,
            LocationState {
                owner,
                buildings: HashMap::new(),
                units: HashMap::new(),
                environment: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn remove_location(&self, location: LocationId) -> Result<(), WorldError> {
        self.lock()?.locations.remove(&location);
        Ok(())
    }

    pub fn set_building_level(
        &self,
        location: LocationId,
        key: &ItemKey,
        level: u32,
    ) -> Result<(), WorldError> {
        let mut inner = self.lock()?;
        let state = inner
            .locations
            .get_mut(&location)
            .ok_or(WorldError::UnknownLocation(location))?;
        state.buildings.insert(key.clone(), level);
        Ok(())
    }

    pub fn set_technology_level(
        &self,
        owner: OwnerId,
        key: &ItemKey,
        level: u32,
    ) -> Result<(), WorldError> {
        self.lock()?.technologies.insert((owner, key.clone()), level);
        Ok(())
    }

    pub fn set_environment_bonus(
        &self,
        location: LocationId,
        kind: QueueKind,
        percent: Fixed64,
    ) -> Result<(), WorldError> {
        let mut inner = self.lock()?;
        let state = inner
            .locations
            .get_mut(&location)
            .ok_or(WorldError::UnknownLocation(location))?;
        state.environment.insert(kind, percent);
        Ok(())
    }

    /// Every effect applied so far, in application order.
    pub fn applied_effects(&self) -> Result<Vec<CompletionEffect>, WorldError> {
        Ok(self.lock()?.applied.clone())
    }
}

impl WorldView for InMemoryWorld {
    fn location_owner(&self, location: LocationId) -> Result<OwnerId, WorldError> {
        self.lock()?
            .locations
            .get(&location)
            .map(|s| s.owner)
            .ok_or(WorldError::UnknownLocation(location))
    }

    fn building_level(&self, location: LocationId, key: &ItemKey) -> Result<u32, WorldError> {
        let inner = self.lock()?;
        let state = inner
            .locations
            .get(&location)
            .ok_or(WorldError::UnknownLocation(location))?;
        Ok(state.buildings.get(key).copied().unwrap_or(0))
    }

    fn unit_count(&self, location: LocationId, key: &ItemKey) -> Result<u64, WorldError> {
        let inner = self.lock()?;
        let state = inner
            .locations
            .get(&location)
            .ok_or(WorldError::UnknownLocation(location))?;
        Ok(state.units.get(key).copied().unwrap_or(0))
    }

    fn technology_level(&self, owner: OwnerId, key: &ItemKey) -> Result<u32, WorldError> {
        Ok(self
            .lock()?
            .technologies
            .get(&(owner, key.clone()))
            .copied()
            .unwrap_or(0))
    }

    fn environment_bonus(
        &self,
        location: LocationId,
        kind: QueueKind,
    ) -> Result<Fixed64, WorldError> {
        let inner = self.lock()?;
        let state = inner
            .locations
            .get(&location)
            .ok_or(WorldError::UnknownLocation(location))?;
        Ok(state.environment.get(&kind).copied().unwrap_or(Fixed64::ZERO))
    }
}

impl EffectSink for InMemoryWorld {
    fn apply(&self, effect: &CompletionEffect, _deadline: Instant) -> Result<(), WorldError> {
        let mut inner = self.lock()?;
        let state = inner
            .locations
            .get_mut(&effect.location)
            .ok_or(WorldError::UnknownLocation(effect.location))?;
        if state.owner != effect.owner {
            return Err(WorldError::UnknownOwner(effect.owner));
        }

        match effect.effect {
            EffectKind::RaiseBuildingLevel => {
                let level = state.buildings.entry(effect.key.clone()).or_insert(0);
                if level.saturating_add(1) != effect.target {
                    return Err(WorldError::StaleTarget {
                        key: effect.key.clone(),
                        expected: effect.target.saturating_sub(1),
                        actual: *level,
                    });
                }
                *level = effect.target;
            }
            EffectKind::SpawnUnits | EffectKind::BuildDefenses => {
                let count = state.units.entry(effect.key.clone()).or_insert(0);
                *count = count.saturating_add(u64::from(effect.target));
            }
            EffectKind::RaiseTechnologyLevel => {
                let level = inner
                    .technologies
                    .entry((effect.owner, effect.key.clone()))
                    .or_insert(0);
                if level.saturating_add(1) != effect.target {
                    return Err(WorldError::StaleTarget {
                        key: effect.key.clone(),
                        expected: effect.target.saturating_sub(1),
                        actual: *level,
                    });
                }
                *level = effect.target;
            }
        }

        inner.applied.push(effect.clone());
        Ok(())
    }
}
