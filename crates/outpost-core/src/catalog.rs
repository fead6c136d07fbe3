//! Immutable catalog of queueable items and per-queue capacity profiles.
//!
//! The catalog is supplied data: costs, prerequisites, energy curves and
//! capacity contributions are read here, never computed from game balance
//! formulas. It is assembled with a [`CatalogBuilder`], validated once, and
//! then frozen behind [`Catalog`] for the lifetime of the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::ItemKey;
use crate::queue::{QueueKind, TargetKind};

// ---------------------------------------------------------------------------
// Cost models
// ---------------------------------------------------------------------------

/// How the cost of a level-based item grows with the level being built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostScaling {
    /// `base + increment * level`.
    Linear { base: u64, increment: u64 },
    /// `base * multiplier^level`.
    Exponential { base: u64, multiplier: Fixed64 },
}

impl CostScaling {
    /// Cost for the given 0-indexed level (level 0 is the first build).
    pub fn cost_at_level(&self, level: u32) -> u64 {
        match self {
            CostScaling::Linear { base, increment } => {
                base.saturating_add(increment.saturating_mul(u64::from(level)))
            }
            CostScaling::Exponential { base, multiplier } => {
                // Grow the multiplier in fixed point, then scale the base in
                // 128-bit space so large bases do not overflow Q32.32.
                let mut factor = Fixed64::ONE;
                for _ in 0..level {
                    factor = factor.saturating_mul(*multiplier);
                }
                let bits = factor.to_bits();
                if bits <= 0 {
                    return 0;
                }
                let scaled = (u128::from(*base) * bits as u128) >> Fixed64::FRAC_NBITS;
                u64::try_from(scaled).unwrap_or(u64::MAX)
            }
        }
    }
}

/// Currency cost of an item. Also the amount of work its queue performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostModel {
    /// Level-based items: the cost of reaching `target` is
    /// `scaling.cost_at_level(target - 1)`.
    PerLevel(CostScaling),
    /// Quantity items: `unit_cost * quantity`.
    PerUnit(u64),
}

impl CostModel {
    pub fn cost_for(&self, target: u32) -> u64 {
        match self {
            CostModel::PerLevel(scaling) => scaling.cost_at_level(target.saturating_sub(1)),
            CostModel::PerUnit(unit) => unit.saturating_mul(u64::from(target)),
        }
    }

    fn target_kind(&self) -> TargetKind {
        match self {
            CostModel::PerLevel(_) => TargetKind::Level,
            CostModel::PerUnit(_) => TargetKind::Quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prerequisite {
    /// A building at the same location must be at least `level`.
    Building { key: ItemKey, level: u32 },
    /// The owner must have researched the technology to at least `level`.
    Technology { key: ItemKey, level: u32 },
}

impl Prerequisite {
    pub fn key(&self) -> &ItemKey {
        match self {
            Prerequisite::Building { key, .. } | Prerequisite::Technology { key, .. } => key,
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            Prerequisite::Building { level, .. } | Prerequisite::Technology { level, .. } => *level,
        }
    }
}

// ---------------------------------------------------------------------------
// Energy profiles
// ---------------------------------------------------------------------------

/// Energy produced or consumed as a function of a building's level (or a
/// defense's unit count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyCurve {
    /// `per_level * n`.
    Linear { per_level: Fixed64 },
    /// `base * n * growth^n`.
    Scaled { base: Fixed64, growth: Fixed64 },
}

impl EnergyCurve {
    pub fn at(&self, n: u64) -> Fixed64 {
        let count = Fixed64::saturating_from_num(n);
        match self {
            EnergyCurve::Linear { per_level } => per_level.saturating_mul(count),
            EnergyCurve::Scaled { base, growth } => {
                let mut factor = Fixed64::ONE;
                for _ in 0..n {
                    factor = factor.saturating_mul(*growth);
                }
                base.saturating_mul(count).saturating_mul(factor)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub produced: Option<EnergyCurve>,
    pub consumed: Option<EnergyCurve>,
}

impl EnergyProfile {
    pub fn produced_at(&self, n: u64) -> Fixed64 {
        self.produced.as_ref().map_or(Fixed64::ZERO, |c| c.at(n))
    }

    pub fn consumed_at(&self, n: u64) -> Fixed64 {
        self.consumed.as_ref().map_or(Fixed64::ZERO, |c| c.at(n))
    }

    /// Net energy change when going from `from` to `to` levels (or units).
    pub fn delta(&self, from: u64, to: u64) -> Fixed64 {
        let produced = self.produced_at(to).saturating_sub(self.produced_at(from));
        let consumed = self.consumed_at(to).saturating_sub(self.consumed_at(from));
        produced.saturating_sub(consumed)
    }
}

// ---------------------------------------------------------------------------
// Item and capacity definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDef {
    pub key: ItemKey,
    pub kind: QueueKind,
    pub cost: CostModel,
    pub prerequisites: Vec<Prerequisite>,
    pub energy: Option<EnergyProfile>,
    /// Highest reachable level for level-based items.
    pub max_level: Option<u32>,
}

/// Flat work-units/hour a building adds to a queue per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingContribution {
    pub building: ItemKey,
    pub per_level: Fixed64,
}

/// Percentage bonus a technology adds to a queue per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnologyBonus {
    pub technology: ItemKey,
    pub percent_per_level: Fixed64,
}

/// Inputs to the capacity rate of one queue kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityProfile {
    pub base_rate: Fixed64,
    pub contributors: Vec<BuildingContribution>,
    pub technology_bonuses: Vec<TechnologyBonus>,
}

impl CapacityProfile {
    pub fn flat(base_rate: Fixed64) -> Self {
        Self {
            base_rate,
            contributors: Vec::new(),
            technology_bonuses: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate catalog key: {0}")]
    DuplicateKey(ItemKey),

    #[error("prerequisite '{prereq}' of '{item}' is not in the catalog")]
    UnknownPrerequisite { item: ItemKey, prereq: ItemKey },

    #[error("'{item}' is a {kind} item and cannot alter energy")]
    EnergyNotAllowed { item: ItemKey, kind: QueueKind },

    #[error("cost model of '{item}' does not fit a {kind} item")]
    CostModelMismatch { item: ItemKey, kind: QueueKind },

    #[error("no capacity profile for queue kind {0}")]
    MissingCapacity(QueueKind),

    #[error("capacity profile for {kind} references unknown item '{key}'")]
    UnknownContributor { kind: QueueKind, key: ItemKey },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    items: Vec<ItemDef>,
    by_key: HashMap<ItemKey, usize>,
    capacity: HashMap<QueueKind, CapacityProfile>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item definition. Keys must be unique.
    pub fn register_item(&mut self, def: ItemDef) -> Result<&mut Self, CatalogError> {
        if self.by_key.contains_key(&def.key) {
            return Err(CatalogError::DuplicateKey(def.key));
        }
        self.by_key.insert(def.key.clone(), self.items.len());
        self.items.push(def);
        Ok(self)
    }

    /// Set the capacity profile of a queue kind, replacing any earlier one.
    pub fn set_capacity(&mut self, kind: QueueKind, profile: CapacityProfile) -> &mut Self {
        self.capacity.insert(kind, profile);
        self
    }

    /// Validate cross-references and freeze the catalog.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        for def in &self.items {
            let behavior = def.kind.behavior();
            if def.cost.target_kind() != behavior.target {
                return Err(CatalogError::CostModelMismatch {
                    item: def.key.clone(),
                    kind: def.kind,
                });
            }
            if def.energy.is_some() && !behavior.alters_energy {
                return Err(CatalogError::EnergyNotAllowed {
                    item: def.key.clone(),
                    kind: def.kind,
                });
            }
            for prereq in &def.prerequisites {
                if !self.by_key.contains_key(prereq.key()) {
                    return Err(CatalogError::UnknownPrerequisite {
                        item: def.key.clone(),
                        prereq: prereq.key().clone(),
                    });
                }
            }
            if !self.capacity.contains_key(&def.kind) {
                return Err(CatalogError::MissingCapacity(def.kind));
            }
        }

        for (kind, profile) in &self.capacity {
            let referenced = profile
                .contributors
                .iter()
                .map(|c| &c.building)
                .chain(profile.technology_bonuses.iter().map(|b| &b.technology));
            for key in referenced {
                if !self.by_key.contains_key(key) {
                    return Err(CatalogError::UnknownContributor {
                        kind: *kind,
                        key: key.clone(),
                    });
                }
            }
        }

        Ok(Catalog {
            items: self.items,
            by_key: self.by_key,
            capacity: self.capacity,
        })
    }
}

// ---------------------------------------------------------------------------
// Catalog (frozen)
// ---------------------------------------------------------------------------

/// Read-only item lookup shared by admission and the tick processor.
#[derive(Debug, Clone)]
pub struct Catalog {
    items: Vec<ItemDef>,
    by_key: HashMap<ItemKey, usize>,
    capacity: HashMap<QueueKind, CapacityProfile>,
}

impl Catalog {
    pub fn get(&self, key: &ItemKey) -> Option<&ItemDef> {
        self.by_key.get(key).map(|&i| &self.items[i])
    }

    pub fn capacity(&self, kind: QueueKind) -> Option<&CapacityProfile> {
        self.capacity.get(&kind)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.iter()
    }

    /// Items whose level or unit count feeds a location's energy budget.
    pub fn energy_items(&self) -> impl Iterator<Item = (&ItemDef, &EnergyProfile)> {
        self.items
            .iter()
            .filter_map(|def| def.energy.as_ref().map(|profile| (def, profile)))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
