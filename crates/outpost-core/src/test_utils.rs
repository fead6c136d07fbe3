//! Shared test fixtures for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, in other crates' tests, and in benchmarks
//! (via the `test-utils` feature).

use crate::catalog::{
    BuildingContribution, CapacityProfile, Catalog, CatalogBuilder, CostModel, CostScaling,
    EnergyCurve, EnergyProfile, ItemDef, Prerequisite,
};
use crate::fixed::Fixed64;
use crate::id::{ItemKey, LocationId, OwnerId};
use crate::ledger::InMemoryLedger;
use crate::queue::QueueKind;
use crate::world::InMemoryWorld;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Well-known ids
// ===========================================================================

pub const OWNER: OwnerId = OwnerId(1);
pub const RIVAL: OwnerId = OwnerId(2);
pub const HOME: LocationId = LocationId(10);
pub const FRONTIER: LocationId = LocationId(11);
pub const RIVAL_HOME: LocationId = LocationId(20);

// ===========================================================================
// Item keys
// ===========================================================================

/// Construction, 100 currency per level, no energy.
pub fn habitat() -> ItemKey {
    ItemKey::new("habitat")
}
/// Construction, consumes 2 energy per level.
pub fn smelter() -> ItemKey {
    ItemKey::new("smelter")
}
/// Construction, produces 5 energy per level.
pub fn solar_array() -> ItemKey {
    ItemKey::new("solar_array")
}
/// Construction, adds 10 work/hour to construction per level.
pub fn assembly_yard() -> ItemKey {
    ItemKey::new("assembly_yard")
}
/// Production, 50 per unit.
pub fn drone() -> ItemKey {
    ItemKey::new("drone")
}
/// Research, needs habitat 2.
pub fn survey_tech() -> ItemKey {
    ItemKey::new("survey_tech")
}
/// Defense, 30 per unit, consumes 1 energy per unit.
pub fn turret() -> ItemKey {
    ItemKey::new("turret")
}

// ===========================================================================
// Catalog
// ===========================================================================

fn level_item(key: ItemKey, base: u64, increment: u64) -> ItemDef {
    ItemDef {
        key,
        kind: QueueKind::Construction,
        cost: CostModel::PerLevel(CostScaling::Linear { base, increment }),
        prerequisites: Vec::new(),
        energy: None,
        max_level: Some(30),
    }
}

fn linear_energy(produced: Option<f64>, consumed: Option<f64>) -> Option<EnergyProfile> {
    Some(EnergyProfile {
        produced: produced.map(|p| EnergyCurve::Linear {
            per_level: fixed(p),
        }),
        consumed: consumed.map(|c| EnergyCurve::Linear {
            per_level: fixed(c),
        }),
    })
}

/// The catalog every scenario test builds on.
///
/// Capacity: construction runs at 20/h plus 10/h per assembly yard level,
/// the other queues at a flat 10/h.
pub fn scenario_catalog() -> Catalog {
    let mut b = CatalogBuilder::new();
    let items = [
        level_item(habitat(), 100, 0),
        ItemDef {
            energy: linear_energy(None, Some(2.0)),
            ..level_item(smelter(), 80, 40)
        },
        ItemDef {
            energy: linear_energy(Some(5.0), None),
            ..level_item(solar_array(), 60, 30)
        },
        level_item(assembly_yard(), 200, 200),
        ItemDef {
            key: drone(),
            kind: QueueKind::Production,
            cost: CostModel::PerUnit(50),
            prerequisites: Vec::new(),
            energy: None,
            max_level: None,
        },
        ItemDef {
            key: survey_tech(),
            kind: QueueKind::Research,
            cost: CostModel::PerLevel(CostScaling::Exponential {
                base: 200,
                multiplier: fixed(2.0),
            }),
            prerequisites: vec![Prerequisite::Building {
                key: habitat(),
                level: 2,
            }],
            energy: None,
            max_level: Some(10),
        },
        ItemDef {
            key: turret(),
            kind: QueueKind::DefenseProduction,
            cost: CostModel::PerUnit(30),
            prerequisites: Vec::new(),
            energy: linear_energy(None, Some(1.0)),
            max_level: None,
        },
    ];
    for def in items {
        // Keys above are distinct.
        let _ = b.register_item(def);
    }
    b.set_capacity(
        QueueKind::Construction,
        CapacityProfile {
            base_rate: fixed(20.0),
            contributors: vec![BuildingContribution {
                building: assembly_yard(),
                per_level: fixed(10.0),
            }],
            technology_bonuses: Vec::new(),
        },
    );
    for kind in [
        QueueKind::Production,
        QueueKind::Research,
        QueueKind::DefenseProduction,
    ] {
        b.set_capacity(kind, CapacityProfile::flat(fixed(10.0)));
    }
    match b.build() {
        Ok(catalog) => catalog,
        Err(e) => panic!("scenario catalog is invalid: {e}"),
    }
}

// ===========================================================================
// World and ledger
// ===========================================================================

/// HOME and FRONTIER owned by OWNER, RIVAL_HOME owned by RIVAL. No
/// buildings, no technologies.
pub fn scenario_world() -> InMemoryWorld {
    let world = InMemoryWorld::new();
    for (location, owner) in [(HOME, OWNER), (FRONTIER, OWNER), (RIVAL_HOME, RIVAL)] {
        if let Err(e) = world.add_location(location, owner) {
            panic!("cannot seed world: {e}");
        }
    }
    world
}

/// A ledger with both owners funded to `balance`.
pub fn funded_ledger(balance: u64) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    for owner in [OWNER, RIVAL] {
        if let Err(e) = ledger.set_balance(owner, balance) {
            panic!("cannot seed ledger: {e}");
        }
    }
    ledger
}
