//! Capacity calculator: work-units/hour a location can put into one queue.
//!
//! ```text
//! flat       = base_rate + Σ per_level × building_level
//! multiplier = Π (1 + percent_per_level × tech_level / 100) × (1 + environment / 100)
//! rate       = max(0, flat × multiplier)
//! ```
//!
//! The rate is a pure function of the world as it is *now*. It is never
//! cached: callers recompute it at every scheduling decision because
//! building levels change between calls.

use serde::Serialize;

use crate::catalog::Catalog;
use crate::fixed::{Fixed64, percent_multiplier};
use crate::id::LocationId;
use crate::queue::QueueKind;
use crate::world::{WorldError, WorldView};

#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    #[error("no capacity profile for queue kind {0}")]
    MissingProfile(QueueKind),

    #[error("capacity for {kind} at location {location} overflowed")]
    Overflow { location: LocationId, kind: QueueKind },

    #[error(transparent)]
    World(#[from] WorldError),
}

/// A computed capacity rate with its two factors, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityRate {
    pub flat: Fixed64,
    pub multiplier: Fixed64,
    pub per_hour: Fixed64,
}

impl CapacityRate {
    pub fn is_positive(&self) -> bool {
        self.per_hour > Fixed64::ZERO
    }
}

pub struct CapacityCalculator<'a> {
    catalog: &'a Catalog,
    world: &'a dyn WorldView,
}

impl<'a> CapacityCalculator<'a> {
    pub fn new(catalog: &'a Catalog, world: &'a dyn WorldView) -> Self {
        Self { catalog, world }
    }

    pub fn rate(
        &self,
        location: LocationId,
        kind: QueueKind,
    ) -> Result<CapacityRate, CapacityError> {
        let overflow = || CapacityError::Overflow { location, kind };
        let profile = self
            .catalog
            .capacity(kind)
            .ok_or(CapacityError::MissingProfile(kind))?;

        let mut flat = profile.base_rate;
        for contribution in &profile.contributors {
            let level = self.world.building_level(location, &contribution.building)?;
            let added = contribution
                .per_level
                .checked_mul(Fixed64::from_num(level))
                .ok_or_else(overflow)?;
            flat = flat.checked_add(added).ok_or_else(overflow)?;
        }

        let mut multiplier = Fixed64::ONE;
        if !profile.technology_bonuses.is_empty() {
            let owner = self.world.location_owner(location)?;
            for bonus in &profile.technology_bonuses {
                let level = self.world.technology_level(owner, &bonus.technology)?;
                let percent = bonus
                    .percent_per_level
                    .checked_mul(Fixed64::from_num(level))
                    .ok_or_else(overflow)?;
                let factor = percent_multiplier(percent).ok_or_else(overflow)?;
                multiplier = multiplier.checked_mul(factor).ok_or_else(overflow)?;
            }
        }

        let environment = self.world.environment_bonus(location, kind)?;
        let factor = percent_multiplier(environment).ok_or_else(overflow)?;
        multiplier = multiplier.checked_mul(factor).ok_or_else(overflow)?;

        let per_hour = flat.checked_mul(multiplier).ok_or_else(overflow)?;
        Ok(CapacityRate {
            flat,
            multiplier,
            per_hour: per_hour.max(Fixed64::ZERO),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        BuildingContribution, CapacityProfile, CatalogBuilder, CostModel, CostScaling, ItemDef,
        TechnologyBonus,
    };
    use crate::id::{ItemKey, OwnerId};
    use crate::world::InMemoryWorld;
    use proptest::prelude::*;

    fn level_item(key: &str, kind: QueueKind) -> ItemDef {
        ItemDef {
            key: ItemKey::new(key),
            kind,
            cost: CostModel::PerLevel(CostScaling::Linear {
                base: 100,
                increment: 0,
            }),
            prerequisites: Vec::new(),
            energy: None,
            max_level: None,
        }
    }

    fn catalog() -> Catalog {
        let mut b = CatalogBuilder::new();
        b.register_item(level_item("robotics_factory", QueueKind::Construction))
            .unwrap();
        b.register_item(level_item("engineering", QueueKind::Research))
            .unwrap();
        b.set_capacity(
            QueueKind::Construction,
            CapacityProfile {
                base_rate: Fixed64::from_num(20),
                contributors: vec![BuildingContribution {
                    building: ItemKey::new("robotics_factory"),
                    per_level: Fixed64::from_num(10),
                }],
                technology_bonuses: vec![TechnologyBonus {
                    technology: ItemKey::new("engineering"),
                    percent_per_level: Fixed64::from_num(25),
                }],
            },
        );
        b.set_capacity(QueueKind::Research, CapacityProfile::flat(Fixed64::from_num(5)));
        b.build().unwrap()
    }

    fn world() -> InMemoryWorld {
        let world = InMemoryWorld::new();
        world.add_location(LocationId(1), OwnerId(7)).unwrap();
        world
    }

    #[test]
    fn base_rate_only() {
        let catalog = catalog();
        let world = world();
        let rate = CapacityCalculator::new(&catalog, &world)
            .rate(LocationId(1), QueueKind::Construction)
            .unwrap();
        assert_eq!(rate.per_hour, Fixed64::from_num(20));
        assert_eq!(rate.multiplier, Fixed64::ONE);
    }

    #[test]
    fn flat_then_multiplicative() {
        let catalog = catalog();
        let world = world();
        world
            .set_building_level(LocationId(1), &ItemKey::new("robotics_factory"), 2)
            .unwrap();
        world
            .set_technology_level(OwnerId(7), &ItemKey::new("engineering"), 2)
            .unwrap();
        world
            .set_environment_bonus(LocationId(1), QueueKind::Construction, Fixed64::from_num(100))
            .unwrap();
        let rate = CapacityCalculator::new(&catalog, &world)
            .rate(LocationId(1), QueueKind::Construction)
            .unwrap();
        // (20 + 2*10) * 1.5 * 2.0
        assert_eq!(rate.flat, Fixed64::from_num(40));
        assert_eq!(rate.multiplier, Fixed64::from_num(3));
        assert_eq!(rate.per_hour, Fixed64::from_num(120));
    }

    #[test]
    fn rate_reflects_current_levels() {
        let catalog = catalog();
        let world = world();
        let calc = CapacityCalculator::new(&catalog, &world);
        let before = calc.rate(LocationId(1), QueueKind::Construction).unwrap();
        world
            .set_building_level(LocationId(1), &ItemKey::new("robotics_factory"), 1)
            .unwrap();
        let after = calc.rate(LocationId(1), QueueKind::Construction).unwrap();
        assert!(after.per_hour > before.per_hour);
    }

    #[test]
    fn negative_environment_clamps_to_zero() {
        let catalog = catalog();
        let world = world();
        world
            .set_environment_bonus(LocationId(1), QueueKind::Research, Fixed64::from_num(-200))
            .unwrap();
        let rate = CapacityCalculator::new(&catalog, &world)
            .rate(LocationId(1), QueueKind::Research)
            .unwrap();
        assert_eq!(rate.per_hour, Fixed64::ZERO);
        assert!(!rate.is_positive());
    }

    #[test]
    fn missing_profile() {
        let catalog = catalog();
        let world = world();
        let err = CapacityCalculator::new(&catalog, &world)
            .rate(LocationId(1), QueueKind::Production)
            .unwrap_err();
        assert!(matches!(err, CapacityError::MissingProfile(QueueKind::Production)));
    }

    #[test]
    fn unknown_location_is_world_error() {
        let catalog = catalog();
        let world = world();
        let err = CapacityCalculator::new(&catalog, &world)
            .rate(LocationId(99), QueueKind::Construction)
            .unwrap_err();
        assert!(matches!(err, CapacityError::World(WorldError::UnknownLocation(_))));
    }

    proptest! {
        /// More robotics never lowers the construction rate.
        #[test]
        fn rate_is_monotonic_in_building_level(a in 0u32..40, b in 0u32..40) {
            let catalog = catalog();
            let world = world();
            let calc = CapacityCalculator::new(&catalog, &world);
            let key = ItemKey::new("robotics_factory");
            world.set_building_level(LocationId(1), &key, a.min(b)).unwrap();
            let low = calc.rate(LocationId(1), QueueKind::Construction).unwrap();
            world.set_building_level(LocationId(1), &key, a.max(b)).unwrap();
            let high = calc.rate(LocationId(1), QueueKind::Construction).unwrap();
            prop_assert!(high.per_hour >= low.per_hour);
        }
    }
}
