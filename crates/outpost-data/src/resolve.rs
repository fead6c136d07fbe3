//! Turns schema structs into catalog types.
//!
//! Cross-references (prerequisites, capacity contributors) are checked by
//! [`CatalogBuilder::build`]; this module only converts numbers and shapes.

use std::collections::HashSet;
use std::path::Path;

use outpost_core::catalog::{
    BuildingContribution, CapacityProfile, Catalog, CatalogBuilder, CostModel, CostScaling,
    EnergyCurve, EnergyProfile, ItemDef, Prerequisite, TechnologyBonus,
};
use outpost_core::fixed::Fixed64;
use outpost_core::id::ItemKey;

use crate::loader::DataLoadError;
use crate::schema::*;

/// Build a catalog from already-deserialized items and capacity tables.
/// `items_file` and `capacity_file` are only used in error messages.
pub fn build_catalog(
    items: &[ItemData],
    items_file: &Path,
    capacity: &[CapacityData],
    capacity_file: &Path,
) -> Result<Catalog, DataLoadError> {
    let mut builder = CatalogBuilder::new();
    for item in items {
        let def = resolve_item(item, items_file)?;
        builder.register_item(def).map_err(|source| DataLoadError::Catalog {
            file: items_file.to_path_buf(),
            source,
        })?;
    }

    let mut seen = HashSet::new();
    for table in capacity {
        if !seen.insert(table.kind) {
            return Err(DataLoadError::DuplicateName {
                file: capacity_file.to_path_buf(),
                name: table.kind.to_string(),
            });
        }
        builder.set_capacity(table.kind, resolve_capacity(table, capacity_file)?);
    }

    builder.build().map_err(|source| DataLoadError::Catalog {
        file: items_file.to_path_buf(),
        source,
    })
}

pub(crate) fn resolve_item(data: &ItemData, file: &Path) -> Result<ItemDef, DataLoadError> {
    let cost = match &data.cost {
        CostData::Flat(cost) => CostModel::PerLevel(CostScaling::Linear {
            base: *cost,
            increment: 0,
        }),
        CostData::Linear { base, increment } => CostModel::PerLevel(CostScaling::Linear {
            base: *base,
            increment: *increment,
        }),
        CostData::Exponential { base, multiplier } => {
            CostModel::PerLevel(CostScaling::Exponential {
                base: *base,
                multiplier: to_fixed(*multiplier, file, &data.key, "cost multiplier")?,
            })
        }
        CostData::PerUnit(unit) => CostModel::PerUnit(*unit),
    };

    let prerequisites = data
        .prerequisites
        .iter()
        .map(|p| match p {
            PrerequisiteData::Building { key, level } => Prerequisite::Building {
                key: ItemKey::new(key.as_str()),
                level: *level,
            },
            PrerequisiteData::Technology { key, level } => Prerequisite::Technology {
                key: ItemKey::new(key.as_str()),
                level: *level,
            },
        })
        .collect();

    let energy = match &data.energy {
        Some(e) => Some(EnergyProfile {
            produced: resolve_curve(e.produced.as_ref(), file, &data.key)?,
            consumed: resolve_curve(e.consumed.as_ref(), file, &data.key)?,
        }),
        None => None,
    };

    Ok(ItemDef {
        key: ItemKey::new(data.key.as_str()),
        kind: data.kind,
        cost,
        prerequisites,
        energy,
        max_level: data.max_level,
    })
}

fn resolve_curve(
    data: Option<&EnergyCurveData>,
    file: &Path,
    key: &str,
) -> Result<Option<EnergyCurve>, DataLoadError> {
    let curve = match data {
        None => return Ok(None),
        Some(EnergyCurveData::Linear { per_level }) => EnergyCurve::Linear {
            per_level: to_fixed(*per_level, file, key, "energy per level")?,
        },
        Some(EnergyCurveData::Scaled { base, growth }) => EnergyCurve::Scaled {
            base: to_fixed(*base, file, key, "energy base")?,
            growth: to_fixed(*growth, file, key, "energy growth")?,
        },
    };
    Ok(Some(curve))
}

pub(crate) fn resolve_capacity(
    data: &CapacityData,
    file: &Path,
) -> Result<CapacityProfile, DataLoadError> {
    let owner = data.kind.as_str();
    let contributors = data
        .contributors
        .iter()
        .map(|c| {
            Ok(BuildingContribution {
                building: ItemKey::new(c.building.as_str()),
                per_level: to_fixed(c.per_level, file, owner, "contributor rate")?,
            })
        })
        .collect::<Result<Vec<_>, DataLoadError>>()?;
    let technology_bonuses = data
        .technology_bonuses
        .iter()
        .map(|b| {
            Ok(TechnologyBonus {
                technology: ItemKey::new(b.technology.as_str()),
                percent_per_level: to_fixed(b.percent_per_level, file, owner, "technology bonus")?,
            })
        })
        .collect::<Result<Vec<_>, DataLoadError>>()?;

    Ok(CapacityProfile {
        base_rate: to_fixed(data.base_rate, file, owner, "base rate")?,
        contributors,
        technology_bonuses,
    })
}

/// Convert a data-file number to fixed point, rejecting NaN and values
/// outside the Q32.32 range.
fn to_fixed(v: f64, file: &Path, owner: &str, field: &str) -> Result<Fixed64, DataLoadError> {
    Fixed64::checked_from_num(v).ok_or_else(|| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail: format!("{field} of '{owner}' is out of range: {v}"),
    })
}
