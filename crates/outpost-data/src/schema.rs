//! Serde data file structs for catalog content.
//!
//! These structs define the on-disk format for item definitions and queue
//! capacity tables. Numbers that become fixed-point in the engine are plain
//! `f64` here; the resolver converts and range-checks them.

use outpost_core::queue::QueueKind;
use serde::Deserialize;

// ===========================================================================
// Items
// ===========================================================================

/// An item definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemData {
    pub key: String,
    pub kind: QueueKind,
    pub cost: CostData,
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteData>,
    #[serde(default)]
    pub energy: Option<EnergyData>,
    #[serde(default)]
    pub max_level: Option<u32>,
}

/// How much an item costs.
#[derive(Debug, Clone, Deserialize)]
pub enum CostData {
    /// Same cost at every level.
    Flat(u64),
    Linear { base: u64, increment: u64 },
    Exponential { base: u64, multiplier: f64 },
    /// Quantity items.
    PerUnit(u64),
}

#[derive(Debug, Clone, Deserialize)]
pub enum PrerequisiteData {
    Building { key: String, level: u32 },
    Technology { key: String, level: u32 },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnergyData {
    #[serde(default)]
    pub produced: Option<EnergyCurveData>,
    #[serde(default)]
    pub consumed: Option<EnergyCurveData>,
}

#[derive(Debug, Clone, Deserialize)]
pub enum EnergyCurveData {
    Linear { per_level: f64 },
    Scaled { base: f64, growth: f64 },
}

// ===========================================================================
// Capacity
// ===========================================================================

/// The capacity table of one queue kind.
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityData {
    pub kind: QueueKind,
    pub base_rate: f64,
    #[serde(default)]
    pub contributors: Vec<ContributorData>,
    #[serde(default)]
    pub technology_bonuses: Vec<TechnologyBonusData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributorData {
    pub building: String,
    pub per_level: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TechnologyBonusData {
    pub technology: String,
    pub percent_per_level: f64,
}

// ===========================================================================
// TOML wrappers (TOML does not support top-level arrays)
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TomlItems {
    pub items: Vec<ItemData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlCapacity {
    pub capacity: Vec<CapacityData>,
}

// ===========================================================================
// Tests
// ===========================================================================
