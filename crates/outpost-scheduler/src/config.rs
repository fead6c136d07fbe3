//! Scheduler configuration.
//!
//! Every field has a default, so an empty config file (or none at all)
//! yields a working scheduler: one tick per second, no slot limits, and
//! energy never blocking activation.

use std::collections::BTreeMap;
use std::time::Duration;

use outpost_core::fixed::{Fixed64, f64_to_fixed64};
use outpost_core::queue::QueueKind;
use serde::{Deserialize, Serialize};

/// How much of an active item's charged cost comes back on cancellation.
/// Pending items were never charged and are never refunded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    #[default]
    Full,
    #[serde(rename = "none")]
    NoRefund,
    /// A fixed percentage, clamped to 100.
    Percent(u8),
    /// Proportional to the work not yet done.
    ProRata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Deadline handed to each completion effect.
    pub item_timeout_ms: u64,
    /// Extra attempts for reads that fail with a transient store error.
    pub read_retries: u32,
    pub refund: RefundPolicy,
    /// Largest energy deficit activation may create. `None` disables
    /// energy gating.
    pub energy_deficit_limit: Option<f64>,
    /// Maximum simultaneously active items per (location, kind).
    /// Kinds without an entry are unlimited.
    pub slots: BTreeMap<QueueKind, u32>,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            item_timeout_ms: 250,
            read_retries: 2,
            refund: RefundPolicy::Full,
            energy_deficit_limit: None,
            slots: BTreeMap::new(),
            event_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn slot_limit(&self, kind: QueueKind) -> Option<u32> {
        self.slots.get(&kind).copied()
    }

    pub fn deficit_limit(&self) -> Option<Fixed64> {
        self.energy_deficit_limit
            .map(|limit| f64_to_fixed64(limit.max(0.0)))
    }

    /// Reject values that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        if let RefundPolicy::Percent(p) = self.refund
            && p > 100
        {
            return Err(ConfigError::RefundPercent(p));
        }
        if let Some(limit) = self.energy_deficit_limit
            && !(limit.is_finite() && limit >= 0.0)
        {
            return Err(ConfigError::DeficitLimit(limit));
        }
        if let Some((kind, _)) = self.slots.iter().find(|(_, n)| **n == 0) {
            return Err(ConfigError::ZeroSlots(*kind));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("tick_interval_ms must be positive")]
    ZeroTickInterval,

    #[error("refund percent {0} exceeds 100")]
    RefundPercent(u8),

    #[error("energy_deficit_limit must be a non-negative number, got {0}")]
    DeficitLimit(f64),

    #[error("slot limit for {0} must be positive")]
    ZeroSlots(QueueKind),
}
