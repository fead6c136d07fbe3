//! Wall-clock timestamps and the clock abstraction.
//!
//! Queue items are scheduled against wall-clock time (milliseconds since the
//! Unix epoch). The engine never reads the system clock directly; it asks a
//! [`Clock`], so tests can drive time with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;

pub const MILLIS_PER_SECOND: u64 = 1_000;
pub const MILLIS_PER_HOUR: u64 = 3_600_000;

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub const fn saturating_add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later.
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// How long `cost` work-units take at `rate_per_hour`, in milliseconds,
/// rounded up so an item never completes early.
///
/// Computed on the raw Q32.32 bits in 128-bit integer space, so large costs
/// do not overflow the fixed-point range. Returns None for a non-positive
/// rate. Saturates at `u64::MAX`.
pub fn work_duration_millis(cost: u64, rate_per_hour: Fixed64) -> Option<u64> {
    let rate_bits = rate_per_hour.to_bits();
    if rate_bits <= 0 {
        return None;
    }
    let numerator = u128::from(cost) * u128::from(MILLIS_PER_HOUR) << Fixed64::FRAC_NBITS;
    let denominator = rate_bits as u128;
    let millis = numerator.div_ceil(denominator);
    Some(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Timestamp(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.0),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.now.store(at.0, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_hours(&self, hours: u64) {
        self.advance_millis(hours.saturating_mul(MILLIS_PER_HOUR));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}
