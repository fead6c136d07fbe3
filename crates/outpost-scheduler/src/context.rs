//! Shared handles for the admission controller, the tick processor and
//! cancellation.

use std::sync::Arc;

use outpost_core::capacity::CapacityCalculator;
use outpost_core::catalog::Catalog;
use outpost_core::event::EventLog;
use outpost_core::ledger::ResourceLedger;
use outpost_core::store::{QueueStore, StoreError};
use outpost_core::time::{Clock, SystemClock};
use outpost_core::world::{EffectSink, WorldView};
use outpost_power::EnergyProjector;
use tracing::debug;

use crate::config::SchedulerConfig;

/// Everything a scheduling decision reads or writes. Cheap to share behind
/// an `Arc`.
pub struct SchedulerContext {
    pub catalog: Arc<Catalog>,
    pub store: Arc<dyn QueueStore>,
    pub ledger: Arc<dyn ResourceLedger>,
    pub world: Arc<dyn WorldView>,
    pub effects: Arc<dyn EffectSink>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventLog>,
    pub config: SchedulerConfig,
}

impl SchedulerContext {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn ResourceLedger>,
        world: Arc<dyn WorldView>,
        effects: Arc<dyn EffectSink>,
    ) -> Self {
        let config = SchedulerConfig::default();
        Self {
            catalog,
            store,
            ledger,
            world,
            effects,
            clock: Arc::new(SystemClock),
            events: Arc::new(EventLog::new(config.event_capacity)),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the configuration. The event log is resized to match.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.events = Arc::new(EventLog::new(config.event_capacity));
        self.config = config;
        self
    }

    pub fn capacity(&self) -> CapacityCalculator<'_> {
        CapacityCalculator::new(&self.catalog, self.world.as_ref())
    }

    pub fn projector(&self) -> EnergyProjector<'_> {
        EnergyProjector::new(&self.catalog, self.world.as_ref(), self.store.as_ref())
    }

    /// Run a store read, retrying transient failures up to
    /// `config.read_retries` extra times. Writes must never go through here.
    pub fn read<T>(
        &self,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.config.read_retries => {
                    attempt += 1;
                    debug!(target: "outpost::store", attempt, error = %e, "read.retry");
                }
                result => return result,
            }
        }
    }
}
