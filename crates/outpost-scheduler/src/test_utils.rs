//! A fully wired scheduler over in-memory collaborators and a manual clock.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use std::sync::Arc;

use outpost_core::id::{ItemKey, LocationId, OwnerId, QueueItemId};
use outpost_core::ledger::{InMemoryLedger, ResourceLedger};
use outpost_core::queue::QueueItem;
use outpost_core::store::{InMemoryQueueStore, QueueStore};
use outpost_core::test_utils::{HOME, OWNER, funded_ledger, scenario_catalog, scenario_world};
use outpost_core::time::{ManualClock, Timestamp};
use outpost_core::world::InMemoryWorld;

use crate::admission::{Admission, AdmissionController, AdmissionError, SubmitRequest};
use crate::config::SchedulerConfig;
use crate::context::SchedulerContext;
use crate::service::QueueService;
use crate::tick::{TickOutcome, TickProcessor, TickReport};

/// Where the manual clock starts.
pub const START: Timestamp = Timestamp(1_000_000);

pub struct Harness {
    pub store: Arc<InMemoryQueueStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub world: Arc<InMemoryWorld>,
    pub clock: Arc<ManualClock>,
    pub ctx: Arc<SchedulerContext>,
    pub processor: Arc<TickProcessor>,
    pub service: QueueService,
}

impl Harness {
    /// Scenario catalog and world, both owners funded to `balance`.
    pub fn new(balance: u64) -> Self {
        Self::with_config(balance, SchedulerConfig::default())
    }

    pub fn with_config(balance: u64, config: SchedulerConfig) -> Self {
        Self::with_store(balance, config, |store| -> Arc<dyn QueueStore> { store })
    }

    /// The scheduler reaches the store through whatever `wrap` returns;
    /// `self.store` stays the plain in-memory store underneath.
    pub fn with_store(
        balance: u64,
        config: SchedulerConfig,
        wrap: impl FnOnce(Arc<InMemoryQueueStore>) -> Arc<dyn QueueStore>,
    ) -> Self {
        let store = Arc::new(InMemoryQueueStore::new());
        let ledger = Arc::new(funded_ledger(balance));
        let world = Arc::new(scenario_world());
        let clock = Arc::new(ManualClock::new(START));
        let ctx = Arc::new(
            SchedulerContext::new(
                Arc::new(scenario_catalog()),
                wrap(store.clone()),
                ledger.clone(),
                world.clone(),
                world.clone(),
            )
            .with_clock(clock.clone())
            .with_config(config),
        );
        Self {
            store,
            ledger,
            world,
            clock,
            processor: Arc::new(TickProcessor::new(ctx.clone())),
            service: QueueService::new(ctx.clone()),
            ctx,
        }
    }

    /// Submit at HOME as OWNER.
    pub fn submit(&self, key: ItemKey, target: u32) -> Result<Admission, AdmissionError> {
        self.submit_as(OWNER, HOME, key, target)
    }

    pub fn submit_as(
        &self,
        owner: OwnerId,
        location: LocationId,
        item_key: ItemKey,
        target: u32,
    ) -> Result<Admission, AdmissionError> {
        AdmissionController::new(&self.ctx).submit(SubmitRequest {
            owner,
            location,
            item_key,
            target,
        })
    }

    /// Run one tick; panics if it was skipped or failed.
    pub fn tick(&self) -> TickReport {
        match self.processor.tick() {
            Ok(TickOutcome::Ran(report)) => report,
            other => panic!("tick did not run: {other:?}"),
        }
    }

    pub fn advance_hours(&self, hours: u64) {
        self.clock.advance_hours(hours);
    }

    pub fn advance_millis(&self, ms: u64) {
        self.clock.advance_millis(ms);
    }

    pub fn balance(&self, owner: OwnerId) -> u64 {
        match self.ledger.balance(owner) {
            Ok(balance) => balance,
            Err(e) => panic!("no balance for {owner}: {e}"),
        }
    }

    pub fn item(&self, id: QueueItemId) -> QueueItem {
        match self.store.get(id) {
            Ok(Some(item)) => item,
            other => panic!("item {id:?} not readable: {other:?}"),
        }
    }
}
