//! Outpost Core -- data model and collaborator seams for the outpost queue
//! engine.
//!
//! Each location runs four independent queues (construction, production,
//! research, defense production). This crate holds what every other crate
//! agrees on: ids, fixed-point math, time, the item state machine, the
//! catalog, the persistent store and the interfaces to the world and the
//! resource ledger.
//!
//! # Item Lifecycle
//!
//! 1. **Admit** -- a submission becomes a pending [`queue::QueueItem`],
//!    unless an in-flight item already holds its [`id::IdentityKey`].
//! 2. **Activate** -- cost is debited and the completion time is fixed from
//!    the queue's capacity, in one conditional store transition.
//! 3. **Complete** -- once due, the item is claimed, its effect is applied
//!    through [`world::EffectSink`], and it becomes completed.
//!
//! Cancellation can end the lifecycle at any non-terminal point.
//!
//! # Key Types
//!
//! - [`store::QueueStore`] -- conditional transitions are the only writes.
//! - [`catalog::Catalog`] -- frozen costs, prerequisites and energy curves.
//! - [`capacity::CapacityCalculator`] -- work-units/hour, never cached.
//! - [`ledger::ResourceLedger`] and [`world::WorldView`] -- collaborators.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.
//! - [`event::EventLog`] -- bounded lifecycle event log.

pub mod capacity;
pub mod catalog;
pub mod event;
pub mod fixed;
pub mod id;
pub mod ledger;
pub mod queue;
pub mod store;
pub mod time;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
