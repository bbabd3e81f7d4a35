//! # Farsight AoI - Area of Interest Management
//!
//! Server-side interest management for one connected client. Each client is
//! represented by a [`Witness`] that tracks which entities the client can
//! see, decides what to tell it each tick, and stays inside a per-tick byte
//! budget while doing so.
//!
//! ## Core Components
//!
//! * **EntityCacheMap** - Per-(witness, entity) visibility state in an
//!   arena with stable handles
//! * **KnownEntityQueue** - Binary min-heap scheduling entities by update
//!   priority (lower priority sends sooner)
//! * **AoiTrigger** - Radius-plus-hysteresis membership around a mobile or
//!   fixed root
//! * **Witness** - The per-client orchestrator: tick update loop, id
//!   aliasing, bandwidth accounting, offload streaming
//! * **ReplayDataCollector** - Optional mirror of the downstream message
//!   flow for recorded playback
//!
//! The world model lives in [`world`] and is intentionally small; the AoI
//! machinery only needs positions, vehicle chains and change counters.

pub mod cache_map;
pub mod config;
pub mod entity_cache;
pub mod events;
pub mod queue;
pub mod replay;
pub mod space_data;
pub mod trigger;
pub mod types;
pub mod witness;
pub mod world;

mod error;

pub use cache_map::{CacheHandle, EntityCacheMap};
pub use config::AoiConfig;
pub use entity_cache::{CacheState, EntityCache};
pub use error::AoiError;
pub use events::{AoiListener, NullListener};
pub use queue::KnownEntityQueue;
pub use replay::ReplayDataCollector;
pub use space_data::{SpaceDataEntry, SpaceDataStore};
pub use trigger::{AoiRoot, AoiTrigger};
pub use types::{GameTime, Vec3};
pub use witness::Witness;
pub use world::{Entity, World};

#[cfg(test)]
mod tests;
