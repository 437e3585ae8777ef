//! # Horizon Zones
//!
//! Zone membership, authority arbitration and dynamic zone pooling for shared
//! multi-user spaces.
//!
//! Participants move through a space dotted with bounded regions ("zones").
//! This crate decides which participant belongs to which zone, enforces each
//! zone's capacity and lock, elects exactly one owner per zone without a voting
//! round, and allocates pooled zones around pairs of participants who linger
//! near each other.
//!
//! ## Core Features
//!
//! - **Membership state machine**: capacity, force lock, visibility, ordered members
//! - **Sticky first-match resolution**: head position to at most one zone
//! - **Min-id authority election**: deterministic single-writer ownership
//! - **Recycling pool**: LIFO free list, disjoint channel ids, replicated in-use flag
//! - **Proximity pairing**: debounced, lower-id-initiated pair allocation
//! - **Grace release**: under-occupied pooled zones return to the pool
//!
//! ## Architecture Overview
//!
//! Everything a replica knows lives in one [`ZoneSystem`]. It talks to the
//! outside world through the [`ReplicationRuntime`] trait and consumes
//! [`ReplicationEvent`]s. [`LocalSession`] is an in-process runtime that wires
//! several replicas together for tests and simulation.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use horizon_zones::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ZoneError> {
//! let session = LocalSession::new();
//! let (replica, _events) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
//!
//! let mut zones = ZoneSystem::new(ZoneSystemConfig::default(), replica, ParticipantKind::User, Vec3::zero());
//! zones.add_fixed_zone(&ZoneDescriptor {
//!     id: 1,
//!     name: "fireplace".to_string(),
//!     shape: ShapeSpec::Sphere { radius: 3.0 },
//!     center: Vec3::new(10.0, 0.0, 0.0),
//!     up: Vec3::unit_y(),
//!     max_capacity: 4,
//!     allow_empty_zone_locking: false,
//!     channel: Some(1),
//!     register_automatically: true,
//! })?;
//!
//! let zone = zones.move_local(Vec3::new(9.0, 0.0, 0.0))?;
//! assert_eq!(zone, Some(ObjectId(1)));
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod authority;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod registry;
pub mod replication;
pub mod system;
pub mod types;
pub mod user;
pub mod zone;

#[cfg(test)]
mod tests;

pub use audio::{InterestGroupRouter, InterestGroupSwitcher, GLOBAL_GROUP};
pub use authority::{AuthorityArbitrator, AuthorityClaim};
pub use config::{DynamicZoneTemplate, ZoneSystemConfig};
pub use dynamic::{DynamicZonePool, PendingPair, ProximityPairing};
pub use error::{RejectReason, ZoneError, ZoneOutcome};
pub use registry::{RegistryListener, ZoneRegistry};
pub use replication::{
    AuthorityGuard, FieldChange, LocalReplica, LocalSession, Replicated, ReplicationError,
    ReplicationEvent, ReplicationRuntime, ZoneCommand, ZoneField, ZoneSpawn, SPAWNED_OBJECT_ID_BASE,
};
pub use system::{TickReport, ZoneSystem};
pub use types::*;
pub use user::{ZoneUser, ZoneUserListener};
pub use zone::{
    Aabb, BoundsQuery, ShapeSpec, VisibilityTransition, Zone, ZoneDescriptor, ZoneListener, ZoneShape,
    ZoneSnapshot,
};
