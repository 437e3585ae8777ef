//! Zone system orchestration.
//!
//! [`ZoneSystem`] ties the membership state machine, the registry, the
//! per-participant resolver, authority arbitration and the dynamic pool
//! together. Its behaviour is spread over several `impl ZoneSystem` blocks:
//!
//! - `core.rs` - construction, accessors, listeners, teardown
//! - `events.rs` - replication events, remote commands and the tick
//! - `zone/membership.rs` - enter/exit/lock/visibility and change reactions
//! - `user.rs` - spatial membership resolution
//! - `dynamic/` - pooling, proximity pairing and release

pub mod core;
pub mod events;

pub use self::core::ZoneSystem;
pub use self::events::TickReport;
