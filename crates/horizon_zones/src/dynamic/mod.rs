//! Dynamic zones: the recycling pool, proximity pairing that fills it and the
//! grace-period release that empties it.

pub mod lifecycle;
pub mod pairing;
pub mod pool;

pub use pairing::{PendingPair, ProximityPairing};
pub use pool::DynamicZonePool;
