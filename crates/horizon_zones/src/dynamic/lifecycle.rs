//! Grace-period release of under-occupied pooled zones.

use crate::error::ZoneError;
use crate::replication::ZoneField;
use crate::system::ZoneSystem;
use crate::types::ZoneId;
use tokio::time::Instant;
use tracing::{info, warn};

impl ZoneSystem {
    /// Releases active pooled zones this replica owns that have held at most
    /// one occupant for the whole grace period.
    ///
    /// Returns the zones handed back to the pool on this tick.
    pub fn tick_lifecycle(&mut self, now: Instant) -> Vec<ZoneId> {
        let grace = self.config.release_grace();
        let mut released = Vec::new();

        for zone in self.pool.active().to_vec() {
            let owned = self.has_authority(zone);
            let Some(target) = self.zones.get_mut(&zone) else {
                continue;
            };
            let occupants = target.members().len();
            let in_use = target.in_use() == Some(true);
            let Some(state) = target.dynamic.as_mut() else {
                continue;
            };

            if !owned || !in_use || occupants > 1 {
                state.under_occupied_since = None;
                continue;
            }

            let since = *state.under_occupied_since.get_or_insert(now);
            if now.saturating_duration_since(since) < grace {
                continue;
            }
            state.under_occupied_since = None;

            match self.release_dynamic_zone(zone) {
                Ok(()) => released.push(zone),
                Err(e) => warn!(zone = %zone, error = %e, "Failed to release pooled zone"),
            }
        }

        released
    }

    /// Flips the in-use flag off and hides the zone. Authority only.
    pub fn release_dynamic_zone(&mut self, zone: ZoneId) -> Result<(), ZoneError> {
        let guard = self.guard(zone).ok_or(ZoneError::NotAuthority(zone))?;
        self.write_field(zone, &guard, ZoneField::InUse(false))?;
        self.write_field(zone, &guard, ZoneField::Visible(false))?;
        info!(local = %self.local, zone = %zone, "♻️ Pooled zone released");
        Ok(())
    }
}
