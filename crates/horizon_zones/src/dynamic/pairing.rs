//! # Proximity Pairing
//!
//! Watches the other un-zoned users around the local participant. When two of
//! them stay within `proximity_radius` of each other for `proximity_debounce`,
//! the lower id of the pair allocates a pooled zone at their midpoint and puts
//! both inside.
//!
//! Only the lower id ever starts a timer, so the two replicas of a pair never
//! race each other into a double allocation. Every step re-checks its
//! preconditions: if either participant lands in some other zone meanwhile,
//! the pending pair is dropped without touching any zone.

use crate::error::ZoneError;
use crate::replication::ZoneField;
use crate::system::ZoneSystem;
use crate::types::{ParticipantId, Vec3, ZoneId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A candidate partner and when uninterrupted proximity with it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPair {
    pub partner: ParticipantId,
    pub since: Instant,
}

/// Pairing state of the local participant.
#[derive(Debug, Default)]
pub struct ProximityPairing {
    pending: Option<PendingPair>,
    allocating: bool,
}

impl ProximityPairing {
    pub fn pending(&self) -> Option<PendingPair> {
        self.pending
    }

    pub fn partner(&self) -> Option<ParticipantId> {
        self.pending.map(|p| p.partner)
    }

    pub fn is_allocating(&self) -> bool {
        self.allocating
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Tracks `partner`, keeping the start time if it is already pending.
    fn track(&mut self, partner: ParticipantId, now: Instant) -> Duration {
        match self.pending {
            Some(pending) if pending.partner == partner => now.saturating_duration_since(pending.since),
            _ => {
                self.pending = Some(PendingPair { partner, since: now });
                Duration::ZERO
            }
        }
    }
}

impl ZoneSystem {
    pub fn pairing(&self) -> &ProximityPairing {
        &self.pairing
    }

    /// One pairing evaluation for the local participant.
    ///
    /// Returns the zone allocated on this tick, if any.
    pub async fn tick_pairing(&mut self, now: Instant) -> Option<ZoneId> {
        let local = self.local;
        let me = self.users.get(&local)?;
        if !me.is_valid_source() || me.current_zone.is_some() || self.pairing.allocating {
            return None;
        }
        let head = me.head;
        let radius_sq = self.config.proximity_radius * self.config.proximity_radius;
        let debounce = self.config.proximity_debounce();

        let mut detected = false;
        let sources = self.pool.sources().to_vec();
        for candidate in sources {
            if candidate == local {
                continue;
            }
            let Some(other) = self.users.get(&candidate) else {
                continue;
            };
            if !other.is_valid_source() {
                continue;
            }
            if other.current_zone.is_some() {
                if self.pairing.partner() == Some(candidate) {
                    debug!(local = %local, partner = %candidate, "Partner zoned elsewhere, dropping pending pair");
                    self.pairing.reset();
                }
                continue;
            }
            if head.distance_squared(other.head) >= radius_sq {
                continue;
            }

            detected = true;
            if local < candidate {
                let elapsed = self.pairing.track(candidate, now);
                if elapsed >= debounce {
                    return self.allocate_for_pair(candidate).await;
                }
            } else {
                // The partner has the lower id and drives this pair.
                self.pairing.reset();
            }
            break;
        }

        if !detected {
            self.pairing.reset();
        }
        None
    }

    async fn allocate_for_pair(&mut self, partner: ParticipantId) -> Option<ZoneId> {
        self.pairing.allocating = true;
        let result = self.try_allocate(partner).await;
        self.pairing.allocating = false;
        self.pairing.reset();

        match result {
            Ok(Some(zone)) => {
                info!(local = %self.local, partner = %partner, zone = %zone, "🤝 Allocated pooled zone for pair");
                Some(zone)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(local = %self.local, partner = %partner, error = %e, "Pair allocation abandoned");
                None
            }
        }
    }

    async fn try_allocate(&mut self, partner: ParticipantId) -> Result<Option<ZoneId>, ZoneError> {
        let local = self.local;
        let center = self.pair_midpoint(partner)?;

        let zone = match self.pick_dynamic_zone() {
            Some(zone) => zone,
            None => self.create_dynamic_zone(center).await?,
        };

        if let Err(e) = self.arbitrator.request_all_authority(zone).await {
            self.deactivate_dynamic_zone(zone);
            return Err(e);
        }

        // Either side may have been zoned or gone while we waited.
        let still_free = self.users.contains_key(&partner)
            && self.current_zone(local).is_none()
            && self.current_zone(partner).is_none();
        if !still_free {
            debug!(local = %local, partner = %partner, zone = %zone, "Pair no longer available, returning zone");
            self.deactivate_dynamic_zone(zone);
            return Ok(None);
        }

        let center = self.pair_midpoint(partner)?;
        let guard = self.guard(zone).ok_or(ZoneError::NotAuthority(zone))?;
        self.write_field(zone, &guard, ZoneField::Center(center))?;
        self.write_field(zone, &guard, ZoneField::InUse(true))?;
        self.write_field(zone, &guard, ZoneField::Visible(true))?;

        self.enter(zone, local)?;
        self.enter(zone, partner)?;
        Ok(Some(zone))
    }

    fn pair_midpoint(&self, partner: ParticipantId) -> Result<Vec3, ZoneError> {
        let me = self
            .users
            .get(&self.local)
            .ok_or(ZoneError::UnknownParticipant(self.local))?;
        let other = self
            .users
            .get(&partner)
            .ok_or(ZoneError::UnknownParticipant(partner))?;
        Ok(me.head.midpoint(other.head))
    }
}
