//! # Spatial Membership Resolution
//!
//! Maps a participant's head position to at most one zone.
//!
//! Resolution runs for the local participant on every movement and whenever the
//! set of registered zones changes:
//!
//! 1. Still inside the current (registered) zone: nothing to do. Membership is
//!    sticky so a head hovering on a boundary does not flicker.
//! 2. Otherwise leave the current zone, if any.
//! 3. Enter the **first** registered zone, in registration order, that contains
//!    the head and accepts the participant. Overlapping zones are resolved by
//!    registration order, never by distance.
//!
//! [`ZoneSystem::can_move_headset`] answers the same question without side
//! effects so a locomotion validator can veto a move into a full or locked zone
//! before it happens.

use crate::error::ZoneError;
use crate::replication::ZoneField;
use crate::system::ZoneSystem;
use crate::types::{ParticipantId, ParticipantKind, Vec3, ZoneId};
use crate::zone::ZoneSnapshot;
use serde::Serialize;
use tracing::{debug, warn};

/// A participant as seen by one replica.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneUser {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    pub(crate) head: Vec3,
    pub(crate) current_zone: Option<ZoneId>,
}

impl ZoneUser {
    pub fn new(id: ParticipantId, kind: ParticipantKind, head: Vec3) -> Self {
        Self {
            id,
            kind,
            head,
            current_zone: None,
        }
    }

    pub fn head(&self) -> Vec3 {
        self.head
    }

    pub fn current_zone(&self) -> Option<ZoneId> {
        self.current_zone
    }

    /// Real users may initiate pairing; bots may not.
    pub fn is_valid_source(&self) -> bool {
        !self.kind.is_bot()
    }
}

/// Observer of per-participant zone transitions.
pub trait ZoneUserListener: Send + Sync {
    fn on_zone_changed(
        &self,
        participant: ParticipantId,
        previous: Option<&ZoneSnapshot>,
        current: Option<&ZoneSnapshot>,
    );
}

impl ZoneSystem {
    pub fn current_zone(&self, participant: ParticipantId) -> Option<ZoneId> {
        self.users.get(&participant).and_then(|u| u.current_zone)
    }

    fn zones_forbidden_to(&self, kind: ParticipantKind) -> bool {
        kind.is_bot() && self.config.forbid_zones_to_bots
    }

    /// Re-evaluates which zone `participant` belongs to from its head position.
    ///
    /// Returns the zone the participant is in (or was forwarded into) afterwards.
    pub fn resolve_membership(&mut self, participant: ParticipantId) -> Result<Option<ZoneId>, ZoneError> {
        let user = self
            .users
            .get(&participant)
            .ok_or(ZoneError::UnknownParticipant(participant))?;
        let head = user.head;
        let current = user.current_zone;

        if self.zones_forbidden_to(user.kind) {
            if let Some(zone) = current {
                self.exit(zone, participant)?;
            }
            return Ok(None);
        }

        if let Some(zone) = current {
            let still_inside = self
                .zones
                .get(&zone)
                .map(|z| z.is_registered() && z.contains_head(head))
                .unwrap_or(false);
            if still_inside {
                return Ok(Some(zone));
            }
            if self.zones.contains_key(&zone) {
                self.exit(zone, participant)?;
            }
        }

        let candidate = self.registry.zones().iter().copied().find(|id| {
            self.zones
                .get(id)
                .map(|z| z.contains_head(head) && z.can_accept(participant))
                .unwrap_or(false)
        });

        match candidate {
            Some(zone) => {
                let outcome = self.enter(zone, participant)?;
                debug!(participant = %participant, zone = %zone, ?outcome, "Resolved into zone");
                Ok(Some(zone))
            }
            None => Ok(None),
        }
    }

    /// Whether `participant` may move its head to `candidate`.
    ///
    /// Pure: vetoes moves into zones that are full, locked, or forbidden to bots.
    pub fn can_move_headset(&self, participant: ParticipantId, candidate: Vec3) -> bool {
        let Some(user) = self.users.get(&participant) else {
            return true;
        };
        let forbidden = self.zones_forbidden_to(user.kind);

        self.registry.zones().iter().all(|id| {
            let Some(zone) = self.zones.get(id) else {
                return true;
            };
            if !zone.contains_head(candidate) {
                return true;
            }
            !forbidden && zone.can_accept(participant)
        })
    }

    /// Per-participant reaction to being listed as a member of `zone`.
    ///
    /// Leaves any previous zone first so a participant is never in two zones.
    pub(crate) fn did_enter_zone(&mut self, participant: ParticipantId, zone: ZoneId) {
        let Some(previous) = self.users.get(&participant).map(|u| u.current_zone) else {
            return;
        };
        if previous == Some(zone) {
            return;
        }

        if let Some(user) = self.users.get_mut(&participant) {
            user.current_zone = Some(zone);
        }

        if let Some(previous) = previous {
            if participant == self.local || self.has_authority(previous) {
                if let Err(e) = self.exit(previous, participant) {
                    warn!(participant = %participant, zone = %previous, error = %e, "Failed to leave previous zone");
                }
            }
        }

        if participant == self.local {
            self.pairing.reset();
        }
        self.notify_user_listeners(participant, previous, Some(zone));
    }

    pub(crate) fn did_exit_zone(&mut self, participant: ParticipantId, zone: ZoneId) {
        let Some(user) = self.users.get_mut(&participant) else {
            return;
        };
        if user.current_zone != Some(zone) {
            return;
        }
        user.current_zone = None;
        self.notify_user_listeners(participant, Some(zone), None);
    }

    fn notify_user_listeners(&self, participant: ParticipantId, previous: Option<ZoneId>, current: Option<ZoneId>) {
        if self.user_listeners.is_empty() {
            return;
        }
        let previous = previous.and_then(|id| self.zones.get(&id)).map(|z| z.snapshot());
        let current = current.and_then(|id| self.zones.get(&id)).map(|z| z.snapshot());
        for listener in &self.user_listeners {
            listener.on_zone_changed(participant, previous.as_ref(), current.as_ref());
        }
    }

    /// Adds a zone to the registry and re-resolves the local participant.
    pub fn register_zone(&mut self, zone: ZoneId) -> bool {
        let Some(target) = self.zones.get_mut(&zone) else {
            return false;
        };
        target.registered = true;
        if !self.registry.register(zone) {
            return false;
        }
        self.resolve_local();
        true
    }

    /// Removes a zone from the registry. The authority evicts remaining
    /// members before registry listeners hear about it.
    pub fn unregister_zone(&mut self, zone: ZoneId) -> bool {
        if let Some(target) = self.zones.get_mut(&zone) {
            target.registered = false;
        }
        if !self.registry.contains(zone) {
            return false;
        }

        let occupied = self.zones.get(&zone).map(|z| !z.members().is_empty()).unwrap_or(false);
        if occupied {
            if let Some(guard) = self.guard(zone) {
                if let Err(e) = self.write_field(zone, &guard, ZoneField::Members(Vec::new())) {
                    warn!(zone = %zone, error = %e, "Failed to evict members of unregistered zone");
                }
            }
        }

        self.registry.unregister(zone);
        self.resolve_local();
        true
    }

    fn resolve_local(&mut self) {
        if let Err(e) = self.resolve_membership(self.local) {
            warn!(participant = %self.local, error = %e, "Membership resolution failed");
        }
    }
}
