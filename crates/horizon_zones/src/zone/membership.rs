//! Membership, lock and visibility operations plus their change reactions.
//!
//! Writes happen on the replica holding state authority over the zone. Other
//! replicas forward the request to the authority through the runtime and learn
//! the result from the replicated field. Both paths end in [`ZoneSystem::react`],
//! so every replica runs the same transitions for the same field change.

use crate::error::{RejectReason, ZoneError, ZoneOutcome};
use crate::replication::{AuthorityGuard, FieldChange, ZoneCommand, ZoneField};
use crate::system::ZoneSystem;
use crate::types::{ParticipantId, ZoneId};
use crate::zone::VisibilityTransition;
use tracing::{debug, info, trace, warn};

impl ZoneSystem {
    /// Whether `participant` may enter `zone` right now.
    pub fn can_accept(&self, zone: ZoneId, participant: ParticipantId) -> bool {
        self.zones
            .get(&zone)
            .map(|z| z.can_accept(participant))
            .unwrap_or(false)
    }

    /// Adds `participant` to `zone`.
    ///
    /// Idempotent. A full or locked zone rejects the request without mutation
    /// and fires the status-changed notification.
    pub fn enter(&mut self, zone: ZoneId, participant: ParticipantId) -> Result<ZoneOutcome, ZoneError> {
        let target = self.zone_ref(zone)?;
        if target.is_member(participant) {
            return Ok(ZoneOutcome::Unchanged);
        }
        if let Some(reason) = target.admission(participant) {
            return Ok(self.reject(zone, reason));
        }
        self.change_presence(zone, participant, true)
    }

    /// Removes `participant` from `zone`. Idempotent.
    pub fn exit(&mut self, zone: ZoneId, participant: ParticipantId) -> Result<ZoneOutcome, ZoneError> {
        if !self.zone_ref(zone)?.is_member(participant) {
            return Ok(ZoneOutcome::Unchanged);
        }
        self.change_presence(zone, participant, false)
    }

    fn change_presence(
        &mut self,
        zone: ZoneId,
        participant: ParticipantId,
        present: bool,
    ) -> Result<ZoneOutcome, ZoneError> {
        let Some(guard) = self.guard(zone) else {
            self.runtime
                .invoke_remote(zone, ZoneCommand::ChangePresence { participant, present })?;
            trace!(zone = %zone, participant = %participant, present, "Presence change forwarded");
            return Ok(ZoneOutcome::Forwarded);
        };

        let target = self.zone_ref(zone)?;
        let mut members = target.members().to_vec();
        if present {
            if members.contains(&participant) {
                return Ok(ZoneOutcome::Unchanged);
            }
            // Forwarded requests are re-checked here against the authoritative state.
            if let Some(reason) = target.admission(participant) {
                return Ok(self.reject(zone, reason));
            }
            members.push(participant);
        } else {
            if !members.contains(&participant) {
                return Ok(ZoneOutcome::Unchanged);
            }
            members.retain(|p| *p != participant);
        }

        self.write_field(zone, &guard, ZoneField::Members(members))?;
        Ok(ZoneOutcome::Applied)
    }

    /// Raises or lowers the zone lock.
    ///
    /// Locking an empty zone is rejected unless the zone allows it. Both a
    /// rejection and a no-op still emit one status-changed notification.
    pub fn set_lock(&mut self, zone: ZoneId, locked: bool) -> Result<ZoneOutcome, ZoneError> {
        let target = self.zone_ref(zone)?;
        if locked && target.members().is_empty() && !target.allow_empty_zone_locking() {
            return Ok(self.reject(zone, RejectReason::EmptyZoneLock));
        }
        if target.is_force_locked() == locked {
            self.notify_zone_changed(zone);
            return Ok(ZoneOutcome::Unchanged);
        }

        match self.guard(zone) {
            Some(guard) => {
                self.write_field(zone, &guard, ZoneField::ForceLocked(locked))?;
                Ok(ZoneOutcome::Applied)
            }
            None => {
                self.runtime.invoke_remote(zone, ZoneCommand::ChangeLock { locked })?;
                Ok(ZoneOutcome::Forwarded)
            }
        }
    }

    /// Flips the lock on behalf of `requester`.
    pub fn toggle_lock(&mut self, zone: ZoneId, requester: ParticipantId) -> Result<ZoneOutcome, ZoneError> {
        let target = self.zone_ref(zone)?;
        if self.config.only_members_can_toggle_lock && !target.is_member(requester) {
            return Ok(self.reject(zone, RejectReason::NotAMember));
        }
        let locked = !target.is_force_locked();
        self.set_lock(zone, locked)
    }

    /// Shows or hides a zone. Authority only.
    pub fn set_visible(&mut self, zone: ZoneId, visible: bool) -> Result<ZoneOutcome, ZoneError> {
        let guard = self.guard(zone).ok_or(ZoneError::NotAuthority(zone))?;
        if self.zone_ref(zone)?.is_visible() == visible {
            return Ok(ZoneOutcome::Unchanged);
        }
        self.write_field(zone, &guard, ZoneField::Visible(visible))?;
        Ok(ZoneOutcome::Applied)
    }

    /// Tells listeners about a visibility flip without a transition.
    pub fn instant_change_visibility(&self, zone: ZoneId, visible: bool) {
        self.notify_listeners(zone, |listener, snapshot| {
            listener.instant_change_visibility(snapshot, visible)
        });
    }

    /// Writes a field as the authority, publishes it and runs the reaction.
    pub(crate) fn write_field(
        &mut self,
        zone: ZoneId,
        guard: &AuthorityGuard,
        field: ZoneField,
    ) -> Result<(), ZoneError> {
        let change = self.zone_mut(zone)?.write(field, guard)?;
        if let Some(change) = change {
            self.runtime.set_field(zone, change.new.clone())?;
            self.react(zone, change);
        }
        Ok(())
    }

    /// Applies a field received from the authority and runs the reaction.
    pub fn apply_remote_field(&mut self, zone: ZoneId, field: ZoneField) -> Result<(), ZoneError> {
        let change = self.zone_mut(zone)?.apply_remote(field);
        if let Some(change) = change {
            self.react(zone, change);
        }
        Ok(())
    }

    pub(crate) fn react(&mut self, zone: ZoneId, change: FieldChange<ZoneField>) {
        match (change.old, change.new) {
            (ZoneField::Members(old), ZoneField::Members(new)) => self.on_members_changed(zone, &old, &new),
            (ZoneField::ForceLocked(_), ZoneField::ForceLocked(_)) => {
                self.check_status(zone);
                self.notify_listeners(zone, |listener, snapshot| listener.on_lock_changed(snapshot));
            }
            (ZoneField::Visible(_), ZoneField::Visible(visible)) => self.queue_visibility(zone, visible),
            (ZoneField::InUse(_), ZoneField::InUse(true)) => self.activate_dynamic_zone(zone),
            (ZoneField::InUse(_), ZoneField::InUse(false)) => self.deactivate_dynamic_zone(zone),
            (ZoneField::Center(_), ZoneField::Center(center)) => {
                trace!(zone = %zone, ?center, "Zone moved");
            }
            (old, new) => warn!(zone = %zone, ?old, ?new, "Mismatched field change"),
        }
    }

    fn on_members_changed(&mut self, zone: ZoneId, old: &[ParticipantId], new: &[ParticipantId]) {
        let exited: Vec<ParticipantId> = old.iter().copied().filter(|p| !new.contains(p)).collect();
        let entered: Vec<ParticipantId> = new.iter().copied().filter(|p| !old.contains(p)).collect();

        for participant in &exited {
            self.notify_listeners(zone, |listener, snapshot| {
                listener.on_participant_exited(snapshot, *participant)
            });
            self.did_exit_zone(*participant, zone);
        }

        // Every current member, not only newcomers; did_enter_zone is idempotent.
        for participant in new {
            self.did_enter_zone(*participant, zone);
        }

        for participant in &entered {
            self.notify_listeners(zone, |listener, snapshot| {
                listener.on_participant_entered(snapshot, *participant)
            });
        }

        debug!(local = %self.local, zone = %zone, ?entered, ?exited, members = new.len(), "Membership changed");
        self.check_status(zone);
    }

    /// Re-evaluates the lock after a membership or lock change.
    ///
    /// An empty zone that may not be locked empty is unlocked by its authority;
    /// the resulting lock change notifies. Otherwise observers get one
    /// status-changed notification.
    pub(crate) fn check_status(&mut self, zone: ZoneId) {
        let Some(target) = self.zones.get(&zone) else {
            return;
        };
        let stale_lock =
            target.members().is_empty() && target.is_force_locked() && !target.allow_empty_zone_locking();

        if stale_lock {
            if let Some(guard) = self.guard(zone) {
                match self.write_field(zone, &guard, ZoneField::ForceLocked(false)) {
                    Ok(()) => {
                        info!(zone = %zone, "🔓 Empty zone unlocked");
                        return;
                    }
                    Err(e) => warn!(zone = %zone, error = %e, "Failed to unlock empty zone"),
                }
            }
        }

        self.notify_zone_changed(zone);
    }

    pub(crate) fn notify_zone_changed(&self, zone: ZoneId) {
        self.notify_listeners(zone, |listener, snapshot| listener.on_zone_changed(snapshot));
    }

    fn reject(&self, zone: ZoneId, reason: RejectReason) -> ZoneOutcome {
        debug!(local = %self.local, zone = %zone, ?reason, "Zone request rejected");
        self.notify_zone_changed(zone);
        ZoneOutcome::Rejected(reason)
    }

    fn queue_visibility(&mut self, zone: ZoneId, visible: bool) {
        let Some(target) = self.zones.get(&zone) else {
            return;
        };
        let transition = VisibilityTransition::new(target.snapshot(), visible, target.listeners().to_vec());
        self.pending_visibility.push_back(transition);
    }

    /// Drops members that are no longer connected, then re-checks status.
    pub(crate) fn prune_departed(&mut self, zone: ZoneId) {
        let connected = self.runtime.connected_participants();
        let Some(target) = self.zones.get(&zone) else {
            return;
        };
        let kept: Vec<ParticipantId> = target
            .members()
            .iter()
            .copied()
            .filter(|p| connected.contains(p))
            .collect();

        if kept.len() == target.members().len() {
            self.check_status(zone);
            return;
        }

        match self.guard(zone) {
            Some(guard) => {
                if let Err(e) = self.write_field(zone, &guard, ZoneField::Members(kept)) {
                    warn!(zone = %zone, error = %e, "Failed to prune departed members");
                }
            }
            None => self.check_status(zone),
        }
    }
}
