//! Replication event handling and the fixed-step tick
use super::core::ZoneSystem;
use crate::authority::AuthorityClaim;
use crate::replication::{ReplicationEvent, ZoneCommand};
use crate::types::{ParticipantId, ZoneId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a single [`ZoneSystem::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Dynamic zone allocated for a proximity pair
    pub allocated: Option<ZoneId>,
    /// Dynamic zones handed back to the pool
    pub released: Vec<ZoneId>,
}

impl ZoneSystem {
    /// Applies one event received from the replication runtime.
    ///
    /// Failures are logged and never propagated: the replica keeps its
    /// current state and converges on a later event or tick.
    pub async fn handle_event(&mut self, event: ReplicationEvent) {
        match event {
            ReplicationEvent::ParticipantJoined { participant, kind, head } => {
                self.add_participant(participant, kind, head);
            }
            ReplicationEvent::Moved { participant, head } => {
                if let Some(user) = self.users.get_mut(&participant) {
                    user.head = head;
                }
            }
            ReplicationEvent::ParticipantLeft { participant } => {
                self.remove_participant(participant);
                self.on_participant_left(participant).await;
            }
            ReplicationEvent::ZoneSpawned { object, spawn } => {
                self.on_zone_spawned(object, spawn);
            }
            ReplicationEvent::ZoneDespawned { object } => {
                self.remove_zone(object);
            }
            ReplicationEvent::FieldChanged { object, field } => {
                if let Err(e) = self.apply_remote_field(object, field) {
                    debug!(local = %self.local, zone = %object, error = %e, "Ignoring field change");
                }
            }
            ReplicationEvent::Command { object, from, command } => {
                self.apply_command(object, from, command);
            }
        }
    }

    /// Reclaims zones orphaned by `participant` and prunes stale members.
    pub async fn on_participant_left(&mut self, participant: ParticipantId) {
        let mut ids: Vec<ZoneId> = self.zones.keys().copied().collect();
        ids.sort();

        for id in ids {
            match self.arbitrator.ensure_attributed(id).await {
                Ok(AuthorityClaim::Claimed) => {
                    info!(local = %self.local, zone = %id, departed = %participant, "Took over zone after disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(local = %self.local, zone = %id, error = %e, "Could not attribute zone authority");
                }
            }

            if self.has_authority(id) {
                self.prune_departed(id);
            }
        }
    }

    /// Executes a request forwarded by a non-authoritative replica.
    pub(crate) fn apply_command(&mut self, zone: ZoneId, from: ParticipantId, command: ZoneCommand) {
        if !self.has_authority(zone) {
            debug!(local = %self.local, zone = %zone, from = %from, "Dropping command for zone we do not own");
            return;
        }

        let result = match command {
            ZoneCommand::ChangePresence { participant, present: true } => self.enter(zone, participant),
            ZoneCommand::ChangePresence { participant, present: false } => self.exit(zone, participant),
            ZoneCommand::ChangeLock { locked } => self.set_lock(zone, locked),
        };

        match result {
            Ok(outcome) => debug!(zone = %zone, from = %from, ?command, ?outcome, "Applied remote command"),
            Err(e) => warn!(zone = %zone, from = %from, ?command, error = %e, "Remote command failed"),
        }
    }

    /// Advances release timers and proximity pairing.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let released = self.tick_lifecycle(now);
        let allocated = self.tick_pairing(now).await;
        TickReport { allocated, released }
    }
}
