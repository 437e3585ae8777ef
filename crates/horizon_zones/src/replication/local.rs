//! In-process replication runtime.
//!
//! [`LocalSession`] plays the role of the shared session: it tracks connected
//! participants, object authority and the latest value of every replicated
//! field, and fans events out to each joined replica over an unbounded channel.
//! It backs the scenario tests and the `horizon-sim` simulator.
//!
//! Events are never echoed back to the replica that caused them. A replica that
//! joins late receives the existing participants, spawned zones and the latest
//! field values before anything else.

use super::{ReplicationError, ReplicationEvent, ReplicationRuntime, ZoneCommand, ZoneField, ZoneSpawn};
use crate::types::{ObjectId, ParticipantId, ParticipantKind, Vec3};
use dashmap::DashMap;
use std::mem::discriminant;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Ids handed to spawned objects start here; scene objects use lower ids.
pub const SPAWNED_OBJECT_ID_BASE: u64 = 10_000;

#[derive(Debug)]
struct PeerSlot {
    kind: ParticipantKind,
    head: Vec3,
    sender: UnboundedSender<ReplicationEvent>,
}

#[derive(Debug, Default)]
struct ObjectRecord {
    state_authority: Option<ParticipantId>,
    control_authority: Option<ParticipantId>,
    spawn: Option<ZoneSpawn>,
    fields: Vec<ZoneField>,
}

impl ObjectRecord {
    fn store(&mut self, field: ZoneField) {
        let kind = discriminant(&field);
        match self.fields.iter().position(|existing| discriminant(existing) == kind) {
            Some(index) => self.fields[index] = field,
            None => self.fields.push(field),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    peers: DashMap<ParticipantId, PeerSlot>,
    objects: DashMap<ObjectId, ObjectRecord>,
    next_object: AtomicU64,
    withhold_authority: AtomicBool,
}

/// Shared in-memory session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalSession {
    inner: Arc<SessionInner>,
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSession {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                peers: DashMap::new(),
                objects: DashMap::new(),
                next_object: AtomicU64::new(SPAWNED_OBJECT_ID_BASE),
                withhold_authority: AtomicBool::new(false),
            }),
        }
    }

    /// Connects a participant and returns its runtime handle and event stream.
    pub fn join(
        &self,
        participant: ParticipantId,
        kind: ParticipantKind,
        head: Vec3,
    ) -> (Arc<LocalReplica>, UnboundedReceiver<ReplicationEvent>) {
        let (sender, receiver) = unbounded_channel();

        for peer in self.inner.peers.iter() {
            let _ = sender.send(ReplicationEvent::ParticipantJoined {
                participant: *peer.key(),
                kind: peer.kind,
                head: peer.head,
            });
        }

        let mut objects: Vec<ObjectId> = self.inner.objects.iter().map(|o| *o.key()).collect();
        objects.sort();
        for object in objects {
            let Some(record) = self.inner.objects.get(&object) else {
                continue;
            };
            if let Some(spawn) = record.spawn {
                let _ = sender.send(ReplicationEvent::ZoneSpawned { object, spawn });
            }
            for field in &record.fields {
                let _ = sender.send(ReplicationEvent::FieldChanged {
                    object,
                    field: field.clone(),
                });
            }
        }

        self.inner.peers.insert(participant, PeerSlot { kind, head, sender });
        self.broadcast(
            participant,
            ReplicationEvent::ParticipantJoined { participant, kind, head },
        );
        debug!(participant = %participant, ?kind, "Participant joined local session");

        let replica = Arc::new(LocalReplica {
            session: self.clone(),
            participant,
        });
        (replica, receiver)
    }

    /// Disconnects a participant, dropping every authority it held.
    pub fn leave(&self, participant: ParticipantId) {
        if self.inner.peers.remove(&participant).is_none() {
            return;
        }

        for mut record in self.inner.objects.iter_mut() {
            if record.state_authority == Some(participant) {
                record.state_authority = None;
            }
            if record.control_authority == Some(participant) {
                record.control_authority = None;
            }
        }

        self.broadcast(participant, ReplicationEvent::ParticipantLeft { participant });
        debug!(participant = %participant, "Participant left local session");
    }

    /// While set, authority requests are accepted but never granted.
    pub fn withhold_authority(&self, withhold: bool) {
        self.inner.withhold_authority.store(withhold, Ordering::SeqCst);
    }

    pub fn participant_count(&self) -> usize {
        self.inner.peers.len()
    }

    fn broadcast(&self, from: ParticipantId, event: ReplicationEvent) {
        for peer in self.inner.peers.iter() {
            if *peer.key() != from {
                let _ = peer.sender.send(event.clone());
            }
        }
    }

    fn send_to(&self, to: ParticipantId, event: ReplicationEvent) -> Result<(), ReplicationError> {
        let peer = self
            .inner
            .peers
            .get(&to)
            .ok_or(ReplicationError::Disconnected(to))?;
        peer.sender
            .send(event)
            .map_err(|_| ReplicationError::Disconnected(to))
    }

    fn require_authority(
        &self,
        object: ObjectId,
        participant: ParticipantId,
    ) -> Result<(), ReplicationError> {
        let record = self
            .inner
            .objects
            .get(&object)
            .ok_or(ReplicationError::UnknownObject(object))?;
        if record.state_authority == Some(participant) {
            Ok(())
        } else {
            Err(ReplicationError::NotAuthority { object, participant })
        }
    }
}

/// One participant's view of a [`LocalSession`].
#[derive(Debug)]
pub struct LocalReplica {
    session: LocalSession,
    participant: ParticipantId,
}

impl LocalReplica {
    pub fn session(&self) -> &LocalSession {
        &self.session
    }
}

impl ReplicationRuntime for LocalReplica {
    fn local_participant(&self) -> ParticipantId {
        self.participant
    }

    fn connected_participants(&self) -> Vec<ParticipantId> {
        let mut participants: Vec<ParticipantId> =
            self.session.inner.peers.iter().map(|p| *p.key()).collect();
        participants.sort();
        participants
    }

    fn state_authority(&self, object: ObjectId) -> Option<ParticipantId> {
        self.session
            .inner
            .objects
            .get(&object)
            .and_then(|record| record.state_authority)
    }

    fn control_authority(&self, object: ObjectId) -> Option<ParticipantId> {
        self.session
            .inner
            .objects
            .get(&object)
            .and_then(|record| record.control_authority)
    }

    fn request_state_authority(&self, object: ObjectId) -> Result<(), ReplicationError> {
        let mut record = self
            .session
            .inner
            .objects
            .get_mut(&object)
            .ok_or(ReplicationError::UnknownObject(object))?;

        if self.session.inner.withhold_authority.load(Ordering::SeqCst) {
            trace!(object = %object, participant = %self.participant, "Authority request withheld");
            return Ok(());
        }

        record.state_authority = Some(self.participant);
        Ok(())
    }

    fn assign_control_authority(
        &self,
        object: ObjectId,
        participant: ParticipantId,
    ) -> Result<(), ReplicationError> {
        let mut record = self
            .session
            .inner
            .objects
            .get_mut(&object)
            .ok_or(ReplicationError::UnknownObject(object))?;

        if record.state_authority != Some(self.participant) {
            return Err(ReplicationError::NotAuthority {
                object,
                participant: self.participant,
            });
        }

        if !self.session.inner.withhold_authority.load(Ordering::SeqCst) {
            record.control_authority = Some(participant);
        }
        Ok(())
    }

    fn register_scene_object(&self, object: ObjectId) -> Result<(), ReplicationError> {
        let mut record = self.session.inner.objects.entry(object).or_default();
        if record.state_authority.is_none() {
            record.state_authority = Some(self.participant);
            record.control_authority = Some(self.participant);
        }
        Ok(())
    }

    fn spawn_zone(&self, spawn: ZoneSpawn) -> Result<ObjectId, ReplicationError> {
        let object = ObjectId(self.session.inner.next_object.fetch_add(1, Ordering::SeqCst));
        self.session.inner.objects.insert(
            object,
            ObjectRecord {
                state_authority: Some(self.participant),
                control_authority: Some(self.participant),
                spawn: Some(spawn),
                fields: Vec::new(),
            },
        );
        self.session
            .broadcast(self.participant, ReplicationEvent::ZoneSpawned { object, spawn });
        Ok(object)
    }

    fn is_spawned(&self, object: ObjectId) -> bool {
        self.session
            .inner
            .objects
            .get(&object)
            .map(|record| record.spawn.is_some())
            .unwrap_or(false)
    }

    fn despawn(&self, object: ObjectId) -> Result<(), ReplicationError> {
        self.session.require_authority(object, self.participant)?;
        self.session.inner.objects.remove(&object);
        self.session
            .broadcast(self.participant, ReplicationEvent::ZoneDespawned { object });
        Ok(())
    }

    fn set_field(&self, object: ObjectId, field: ZoneField) -> Result<(), ReplicationError> {
        self.session.require_authority(object, self.participant)?;
        if let Some(mut record) = self.session.inner.objects.get_mut(&object) {
            record.store(field.clone());
        }
        self.session
            .broadcast(self.participant, ReplicationEvent::FieldChanged { object, field });
        Ok(())
    }

    fn invoke_remote(&self, object: ObjectId, command: ZoneCommand) -> Result<(), ReplicationError> {
        let holder = self
            .state_authority(object)
            .ok_or(ReplicationError::NoAuthorityHolder(object))?;
        self.session.send_to(
            holder,
            ReplicationEvent::Command {
                object,
                from: self.participant,
                command,
            },
        )
    }

    fn publish_head(&self, head: Vec3) -> Result<(), ReplicationError> {
        {
            let mut peer = self
                .session
                .inner
                .peers
                .get_mut(&self.participant)
                .ok_or(ReplicationError::Disconnected(self.participant))?;
            peer.head = head;
        }
        self.session.broadcast(
            self.participant,
            ReplicationEvent::Moved {
                participant: self.participant,
                head,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<ReplicationEvent>) -> Vec<ReplicationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_join_is_broadcast_without_echo() {
        let session = LocalSession::new();
        let (_a, mut rx_a) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (_b, mut rx_b) = session.join(ParticipantId(2), ParticipantKind::Bot, Vec3::zero());

        let a_events = drain(&mut rx_a);
        assert_eq!(a_events.len(), 1);
        assert!(matches!(
            a_events[0],
            ReplicationEvent::ParticipantJoined { participant: ParticipantId(2), kind: ParticipantKind::Bot, .. }
        ));

        // B sees A through the join replay only.
        let b_events = drain(&mut rx_b);
        assert_eq!(b_events.len(), 1);
        assert_eq!(session.participant_count(), 2);
    }

    #[test]
    fn test_first_registrant_owns_scene_object() {
        let session = LocalSession::new();
        let (a, _rx_a) = session.join(ParticipantId(5), ParticipantKind::User, Vec3::zero());
        let (b, _rx_b) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());

        a.register_scene_object(ObjectId(1)).unwrap();
        b.register_scene_object(ObjectId(1)).unwrap();

        assert_eq!(b.state_authority(ObjectId(1)), Some(ParticipantId(5)));
        assert_eq!(b.control_authority(ObjectId(1)), Some(ParticipantId(5)));
        assert!(matches!(
            b.set_field(ObjectId(1), ZoneField::Visible(true)),
            Err(ReplicationError::NotAuthority { .. })
        ));
    }

    #[test]
    fn test_leave_clears_authority() {
        let session = LocalSession::new();
        let (a, _rx_a) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (b, mut rx_b) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());
        a.register_scene_object(ObjectId(1)).unwrap();
        drain(&mut rx_b);

        session.leave(ParticipantId(1));

        assert_eq!(b.state_authority(ObjectId(1)), None);
        assert_eq!(b.connected_participants(), vec![ParticipantId(2)]);
        assert_eq!(
            drain(&mut rx_b),
            vec![ReplicationEvent::ParticipantLeft { participant: ParticipantId(1) }]
        );
    }

    #[test]
    fn test_commands_reach_only_the_authority() {
        let session = LocalSession::new();
        let (a, mut rx_a) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (b, _rx_b) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());
        let (_c, mut rx_c) = session.join(ParticipantId(3), ParticipantKind::User, Vec3::zero());
        a.register_scene_object(ObjectId(1)).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_c);

        b.invoke_remote(ObjectId(1), ZoneCommand::ChangeLock { locked: true })
            .unwrap();

        assert_eq!(
            drain(&mut rx_a),
            vec![ReplicationEvent::Command {
                object: ObjectId(1),
                from: ParticipantId(2),
                command: ZoneCommand::ChangeLock { locked: true },
            }]
        );
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_late_join_replays_latest_fields() {
        let session = LocalSession::new();
        let (a, _rx_a) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let spawn = ZoneSpawn { channel: 12, center: Vec3::new(1.0, 0.0, 1.0) };
        let object = a.spawn_zone(spawn).unwrap();
        assert!(object.0 >= SPAWNED_OBJECT_ID_BASE);
        a.set_field(object, ZoneField::InUse(true)).unwrap();
        a.set_field(object, ZoneField::Visible(true)).unwrap();
        a.set_field(object, ZoneField::InUse(false)).unwrap();

        let (_b, mut rx_b) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());
        let events = drain(&mut rx_b);

        assert_eq!(
            events,
            vec![
                ReplicationEvent::ParticipantJoined {
                    participant: ParticipantId(1),
                    kind: ParticipantKind::User,
                    head: Vec3::zero(),
                },
                ReplicationEvent::ZoneSpawned { object, spawn },
                ReplicationEvent::FieldChanged { object, field: ZoneField::InUse(false) },
                ReplicationEvent::FieldChanged { object, field: ZoneField::Visible(true) },
            ]
        );
    }

    #[test]
    fn test_withheld_authority_is_never_granted() {
        let session = LocalSession::new();
        let (a, _rx_a) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (b, _rx_b) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());
        a.register_scene_object(ObjectId(1)).unwrap();
        session.leave(ParticipantId(1));

        session.withhold_authority(true);
        b.request_state_authority(ObjectId(1)).unwrap();
        assert_eq!(b.state_authority(ObjectId(1)), None);

        session.withhold_authority(false);
        b.request_state_authority(ObjectId(1)).unwrap();
        assert!(b.has_state_authority(ObjectId(1)));
    }
}
