//! Core ZoneSystem implementation
use crate::audio::InterestGroupSwitcher;
use crate::authority::AuthorityArbitrator;
use crate::config::ZoneSystemConfig;
use crate::dynamic::{DynamicZonePool, ProximityPairing};
use crate::error::ZoneError;
use crate::registry::{RegistryListener, ZoneRegistry};
use crate::replication::{AuthorityGuard, ReplicationRuntime};
use crate::types::{ParticipantId, ParticipantKind, Vec3, ZoneId};
use crate::user::{ZoneUser, ZoneUserListener};
use crate::zone::{VisibilityTransition, Zone, ZoneDescriptor, ZoneListener, ZoneSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One replica's view of every zone, participant and pooled zone.
///
/// A `ZoneSystem` is driven by its owner: replication events go through
/// [`handle_event`](Self::handle_event), local movement through
/// [`move_local`](Self::move_local) and the fixed-step simulation through
/// [`tick`](Self::tick). Only `tick` and `handle_event` suspend, and only while
/// waiting for authority or a spawn acknowledgement.
pub struct ZoneSystem {
    pub(crate) config: ZoneSystemConfig,
    pub(crate) runtime: Arc<dyn ReplicationRuntime>,
    pub(crate) arbitrator: AuthorityArbitrator,
    pub(crate) local: ParticipantId,
    pub(crate) zones: HashMap<ZoneId, Zone>,
    pub(crate) registry: ZoneRegistry,
    pub(crate) users: HashMap<ParticipantId, ZoneUser>,
    pub(crate) pool: DynamicZonePool,
    pub(crate) pairing: ProximityPairing,
    /// Attached to every zone, present and future
    pub(crate) zone_listeners: Vec<Arc<dyn ZoneListener>>,
    pub(crate) user_listeners: Vec<Arc<dyn ZoneUserListener>>,
    pub(crate) pending_visibility: VecDeque<VisibilityTransition>,
}

impl std::fmt::Debug for ZoneSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneSystem")
            .field("local", &self.local)
            .field("zones", &self.zones.len())
            .field("registered", &self.registry.len())
            .field("participants", &self.users.len())
            .field("pool", &self.pool)
            .finish()
    }
}

impl ZoneSystem {
    /// Creates the zone system for the runtime's local participant.
    pub fn new(
        config: ZoneSystemConfig,
        runtime: Arc<dyn ReplicationRuntime>,
        kind: ParticipantKind,
        head: Vec3,
    ) -> Self {
        let local = runtime.local_participant();
        let arbitrator = AuthorityArbitrator::new(
            runtime.clone(),
            config.authority_timeout(),
            config.authority_poll_interval(),
        );

        let mut system = Self {
            config,
            runtime,
            arbitrator,
            local,
            zones: HashMap::new(),
            registry: ZoneRegistry::new(),
            users: HashMap::new(),
            pool: DynamicZonePool::new(),
            pairing: ProximityPairing::default(),
            zone_listeners: Vec::new(),
            user_listeners: Vec::new(),
            pending_visibility: VecDeque::new(),
        };
        system.add_participant(local, kind, head);
        system
    }

    pub fn local_participant(&self) -> ParticipantId {
        self.local
    }

    pub fn config(&self) -> &ZoneSystemConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ReplicationRuntime> {
        &self.runtime
    }

    pub fn arbitrator(&self) -> &AuthorityArbitrator {
        &self.arbitrator
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &DynamicZonePool {
        &self.pool
    }

    pub fn user(&self, participant: ParticipantId) -> Option<&ZoneUser> {
        self.users.get(&participant)
    }

    pub fn participants(&self) -> impl Iterator<Item = &ZoneUser> {
        self.users.values()
    }

    /// Snapshots of every known zone, ordered by id.
    pub fn snapshots(&self) -> Vec<ZoneSnapshot> {
        let mut snapshots: Vec<ZoneSnapshot> = self.zones.values().map(Zone::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    pub(crate) fn zone_ref(&self, id: ZoneId) -> Result<&Zone, ZoneError> {
        self.zones.get(&id).ok_or(ZoneError::UnknownZone(id))
    }

    pub(crate) fn zone_mut(&mut self, id: ZoneId) -> Result<&mut Zone, ZoneError> {
        self.zones.get_mut(&id).ok_or(ZoneError::UnknownZone(id))
    }

    pub fn has_authority(&self, zone: ZoneId) -> bool {
        self.runtime.has_state_authority(zone)
    }

    pub(crate) fn guard(&self, zone: ZoneId) -> Option<AuthorityGuard> {
        AuthorityGuard::acquire(self.runtime.as_ref(), zone)
    }

    /// Declares a fixed scene zone and registers it if the descriptor says so.
    pub fn add_fixed_zone(&mut self, descriptor: &ZoneDescriptor) -> Result<ZoneId, ZoneError> {
        let mut zone = Zone::from_descriptor(descriptor);
        let id = zone.id();
        self.runtime.register_scene_object(id)?;

        for listener in &self.zone_listeners {
            zone.add_listener(listener.clone());
        }
        self.insert_zone(zone);
        info!(zone = %id, name = %descriptor.name, "📍 Fixed zone added");

        if descriptor.register_automatically {
            self.register_zone(id);
        }
        Ok(id)
    }

    pub(crate) fn insert_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.id(), zone);
    }

    /// Adds a listener to one zone.
    pub fn add_zone_listener(&mut self, zone: ZoneId, listener: Arc<dyn ZoneListener>) -> Result<bool, ZoneError> {
        Ok(self.zone_mut(zone)?.add_listener(listener))
    }

    pub fn remove_zone_listener(&mut self, zone: ZoneId, listener: &Arc<dyn ZoneListener>) -> Result<bool, ZoneError> {
        Ok(self.zone_mut(zone)?.remove_listener(listener))
    }

    /// Adds a listener to every current zone and every zone created later.
    pub fn add_global_zone_listener(&mut self, listener: Arc<dyn ZoneListener>) {
        if self.zone_listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return;
        }
        for zone in self.zones.values_mut() {
            zone.add_listener(listener.clone());
        }
        self.zone_listeners.push(listener);
    }

    pub fn add_user_listener(&mut self, listener: Arc<dyn ZoneUserListener>) -> bool {
        if self.user_listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        self.user_listeners.push(listener);
        true
    }

    pub fn remove_user_listener(&mut self, listener: &Arc<dyn ZoneUserListener>) -> bool {
        let before = self.user_listeners.len();
        self.user_listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != self.user_listeners.len()
    }

    pub fn add_registry_listener(&mut self, listener: Arc<dyn RegistryListener>) -> bool {
        self.registry.add_listener(listener)
    }

    /// Routes the local participant's audio by zone channel.
    pub fn attach_interest_switcher(&mut self, switcher: Arc<InterestGroupSwitcher>) -> bool {
        self.add_user_listener(switcher)
    }

    pub(crate) fn notify_listeners(&self, zone: ZoneId, notify: impl Fn(&dyn ZoneListener, &ZoneSnapshot)) {
        let Some(zone) = self.zones.get(&zone) else {
            return;
        };
        if zone.listeners().is_empty() {
            return;
        }
        let snapshot = zone.snapshot();
        for listener in zone.listeners() {
            notify(listener.as_ref(), &snapshot);
        }
    }

    /// Tracks a participant. Real users become pairing sources.
    pub fn add_participant(&mut self, participant: ParticipantId, kind: ParticipantKind, head: Vec3) {
        if self.users.contains_key(&participant) {
            return;
        }
        self.users.insert(participant, ZoneUser::new(participant, kind, head));
        if !kind.is_bot() {
            self.pool.register_source(participant);
        }
        debug!(local = %self.local, participant = %participant, ?kind, "Participant tracked");
    }

    /// Forgets a participant. Membership cleanup happens in
    /// [`on_participant_left`](Self::on_participant_left).
    pub fn remove_participant(&mut self, participant: ParticipantId) -> Option<ZoneUser> {
        self.pool.unregister_source(participant);
        if self.pairing.partner() == Some(participant) {
            self.pairing.reset();
        }
        self.users.remove(&participant)
    }

    /// Publishes the local head position and re-resolves local membership.
    pub fn move_local(&mut self, head: Vec3) -> Result<Option<ZoneId>, ZoneError> {
        if let Some(user) = self.users.get_mut(&self.local) {
            user.head = head;
        }
        self.runtime.publish_head(head)?;
        self.resolve_membership(self.local)
    }

    /// Pending visibility transitions, oldest first.
    pub fn take_visibility_transitions(&mut self) -> Vec<VisibilityTransition> {
        self.pending_visibility.drain(..).collect()
    }

    /// Runs every pending visibility transition to completion, one at a time.
    pub async fn run_visibility_transitions(&mut self) {
        for transition in self.take_visibility_transitions() {
            transition.run().await;
        }
    }

    /// Drops a zone entirely, notifying its listeners.
    pub fn remove_zone(&mut self, id: ZoneId) -> Option<ZoneSnapshot> {
        self.unregister_zone(id);
        self.pool.forget(id);
        let zone = self.zones.remove(&id)?;
        let snapshot = zone.snapshot();
        for listener in zone.listeners() {
            listener.on_zone_destroyed(&snapshot);
        }
        for user in self.users.values_mut() {
            if user.current_zone == Some(id) {
                user.current_zone = None;
            }
        }
        debug!(zone = %id, "Zone removed");
        Some(snapshot)
    }

    /// Removes every zone, despawning the pooled ones this replica owns.
    pub fn teardown(&mut self) {
        let mut ids: Vec<ZoneId> = self.zones.keys().copied().collect();
        ids.sort();
        for id in ids {
            let owned_dynamic = self.zones.get(&id).map(Zone::is_dynamic).unwrap_or(false) && self.has_authority(id);
            if owned_dynamic {
                if let Err(e) = self.runtime.despawn(id) {
                    warn!(zone = %id, error = %e, "Failed to despawn pooled zone");
                }
            }
            self.remove_zone(id);
        }
        info!(local = %self.local, "🧹 Zone system torn down");
    }
}
