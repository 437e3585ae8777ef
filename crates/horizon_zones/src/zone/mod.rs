//! # Zone Membership
//!
//! A [`Zone`] is a bounded region with a capacity, a lock, a visibility flag and
//! an ordered membership set. The membership, lock, visibility, center and (for
//! pooled zones) in-use flag are replicated fields: only the replica holding
//! state authority over the zone writes them, every other replica applies the
//! values it receives and runs the same change reactions.
//!
//! The operations that mutate zones (`enter`, `exit`, `set_lock`, ...) live on
//! [`ZoneSystem`](crate::ZoneSystem) in `membership.rs` because reacting to a
//! change touches participants, the registry and the pool as well.
//!
//! ## State machine
//!
//! ```text
//! Unregistered -> Registered/Open <-> Registered/Locked
//! ```
//!
//! The lock can never be raised on an empty zone unless the zone allows it, and
//! an empty zone that is still locked is unlocked by its authority on the next
//! status check.

pub mod listener;
pub mod membership;
pub mod shape;

pub use listener::{VisibilityTransition, ZoneListener};
pub use shape::{Aabb, BoundsQuery, ShapeSpec, ZoneShape};

use crate::config::DynamicZoneTemplate;
use crate::error::{RejectReason, ZoneError};
use crate::replication::{AuthorityGuard, FieldChange, Replicated, ZoneField, ZoneSpawn};
use crate::types::{ObjectId, ParticipantId, Vec3, ZoneId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

fn default_capacity() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Configuration-side description of a fixed zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    /// Scene object id, shared by every replica
    pub id: u64,
    pub name: String,
    pub shape: ShapeSpec,
    pub center: Vec3,
    #[serde(default = "Vec3::unit_y")]
    pub up: Vec3,
    #[serde(default = "default_capacity")]
    pub max_capacity: usize,
    #[serde(default)]
    pub allow_empty_zone_locking: bool,
    /// Interest group members of this zone talk on
    #[serde(default)]
    pub channel: Option<u8>,
    #[serde(default = "default_true")]
    pub register_automatically: bool,
}

/// Pool bookkeeping carried by dynamic zones.
#[derive(Debug, Clone)]
pub struct DynamicState {
    pub(crate) in_use: Replicated<bool>,
    pub(crate) under_occupied_since: Option<Instant>,
}

/// Immutable view of a zone handed to listeners and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub id: ZoneId,
    pub name: String,
    pub channel: Option<u8>,
    pub center: Vec3,
    pub members: Vec<ParticipantId>,
    pub max_capacity: usize,
    pub force_locked: bool,
    pub visible: bool,
    pub registered: bool,
    /// `Some(in_use)` for pooled zones
    pub in_use: Option<bool>,
}

impl ZoneSnapshot {
    #[cfg(test)]
    pub(crate) fn empty(id: ZoneId) -> Self {
        Self {
            id,
            name: String::new(),
            channel: None,
            center: Vec3::zero(),
            members: Vec::new(),
            max_capacity: 0,
            force_locked: false,
            visible: true,
            registered: false,
            in_use: None,
        }
    }
}

/// A zone and its replicated state.
pub struct Zone {
    id: ZoneId,
    name: String,
    shape: ZoneShape,
    up: Vec3,
    max_capacity: usize,
    allow_empty_zone_locking: bool,
    channel: Option<u8>,
    center: Replicated<Vec3>,
    members: Replicated<Vec<ParticipantId>>,
    force_locked: Replicated<bool>,
    visible: Replicated<bool>,
    pub(crate) registered: bool,
    pub(crate) dynamic: Option<DynamicState>,
    listeners: Vec<Arc<dyn ZoneListener>>,
}

impl Zone {
    pub fn from_descriptor(descriptor: &ZoneDescriptor) -> Self {
        Self {
            id: ObjectId(descriptor.id),
            name: descriptor.name.clone(),
            shape: descriptor.shape.build(descriptor.center),
            up: descriptor.up,
            max_capacity: descriptor.max_capacity,
            allow_empty_zone_locking: descriptor.allow_empty_zone_locking,
            channel: descriptor.channel,
            center: Replicated::new(descriptor.center),
            members: Replicated::new(Vec::new()),
            force_locked: Replicated::new(false),
            visible: Replicated::new(true),
            registered: false,
            dynamic: None,
            listeners: Vec::new(),
        }
    }

    /// A pooled zone as spawned: hidden, not in use.
    pub fn dynamic(id: ZoneId, spawn: &ZoneSpawn, template: &DynamicZoneTemplate) -> Self {
        Self {
            id,
            name: format!("dynamic-{}", spawn.channel),
            shape: template.shape.build(spawn.center),
            up: template.up,
            max_capacity: template.max_capacity,
            allow_empty_zone_locking: template.allow_empty_zone_locking,
            channel: Some(spawn.channel),
            center: Replicated::new(spawn.center),
            members: Replicated::new(Vec::new()),
            force_locked: Replicated::new(false),
            visible: Replicated::new(false),
            registered: false,
            dynamic: Some(DynamicState {
                in_use: Replicated::new(false),
                under_occupied_since: None,
            }),
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn center(&self) -> Vec3 {
        *self.center.get()
    }

    pub fn members(&self) -> &[ParticipantId] {
        self.members.get()
    }

    pub fn is_member(&self, participant: ParticipantId) -> bool {
        self.members.get().contains(&participant)
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn allow_empty_zone_locking(&self) -> bool {
        self.allow_empty_zone_locking
    }

    pub fn is_force_locked(&self) -> bool {
        *self.force_locked.get()
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.get()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    pub fn in_use(&self) -> Option<bool> {
        self.dynamic.as_ref().map(|state| *state.in_use.get())
    }

    /// Why `participant` would be turned away, or `None` if it may enter.
    pub fn admission(&self, participant: ParticipantId) -> Option<RejectReason> {
        if self.is_member(participant) {
            None
        } else if self.is_force_locked() {
            Some(RejectReason::Locked)
        } else if self.members.get().len() >= self.max_capacity {
            Some(RejectReason::Full)
        } else {
            None
        }
    }

    pub fn can_accept(&self, participant: ParticipantId) -> bool {
        self.admission(participant).is_none()
    }

    pub fn contains_head(&self, head: Vec3) -> bool {
        self.shape.contains(*self.center.get(), self.up, head)
    }

    /// Adds a listener. Returns `false` if it was already registered.
    pub fn add_listener(&mut self, listener: Arc<dyn ZoneListener>) -> bool {
        if self.listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn ZoneListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        self.listeners.len() != before
    }

    pub fn listeners(&self) -> &[Arc<dyn ZoneListener>] {
        &self.listeners
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            id: self.id,
            name: self.name.clone(),
            channel: self.channel,
            center: *self.center.get(),
            members: self.members.get().clone(),
            max_capacity: self.max_capacity,
            force_locked: self.is_force_locked(),
            visible: self.is_visible(),
            registered: self.registered,
            in_use: self.in_use(),
        }
    }

    /// Writes a field as the authority.
    pub(crate) fn write(
        &mut self,
        field: ZoneField,
        guard: &AuthorityGuard,
    ) -> Result<Option<FieldChange<ZoneField>>, ZoneError> {
        if guard.object() != self.id {
            return Err(ZoneError::NotAuthority(self.id));
        }
        let change = match field {
            ZoneField::Members(members) => self.members.set(members, guard).map(|c| c.map(ZoneField::Members)),
            ZoneField::ForceLocked(locked) => self
                .force_locked
                .set(locked, guard)
                .map(|c| c.map(ZoneField::ForceLocked)),
            ZoneField::Visible(visible) => self.visible.set(visible, guard).map(|c| c.map(ZoneField::Visible)),
            ZoneField::Center(center) => self.center.set(center, guard).map(|c| c.map(ZoneField::Center)),
            ZoneField::InUse(in_use) => self
                .dynamic
                .as_mut()
                .and_then(|state| state.in_use.set(in_use, guard))
                .map(|c| c.map(ZoneField::InUse)),
        };
        Ok(change)
    }

    /// Applies a field value received from the authority.
    pub(crate) fn apply_remote(&mut self, field: ZoneField) -> Option<FieldChange<ZoneField>> {
        match field {
            ZoneField::Members(members) => self.members.apply_remote(members).map(|c| c.map(ZoneField::Members)),
            ZoneField::ForceLocked(locked) => self
                .force_locked
                .apply_remote(locked)
                .map(|c| c.map(ZoneField::ForceLocked)),
            ZoneField::Visible(visible) => self.visible.apply_remote(visible).map(|c| c.map(ZoneField::Visible)),
            ZoneField::Center(center) => self.center.apply_remote(center).map(|c| c.map(ZoneField::Center)),
            ZoneField::InUse(in_use) => self
                .dynamic
                .as_mut()
                .and_then(|state| state.in_use.apply_remote(in_use))
                .map(|c| c.map(ZoneField::InUse)),
        }
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("members", self.members.get())
            .field("force_locked", self.force_locked.get())
            .field("visible", self.visible.get())
            .field("registered", &self.registered)
            .field("in_use", &self.in_use())
            .finish()
    }
}
