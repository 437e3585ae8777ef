//! # Replication Boundary
//!
//! The zone system does not own transport, object spawning or authority
//! transfer. It talks to a [`ReplicationRuntime`] for all of those and consumes
//! the [`ReplicationEvent`] stream the runtime delivers to each replica.
//!
//! ## Authority-gated fields
//!
//! Zone state that other replicas observe lives in [`Replicated`] cells. Reading
//! is free; writing requires an [`AuthorityGuard`], which can only be obtained
//! while the local participant holds state authority over the object. Every
//! accepted write or remote apply yields a [`FieldChange`] carrying the old and
//! new value so the caller can dispatch its change reaction explicitly.
//!
//! ```rust
//! use horizon_zones::replication::Replicated;
//!
//! let mut locked = Replicated::new(false);
//! let change = locked.apply_remote(true).unwrap();
//! assert_eq!((change.old, change.new), (false, true));
//! assert!(locked.apply_remote(true).is_none());
//! ```

pub mod local;

pub use local::{LocalReplica, LocalSession, SPAWNED_OBJECT_ID_BASE};

use crate::types::{ObjectId, ParticipantId, ParticipantKind, Vec3};
use serde::{Deserialize, Serialize};

/// A replicated zone field together with its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ZoneField {
    Members(Vec<ParticipantId>),
    ForceLocked(bool),
    Visible(bool),
    InUse(bool),
    Center(Vec3),
}

/// Requests a non-authoritative replica sends to a zone's current authority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ZoneCommand {
    ChangePresence { participant: ParticipantId, present: bool },
    ChangeLock { locked: bool },
}

/// Initial state of a spawned dynamic zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpawn {
    pub channel: u8,
    pub center: Vec3,
}

/// Events the runtime delivers to a replica, in per-object order.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    ParticipantJoined {
        participant: ParticipantId,
        kind: ParticipantKind,
        head: Vec3,
    },
    Moved {
        participant: ParticipantId,
        head: Vec3,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },
    ZoneSpawned {
        object: ObjectId,
        spawn: ZoneSpawn,
    },
    ZoneDespawned {
        object: ObjectId,
    },
    FieldChanged {
        object: ObjectId,
        field: ZoneField,
    },
    Command {
        object: ObjectId,
        from: ParticipantId,
        command: ZoneCommand,
    },
}

/// Failures reported by the replication runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
    #[error("No participant holds authority over {0}")]
    NoAuthorityHolder(ObjectId),
    #[error("{participant} does not hold authority over {object}")]
    NotAuthority {
        object: ObjectId,
        participant: ParticipantId,
    },
    #[error("Participant disconnected: {0}")]
    Disconnected(ParticipantId),
}

/// Operations the zone system needs from the replication runtime.
///
/// Every call is non-blocking. Authority requests and spawns complete
/// asynchronously; callers observe completion by polling
/// [`state_authority`](Self::state_authority), [`control_authority`](Self::control_authority)
/// and [`is_spawned`](Self::is_spawned).
pub trait ReplicationRuntime: Send + Sync {
    fn local_participant(&self) -> ParticipantId;

    /// Currently connected participants, including the local one.
    fn connected_participants(&self) -> Vec<ParticipantId>;

    fn state_authority(&self, object: ObjectId) -> Option<ParticipantId>;

    fn control_authority(&self, object: ObjectId) -> Option<ParticipantId>;

    fn request_state_authority(&self, object: ObjectId) -> Result<(), ReplicationError>;

    /// Binds control authority to `participant`. Only the state authority may do this.
    fn assign_control_authority(
        &self,
        object: ObjectId,
        participant: ParticipantId,
    ) -> Result<(), ReplicationError>;

    /// Declares a scene object every replica knows about up front.
    fn register_scene_object(&self, object: ObjectId) -> Result<(), ReplicationError>;

    fn spawn_zone(&self, spawn: ZoneSpawn) -> Result<ObjectId, ReplicationError>;

    fn is_spawned(&self, object: ObjectId) -> bool;

    fn despawn(&self, object: ObjectId) -> Result<(), ReplicationError>;

    /// Publishes a field value. Valid only while holding state authority.
    fn set_field(&self, object: ObjectId, field: ZoneField) -> Result<(), ReplicationError>;

    /// Delivers `command` to whichever participant holds authority over `object`.
    fn invoke_remote(&self, object: ObjectId, command: ZoneCommand) -> Result<(), ReplicationError>;

    fn publish_head(&self, head: Vec3) -> Result<(), ReplicationError>;

    fn has_state_authority(&self, object: ObjectId) -> bool {
        self.state_authority(object) == Some(self.local_participant())
    }
}

/// Proof that the local participant held state authority over an object.
#[derive(Debug)]
pub struct AuthorityGuard {
    object: ObjectId,
}

impl AuthorityGuard {
    pub fn acquire(runtime: &dyn ReplicationRuntime, object: ObjectId) -> Option<Self> {
        runtime
            .has_state_authority(object)
            .then_some(Self { object })
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }
}

/// Old and new value of a replicated field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange<T> {
    pub old: T,
    pub new: T,
}

impl<T> FieldChange<T> {
    pub fn map<U>(self, f: impl Fn(T) -> U) -> FieldChange<U> {
        FieldChange {
            old: f(self.old),
            new: f(self.new),
        }
    }
}

/// A value whose local writes are gated on holding authority.
#[derive(Debug, Clone)]
pub struct Replicated<T> {
    value: T,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Writes a new value as the authority. Returns `None` when nothing changed.
    pub fn set(&mut self, value: T, _guard: &AuthorityGuard) -> Option<FieldChange<T>> {
        self.replace(value)
    }

    /// Applies a value received from the authority.
    pub fn apply_remote(&mut self, value: T) -> Option<FieldChange<T>> {
        self.replace(value)
    }

    fn replace(&mut self, value: T) -> Option<FieldChange<T>> {
        if self.value == value {
            return None;
        }
        let old = std::mem::replace(&mut self.value, value);
        Some(FieldChange {
            old,
            new: self.value.clone(),
        })
    }
}
