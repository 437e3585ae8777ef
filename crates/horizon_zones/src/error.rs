//! Error and outcome types for zone operations.
//!
//! Two families are kept apart: [`ZoneError`] covers genuine failures (a timed out
//! authority request, an unknown zone, a runtime refusal), while
//! [`ZoneOutcome`] reports what happened to a policy-checked request. A full or
//! locked zone is a [`ZoneOutcome::Rejected`], never an error.

use crate::replication::ReplicationError;
use crate::types::{ObjectId, ParticipantId, ZoneId};
use serde::Serialize;
use std::time::Duration;

/// Failures raised by the zone system.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("Unknown zone: {0}")]
    UnknownZone(ZoneId),
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),
    #[error("Authority over {object} not granted within {waited:?}")]
    AuthorityTimeout { object: ObjectId, waited: Duration },
    #[error("No dynamic zone channel id available")]
    NoChannelAvailable,
    #[error("Spawn of {0} was not acknowledged in time")]
    SpawnTimeout(ObjectId),
    #[error("Local participant does not hold authority over {0}")]
    NotAuthority(ObjectId),
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),
}

/// Why a membership or lock request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The zone already holds `max_capacity` members.
    Full,
    /// The zone is force-locked against newcomers.
    Locked,
    /// Locking an empty zone while empty-zone locking is disabled.
    EmptyZoneLock,
    /// Only members may toggle the lock.
    NotAMember,
}

/// Result of a policy-checked zone request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneOutcome {
    /// State was mutated and replicated.
    Applied,
    /// The request matched the current state; nothing was written.
    Unchanged,
    /// The local participant is not the authority; the request was sent to it.
    Forwarded,
    /// The request violated zone policy; state is untouched.
    Rejected(RejectReason),
}

impl ZoneOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ZoneOutcome::Applied)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ZoneOutcome::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ZoneError::UnknownZone(ObjectId(5));
        assert_eq!(err.to_string(), "Unknown zone: object-5");

        let err = ZoneError::AuthorityTimeout {
            object: ObjectId(1),
            waited: Duration::from_secs(8),
        };
        assert!(err.to_string().contains("8s"));
    }

    #[test]
    fn test_replication_error_converts() {
        let err: ZoneError = ReplicationError::UnknownObject(ObjectId(3)).into();
        assert!(matches!(err, ZoneError::Replication(_)));
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(ZoneOutcome::Applied.is_applied());
        assert!(ZoneOutcome::Rejected(RejectReason::Full).is_rejected());
        assert!(!ZoneOutcome::Forwarded.is_rejected());
    }
}
