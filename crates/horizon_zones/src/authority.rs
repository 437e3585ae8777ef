//! # Authority Arbitration
//!
//! Exactly one live participant must be able to write a zone's replicated
//! fields. When the previous owner disconnects, every remaining replica computes
//! the minimum connected [`ParticipantId`] and only that participant asks for
//! authority. There is no voting round: the outcome is a pure function of the
//! connected set, which every replica observes.
//!
//! Acquisition happens in two steps (state authority, then control authority
//! bound to the local participant) polled against a single deadline. A timeout
//! at either step fails the whole request. Callers do not retry in place.

use crate::error::ZoneError;
use crate::replication::ReplicationRuntime;
use crate::types::{ObjectId, ParticipantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Result of [`AuthorityArbitrator::ensure_attributed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityClaim {
    /// Someone already holds state authority.
    Held(ParticipantId),
    /// The local participant was elected and acquired authority.
    Claimed,
    /// Another participant is elected; nothing to do locally.
    Deferred,
}

/// Deterministic single-owner election for replicated objects.
pub struct AuthorityArbitrator {
    runtime: Arc<dyn ReplicationRuntime>,
    timeout: Duration,
    poll_interval: Duration,
}

impl AuthorityArbitrator {
    pub fn new(runtime: Arc<dyn ReplicationRuntime>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            runtime,
            timeout,
            poll_interval,
        }
    }

    /// Picks the minimum id among `candidates`.
    pub fn elect(candidates: impl IntoIterator<Item = ParticipantId>) -> Option<ParticipantId> {
        candidates.into_iter().min()
    }

    /// True when the local participant has the lowest connected id.
    pub fn is_elected(&self) -> bool {
        Self::elect(self.runtime.connected_participants()) == Some(self.runtime.local_participant())
    }

    /// Acquires state authority, then control authority, over `object`.
    ///
    /// Both steps share one deadline of `timeout` from the call.
    pub async fn request_all_authority(&self, object: ObjectId) -> Result<(), ZoneError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let local = self.runtime.local_participant();

        if !self.runtime.has_state_authority(object) {
            self.runtime.request_state_authority(object)?;
            while !self.runtime.has_state_authority(object) {
                if Instant::now() >= deadline {
                    warn!(object = %object, "State authority not granted before deadline");
                    return Err(ZoneError::AuthorityTimeout {
                        object,
                        waited: started.elapsed(),
                    });
                }
                sleep(self.poll_interval).await;
            }
        }

        if self.runtime.control_authority(object) != Some(local) {
            self.runtime.assign_control_authority(object, local)?;
            while self.runtime.control_authority(object) != Some(local) {
                if Instant::now() >= deadline {
                    warn!(object = %object, "Control authority not granted before deadline");
                    return Err(ZoneError::AuthorityTimeout {
                        object,
                        waited: started.elapsed(),
                    });
                }
                sleep(self.poll_interval).await;
            }
        }

        debug!(object = %object, participant = %local, "Holding full authority");
        Ok(())
    }

    /// Makes sure someone owns `object` after a disconnect.
    ///
    /// Only the elected participant requests authority; everyone else defers.
    pub async fn ensure_attributed(&self, object: ObjectId) -> Result<AuthorityClaim, ZoneError> {
        if let Some(holder) = self.runtime.state_authority(object) {
            return Ok(AuthorityClaim::Held(holder));
        }

        if !self.is_elected() {
            return Ok(AuthorityClaim::Deferred);
        }

        self.request_all_authority(object).await?;
        info!(object = %object, participant = %self.runtime.local_participant(), "👑 Reclaimed orphaned object");
        Ok(AuthorityClaim::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::LocalSession;
    use crate::types::{ParticipantKind, Vec3};

    fn arbitrator_for(runtime: Arc<dyn ReplicationRuntime>, timeout_ms: u64) -> AuthorityArbitrator {
        AuthorityArbitrator::new(runtime, Duration::from_millis(timeout_ms), Duration::from_millis(10))
    }

    #[test]
    fn test_elect_picks_minimum() {
        let elected = AuthorityArbitrator::elect([ParticipantId(7), ParticipantId(3), ParticipantId(9)]);
        assert_eq!(elected, Some(ParticipantId(3)));
        assert_eq!(AuthorityArbitrator::elect(Vec::new()), None);
    }

    #[tokio::test]
    async fn test_only_minimum_claims_orphan() {
        let session = LocalSession::new();
        let (owner, _rx1) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (low, _rx3) = session.join(ParticipantId(3), ParticipantKind::User, Vec3::zero());
        let (high, _rx7) = session.join(ParticipantId(7), ParticipantKind::User, Vec3::zero());
        owner.register_scene_object(ObjectId(1)).unwrap();
        session.leave(ParticipantId(1));

        let high_arb = arbitrator_for(high.clone(), 8000);
        assert_eq!(
            high_arb.ensure_attributed(ObjectId(1)).await.unwrap(),
            AuthorityClaim::Deferred
        );
        assert_eq!(high.state_authority(ObjectId(1)), None);

        let low_arb = arbitrator_for(low.clone(), 8000);
        assert_eq!(
            low_arb.ensure_attributed(ObjectId(1)).await.unwrap(),
            AuthorityClaim::Claimed
        );
        assert_eq!(low.state_authority(ObjectId(1)), Some(ParticipantId(3)));
        assert_eq!(low.control_authority(ObjectId(1)), Some(ParticipantId(3)));

        assert_eq!(
            high_arb.ensure_attributed(ObjectId(1)).await.unwrap(),
            AuthorityClaim::Held(ParticipantId(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_when_withheld() {
        let session = LocalSession::new();
        let (owner, _rx1) = session.join(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let (other, _rx2) = session.join(ParticipantId(2), ParticipantKind::User, Vec3::zero());
        owner.register_scene_object(ObjectId(4)).unwrap();
        session.leave(ParticipantId(1));
        session.withhold_authority(true);

        let arbitrator = arbitrator_for(other.clone(), 8000);
        let started = Instant::now();
        let result = arbitrator.request_all_authority(ObjectId(4)).await;

        match result {
            Err(ZoneError::AuthorityTimeout { object, waited }) => {
                assert_eq!(object, ObjectId(4));
                assert!(waited >= Duration::from_secs(8));
            }
            unexpected => panic!("expected timeout, got {unexpected:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert_eq!(other.state_authority(ObjectId(4)), None);
    }
}
