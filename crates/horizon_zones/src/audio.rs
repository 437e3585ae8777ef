//! Audio interest-group switching.
//!
//! Voice routing itself lives elsewhere. This module only decides which
//! numbered broadcast group the local participant listens to: its home group
//! while un-zoned, the zone's channel while inside a zone that has one.

use crate::types::ParticipantId;
use crate::user::ZoneUserListener;
use crate::zone::ZoneSnapshot;
use dashmap::DashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Group everyone shares when no zone channel applies.
pub const GLOBAL_GROUP: u8 = 0;

/// External audio-routing collaborator.
pub trait InterestGroupRouter: Send + Sync {
    fn join_group(&self, group: u8);
    fn leave_group(&self, group: u8);
}

/// Moves one participant between interest groups as it changes zone.
pub struct InterestGroupSwitcher {
    participant: ParticipantId,
    router: Arc<dyn InterestGroupRouter>,
    home_group: u8,
    current: AtomicU8,
    muted: DashSet<u8>,
}

impl InterestGroupSwitcher {
    /// Creates the switcher and joins the home group.
    pub fn new(participant: ParticipantId, router: Arc<dyn InterestGroupRouter>, home_group: u8) -> Self {
        router.join_group(home_group);
        Self {
            participant,
            router,
            home_group,
            current: AtomicU8::new(home_group),
            muted: DashSet::new(),
        }
    }

    pub fn current_group(&self) -> u8 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn home_group(&self) -> u8 {
        self.home_group
    }

    /// Muted groups are left but never joined.
    pub fn mute(&self, group: u8) {
        self.muted.insert(group);
    }

    pub fn unmute(&self, group: u8) {
        self.muted.remove(&group);
    }

    fn switch_to(&self, group: u8) {
        let previous = self.current.swap(group, Ordering::SeqCst);
        if previous == group {
            return;
        }
        self.router.leave_group(previous);
        if !self.muted.contains(&group) {
            self.router.join_group(group);
        }
        debug!(participant = %self.participant, from = previous, to = group, "Switched interest group");
    }
}

impl ZoneUserListener for InterestGroupSwitcher {
    fn on_zone_changed(
        &self,
        participant: ParticipantId,
        _previous: Option<&ZoneSnapshot>,
        current: Option<&ZoneSnapshot>,
    ) {
        if participant != self.participant {
            return;
        }
        let target = current.and_then(|zone| zone.channel).unwrap_or(self.home_group);
        self.switch_to(target);
    }
}
