//! Zone observers and the sequential visibility transition.

use super::ZoneSnapshot;
use crate::types::{ParticipantId, ZoneId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Observer of a single zone's state.
///
/// Every method has a no-op default so implementors pick what they need.
#[async_trait]
pub trait ZoneListener: Send + Sync {
    /// Status changed (or a request was rejected and observers should resync).
    fn on_zone_changed(&self, _zone: &ZoneSnapshot) {}

    fn on_lock_changed(&self, _zone: &ZoneSnapshot) {}

    fn on_zone_destroyed(&self, _zone: &ZoneSnapshot) {}

    fn on_participant_entered(&self, _zone: &ZoneSnapshot, _participant: ParticipantId) {}

    fn on_participant_exited(&self, _zone: &ZoneSnapshot, _participant: ParticipantId) {}

    /// Visibility flipped without a transition (e.g. a freshly spawned zone).
    fn instant_change_visibility(&self, _zone: &ZoneSnapshot, _visible: bool) {}

    /// Suspendable part of a visibility transition.
    async fn change_visibility(&self, _zone: &ZoneSnapshot, _visible: bool) {}

    /// Called on every listener once all of them finished `change_visibility`.
    fn did_end_change_visibility(&self, _zone: &ZoneSnapshot, _visible: bool) {}
}

/// A pending visibility change for one zone.
///
/// Listeners are awaited strictly in registration order, one at a time, then
/// every listener receives `did_end_change_visibility`.
pub struct VisibilityTransition {
    zone: ZoneSnapshot,
    visible: bool,
    listeners: Vec<Arc<dyn ZoneListener>>,
}

impl VisibilityTransition {
    pub(crate) fn new(zone: ZoneSnapshot, visible: bool, listeners: Vec<Arc<dyn ZoneListener>>) -> Self {
        Self {
            zone,
            visible,
            listeners,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone.id
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub async fn run(self) {
        trace!(zone = %self.zone.id, visible = self.visible, listeners = self.listeners.len(), "Running visibility transition");
        for listener in &self.listeners {
            listener.change_visibility(&self.zone, self.visible).await;
        }
        for listener in &self.listeners {
            listener.did_end_change_visibility(&self.zone, self.visible);
        }
    }
}

impl std::fmt::Debug for VisibilityTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityTransition")
            .field("zone", &self.zone.id)
            .field("visible", &self.visible)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
