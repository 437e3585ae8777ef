//! Observed set of currently known zones.

use crate::types::ZoneId;
use std::sync::Arc;
use tracing::trace;

/// Observer of zone registration.
pub trait RegistryListener: Send + Sync {
    fn on_zone_registered(&self, _zone: ZoneId) {}
    fn on_zone_unregistered(&self, _zone: ZoneId) {}
}

/// Zones in registration order plus listener fan-out.
///
/// Registration order matters: membership resolution enters the first
/// matching zone in this order.
#[derive(Default)]
pub struct ZoneRegistry {
    zones: Vec<ZoneId>,
    listeners: Vec<Arc<dyn RegistryListener>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the zone was already registered.
    pub fn register(&mut self, zone: ZoneId) -> bool {
        if self.zones.contains(&zone) {
            return false;
        }
        self.zones.push(zone);
        trace!(zone = %zone, "Zone registered");
        for listener in &self.listeners {
            listener.on_zone_registered(zone);
        }
        true
    }

    /// Returns `false` if the zone was not registered.
    pub fn unregister(&mut self, zone: ZoneId) -> bool {
        let Some(index) = self.zones.iter().position(|z| *z == zone) else {
            return false;
        };
        self.zones.remove(index);
        trace!(zone = %zone, "Zone unregistered");
        for listener in &self.listeners {
            listener.on_zone_unregistered(zone);
        }
        true
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.zones.contains(&zone)
    }

    pub fn zones(&self) -> &[ZoneId] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn RegistryListener>) -> bool {
        if self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn RegistryListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != self.listeners.len()
    }
}
