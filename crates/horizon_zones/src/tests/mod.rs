//! Multi-replica scenario tests
//!
//! Every test wires several [`ZoneSystem`] replicas to one [`LocalSession`] and
//! pumps replication events between them until the session is quiet.
//! - Membership and lock policy across replicas
//! - Proximity pairing, pooling and release
//! - Authority handoff after disconnects



#[cfg(test)]
pub mod pairing_test;

use crate::config::ZoneSystemConfig;
use crate::replication::{LocalSession, ReplicationEvent};
use crate::system::{TickReport, ZoneSystem};
use crate::types::{ParticipantId, ParticipantKind, Vec3, ZoneId};
use crate::zone::{ShapeSpec, ZoneDescriptor};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

pub struct Replica {
    pub system: ZoneSystem,
    pub events: UnboundedReceiver<ReplicationEvent>,
}

/// A session plus one replica per participant.
pub struct Harness {
    pub session: LocalSession,
    pub config: ZoneSystemConfig,
    pub fixed_zones: Vec<ZoneDescriptor>,
    pub replicas: Vec<Replica>,
}

impl Harness {
    pub fn new(config: ZoneSystemConfig, fixed_zones: Vec<ZoneDescriptor>) -> Self {
        Self {
            session: LocalSession::new(),
            config,
            fixed_zones,
            replicas: Vec::new(),
        }
    }

    pub async fn join(&mut self, id: u32, head: Vec3) {
        self.join_as(id, ParticipantKind::User, head).await;
    }

    pub async fn join_as(&mut self, id: u32, kind: ParticipantKind, head: Vec3) {
        let (runtime, events) = self.session.join(ParticipantId(id), kind, head);
        let mut system = ZoneSystem::new(self.config.clone(), runtime, kind, head);
        for descriptor in &self.fixed_zones {
            system.add_fixed_zone(descriptor).unwrap();
        }
        self.replicas.push(Replica { system, events });
        self.pump().await;
    }

    pub async fn leave(&mut self, id: u32) {
        self.session.leave(ParticipantId(id));
        self.replicas
            .retain(|r| r.system.local_participant() != ParticipantId(id));
        self.pump().await;
    }

    /// Delivers events until no replica has anything left to process.
    pub async fn pump(&mut self) {
        loop {
            let mut delivered = 0;
            for replica in self.replicas.iter_mut() {
                while let Ok(event) = replica.events.try_recv() {
                    replica.system.handle_event(event).await;
                    delivered += 1;
                }
            }
            if delivered == 0 {
                break;
            }
        }
    }

    pub fn system(&self, id: u32) -> &ZoneSystem {
        &self
            .replicas
            .iter()
            .find(|r| r.system.local_participant() == ParticipantId(id))
            .unwrap()
            .system
    }

    pub fn system_mut(&mut self, id: u32) -> &mut ZoneSystem {
        &mut self
            .replicas
            .iter_mut()
            .find(|r| r.system.local_participant() == ParticipantId(id))
            .unwrap()
            .system
    }

    pub async fn move_to(&mut self, id: u32, head: Vec3) -> Option<ZoneId> {
        let zone = self.system_mut(id).move_local(head).unwrap();
        self.pump().await;
        zone
    }

    /// Ticks the replicas in the given order, pumping after each.
    pub async fn tick_in_order(&mut self, order: &[u32], now: Instant) -> HashMap<u32, TickReport> {
        let mut reports = HashMap::new();
        for id in order {
            let report = self.system_mut(*id).tick(now).await;
            reports.insert(*id, report);
            self.pump().await;
        }
        reports
    }

    pub async fn tick_all(&mut self, now: Instant) -> HashMap<u32, TickReport> {
        let order = self.ids();
        self.tick_in_order(&order, now).await
    }

    /// Ticks at `start` and again one debounce later. Returns the second round.
    pub async fn tick_through_debounce(&mut self, order: &[u32], start: Instant) -> HashMap<u32, TickReport> {
        let debounce = self.config.proximity_debounce();
        self.tick_in_order(order, start).await;
        self.tick_in_order(order, start + debounce).await
    }

    pub fn ids(&self) -> Vec<u32> {
        self.replicas
            .iter()
            .map(|r| r.system.local_participant().0)
            .collect()
    }

    /// Capacity and single-membership invariants on every replica.
    pub fn assert_invariants(&self) {
        for replica in &self.replicas {
            let mut seen: HashMap<ParticipantId, ZoneId> = HashMap::new();
            for zone in replica.system.zones() {
                assert!(
                    zone.members().len() <= zone.max_capacity(),
                    "{} over capacity on {}",
                    zone.id(),
                    replica.system.local_participant()
                );
                for member in zone.members() {
                    if let Some(other) = seen.insert(*member, zone.id()) {
                        panic!("{member} listed in both {other} and {}", zone.id());
                    }
                }
            }

            let pool = replica.system.pool();
            for zone in pool.free() {
                assert!(!pool.is_active(*zone), "{zone} both free and active");
            }
        }
    }
}

pub fn sphere_zone(id: u64, center: Vec3, radius: f64, capacity: usize) -> ZoneDescriptor {
    ZoneDescriptor {
        id,
        name: format!("zone-{id}"),
        shape: ShapeSpec::Sphere { radius },
        center,
        up: Vec3::unit_y(),
        max_capacity: capacity,
        allow_empty_zone_locking: false,
        channel: Some(id as u8),
        register_automatically: true,
    }
}
