//! Free/active recycling pool for dynamic zones.
//!
//! Pooled zones are spawned lazily and never destroyed during a session; they
//! move between the free list and the active list. Every replica mirrors the
//! partition by reacting to each zone's replicated in-use flag, so the lists
//! stay consistent without a consensus round.

use crate::error::ZoneError;
use crate::replication::ZoneSpawn;
use crate::system::ZoneSystem;
use crate::types::{ParticipantId, Vec3, ZoneId};
use crate::zone::Zone;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Free and active pooled zones plus the registered pairing sources.
#[derive(Debug, Default)]
pub struct DynamicZonePool {
    free: Vec<ZoneId>,
    active: Vec<ZoneId>,
    channels: HashMap<ZoneId, u8>,
    sources: Vec<ParticipantId>,
}

impl DynamicZonePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly spawned zone as free. Returns `false` if already tracked.
    pub fn register(&mut self, zone: ZoneId, channel: u8) -> bool {
        if self.is_tracked(zone) {
            return false;
        }
        self.free.push(zone);
        self.channels.insert(zone, channel);
        true
    }

    /// Takes the most recently freed zone and marks it active.
    pub fn pick(&mut self) -> Option<ZoneId> {
        let zone = self.free.pop()?;
        self.active.push(zone);
        Some(zone)
    }

    /// Moves `zone` to the active list. Returns `false` if it already was active.
    pub fn activate(&mut self, zone: ZoneId) -> bool {
        self.free.retain(|z| *z != zone);
        if self.active.contains(&zone) {
            return false;
        }
        self.active.push(zone);
        true
    }

    /// Moves `zone` to the free list. Returns `false` if it already was free.
    pub fn deactivate(&mut self, zone: ZoneId) -> bool {
        self.active.retain(|z| *z != zone);
        if self.free.contains(&zone) {
            return false;
        }
        self.free.push(zone);
        true
    }

    /// Stops tracking `zone` altogether.
    pub fn forget(&mut self, zone: ZoneId) {
        self.free.retain(|z| *z != zone);
        self.active.retain(|z| *z != zone);
        self.channels.remove(&zone);
    }

    pub fn is_tracked(&self, zone: ZoneId) -> bool {
        self.free.contains(&zone) || self.active.contains(&zone)
    }

    pub fn is_free(&self, zone: ZoneId) -> bool {
        self.free.contains(&zone)
    }

    pub fn is_active(&self, zone: ZoneId) -> bool {
        self.active.contains(&zone)
    }

    pub fn free(&self) -> &[ZoneId] {
        &self.free
    }

    pub fn active(&self) -> &[ZoneId] {
        &self.active
    }

    pub fn channel_of(&self, zone: ZoneId) -> Option<u8> {
        self.channels.get(&zone).copied()
    }

    /// Channel ids in `range` not held by any free or active zone.
    pub fn available_channels(&self, range: RangeInclusive<u8>) -> Vec<u8> {
        range
            .filter(|channel| !self.channels.values().any(|used| used == channel))
            .collect()
    }

    pub fn register_source(&mut self, participant: ParticipantId) -> bool {
        if self.sources.contains(&participant) {
            return false;
        }
        self.sources.push(participant);
        true
    }

    pub fn unregister_source(&mut self, participant: ParticipantId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|p| *p != participant);
        before != self.sources.len()
    }

    pub fn sources(&self) -> &[ParticipantId] {
        &self.sources
    }
}

impl ZoneSystem {
    /// Takes a free pooled zone, if any. Registration follows its in-use flag.
    pub fn pick_dynamic_zone(&mut self) -> Option<ZoneId> {
        let zone = self.pool.pick()?;
        debug!(local = %self.local, zone = %zone, "Picked pooled zone");
        Some(zone)
    }

    /// Marks a pooled zone active and makes it resolvable.
    pub fn activate_dynamic_zone(&mut self, zone: ZoneId) {
        self.pool.activate(zone);
        self.register_zone(zone);
    }

    /// Returns a pooled zone to the free list, evicting remaining occupants.
    pub fn deactivate_dynamic_zone(&mut self, zone: ZoneId) {
        self.pool.deactivate(zone);
        self.unregister_zone(zone);
        if let Some(state) = self.zones.get_mut(&zone).and_then(|z| z.dynamic.as_mut()) {
            state.under_occupied_since = None;
        }
    }

    /// Channel ids in the configured range that no known zone, fixed or
    /// pooled, is using.
    pub fn free_channels(&self) -> Vec<u8> {
        let mut available = self.pool.available_channels(self.config.channel_range());
        available.retain(|channel| !self.zones.values().any(|zone| zone.channel() == Some(*channel)));
        available
    }

    /// Spawns a new pooled zone on an unused channel and waits for the
    /// spawn acknowledgement.
    pub async fn create_dynamic_zone(&mut self, center: Vec3) -> Result<ZoneId, ZoneError> {
        let channel = {
            let available = self.free_channels();
            let mut rng = rand::thread_rng();
            available.choose(&mut rng).copied()
        }
        .ok_or(ZoneError::NoChannelAvailable)?;

        let spawn = ZoneSpawn { channel, center };
        let zone = self.runtime.spawn_zone(spawn)?;

        let deadline = Instant::now() + self.config.spawn_timeout();
        while !self.runtime.is_spawned(zone) {
            if Instant::now() >= deadline {
                warn!(zone = %zone, channel, "Pooled zone spawn not acknowledged");
                return Err(ZoneError::SpawnTimeout(zone));
            }
            sleep(self.config.spawn_poll_interval()).await;
        }

        self.on_zone_spawned(zone, spawn);
        info!(local = %self.local, zone = %zone, channel, "🆕 Spawned pooled zone");
        Ok(zone)
    }

    /// Builds the local replica of a spawned pooled zone and hides it.
    pub(crate) fn on_zone_spawned(&mut self, zone: ZoneId, spawn: ZoneSpawn) {
        if self.zones.contains_key(&zone) {
            return;
        }
        let mut pooled = Zone::dynamic(zone, &spawn, &self.config.dynamic_template);
        for listener in &self.zone_listeners {
            pooled.add_listener(listener.clone());
        }
        self.insert_zone(pooled);
        self.pool.register(zone, spawn.channel);
        self.instant_change_visibility(zone, false);
    }
}
