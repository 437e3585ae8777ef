//! Main application logic and lifecycle management.
//!
//! [`Simulation`] owns one zone-system replica per simulated participant, all
//! joined to a single [`LocalSession`]. Each step moves the agents, delivers
//! replication events until the session is quiet, ticks every replica and runs
//! pending visibility transitions. [`Application`] wraps it with configuration,
//! the fixed-step loop and graceful shutdown.

use crate::agent::{spawn_positions, Wanderer};
use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{wait_for_shutdown_signal, ShutdownState};
use futures::future::join_all;
use horizon_zones::{
    InterestGroupRouter, InterestGroupSwitcher, LocalSession, ParticipantId, ParticipantKind, ReplicationEvent,
    Vec3, ZoneError, ZoneId, ZoneListener, ZoneSnapshot, ZoneSystem, GLOBAL_GROUP,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Logs zone activity as seen by one observing replica.
struct ZoneActivityLogger;

impl ZoneListener for ZoneActivityLogger {
    fn on_lock_changed(&self, zone: &ZoneSnapshot) {
        info!(zone = %zone.id, name = %zone.name, locked = zone.force_locked, "🔒 Zone lock changed");
    }

    fn on_zone_destroyed(&self, zone: &ZoneSnapshot) {
        debug!(zone = %zone.id, name = %zone.name, "Zone destroyed");
    }

    fn on_participant_entered(&self, zone: &ZoneSnapshot, participant: ParticipantId) {
        info!(
            zone = %zone.id,
            name = %zone.name,
            participant = %participant,
            occupancy = zone.members.len(),
            capacity = zone.max_capacity,
            "➡️ Participant entered zone"
        );
    }

    fn on_participant_exited(&self, zone: &ZoneSnapshot, participant: ParticipantId) {
        info!(
            zone = %zone.id,
            name = %zone.name,
            participant = %participant,
            occupancy = zone.members.len(),
            "⬅️ Participant left zone"
        );
    }
}

/// Audio routing stand-in that only records the switch in the log.
struct LoggingRouter {
    participant: ParticipantId,
}

impl InterestGroupRouter for LoggingRouter {
    fn join_group(&self, group: u8) {
        debug!(participant = %self.participant, group, "🔊 Joined interest group");
    }

    fn leave_group(&self, group: u8) {
        debug!(participant = %self.participant, group, "🔇 Left interest group");
    }
}

struct SimReplica {
    agent: Wanderer,
    system: ZoneSystem,
    events: UnboundedReceiver<ReplicationEvent>,
    audio: Arc<InterestGroupSwitcher>,
}

/// Running totals over a simulation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub allocations: u64,
    pub releases: u64,
    /// Steps refused by `can_move_headset`
    pub vetoed_moves: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantReport {
    pub participant: ParticipantId,
    pub kind: ParticipantKind,
    pub head: Vec3,
    pub zone: Option<ZoneId>,
    pub interest_group: u8,
}

/// Final occupancy report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub social_group: Option<String>,
    pub stats: SessionStats,
    /// As seen by the lowest participant id
    pub zones: Vec<ZoneSnapshot>,
    pub participants: Vec<ParticipantReport>,
}

/// Every simulated replica plus the shared session.
pub struct Simulation {
    config: AppConfig,
    session: LocalSession,
    replicas: Vec<SimReplica>,
    rng: StdRng,
    stats: SessionStats,
}

impl Simulation {
    /// Joins every configured user and bot and lets the session settle.
    pub async fn new(config: AppConfig) -> Result<Self, ZoneError> {
        let session = LocalSession::new();
        let rng = match config.session.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let users = config.session.users as usize;
        let total = users + config.session.bots as usize;
        let spawns = spawn_positions(total, config.session.world_half_extent);

        let mut simulation = Self {
            config,
            session,
            replicas: Vec::with_capacity(total),
            rng,
            stats: SessionStats::default(),
        };

        for (index, head) in spawns.into_iter().enumerate() {
            let id = ParticipantId(index as u32 + 1);
            let kind = if index < users {
                ParticipantKind::User
            } else {
                ParticipantKind::Bot
            };
            simulation.add_replica(id, kind, head)?;
            // Late joiners replay everything already in the session.
            simulation.pump().await;
        }

        info!(
            participants = simulation.replicas.len(),
            fixed_zones = simulation.config.fixed_zones.len(),
            "👥 Session populated"
        );
        Ok(simulation)
    }

    fn add_replica(&mut self, id: ParticipantId, kind: ParticipantKind, head: Vec3) -> Result<(), ZoneError> {
        let (runtime, events) = self.session.join(id, kind, head);
        let mut system = ZoneSystem::new(self.config.zones.clone(), runtime, kind, head);

        if self.replicas.is_empty() {
            system.add_global_zone_listener(Arc::new(ZoneActivityLogger));
        }
        let router = Arc::new(LoggingRouter { participant: id });
        let audio = Arc::new(InterestGroupSwitcher::new(id, router, GLOBAL_GROUP));
        system.attach_interest_switcher(audio.clone());

        for descriptor in &self.config.fixed_zones {
            system.add_fixed_zone(descriptor)?;
        }

        self.replicas.push(SimReplica {
            agent: Wanderer::new(id, kind, head),
            system,
            events,
            audio,
        });
        Ok(())
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn participant_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn system(&self, participant: ParticipantId) -> Option<&ZoneSystem> {
        self.replicas
            .iter()
            .find(|r| r.agent.id == participant)
            .map(|r| &r.system)
    }

    /// Delivers replication events until every replica's queue is empty.
    pub async fn pump(&mut self) {
        loop {
            let mut delivered = 0usize;
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

    /// One fixed simulation step.
    pub async fn step(&mut self, now: Instant, dt: Duration) {
        let speed = self.config.session.walk_speed;
        let half_extent = self.config.session.world_half_extent;
        let gather_bias = self.config.session.gather_bias;
        let positions: Vec<Vec3> = self.replicas.iter().map(|r| r.agent.position()).collect();

        for (index, replica) in self.replicas.iter_mut().enumerate() {
            let local = replica.agent.id;
            let candidate = replica.agent.propose_step(speed, dt);
            let accepted = candidate.filter(|head| replica.system.can_move_headset(local, *head));

            match accepted {
                Some(head) => {
                    replica.agent.move_to(head);
                    if let Err(e) = replica.system.move_local(head) {
                        warn!(participant = %local, error = %e, "Failed to publish head position");
                    }
                }
                None => {
                    if candidate.is_some() {
                        self.stats.vetoed_moves += 1;
                        debug!(participant = %local, "Step vetoed by zone policy");
                    }
                    let others: Vec<Vec3> = positions
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, p)| *p)
                        .collect();
                    replica
                        .agent
                        .retarget(&mut self.rng, half_extent, gather_bias, &others);
                }
            }
        }
        self.pump().await;

        for replica in self.replicas.iter_mut() {
            let report = replica.system.tick(now).await;
            if report.allocated.is_some() {
                self.stats.allocations += 1;
            }
            self.stats.releases += report.released.len() as u64;
        }
        self.pump().await;

        join_all(
            self.replicas
                .iter_mut()
                .map(|replica| replica.system.run_visibility_transitions()),
        )
        .await;

        self.stats.ticks += 1;
    }

    pub fn report(&self) -> SessionReport {
        let zones = self
            .replicas
            .first()
            .map(|r| r.system.snapshots())
            .unwrap_or_default();

        let participants = self
            .replicas
            .iter()
            .map(|r| ParticipantReport {
                participant: r.agent.id,
                kind: r.agent.kind,
                head: r.agent.position(),
                zone: r.system.current_zone(r.agent.id),
                interest_group: r.audio.current_group(),
            })
            .collect();

        SessionReport {
            social_group: self.config.session.social_group.clone(),
            stats: self.stats.clone(),
            zones,
            participants,
        }
    }

    /// Tears every replica down and leaves the session.
    pub fn teardown(&mut self) {
        for replica in self.replicas.iter_mut() {
            replica.system.teardown();
        }
        for replica in &self.replicas {
            self.session.leave(replica.agent.id);
        }
        self.replicas.clear();
        info!("🧹 Session closed");
    }
}

/// Simulator lifecycle: configuration, the fixed-step loop and shutdown.
pub struct Application {
    config: AppConfig,
    stats_json: bool,
}

impl Application {
    /// Loads configuration, applies CLI overrides and validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(duration) = args.duration_secs {
            config.session.duration_secs = duration;
        }
        if let Some(users) = args.users {
            config.session.users = users;
        }
        if let Some(bots) = args.bots {
            config.session.bots = bots;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self {
            config,
            stats_json: args.stats_json,
        })
    }

    /// Runs the simulation until its duration elapses or a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();

        let mut simulation = Simulation::new(self.config.clone()).await?;
        let shutdown = ShutdownState::new();
        let signal = wait_for_shutdown_signal(shutdown.clone());
        tokio::pin!(signal);

        let tick_interval = self.config.tick_interval();
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = match self.config.session.duration_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };
        let ticks_per_report = (Duration::from_secs(5).as_millis() / tick_interval.as_millis()).max(1) as u64;

        info!("✅ Simulation running");
        info!("🛑 Press Ctrl+C to stop early");

        let mut last = Instant::now();
        loop {
            tokio::select! {
                result = &mut signal => {
                    result?;
                    break;
                }
                _ = run_deadline(deadline) => {
                    info!("⏰ Configured duration reached");
                    break;
                }
                now = ticker.tick() => {
                    let dt = now.saturating_duration_since(last);
                    last = now;
                    simulation.step(now, dt).await;

                    let stats = simulation.stats();
                    if stats.ticks % ticks_per_report == 0 {
                        info!(
                            ticks = stats.ticks,
                            allocations = stats.allocations,
                            releases = stats.releases,
                            vetoed = stats.vetoed_moves,
                            "📊 Session statistics"
                        );
                    }
                }
            }
        }

        if !shutdown.is_shutdown_initiated() {
            shutdown.initiate_shutdown();
        }

        let report = simulation.report();
        log_report(&report);
        if self.stats_json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        simulation.teardown();
        shutdown.complete_shutdown();
        info!("👋 Simulation finished");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let session = &self.config.session;
        info!("📋 Configuration Summary:");
        info!("  👥 Users: {} | Bots: {}", session.users, session.bots);
        info!(
            "  🗺️ World: ±{} m | Walk speed: {} m/s",
            session.world_half_extent, session.walk_speed
        );
        info!("  ⏱️ Tick interval: {} ms", session.tick_interval_ms);
        info!("  📍 Fixed zones: {}", self.config.fixed_zones.len());
        if let Some(group) = &session.social_group {
            info!("  🏷️ Social group: {}", group);
        }
    }
}

async fn run_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_report(report: &SessionReport) {
    info!("📊 Final Statistics:");
    info!("  - Ticks: {}", report.stats.ticks);
    info!("  - Pooled zones allocated: {}", report.stats.allocations);
    info!("  - Pooled zones released: {}", report.stats.releases);
    info!("  - Vetoed steps: {}", report.stats.vetoed_moves);
    for zone in &report.zones {
        info!(
            "  - {} ({}): {}/{} occupants{}{}",
            zone.name,
            zone.id,
            zone.members.len(),
            zone.max_capacity,
            if zone.force_locked { ", locked" } else { "" },
            if zone.in_use == Some(false) { ", pooled" } else { "" },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config(users: u32, bots: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.session.users = users;
        config.session.bots = bots;
        config.session.seed = Some(42);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_keeps_invariants() {
        let mut simulation = Simulation::new(quiet_config(6, 2)).await.unwrap();
        assert_eq!(simulation.participant_count(), 8);

        let dt = Duration::from_millis(50);
        let start = Instant::now();
        for step in 0..400u32 {
            simulation.step(start + dt * step, dt).await;
        }

        let report = simulation.report();
        assert_eq!(report.stats.ticks, 400);
        for zone in &report.zones {
            assert!(zone.members.len() <= zone.max_capacity);
        }
        for participant in &report.participants {
            if participant.kind.is_bot() {
                assert_eq!(participant.zone, None);
            }
            let inside = report
                .zones
                .iter()
                .filter(|z| z.members.contains(&participant.participant))
                .count();
            assert!(inside <= 1);
        }

        simulation.teardown();
        assert_eq!(simulation.participant_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathered_pair_gets_pooled_zone() {
        let mut config = quiet_config(2, 0);
        config.fixed_zones.clear();
        config.session.walk_speed = 0.0;
        config.session.world_half_extent = 2.0;
        let mut simulation = Simulation::new(config).await.unwrap();

        // The two spawn points sit 2 m apart, inside the proximity radius.
        let dt = Duration::from_millis(50);
        let start = Instant::now();
        for step in 0..10u32 {
            simulation.step(start + dt * step, dt).await;
        }

        let report = simulation.report();
        assert_eq!(report.stats.allocations, 1);
        let zone = report.participants[0].zone.expect("pair zoned");
        assert_eq!(report.participants[1].zone, Some(zone));
        let channel = report.zones.iter().find(|z| z.id == zone).unwrap().channel;
        assert_eq!(Some(report.participants[0].interest_group), channel);
    }

    #[test]
    fn test_report_serializes() {
        let report = SessionReport {
            social_group: Some("book-club".to_string()),
            stats: SessionStats::default(),
            zones: Vec::new(),
            participants: vec![ParticipantReport {
                participant: ParticipantId(1),
                kind: ParticipantKind::User,
                head: Vec3::zero(),
                zone: None,
                interest_group: GLOBAL_GROUP,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["social_group"], "book-club");
        assert_eq!(json["participants"][0]["interest_group"], 0);
    }
}
