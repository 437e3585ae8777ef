//! Wandering agents that stand in for real participants.
//!
//! Each agent walks toward a target on the ground plane. When it arrives, or
//! when the zone system vetoes a step, it picks a new target: usually next to
//! another agent, otherwise anywhere in the world square.

use horizon_zones::{ParticipantId, ParticipantKind, Vec3};
use rand::Rng;
use std::time::Duration;

/// Closer than this to the target counts as arrived.
const ARRIVAL_DISTANCE: f64 = 0.05;

/// How far from another agent a gathering target may land.
const GATHER_SPREAD: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct Wanderer {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    position: Vec3,
    target: Vec3,
}

impl Wanderer {
    pub fn new(id: ParticipantId, kind: ParticipantKind, position: Vec3) -> Self {
        Self {
            id,
            kind,
            position,
            target: position,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn move_to(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Next position after walking for `dt`, or `None` once the target is reached.
    pub fn propose_step(&self, speed: f64, dt: Duration) -> Option<Vec3> {
        let to_target = self.target - self.position;
        let distance = to_target.length();
        if distance < ARRIVAL_DISTANCE {
            return None;
        }
        let stride = (speed * dt.as_secs_f64()).min(distance);
        let direction = to_target.normalized()?;
        Some(self.position + direction * stride)
    }

    /// Picks a new target, next to one of `others` with probability `gather_bias`.
    pub fn retarget<R: Rng>(&mut self, rng: &mut R, half_extent: f64, gather_bias: f64, others: &[Vec3]) {
        if !others.is_empty() && rng.gen_bool(gather_bias) {
            let anchor = others[rng.gen_range(0..others.len())];
            let x = anchor.x + rng.gen_range(-GATHER_SPREAD..=GATHER_SPREAD);
            let z = anchor.z + rng.gen_range(-GATHER_SPREAD..=GATHER_SPREAD);
            self.target = Vec3::new(x.clamp(-half_extent, half_extent), 0.0, z.clamp(-half_extent, half_extent));
        } else {
            self.target = Vec3::new(
                rng.gen_range(-half_extent..=half_extent),
                0.0,
                rng.gen_range(-half_extent..=half_extent),
            );
        }
    }
}

/// Evenly spaced spawn points on a ring around the world center.
pub fn spawn_positions(count: usize, half_extent: f64) -> Vec<Vec3> {
    let radius = half_extent / 2.0;
    (0..count)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * (i as f64) / (count as f64);
            Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_step_stops_at_target() {
        let mut agent = Wanderer::new(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        agent.target = Vec3::new(1.0, 0.0, 0.0);

        let step = agent.propose_step(2.0, Duration::from_millis(250)).unwrap();
        assert!((step.x - 0.5).abs() < 1e-9);

        // A long step never overshoots.
        let step = agent.propose_step(2.0, Duration::from_secs(5)).unwrap();
        assert_eq!(step, Vec3::new(1.0, 0.0, 0.0));

        agent.move_to(step);
        assert!(agent.propose_step(2.0, Duration::from_millis(250)).is_none());
    }

    #[test]
    fn test_retarget_stays_in_world() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut agent = Wanderer::new(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let others = [Vec3::new(9.5, 0.0, -9.5)];

        for _ in 0..200 {
            agent.retarget(&mut rng, 10.0, 0.5, &others);
            let target = agent.target();
            assert!(target.x.abs() <= 10.0 && target.z.abs() <= 10.0);
            assert_eq!(target.y, 0.0);
        }
    }

    #[test]
    fn test_full_gather_bias_targets_neighbours() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut agent = Wanderer::new(ParticipantId(1), ParticipantKind::User, Vec3::zero());
        let anchor = Vec3::new(4.0, 0.0, 4.0);

        for _ in 0..50 {
            agent.retarget(&mut rng, 20.0, 1.0, &[anchor]);
            assert!(agent.target().distance(anchor) <= GATHER_SPREAD * 2f64.sqrt() + 1e-9);
        }
    }

    #[test]
    fn test_spawn_ring() {
        let points = spawn_positions(4, 10.0);
        assert_eq!(points.len(), 4);
        for point in points {
            assert!((point.length() - 5.0).abs() < 1e-9);
        }
    }
}
