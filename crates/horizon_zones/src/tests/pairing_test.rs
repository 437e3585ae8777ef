use super::{sphere_zone, Harness};
use crate::config::ZoneSystemConfig;
use crate::types::{ObjectId, ParticipantId, Vec3, ZoneId};
use crate::zone::{ZoneListener, ZoneSnapshot};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct VisibilityRecorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ZoneListener for VisibilityRecorder {
    fn instant_change_visibility(&self, _zone: &ZoneSnapshot, visible: bool) {
        self.calls.lock().unwrap().push(format!("instant:{visible}"));
    }

    async fn change_visibility(&self, _zone: &ZoneSnapshot, visible: bool) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.calls.lock().unwrap().push(format!("change:{visible}"));
    }

    fn did_end_change_visibility(&self, _zone: &ZoneSnapshot, visible: bool) {
        self.calls.lock().unwrap().push(format!("end:{visible}"));
    }
}

async fn pair_session(low: u32, high: u32) -> Harness {
    let mut harness = Harness::new(ZoneSystemConfig::default(), Vec::new());
    harness.join(low, Vec3::zero()).await;
    harness.join(high, Vec3::new(2.0, 0.0, 0.0)).await;
    harness
}

fn spawned_zones(harness: &Harness, id: u32) -> usize {
    let pool = harness.system(id).pool();
    pool.free().len() + pool.active().len()
}

fn assert_both_inside(harness: &Harness, zone: ZoneId, pair: [u32; 2]) {
    for viewer in harness.ids() {
        for member in pair {
            assert_eq!(
                harness.system(viewer).current_zone(ParticipantId(member)),
                Some(zone),
                "{member} not in {zone} as seen by {viewer}"
            );
        }
        assert!(harness.system(viewer).pool().is_active(zone));
    }
}

#[tokio::test(start_paused = true)]
async fn test_lower_id_allocates_after_debounce() {
    let mut harness = pair_session(2, 9).await;
    let t0 = Instant::now();

    let first = harness.tick_all(t0).await;
    assert!(first.values().all(|r| r.allocated.is_none()));
    assert_eq!(
        harness.system(2).pairing().partner(),
        Some(ParticipantId(9))
    );
    assert_eq!(harness.system(9).pairing().partner(), None);

    // Just short of the debounce nothing happens.
    let early = harness.tick_all(t0 + Duration::from_millis(199)).await;
    assert!(early.values().all(|r| r.allocated.is_none()));

    let reports = harness.tick_all(t0 + Duration::from_millis(200)).await;
    let zone = reports[&2].allocated.expect("lower id allocates");
    assert_eq!(reports[&9].allocated, None);

    assert_both_inside(&harness, zone, [2, 9]);
    let snapshot = harness.system(9).zone(zone).unwrap().snapshot();
    assert!(snapshot.visible);
    assert_eq!(snapshot.in_use, Some(true));
    assert_eq!(snapshot.center, Vec3::new(1.0, 0.0, 0.0));
    harness.assert_invariants();
}

#[tokio::test(start_paused = true)]
async fn test_third_participant_does_not_trigger_second_zone() {
    let mut harness = pair_session(2, 9).await;
    let t0 = Instant::now();
    let reports = harness.tick_through_debounce(&[2, 9], t0).await;
    let zone = reports[&2].allocated.unwrap();

    // Close to participant 9 but outside the pooled zone itself.
    harness.join(12, Vec3::new(5.5, 0.0, 0.0)).await;
    assert_eq!(harness.system(12).current_zone(ParticipantId(12)), None);

    let later = t0 + Duration::from_millis(400);
    let reports = harness.tick_through_debounce(&[2, 9, 12], later).await;
    assert!(reports.values().all(|r| r.allocated.is_none()));
    for id in [2, 9, 12] {
        assert_eq!(spawned_zones(&harness, id), 1);
        assert_eq!(harness.system(id).pool().active(), &[zone]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_allocation_does_not_depend_on_tick_order() {
    for order in [[3, 7], [7, 3]] {
        let mut harness = Harness::new(ZoneSystemConfig::default(), Vec::new());
        // Join order follows the tick order so neither side is privileged.
        for id in order {
            let x = if id == 3 { 0.0 } else { 2.0 };
            harness.join(id, Vec3::new(x, 0.0, 0.0)).await;
        }

        let reports = harness.tick_through_debounce(&order, Instant::now()).await;
        let zone = reports[&3].allocated.expect("participant 3 allocates");
        assert_eq!(reports[&7].allocated, None);
        assert_both_inside(&harness, zone, [3, 7]);
        assert_eq!(spawned_zones(&harness, 3), 1);
        assert_eq!(spawned_zones(&harness, 7), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_pending_pair_dropped_when_partner_zoned() {
    let kiosk = sphere_zone(1, Vec3::new(6.0, 0.0, 0.0), 2.5, 4);
    let mut harness = Harness::new(ZoneSystemConfig::default(), vec![kiosk]);
    harness.join(2, Vec3::zero()).await;
    harness.join(9, Vec3::new(2.0, 0.0, 0.0)).await;

    let t0 = Instant::now();
    harness.tick_all(t0).await;
    assert_eq!(harness.system(2).pairing().partner(), Some(ParticipantId(9)));

    // Still within proximity of 2, but now inside the kiosk.
    harness.move_to(9, Vec3::new(3.9, 0.0, 0.0)).await;
    assert_eq!(harness.system(2).current_zone(ParticipantId(9)), Some(ObjectId(1)));

    let reports = harness.tick_all(t0 + Duration::from_millis(200)).await;
    assert!(reports.values().all(|r| r.allocated.is_none()));
    assert_eq!(harness.system(2).pairing().pending(), None);
    assert_eq!(spawned_zones(&harness, 2), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lonely_zone_released_after_grace_and_reused() {
    let mut harness = pair_session(2, 9).await;
    let t0 = Instant::now();
    let zone = harness.tick_through_debounce(&[2, 9], t0).await[&2]
        .allocated
        .unwrap();

    harness.move_to(9, Vec3::new(30.0, 0.0, 0.0)).await;
    assert_eq!(harness.system(2).zone(zone).unwrap().members(), &[ParticipantId(2)]);

    let t1 = t0 + Duration::from_secs(1);
    assert!(harness.tick_all(t1).await[&2].released.is_empty());
    let almost = harness.tick_all(t1 + Duration::from_millis(999)).await;
    assert!(almost[&2].released.is_empty());

    let reports = harness.tick_all(t1 + Duration::from_millis(1000)).await;
    assert_eq!(reports[&2].released, vec![zone]);
    for id in [2, 9] {
        let system = harness.system(id);
        let snapshot = system.zone(zone).unwrap().snapshot();
        assert_eq!(snapshot.in_use, Some(false));
        assert!(!snapshot.visible);
        assert!(snapshot.members.is_empty());
        assert!(!snapshot.registered);
        assert_eq!(system.pool().free(), &[zone]);
        assert_eq!(system.current_zone(ParticipantId(2)), None);
    }

    // The freed zone is picked again instead of spawning another one.
    harness.move_to(9, Vec3::new(1.0, 0.0, 0.0)).await;
    let t2 = t1 + Duration::from_secs(5);
    let reused = harness.tick_through_debounce(&[2, 9], t2).await[&2].allocated;
    assert_eq!(reused, Some(zone));
    assert_both_inside(&harness, zone, [2, 9]);
    assert_eq!(
        harness.system(9).zone(zone).unwrap().center(),
        Vec3::new(0.5, 0.0, 0.0)
    );
    assert_eq!(spawned_zones(&harness, 9), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_sees_allocated_zone() {
    let mut harness = pair_session(2, 9).await;
    let zone = harness.tick_through_debounce(&[2, 9], Instant::now()).await[&2]
        .allocated
        .unwrap();

    harness.join(40, Vec3::new(-40.0, 0.0, 0.0)).await;
    let late = harness.system(40);
    assert_eq!(late.pool().active(), &[zone]);
    assert_eq!(late.pool().channel_of(zone), harness.system(2).pool().channel_of(zone));
    assert_eq!(
        late.zone(zone).unwrap().members(),
        &[ParticipantId(2), ParticipantId(9)]
    );
    assert_eq!(late.current_zone(ParticipantId(9)), Some(zone));
    assert!(late.zone(zone).unwrap().is_visible());
}

#[tokio::test(start_paused = true)]
async fn test_remote_replica_runs_visibility_transition() {
    let mut harness = pair_session(2, 9).await;
    let recorder = Arc::new(VisibilityRecorder::default());
    harness.system_mut(9).add_global_zone_listener(recorder.clone());

    harness.tick_through_debounce(&[2, 9], Instant::now()).await;
    harness.system_mut(9).run_visibility_transitions().await;

    assert_eq!(
        *recorder.calls.lock().unwrap(),
        vec!["instant:false", "change:true", "end:true"]
    );
    assert!(harness.system_mut(9).take_visibility_transitions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pair_waits_for_a_free_channel() {
    let config = ZoneSystemConfig {
        channel_range_start: 20,
        channel_range_end: 20,
        ..Default::default()
    };
    let mut harness = Harness::new(config, Vec::new());

    // The first pair takes the only channel.
    harness.join(30, Vec3::new(40.0, 0.0, 0.0)).await;
    harness.join(31, Vec3::new(42.0, 0.0, 0.0)).await;
    let t0 = Instant::now();
    let busy = harness.tick_through_debounce(&[30, 31], t0).await[&30]
        .allocated
        .unwrap();
    assert_eq!(harness.system(30).pool().channel_of(busy), Some(20));

    harness.join(2, Vec3::zero()).await;
    harness.join(9, Vec3::new(2.0, 0.0, 0.0)).await;
    let t1 = t0 + Duration::from_secs(1);
    let reports = harness.tick_through_debounce(&[2, 9], t1).await;
    assert!(reports.values().all(|r| r.allocated.is_none()));
    for viewer in harness.ids() {
        assert_eq!(harness.system(viewer).current_zone(ParticipantId(2)), None);
        assert_eq!(harness.system(viewer).current_zone(ParticipantId(9)), None);
        assert_eq!(spawned_zones(&harness, viewer), 1);
    }
    assert_eq!(harness.system(2).pairing().pending(), None);
    assert!(!harness.system(2).pairing().is_allocating());

    // Once the busy zone is released the waiting pair reuses it.
    harness.move_to(31, Vec3::new(60.0, 0.0, 0.0)).await;
    let t2 = t1 + Duration::from_secs(1);
    harness.tick_all(t2).await;
    let reports = harness.tick_all(t2 + Duration::from_millis(1000)).await;
    assert_eq!(reports[&30].released, vec![busy]);
    assert_eq!(reports[&2].allocated, Some(busy));

    assert_both_inside(&harness, busy, [2, 9]);
    for viewer in harness.ids() {
        assert_eq!(spawned_zones(&harness, viewer), 1);
        assert_eq!(harness.system(viewer).current_zone(ParticipantId(30)), None);
    }
    harness.assert_invariants();
}
