//! End-to-end coverage spanning `TimelineStore`, `PersistentProcessor` and
//! `MergeEngine` together, exercising flows too broad for a single module's
//! unit tests.

use loci::prelude::*;
use loci::{ItemKind, MergeEngine, PersistentProcessor};
use loci_types::{Coordinate, LocationFix, MovingState, RecordingState};
use std::sync::Arc;

fn store() -> TimelineStore<MemoryBackend> {
    TimelineStore::open(MemoryBackend::new(), Default::default(), Arc::new(EventBus::new())).unwrap()
}

fn located(t: f64, lat: f64, lon: f64, moving: MovingState) -> LocomotionSample {
    LocomotionSample::new(t, moving, RecordingState::Recording).with_location(LocationFix {
        coordinate: Coordinate::new(lat, lon),
        horizontal_accuracy: 10.0,
        vertical_accuracy: 5.0,
        speed: 0.0,
        course: 0.0,
        altitude: 1.0,
        timestamp: t,
    })
}

/// Three linked keeper items A -> B -> C; soft-deleting B and healing both of
/// its former neighbours should close the gap directly: A.next becomes C and
/// C.previous becomes A (the store's save_item trigger mirrors the second
/// pointer automatically once the first heal call sets it).
#[test]
fn deleting_the_middle_of_a_three_item_chain_heals_both_sides() {
    let store = store();
    let config = Config::default();
    let processor = PersistentProcessor::new(&config);

    let mut a = TimelineItem::new(ItemKind::Visit, located(0.0, 35.0, 139.0, MovingState::Stationary), &config);
    for t in 1..130 {
        a.append(located(t as f64, 35.0, 139.0, MovingState::Stationary), &config);
    }

    let mut b = TimelineItem::new(ItemKind::Path, located(140.0, 35.0, 139.0, MovingState::Moving), &config);
    for i in 1..20 {
        let t = 140.0 + i as f64;
        b.append(located(t, 35.0, 139.0 + 0.001 * i as f64, MovingState::Moving), &config);
    }

    let mut c = TimelineItem::new(ItemKind::Visit, located(200.0, 35.02, 139.02, MovingState::Stationary), &config);
    for t in 201..330 {
        c.append(located(t as f64, 35.02, 139.02, MovingState::Stationary), &config);
    }

    a.next_item_id = Some(b.id);
    b.previous_item_id = Some(a.id);
    b.next_item_id = Some(c.id);
    c.previous_item_id = Some(b.id);

    let (a_id, b_id, c_id) = (a.id, b.id, c.id);
    store.save_item(a, true).unwrap();
    store.save_item(b, true).unwrap();
    store.save_item(c, true).unwrap();

    store.delete_item(b_id).unwrap();
    assert!(store.get_item(b_id).unwrap().deleted);
    assert!(store.get_item(a_id).unwrap().next_item_id.is_none());
    assert!(store.get_item(c_id).unwrap().previous_item_id.is_none());

    processor.heal_edges(&store, a_id).unwrap();
    processor.heal_edges(&store, c_id).unwrap();

    let healed_a = store.get_item(a_id).unwrap();
    let healed_c = store.get_item(c_id).unwrap();
    assert_eq!(healed_a.next_item_id, Some(c_id));
    assert_eq!(healed_c.previous_item_id, Some(a_id));
}

/// Spec §8 scenario 2 ("Path segmentation"): 60 stationary samples at A, then
/// 120 samples moving 600 m in a straight line, then 60 stationary samples at
/// B, all through `TimelineRecorder::record` at 1 Hz. Expects exactly
/// {Visit@A, Path, Visit@B} in that order, `Path.distance ≈ 600 m ± 50 m`,
/// and both forward links (`Visit@A.next = Path`, `Path.next = Visit@B`)
/// intact. A and B sit 60 m off the path's own endpoints so the keeper
/// path's `maxMergeableDistance` (well under 60 m at this speed) never
/// mistakes either visit for a mergeable neighbour mid-stream.
#[test]
fn path_segmentation_produces_three_linked_items_with_expected_distance() {
    let store = store();
    let mut recorder = TimelineRecorder::new(Config::default(), Arc::new(EventBus::new()));

    const METERS_PER_DEGREE: f64 = 111_320.0;
    let to_lon_delta = |meters: f64| meters / METERS_PER_DEGREE;

    let a_lon = 0.0;
    let path_start_lon = a_lon + to_lon_delta(60.0);
    let path_samples = 120usize;
    let path_total_m = 600.0;
    let step_m = path_total_m / (path_samples as f64 - 1.0);
    let step_lon = to_lon_delta(step_m);
    let path_end_lon = path_start_lon + step_lon * (path_samples as f64 - 1.0);
    let b_lon = path_end_lon + to_lon_delta(60.0);

    let mut t = 0.0;
    for _ in 0..60 {
        recorder.record(&store, located(t, 0.0, a_lon, MovingState::Stationary)).unwrap();
        t += 1.0;
    }
    for i in 0..path_samples {
        let lon = path_start_lon + step_lon * i as f64;
        recorder.record(&store, located(t, 0.0, lon, MovingState::Moving)).unwrap();
        t += 1.0;
    }
    for _ in 0..60 {
        recorder.record(&store, located(t, 0.0, b_lon, MovingState::Stationary)).unwrap();
        t += 1.0;
    }

    let active = recorder.active_items();
    assert_eq!(active.len(), 3);

    let visit_a = store.get_item(active[0]).unwrap();
    let path = store.get_item(active[1]).unwrap();
    let visit_b = store.get_item(active[2]).unwrap();

    assert_eq!(visit_a.kind, ItemKind::Visit);
    assert_eq!(path.kind, ItemKind::Path);
    assert_eq!(visit_b.kind, ItemKind::Visit);

    assert!((path.distance() - 600.0).abs() < 50.0, "distance was {}", path.distance());

    assert_eq!(visit_a.next_item_id, Some(path.id));
    assert_eq!(path.next_item_id, Some(visit_b.id));
}

/// A duplicate/jittery cluster whose whole timestamp range sits inside a
/// long-lived keeper visit is fully absorbed by it, end to end through
/// `MergeEngine::run` rather than a single hand-invoked scoring call.
#[test]
fn a_nested_duplicate_cluster_is_absorbed_into_the_dominant_keeper_visit() {
    let store = store();
    let config = Config::default();

    let mut keeper = TimelineItem::new(ItemKind::Visit, located(0.0, 35.0, 139.0, MovingState::Stationary), &config);
    for t in 1..150 {
        keeper.append(located(t as f64, 35.0, 139.0, MovingState::Stationary), &config);
    }

    let duplicate = TimelineItem::new(ItemKind::Visit, located(75.0, 35.00001, 139.00001, MovingState::Stationary), &config);

    let (keeper_id, duplicate_id) = (keeper.id, duplicate.id);
    keeper.next_item_id = Some(duplicate_id);
    let mut duplicate = duplicate;
    duplicate.previous_item_id = Some(keeper_id);

    store.save_item(keeper, true).unwrap();
    store.save_item(duplicate, true).unwrap();

    let engine = MergeEngine::new(&config);
    let outcome = engine.run(&store, duplicate_id).unwrap();

    assert_eq!(outcome.keeper, keeper_id);
    assert!(outcome.consumed.contains(&duplicate_id));
    assert!(store.get_item(duplicate_id).unwrap().deleted);

    let survivor = store.get_item(keeper_id).unwrap();
    assert!(survivor.sample_count() >= 150);
}
