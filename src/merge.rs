//! `MergeEngine` (C8): folds a short-lived or redundant neighbour into a
//! keeper item. Runs after every `TimelineRecorder` extend, starting from
//! the just-touched item and walking backward through `previousItem`.

use crate::config::Config;
use crate::error::{LocoError, Result};
use crate::item::TimelineItem;
use crate::spatial;
use crate::storage::StorageBackend;
use crate::store::TimelineStore;
use loci_types::{Coordinate, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsumptionScore {
    Impossible,
    VeryLow,
    Low,
    Medium,
    High,
    Perfect,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    /// Keeper precedes the consumed chain; its `next_item_id` is rewritten.
    Next,
    /// Keeper follows the consumed chain; its `previous_item_id` is rewritten.
    Previous,
}

#[derive(Debug, Clone)]
struct Candidate {
    keeper: ItemId,
    /// Ordered nearest-to-keeper first, farthest last.
    consumed: Vec<ItemId>,
    side: Side,
    score: ConsumptionScore,
}

pub struct MergeOutcome {
    pub keeper: ItemId,
    pub consumed: Vec<ItemId>,
}

pub struct MergeEngine {
    config: Config,
}

impl MergeEngine {
    pub fn new(config: &Config) -> Self {
        Self { config: config.clone() }
    }

    /// Run to fixpoint starting from `current_id`. Every accepted merge
    /// strictly reduces the active-item count, so this always terminates.
    pub fn run<B: StorageBackend>(&self, store: &TimelineStore<B>, current_id: ItemId) -> Result<MergeOutcome> {
        let mut current_id = current_id;
        let mut consumed_all = Vec::new();

        loop {
            self.sanitise_edges(store, current_id)?;

            let Some(current) = store.get_item(current_id) else {
                break;
            };
            let candidates = self.enumerate_candidates(store, &current)?;
            let Some(best) = candidates.into_iter().max_by_key(|c| c.score) else {
                break;
            };
            if best.score == ConsumptionScore::Impossible {
                break;
            }

            tracing::debug!(keeper = %best.keeper, consumed = ?best.consumed, score = ?best.score, "executing merge");
            self.execute(store, &best)?;
            consumed_all.extend(best.consumed.iter().copied());
            current_id = best.keeper;
        }

        Ok(MergeOutcome {
            keeper: current_id,
            consumed: consumed_all,
        })
    }

    fn enumerate_candidates<B: StorageBackend>(&self, store: &TimelineStore<B>, current: &TimelineItem) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let Some(prev) = current.previous_item_id.and_then(|id| store.get_item(id)) else {
            return Ok(candidates);
        };

        candidates.push(Candidate {
            keeper: prev.id,
            consumed: vec![current.id],
            side: Side::Next,
            score: self.consumption_score(&prev, current),
        });
        candidates.push(Candidate {
            keeper: current.id,
            consumed: vec![prev.id],
            side: Side::Previous,
            score: self.consumption_score(current, &prev),
        });

        if let Some(outer) = prev.previous_item_id.and_then(|id| store.get_item(id)) {
            candidates.push(Candidate {
                keeper: outer.id,
                consumed: vec![prev.id],
                side: Side::Next,
                score: self.consumption_score(&outer, &prev),
            });
            candidates.push(Candidate {
                keeper: prev.id,
                consumed: vec![outer.id],
                side: Side::Previous,
                score: self.consumption_score(&prev, &outer),
            });

            let middle_keepness = prev.keepness(&self.config);
            if middle_keepness < outer.keepness(&self.config) && middle_keepness < current.keepness(&self.config) {
                candidates.push(Candidate {
                    keeper: outer.id,
                    consumed: vec![prev.id, current.id],
                    side: Side::Next,
                    score: self.consumption_score(&outer, &prev).min(self.consumption_score(&outer, current)),
                });
                candidates.push(Candidate {
                    keeper: current.id,
                    consumed: vec![prev.id, outer.id],
                    side: Side::Previous,
                    score: self.consumption_score(current, &prev).min(self.consumption_score(current, &outer)),
                });
            }
        }

        Ok(candidates)
    }

    fn execute<B: StorageBackend>(&self, store: &TimelineStore<B>, candidate: &Candidate) -> Result<()> {
        let mut keeper = store
            .get_item(candidate.keeper)
            .ok_or_else(|| LocoError::NotFound("merge keeper vanished mid-run".into()))?;

        let far_id = *candidate.consumed.last().expect("candidate always has at least one consumed item");
        let far_pointer = store.get_item(far_id).and_then(|far| match candidate.side {
            Side::Next => far.next_item_id,
            Side::Previous => far.previous_item_id,
        });

        for id in &candidate.consumed {
            if let Some(mut victim) = store.get_item(*id) {
                let drained = victim.drain_samples(&self.config);
                keeper.absorb(drained, &self.config);
            }
        }

        match candidate.side {
            Side::Next => keeper.next_item_id = far_pointer,
            Side::Previous => keeper.previous_item_id = far_pointer,
        }
        store.save_item(keeper, false)?;

        for id in &candidate.consumed {
            store.discard_already_unlinked(*id)?;
        }
        Ok(())
    }

    /// Move boundary samples across an adjacent (Visit, Path) pair so each
    /// sample lives in the item its coordinate actually belongs to. Runs to
    /// a fixpoint (bounded, with a sample-count fingerprint as the cycle
    /// guard) before candidate scoring.
    fn sanitise_edges<B: StorageBackend>(&self, store: &TimelineStore<B>, current_id: ItemId) -> Result<()> {
        let Some(current) = store.get_item(current_id) else {
            return Ok(());
        };
        let Some(prev) = current.previous_item_id.and_then(|id| store.get_item(id)) else {
            return Ok(());
        };
        if current.kind == prev.kind {
            return Ok(());
        }

        let (visit_id, path_id, path_is_after) = if current.kind == crate::item::ItemKind::Visit {
            (current.id, prev.id, false)
        } else {
            (prev.id, current.id, true)
        };

        let mut last_fingerprint = None;
        for _ in 0..8 {
            let Some(mut visit) = store.get_item(visit_id) else { break };
            let Some(mut path) = store.get_item(path_id) else { break };
            let fingerprint = (visit.sample_count(), path.sample_count());
            if last_fingerprint == Some(fingerprint) {
                break;
            }
            last_fingerprint = Some(fingerprint);

            let changed = self.sanitise_pair(&mut visit, &mut path, path_is_after);
            if !changed {
                break;
            }
            store.save_item(visit, false)?;
            store.save_item(path, false)?;
        }
        Ok(())
    }

    fn sanitise_pair(&self, visit: &mut TimelineItem, path: &mut TimelineItem, path_is_after: bool) -> bool {
        let Some(center) = visit.center() else { return false };
        let radius = visit.radius();
        let threshold = radius.mean + radius.sd;
        let mut changed = false;

        let boundary_ids: Vec<_> = if path_is_after {
            path.samples()
                .iter()
                .take_while(|s| within(s.coordinate(), center, threshold))
                .map(|s| s.id)
                .collect()
        } else {
            path.samples()
                .iter()
                .rev()
                .take_while(|s| within(s.coordinate(), center, threshold))
                .map(|s| s.id)
                .collect()
        };
        for id in boundary_ids {
            if let Some(sample) = path.remove(id, &self.config) {
                visit.append(sample, &self.config);
                changed = true;
            }
        }

        let outlier_ids: Vec<_> = visit
            .samples()
            .iter()
            .filter(|s| !within(s.coordinate(), center, threshold))
            .map(|s| s.id)
            .collect();
        for id in outlier_ids {
            if let Some(sample) = visit.remove(id, &self.config) {
                path.append(sample, &self.config);
                changed = true;
            }
        }

        changed
    }

    fn consumption_score(&self, consumer: &TimelineItem, consumee: &TimelineItem) -> ConsumptionScore {
        use ConsumptionScore::*;
        use crate::item::ItemKind::*;

        if consumee.is_empty() {
            return Perfect;
        }
        if consumer.is_empty() {
            return Impossible;
        }

        let time_sep = time_separation(consumer, consumee);
        let separation = physical_separation(consumer, consumee);
        let max_distance = max_mergeable_distance(&self.config, consumer, consumee, time_sep);
        if separation > max_distance {
            return Impossible;
        }

        match (consumer.kind, consumee.kind) {
            (Visit, Visit) => {
                // Concurrent clusters (duplicate detections of the same stay) are the
                // strongest case; merely nearby-in-time visits within merge distance
                // (a keeper split by a brief interloper) still merge, just more weakly.
                if ranges_overlap(consumer, consumee) {
                    if consumer.duration() >= consumee.duration() {
                        Perfect
                    } else {
                        High
                    }
                } else if consumer.duration() >= consumee.duration() {
                    Medium
                } else {
                    Low
                }
            }
            (Visit, Path) => {
                if consumer.is_valid(&self.config) && !consumee.is_valid(&self.config) {
                    if (inside_fraction(consumee, center_and_radius(consumer)) - 1.0).abs() < 1e-9 {
                        Low
                    } else {
                        VeryLow
                    }
                } else {
                    VeryLow
                }
            }
            (Path, Visit) => {
                // A keeper visit never simply vanishes into a path.
                if consumee.is_worth_keeping(&self.config) {
                    Impossible
                } else if consumer.is_worth_keeping(&self.config) {
                    if !consumee.is_valid(&self.config) {
                        Medium
                    } else {
                        Low
                    }
                } else if consumer.is_valid(&self.config) {
                    if !consumee.is_valid(&self.config) {
                        Low
                    } else {
                        VeryLow
                    }
                } else {
                    VeryLow
                }
            }
            (Path, Path) => {
                if !self.config.merge.activity_type_separation_enabled {
                    return Medium;
                }
                if consumee.is_worth_keeping(&self.config) {
                    return Impossible;
                }
                let Some(moving_type) = consumer.moving_type() else {
                    return Impossible;
                };
                let score = consumee
                    .classifier_results()
                    .map(|r| r.get(moving_type))
                    .unwrap_or(0.0)
                    * 1000.0;
                if score >= 75.0 {
                    Perfect
                } else if score >= 50.0 {
                    High
                } else if score >= 25.0 {
                    Medium
                } else if score >= 10.0 {
                    Low
                } else {
                    VeryLow
                }
            }
        }
    }
}

fn within(coord: Option<Coordinate>, center: Coordinate, threshold: f64) -> bool {
    match coord {
        Some(c) => spatial::distance_between(center, c) <= threshold,
        None => false,
    }
}

fn center_and_radius(item: &TimelineItem) -> (Coordinate, f64) {
    (item.center().unwrap_or(Coordinate::NULL_ISLAND), item.radius().sd2())
}

fn inside_fraction(path: &TimelineItem, (center, radius): (Coordinate, f64)) -> f64 {
    let total = path.samples().len();
    if total == 0 {
        return 1.0;
    }
    let inside = path
        .samples()
        .iter()
        .filter(|s| match s.coordinate() {
            Some(c) => spatial::distance_between(center, c) <= radius,
            None => true,
        })
        .count();
    inside as f64 / total as f64
}

fn ranges_overlap(a: &TimelineItem, b: &TimelineItem) -> bool {
    match (a.date_range(), b.date_range()) {
        (Some((a0, a1)), Some((b0, b1))) => a0 <= b1 && b0 <= a1,
        _ => false,
    }
}

fn order_by_time<'a>(a: &'a TimelineItem, b: &'a TimelineItem) -> (&'a TimelineItem, &'a TimelineItem) {
    match (a.start(), b.start()) {
        (Some(sa), Some(sb)) if sb < sa => (b, a),
        _ => (a, b),
    }
}

fn time_separation(a: &TimelineItem, b: &TimelineItem) -> f64 {
    let (earlier, later) = order_by_time(a, b);
    match (earlier.end(), later.start()) {
        (Some(end), Some(start)) => (start - end).max(0.0),
        _ => 0.0,
    }
}

fn boundary_coordinate(item: &TimelineItem, want_start: bool) -> Option<Coordinate> {
    use crate::item::ItemKind::*;
    match item.kind {
        Visit => item.center(),
        Path => {
            let sample = if want_start { item.samples().first() } else { item.samples().last() };
            sample.and_then(|s| s.coordinate())
        }
    }
}

fn physical_separation(a: &TimelineItem, b: &TimelineItem) -> f64 {
    use crate::item::ItemKind::*;
    match (a.kind, b.kind) {
        (Visit, Visit) => match (a.center(), b.center()) {
            (Some(ca), Some(cb)) => spatial::distance_between(ca, cb) - (a.radius().sd2() + b.radius().sd2()),
            _ => f64::INFINITY,
        },
        _ => {
            let (earlier, later) = order_by_time(a, b);
            match (boundary_coordinate(earlier, false), boundary_coordinate(later, true)) {
                (Some(p1), Some(p2)) => spatial::distance_between(p1, p2),
                _ => f64::INFINITY,
            }
        }
    }
}

fn max_mergeable_distance(config: &Config, a: &TimelineItem, b: &TimelineItem, time_separation: f64) -> f64 {
    use crate::item::ItemKind::*;
    match (a.kind, b.kind) {
        (Visit, Visit) => a.radius().sd2() + b.radius().sd2(),
        (Visit, Path) | (Path, Visit) => {
            let path = if a.kind == Path { a } else { b };
            path.mps() * time_separation * config.merge.max_mergeable_distance_multiplier
        }
        (Path, Path) => ((a.mps() + b.mps()) / 2.0) * time_separation * config.merge.max_mergeable_distance_multiplier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::item::ItemKind;
    use crate::sample::LocomotionSample;
    use crate::storage::MemoryBackend;
    use loci_types::{LocationFix, MovingState, RecordingState};
    use std::sync::Arc;

    fn store() -> TimelineStore<MemoryBackend> {
        TimelineStore::open(MemoryBackend::new(), Default::default(), Arc::new(EventBus::new())).unwrap()
    }

    fn stationary_at(t: f64, lat: f64, lon: f64) -> LocomotionSample {
        LocomotionSample::new(t, MovingState::Stationary, RecordingState::Recording).with_location(LocationFix {
            coordinate: Coordinate::new(lat, lon),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 1.0,
            timestamp: t,
        })
    }

    #[test]
    fn a_tiny_interloper_visit_between_two_keeper_visits_is_consumed() {
        let store = store();
        let config = Config::default();

        let mut keeper_a = TimelineItem::new(ItemKind::Visit, stationary_at(0.0, 35.0, 139.0), &config);
        for t in 1..200 {
            keeper_a.append(stationary_at(t as f64, 35.0, 139.0), &config);
        }

        let mut interloper = TimelineItem::new(ItemKind::Visit, stationary_at(205.0, 35.00002, 139.00002), &config);
        interloper.append(stationary_at(208.0, 35.00002, 139.00002), &config);
        interloper.previous_item_id = Some(keeper_a.id);
        keeper_a.next_item_id = Some(interloper.id);

        let mut keeper_b = TimelineItem::new(ItemKind::Visit, stationary_at(212.0, 35.0, 139.0), &config);
        for t in 213..400 {
            keeper_b.append(stationary_at(t as f64, 35.0, 139.0), &config);
        }
        keeper_b.previous_item_id = Some(interloper.id);
        interloper.next_item_id = Some(keeper_b.id);

        let (a_id, interloper_id, b_id) = (keeper_a.id, interloper.id, keeper_b.id);
        store.save_item(keeper_a, true).unwrap();
        store.save_item(interloper, true).unwrap();
        store.save_item(keeper_b, true).unwrap();

        let engine = MergeEngine::new(&config);
        let outcome = engine.run(&store, b_id).unwrap();

        assert!(outcome.consumed.contains(&interloper_id));
        assert!(store.get_item(interloper_id).unwrap().deleted);
        let survivor = store.get_item(outcome.keeper).unwrap();
        assert!(survivor.id == a_id || survivor.id == b_id);
    }
}
