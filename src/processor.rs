//! `PersistentProcessor` (C9): maintenance operations over a whole store --
//! carving a user-requested segment out of the existing timeline, healing
//! edges left broken by an edit, bridging data gaps with a synthetic
//! off-state Path, and sweeping orphaned samples back into the timeline.

use crate::config::Config;
use crate::error::{LocoError, Result};
use crate::item::{ItemKind, TimelineItem};
use crate::sample::LocomotionSample;
use crate::storage::StorageBackend;
use crate::store::TimelineStore;
use loci_types::{ActivityType, ItemId, MovingState, RecordingState};

pub struct PersistentProcessor {
    config: Config,
}

impl PersistentProcessor {
    pub fn new(config: &Config) -> Self {
        Self { config: config.clone() }
    }

    /// Carve `[start, end]` out of whatever items currently occupy it and
    /// hand the stolen samples to a fresh item of the kind implied by
    /// `activity_type`. Aborts (returns an error) if any overlapping donor
    /// is merge-locked.
    pub fn extract_item_from_segment<B: StorageBackend>(
        &self,
        store: &TimelineStore<B>,
        start: f64,
        end: f64,
        activity_type: ActivityType,
    ) -> Result<Option<ItemId>> {
        let donors = store.find_items(|i| !i.deleted && overlaps(i, start, end));
        if donors.iter().any(|d| d.is_merge_locked) {
            tracing::warn!(start, end, "extract_item_from_segment aborted: overlapping donor is merge-locked");
            return Err(LocoError::MergeLocked("overlapping donor item is merge-locked".into()));
        }
        if donors.is_empty() {
            return Ok(None);
        }

        let mut stolen = Vec::new();
        let mut touched = Vec::new();

        for donor in donors {
            let contains_whole_range = donor.start().is_some_and(|s| s <= start) && donor.end().is_some_and(|e| e >= end);
            let samples_in_range: Vec<_> = donor
                .samples()
                .iter()
                .filter(|s| s.timestamp >= start && s.timestamp <= end)
                .map(|s| s.id)
                .collect();

            if samples_in_range.is_empty() {
                continue;
            }

            let mut donor = donor;
            if contains_whole_range && donor.start() != Some(start) && donor.end() != Some(end) {
                // The new range sits strictly inside this donor: split off
                // the tail (> end) into a second item copying the donor's
                // kind, so the donor keeps only the head (< start).
                let tail_samples: Vec<_> = donor
                    .samples()
                    .iter()
                    .filter(|s| s.timestamp > end)
                    .cloned()
                    .collect();
                for s in &tail_samples {
                    donor.remove(s.id, &self.config);
                }
                for id in &samples_in_range {
                    if let Some(s) = donor.remove(*id, &self.config) {
                        stolen.push(s);
                    }
                }
                if !tail_samples.is_empty() {
                    let mut tail_samples = tail_samples.into_iter();
                    let mut tail_item = TimelineItem::new(donor.kind, tail_samples.next().unwrap(), &self.config);
                    for s in tail_samples {
                        tail_item.append(s, &self.config);
                    }
                    tail_item.next_item_id = donor.next_item_id;
                    donor.next_item_id = None;
                    store.save_item(tail_item, false)?;
                }
            } else {
                for id in &samples_in_range {
                    if let Some(s) = donor.remove(*id, &self.config) {
                        stolen.push(s);
                    }
                }
            }

            if donor.is_empty() {
                store.delete_item(donor.id)?;
            } else {
                touched.push(donor.id);
                store.save_item(donor, false)?;
            }
        }

        if stolen.is_empty() {
            return Ok(None);
        }
        stolen.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let kind = if activity_type == ActivityType::Stationary {
            ItemKind::Visit
        } else {
            ItemKind::Path
        };
        let mut samples = stolen.into_iter();
        let mut new_item = TimelineItem::new(kind, samples.next().unwrap(), &self.config);
        for s in samples {
            new_item.append(s, &self.config);
        }
        let new_id = new_item.id;
        store.save_item(new_item, true)?;

        self.heal_edges(store, new_id)?;
        for id in touched {
            self.heal_edges(store, id)?;
        }

        Ok(Some(new_id))
    }

    /// Reconnect a broken edge to the temporally nearest live neighbour,
    /// stealing that neighbour's existing edge only when doing so shortens
    /// the gap. Falls back to absorbing the item entirely if both edges
    /// remain broken and a live item strictly contains its range.
    pub fn heal_edges<B: StorageBackend>(&self, store: &TimelineStore<B>, item_id: ItemId) -> Result<()> {
        let Some(item) = store.get_item(item_id) else {
            return Ok(());
        };
        if item.deleted {
            return Ok(());
        }

        let mut previous_healed = item.previous_item_id.is_some();
        let mut next_healed = item.next_item_id.is_some();

        if item.previous_item_id.is_none() {
            if let Some(candidate) = self.nearest_before(store, &item) {
                let should_connect = match candidate.next_item_id.and_then(|id| store.get_item(id)) {
                    Some(existing) => gap(&candidate, &item) < gap(&candidate, &existing),
                    None => true,
                };
                if should_connect {
                    let mut fresh = store.get_item(item_id).unwrap();
                    fresh.previous_item_id = Some(candidate.id);
                    store.save_item(fresh, false)?;
                    previous_healed = true;
                }
            }
        }

        if item.next_item_id.is_none() {
            if let Some(candidate) = self.nearest_after(store, &item) {
                let should_connect = match candidate.previous_item_id.and_then(|id| store.get_item(id)) {
                    Some(existing) => gap(&item, &candidate) < gap(&existing, &candidate),
                    None => true,
                };
                if should_connect {
                    let mut fresh = store.get_item(item_id).unwrap();
                    fresh.next_item_id = Some(candidate.id);
                    store.save_item(fresh, false)?;
                    next_healed = true;
                }
            }
        }

        if !previous_healed && !next_healed {
            if let Some((start, end)) = item.date_range() {
                let container = store.find_one_item(|other| {
                    !other.deleted
                        && other.id != item.id
                        && other.start().is_some_and(|s| s <= start)
                        && other.end().is_some_and(|e| e >= end)
                });
                if let Some(mut container) = container {
                    let mut victim = store.get_item(item_id).unwrap();
                    let drained = victim.drain_samples(&self.config);
                    container.absorb(drained, &self.config);
                    store.save_item(container, false)?;
                    store.delete_item(item_id)?;
                }
            }
        }

        Ok(())
    }

    fn nearest_before<B: StorageBackend>(&self, store: &TimelineStore<B>, item: &TimelineItem) -> Option<TimelineItem> {
        let Some(start) = item.start() else { return None };
        store
            .find_items(|i| !i.deleted && i.id != item.id && i.end().is_some_and(|e| e <= start))
            .into_iter()
            .max_by(|a, b| a.end().unwrap().total_cmp(&b.end().unwrap()))
    }

    fn nearest_after<B: StorageBackend>(&self, store: &TimelineStore<B>, item: &TimelineItem) -> Option<TimelineItem> {
        let Some(end) = item.end() else { return None };
        store
            .find_items(|i| !i.deleted && i.id != item.id && i.start().is_some_and(|s| s >= end))
            .into_iter()
            .min_by(|a, b| a.start().unwrap().total_cmp(&b.start().unwrap()))
    }

    /// Bridge any adjacent pair whose temporal gap exceeds the configured
    /// threshold with a synthetic two-sample, recording-state-off Path.
    pub fn insert_data_gaps<B: StorageBackend>(&self, store: &TimelineStore<B>) -> Result<usize> {
        let candidates = store.find_items(|i| !i.deleted && i.next_item_id.is_some());
        let mut inserted = 0;

        for item in candidates {
            let Some(next_id) = item.next_item_id else { continue };
            let Some(next) = store.get_item(next_id) else { continue };
            if next.deleted {
                continue;
            }
            let (Some(end), Some(start)) = (item.end(), next.start()) else {
                continue;
            };
            if start - end <= self.config.recorder.data_gap_threshold_secs {
                continue;
            }

            let first = LocomotionSample::new(end, MovingState::Uncertain, RecordingState::Off);
            let second = LocomotionSample::new(start, MovingState::Uncertain, RecordingState::Off);
            let mut gap_item = TimelineItem::new(ItemKind::Path, first, &self.config);
            gap_item.append(second, &self.config);
            gap_item.previous_item_id = Some(item.id);
            gap_item.next_item_id = Some(next.id);
            store.save_item(gap_item, true)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Adopt orphan samples (no parent item, or a soft-deleted parent) into
    /// whichever live item's range contains their timestamp, seeding a new
    /// item keyed on moving-state when none does. Detaches edges of
    /// soft-deleted items so `heal_edges` can reconnect around them.
    pub fn sanitise_store<B: StorageBackend>(&self, store: &TimelineStore<B>) -> Result<()> {
        for deleted in store.find_items(|i| i.deleted && (i.previous_item_id.is_some() || i.next_item_id.is_some())) {
            let mut deleted = deleted;
            deleted.previous_item_id = None;
            deleted.next_item_id = None;
            store.save_item(deleted, false)?;
        }

        let orphans = store.find_samples(|s| {
            !s.deleted
                && match s.item_id {
                    None => true,
                    Some(item_id) => store.get_item(item_id).is_none_or(|i| i.deleted),
                }
        });

        for orphan in orphans {
            let host = store.find_one_item(|i| {
                !i.deleted
                    && i.date_range()
                        .is_some_and(|(start, end)| orphan.timestamp >= start && orphan.timestamp <= end)
            });
            match host {
                Some(mut item) => {
                    item.append(orphan, &self.config);
                    store.save_item(item, false)?;
                }
                None => {
                    let kind = if orphan.moving_state == MovingState::Stationary {
                        ItemKind::Visit
                    } else {
                        ItemKind::Path
                    };
                    let new_item = TimelineItem::new(kind, orphan, &self.config);
                    store.save_item(new_item, false)?;
                }
            }
        }
        Ok(())
    }
}

fn overlaps(item: &TimelineItem, start: f64, end: f64) -> bool {
    match item.date_range() {
        Some((s, e)) => s <= end && e >= start,
        None => false,
    }
}

fn gap(earlier: &TimelineItem, later: &TimelineItem) -> f64 {
    match (earlier.end(), later.start()) {
        (Some(e), Some(s)) => (s - e).abs(),
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::MemoryBackend;
    use loci_types::{Coordinate, LocationFix};
    use std::sync::Arc;

    fn store() -> TimelineStore<MemoryBackend> {
        TimelineStore::open(MemoryBackend::new(), Default::default(), Arc::new(EventBus::new())).unwrap()
    }

    fn stationary_at(t: f64) -> LocomotionSample {
        LocomotionSample::new(t, MovingState::Stationary, RecordingState::Recording).with_location(LocationFix {
            coordinate: Coordinate::new(35.0, 139.0),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 1.0,
            timestamp: t,
        })
    }

    #[test]
    fn data_gap_over_threshold_gets_bridged() {
        let store = store();
        let config = Config::default();

        let mut a = TimelineItem::new(ItemKind::Visit, stationary_at(0.0), &config);
        a.append(stationary_at(10.0), &config);
        let mut b = TimelineItem::new(ItemKind::Visit, stationary_at(10_000.0), &config);
        b.append(stationary_at(10_010.0), &config);
        a.next_item_id = Some(b.id);
        b.previous_item_id = Some(a.id);
        let a_id = a.id;
        let b_id = b.id;
        store.save_item(a, true).unwrap();
        store.save_item(b, true).unwrap();

        let processor = PersistentProcessor::new(&config);
        let inserted = processor.insert_data_gaps(&store).unwrap();
        assert_eq!(inserted, 1);

        let a_after = store.get_item(a_id).unwrap();
        assert!(a_after.next_item_id.is_some());
        assert_ne!(a_after.next_item_id, Some(b_id));
        let gap_item = store.get_item(a_after.next_item_id.unwrap()).unwrap();
        assert_eq!(gap_item.kind, ItemKind::Path);
        assert_eq!(gap_item.sample_count(), 2);
        assert_eq!(store.get_item(b_id).unwrap().previous_item_id, Some(gap_item.id));
    }

    #[test]
    fn heal_edges_reconnects_a_broken_previous_pointer() {
        let store = store();
        let config = Config::default();

        let mut a = TimelineItem::new(ItemKind::Visit, stationary_at(0.0), &config);
        a.append(stationary_at(10.0), &config);
        let b = TimelineItem::new(ItemKind::Visit, stationary_at(100.0), &config);
        let (a_id, b_id) = (a.id, b.id);
        store.save_item(a, true).unwrap();
        store.save_item(b, true).unwrap();

        let processor = PersistentProcessor::new(&config);
        processor.heal_edges(&store, b_id).unwrap();

        assert_eq!(store.get_item(b_id).unwrap().previous_item_id, Some(a_id));
        assert_eq!(store.get_item(a_id).unwrap().next_item_id, Some(b_id));
    }
}
