//! `TimelineRecorder` (C7): turns the `ActivityBrain`'s present samples into
//! the Visit/Path timeline, invoking the `MergeEngine` after every extend and
//! applying the active/finalised retention rules.

use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::item::{ItemKind, TimelineItem};
use crate::merge::MergeEngine;
use crate::sample::LocomotionSample;
use crate::store::TimelineStore;
use crate::storage::StorageBackend;
use loci_types::{ItemId, MovingState};
use std::sync::Arc;

pub struct TimelineRecorder {
    config: Config,
    events: Arc<EventBus>,
    last_recorded: Option<f64>,
    current_item_id: Option<ItemId>,
    /// Ordered newest-last; everything here is still eligible to participate
    /// in a merge or be re-extended.
    active: Vec<ItemId>,
}

impl TimelineRecorder {
    pub fn new(config: Config, events: Arc<EventBus>) -> Self {
        Self {
            config,
            events,
            last_recorded: None,
            current_item_id: None,
            active: Vec::new(),
        }
    }

    pub fn active_items(&self) -> &[ItemId] {
        &self.active
    }

    fn min_interval(&self) -> f64 {
        60.0 / self.config.recorder.samples_per_minute
    }

    /// Drain one sample into the timeline. Returns `false` when the sample
    /// was dropped by the rate cap.
    pub fn record<B: StorageBackend>(&mut self, store: &TimelineStore<B>, sample: LocomotionSample) -> crate::error::Result<bool> {
        let now = sample.timestamp;
        if let Some(last) = self.last_recorded {
            if now - last < self.min_interval() {
                return Ok(false);
            }
        }
        self.last_recorded = Some(now);

        let moving_state = sample.moving_state;
        let current = self.current_item_id.and_then(|id| store.get_item(id));

        let current_id = match current {
            Some(mut item) if item.accepts(moving_state) => {
                item.append(sample, &self.config);
                let id = item.id;
                store.save_item(item, false)?;
                id
            }
            Some(old_item) => self.start_new_item(store, Some(old_item), sample, moving_state)?,
            None => self.start_new_item(store, None, sample, moving_state)?,
        };

        self.current_item_id = Some(current_id);
        if !self.active.contains(&current_id) {
            self.active.push(current_id);
        }

        let merge = MergeEngine::new(&self.config);
        let outcome = merge.run(store, current_id)?;
        if !outcome.consumed.is_empty() {
            self.active.retain(|id| !outcome.consumed.contains(id));
            self.events.emit(Event::MergedTimelineItems {
                keeper_id: outcome.keeper,
                consumed_ids: outcome.consumed,
            });
            self.current_item_id = Some(outcome.keeper);
        }

        self.apply_retention(store)?;
        Ok(true)
    }

    fn start_new_item<B: StorageBackend>(
        &mut self,
        store: &TimelineStore<B>,
        old_item: Option<TimelineItem>,
        sample: LocomotionSample,
        moving_state: MovingState,
    ) -> crate::error::Result<ItemId> {
        let kind = match moving_state {
            MovingState::Stationary => ItemKind::Visit,
            MovingState::Moving | MovingState::Uncertain => ItemKind::Path,
        };
        let mut new_item = TimelineItem::new(kind, sample, &self.config);

        if let Some(mut old_item) = old_item {
            new_item.previous_item_id = Some(old_item.id);
            old_item.next_item_id = Some(new_item.id);
            store.save_item(old_item, false)?;
        }

        let new_id = new_item.id;
        store.save_item(new_item, false)?;
        self.events.emit(Event::NewTimelineItem { item_id: new_id });
        Ok(new_id)
    }

    /// Walk `active` newest-to-oldest; the span ending at the second-most
    /// recent keeper marks the cut point. Everything earlier moves to
    /// finalised (here: simply dropped from `active` and emitted, since a
    /// finalised item is just one no longer eligible for merge/extend -- the
    /// store remains its sole owner).
    fn apply_retention<B: StorageBackend>(&mut self, store: &TimelineStore<B>) -> crate::error::Result<()> {
        let mut keepers_seen = 0usize;
        let mut cut_at = None;
        for (idx, id) in self.active.iter().enumerate().rev() {
            let Some(item) = store.get_item(*id) else { continue };
            if item.is_worth_keeping(&self.config) {
                keepers_seen += 1;
                if keepers_seen == 2 {
                    cut_at = Some(idx);
                    break;
                }
            }
        }

        if let Some(cut) = cut_at {
            let finalised: Vec<ItemId> = self.active.drain(..cut).collect();
            for id in &finalised {
                self.events.emit(Event::FinalisedTimelineItem { item_id: *id });
            }
        }

        let retention = self.config.recorder.timeline_item_history_retention_secs;
        let now = self.last_recorded.unwrap_or(0.0);
        let stale: Vec<ItemId> = self
            .active
            .iter()
            .copied()
            .filter(|id| {
                store
                    .get_item(*id)
                    .and_then(|item| item.end())
                    .is_some_and(|end| now - end > retention)
            })
            .collect();
        self.active.retain(|id| !stale.contains(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use loci_types::{LocationFix, RecordingState};

    fn events() -> Arc<EventBus> {
        Arc::new(EventBus::new())
    }

    fn store() -> TimelineStore<MemoryBackend> {
        TimelineStore::open(MemoryBackend::new(), Default::default(), events()).unwrap()
    }

    fn stationary_sample(t: f64, lat: f64, lon: f64) -> LocomotionSample {
        LocomotionSample::new(t, MovingState::Stationary, RecordingState::Recording).with_location(LocationFix {
            coordinate: loci_types::Coordinate::new(lat, lon),
            horizontal_accuracy: 10.0,
            vertical_accuracy: 5.0,
            speed: 0.0,
            course: 0.0,
            altitude: 1.0,
            timestamp: t,
        })
    }

    #[test]
    fn rate_cap_drops_samples_too_close_together() {
        let store = store();
        let mut recorder = TimelineRecorder::new(Config::default(), events());
        assert!(recorder.record(&store, stationary_sample(0.0, 35.0, 139.0)).unwrap());
        assert!(!recorder.record(&store, stationary_sample(0.1, 35.0, 139.0)).unwrap());
        assert!(recorder.record(&store, stationary_sample(5.0, 35.0, 139.0)).unwrap());
    }

    #[test]
    fn stationary_run_stays_in_one_visit() {
        let store = store();
        let mut recorder = TimelineRecorder::new(Config::default(), events());
        for t in 0..130 {
            recorder.record(&store, stationary_sample(t as f64, 35.0, 139.0)).unwrap();
        }
        assert_eq!(recorder.active_items().len(), 1);
        let item = store.get_item(recorder.active_items()[0]).unwrap();
        assert_eq!(item.kind, ItemKind::Visit);
    }

    #[test]
    fn a_moving_sample_after_stationary_opens_a_path_and_links_it() {
        let store = store();
        let mut recorder = TimelineRecorder::new(Config::default(), events());
        recorder.record(&store, stationary_sample(0.0, 35.0, 139.0)).unwrap();
        let visit_id = recorder.active_items()[0];

        let mut moving_sample = stationary_sample(10.0, 35.01, 139.01);
        moving_sample.moving_state = MovingState::Moving;
        recorder.record(&store, moving_sample).unwrap();

        assert_eq!(recorder.active_items().len(), 2);
        let path_id = recorder.active_items()[1];
        let visit = store.get_item(visit_id).unwrap();
        let path = store.get_item(path_id).unwrap();
        assert_eq!(visit.next_item_id, Some(path_id));
        assert_eq!(path.previous_item_id, Some(visit_id));
    }
}
