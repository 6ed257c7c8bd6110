//! `TimelineStore` (C6): a cache-first adapter over a `StorageBackend` for
//! `LocomotionSample` and `TimelineItem`. The live maps are the sole owner of
//! every instance (a lookup returns the one live copy); persistence
//! maintains the `previous`/`next` doubly linked list via insert triggers,
//! matching §4.7/§5's "no cyclic strong references, weak relations carry
//! ids" rule -- items reference neighbours by id only, and this store is
//! where those ids get resolved back to instances.

use crate::config::StoreConfig;
use crate::error::{LocoError, Result};
use crate::events::{Event, EventBus};
use crate::item::TimelineItem;
use crate::sample::LocomotionSample;
use crate::storage::{StorageBackend, StoredItem};
use bytes::Bytes;
use loci_types::{ItemId, SampleId};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex};

const ITEM_PREFIX: &str = "item/";
const SAMPLE_PREFIX: &str = "sample/";

fn item_key(id: ItemId) -> String {
    format!("{ITEM_PREFIX}{id}")
}

fn sample_key(id: SampleId) -> String {
    format!("{SAMPLE_PREFIX}{id}")
}

pub struct TimelineStore<B: StorageBackend> {
    backend: RwLock<B>,
    items: RwLock<FxHashMap<ItemId, TimelineItem>>,
    samples: RwLock<FxHashMap<SampleId, LocomotionSample>>,
    dirty_items: Mutex<FxHashSet<ItemId>>,
    dirty_samples: Mutex<FxHashSet<SampleId>>,
    config: StoreConfig,
    events: Arc<EventBus>,
}

impl<B: StorageBackend> TimelineStore<B> {
    /// Open a store over `backend`, rehydrating the live maps from whatever
    /// it already holds.
    pub fn open(backend: B, config: StoreConfig, events: Arc<EventBus>) -> Result<Self> {
        let store = Self {
            backend: RwLock::new(backend),
            items: RwLock::new(FxHashMap::default()),
            samples: RwLock::new(FxHashMap::default()),
            dirty_items: Mutex::new(FxHashSet::default()),
            dirty_samples: Mutex::new(FxHashSet::default()),
            config,
            events,
        };
        store.rehydrate()?;
        Ok(store)
    }

    fn rehydrate(&self) -> Result<()> {
        let backend = self.backend.read();
        let mut items = self.items.write();
        for (_, stored) in backend.scan_prefix(ITEM_PREFIX.as_bytes())? {
            let item: TimelineItem = serde_json::from_slice(&stored.value).map_err(|e| LocoError::Serialization(e.to_string()))?;
            items.insert(item.id, item);
        }
        let mut samples = self.samples.write();
        for (_, stored) in backend.scan_prefix(SAMPLE_PREFIX.as_bytes())? {
            let sample: LocomotionSample =
                serde_json::from_slice(&stored.value).map_err(|e| LocoError::Serialization(e.to_string()))?;
            samples.insert(sample.id, sample);
        }
        Ok(())
    }

    pub fn get_item(&self, id: ItemId) -> Option<TimelineItem> {
        self.items.read().get(&id).cloned()
    }

    pub fn get_sample(&self, id: SampleId) -> Option<LocomotionSample> {
        self.samples.read().get(&id).cloned()
    }

    pub fn find_items<F: Fn(&TimelineItem) -> bool>(&self, predicate: F) -> Vec<TimelineItem> {
        self.items.read().values().filter(|i| predicate(i)).cloned().collect()
    }

    pub fn find_one_item<F: Fn(&TimelineItem) -> bool>(&self, predicate: F) -> Option<TimelineItem> {
        self.items.read().values().find(|i| predicate(i)).cloned()
    }

    pub fn find_samples<F: Fn(&LocomotionSample) -> bool>(&self, predicate: F) -> Vec<LocomotionSample> {
        self.samples.read().values().filter(|s| predicate(s)).cloned().collect()
    }

    /// Persist an item and run the linked-list trigger: an endpoint this
    /// item now points to has its reciprocal pointer updated, and any old
    /// peer it used to point to is detached.
    pub fn save_item(&self, item: TimelineItem, immediate: bool) -> Result<()> {
        let id = item.id;
        let previous_snapshot = self.items.read().get(&id).cloned();
        let is_new = previous_snapshot.is_none();

        self.sync_link(previous_snapshot.as_ref().and_then(|p| p.previous_item_id), item.previous_item_id, id, Side::Previous);
        self.sync_link(previous_snapshot.as_ref().and_then(|p| p.next_item_id), item.next_item_id, id, Side::Next);

        self.items.write().insert(id, item);
        self.dirty_items.lock().unwrap().insert(id);

        self.events.emit(if is_new {
            Event::NewTimelineItem { item_id: id }
        } else {
            Event::UpdatedTimelineItem { item_id: id }
        });

        self.maybe_flush(immediate)
    }

    /// When `new_peer` differs from `old_peer`, point the new peer back at
    /// `owner` and detach the stale reciprocal pointer on the old peer.
    fn sync_link(&self, old_peer: Option<ItemId>, new_peer: Option<ItemId>, owner: ItemId, side: Side) {
        if old_peer == new_peer {
            return;
        }
        let mut items = self.items.write();
        if let Some(old_id) = old_peer {
            if let Some(old_item) = items.get_mut(&old_id) {
                match side {
                    Side::Previous => old_item.next_item_id = None,
                    Side::Next => old_item.previous_item_id = None,
                }
                self.dirty_items.lock().unwrap().insert(old_id);
            }
        }
        if let Some(new_id) = new_peer {
            if let Some(new_item) = items.get_mut(&new_id) {
                match side {
                    Side::Previous => new_item.next_item_id = Some(owner),
                    Side::Next => new_item.previous_item_id = Some(owner),
                }
                self.dirty_items.lock().unwrap().insert(new_id);
            }
        }
    }

    /// Soft-delete an item, detaching both its peers.
    pub fn delete_item(&self, id: ItemId) -> Result<()> {
        let Some(mut item) = self.items.write().get(&id).cloned() else {
            return Ok(());
        };
        let previous = item.previous_item_id;
        let next = item.next_item_id;
        item.soft_delete();
        self.sync_link(previous, None, id, Side::Previous);
        self.sync_link(next, None, id, Side::Next);
        self.items.write().insert(id, item);
        self.dirty_items.lock().unwrap().insert(id);
        self.maybe_flush(false)
    }

    /// Soft-delete an item whose peers have already been relinked around it
    /// (the merge engine's job) without running the peer-detach trigger --
    /// running it here would sever the links `MergeEngine::execute` just set up.
    pub fn discard_already_unlinked(&self, id: ItemId) -> Result<()> {
        let mut items = self.items.write();
        if let Some(item) = items.get_mut(&id) {
            item.deleted = true;
            item.previous_item_id = None;
            item.next_item_id = None;
        }
        drop(items);
        self.dirty_items.lock().unwrap().insert(id);
        self.maybe_flush(false)
    }

    pub fn save_sample(&self, sample: LocomotionSample, immediate: bool) -> Result<()> {
        let id = sample.id;
        self.samples.write().insert(id, sample);
        self.dirty_samples.lock().unwrap().insert(id);
        self.events.emit(Event::LocomotionSampleUpdated { sample_id: id });
        self.maybe_flush(immediate)
    }

    pub fn delete_sample(&self, id: SampleId) -> Result<()> {
        let mut samples = self.samples.write();
        if let Some(sample) = samples.get_mut(&id) {
            sample.soft_delete();
            self.dirty_samples.lock().unwrap().insert(id);
        }
        drop(samples);
        self.maybe_flush(false)
    }

    fn maybe_flush(&self, immediate: bool) -> Result<()> {
        let pending = self.dirty_items.lock().unwrap().len() + self.dirty_samples.lock().unwrap().len();
        if immediate || pending >= self.config.batch_flush_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush every pending change to the backend. A save flush observes all
    /// earlier writes because this runs on the same store-write queue as
    /// every mutator (§5).
    pub fn flush(&self) -> Result<()> {
        let dirty_items: Vec<ItemId> = self.dirty_items.lock().unwrap().drain().collect();
        let dirty_samples: Vec<SampleId> = self.dirty_samples.lock().unwrap().drain().collect();

        let items = self.items.read();
        let mut backend = self.backend.write();
        for id in dirty_items {
            if let Some(item) = items.get(&id) {
                let bytes = serde_json::to_vec(item).map_err(|e| LocoError::Serialization(e.to_string()))?;
                backend.put(item_key(id).as_bytes(), &StoredItem::new(Bytes::from(bytes)))?;
            }
        }
        drop(items);

        let samples = self.samples.read();
        for id in dirty_samples {
            if let Some(sample) = samples.get(&id) {
                let bytes = serde_json::to_vec(sample).map_err(|e| LocoError::Serialization(e.to_string()))?;
                backend.put(sample_key(id).as_bytes(), &StoredItem::new(Bytes::from(bytes)))?;
            }
        }
        drop(samples);
        let result = backend.sync();
        if let Err(ref err) = result {
            tracing::error!(%err, "store flush failed to sync backend");
        }
        result
    }

    /// Physically purge soft-deleted items/samples older than
    /// `keep_deleted_for_secs`. Explicit housekeeping, never automatic.
    pub fn purge_deleted(&self, now: f64, keep_deleted_for_secs: f64) -> Result<usize> {
        let mut purged = 0usize;
        let expired_items: Vec<ItemId> = self
            .items
            .read()
            .values()
            .filter(|i| i.deleted && now - i.last_modified >= keep_deleted_for_secs)
            .map(|i| i.id)
            .collect();
        for id in expired_items {
            self.items.write().remove(&id);
            self.backend.write().delete(item_key(id).as_bytes())?;
            purged += 1;
        }

        let expired_samples: Vec<SampleId> = self
            .samples
            .read()
            .values()
            .filter(|s| s.deleted && now - s.timestamp >= keep_deleted_for_secs)
            .map(|s| s.id)
            .collect();
        for id in expired_samples {
            self.samples.write().remove(&id);
            self.backend.write().delete(sample_key(id).as_bytes())?;
            purged += 1;
        }
        Ok(purged)
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }
}

#[derive(Clone, Copy)]
enum Side {
    Previous,
    Next,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::item::ItemKind;
    use crate::storage::MemoryBackend;
    use loci_types::{MovingState, RecordingState};

    fn events() -> Arc<EventBus> {
        Arc::new(EventBus::new())
    }

    #[test]
    fn saving_an_item_with_a_next_pointer_links_the_peer_back() {
        let store = TimelineStore::open(MemoryBackend::new(), StoreConfig::default(), events()).unwrap();
        let config = Config::default();

        let seed_a = LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording);
        let item_a = TimelineItem::new(ItemKind::Visit, seed_a, &config);
        let a_id = item_a.id;
        store.save_item(item_a, true).unwrap();

        let seed_b = LocomotionSample::new(10.0, MovingState::Moving, RecordingState::Recording);
        let mut item_b = TimelineItem::new(ItemKind::Path, seed_b, &config);
        item_b.previous_item_id = Some(a_id);
        let b_id = item_b.id;
        store.save_item(item_b, true).unwrap();

        let mut item_a = store.get_item(a_id).unwrap();
        item_a.next_item_id = Some(b_id);
        store.save_item(item_a, true).unwrap();

        let refetched_b = store.get_item(b_id).unwrap();
        assert_eq!(refetched_b.previous_item_id, Some(a_id));
    }

    #[test]
    fn deleting_an_item_detaches_both_peers() {
        let store = TimelineStore::open(MemoryBackend::new(), StoreConfig::default(), events()).unwrap();
        let config = Config::default();

        let mut item_a = TimelineItem::new(
            ItemKind::Visit,
            LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording),
            &config,
        );
        let mut item_b = TimelineItem::new(
            ItemKind::Path,
            LocomotionSample::new(10.0, MovingState::Moving, RecordingState::Recording),
            &config,
        );
        let mut item_c = TimelineItem::new(
            ItemKind::Visit,
            LocomotionSample::new(20.0, MovingState::Stationary, RecordingState::Recording),
            &config,
        );
        item_a.next_item_id = Some(item_b.id);
        item_b.previous_item_id = Some(item_a.id);
        item_b.next_item_id = Some(item_c.id);
        item_c.previous_item_id = Some(item_b.id);
        let (a_id, b_id, c_id) = (item_a.id, item_b.id, item_c.id);

        store.save_item(item_a, true).unwrap();
        store.save_item(item_b, true).unwrap();
        store.save_item(item_c, true).unwrap();

        store.delete_item(b_id).unwrap();

        assert_eq!(store.get_item(a_id).unwrap().next_item_id, None);
        assert_eq!(store.get_item(c_id).unwrap().previous_item_id, None);
        assert!(store.get_item(b_id).unwrap().deleted);
    }

    #[test]
    fn purge_removes_old_soft_deleted_items() {
        let store = TimelineStore::open(MemoryBackend::new(), StoreConfig::default(), events()).unwrap();
        let config = Config::default();
        let mut item = TimelineItem::new(
            ItemKind::Visit,
            LocomotionSample::new(0.0, MovingState::Stationary, RecordingState::Recording),
            &config,
        );
        item.soft_delete();
        let id = item.id;
        store.save_item(item, true).unwrap();

        let purged = store.purge_deleted(10_000.0, 3600.0).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_item(id).is_none());
    }
}
