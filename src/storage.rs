//! `StorageBackend` (A5): a key/value abstraction over byte keys and
//! serialized-entity values, keyed by `"<entity-kind>/<id>"`. Two
//! implementors ship here: `MemoryBackend` (no durability) and, behind the
//! `aof` feature, `AofBackend` (crash-safe via an append-only log).

use crate::error::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// One stored record: raw serialized bytes plus an optional TTL, mirroring
/// the spatio key/value item shape. Timeline entities never set
/// `expires_at`; it exists so the trait generalizes to future entity kinds
/// that might.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub value: Bytes,
    pub expires_at: Option<SystemTime>,
}

impl StoredItem {
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageOp {
    Put { key: Bytes, item: StoredItem },
    Delete { key: Bytes },
}

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub key_count: usize,
    pub expired_count: usize,
    pub size_bytes: usize,
    pub operations_count: u64,
}

pub trait StorageBackend: Send + Sync {
    fn put(&mut self, key: &[u8], item: &StoredItem) -> Result<()>;
    fn get(&self, key: &[u8]) -> Result<Option<StoredItem>>;
    fn delete(&mut self, key: &[u8]) -> Result<Option<StoredItem>>;
    fn contains_key(&self, key: &[u8]) -> Result<bool>;
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Bytes, StoredItem>>;
    fn len(&self) -> Result<usize>;
    fn is_empty(&self) -> Result<bool>;
    fn sync(&mut self) -> Result<()>;
    fn stats(&self) -> Result<StorageStats>;
    fn batch(&mut self, ops: &[StorageOp]) -> Result<()>;
    fn cleanup_expired(&mut self, now: SystemTime) -> Result<usize>;
}

/// In-memory backend used for tests and ephemeral engines.
#[derive(Default)]
pub struct MemoryBackend {
    data: BTreeMap<Bytes, StoredItem>,
    stats: StorageStats,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&mut self, key: &[u8], item: &StoredItem) -> Result<()> {
        let key_bytes = Bytes::copy_from_slice(key);
        let old = self.data.insert(key_bytes, item.clone());
        if old.is_none() {
            self.stats.key_count += 1;
        }
        self.stats.operations_count += 1;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<StoredItem>> {
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<StoredItem>> {
        let old = self.data.remove(key);
        if old.is_some() {
            self.stats.key_count = self.stats.key_count.saturating_sub(1);
        }
        self.stats.operations_count += 1;
        Ok(old)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        Ok(self
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Bytes, StoredItem>> {
        Ok(self
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.data.is_empty())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let mut stats = self.stats.clone();
        stats.key_count = self.data.len();
        stats.size_bytes = self.data.iter().map(|(k, v)| k.len() + v.value.len()).sum();
        Ok(stats)
    }

    fn batch(&mut self, ops: &[StorageOp]) -> Result<()> {
        for op in ops {
            match op {
                StorageOp::Put { key, item } => self.put(key, item)?,
                StorageOp::Delete { key } => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }

    fn cleanup_expired(&mut self, now: SystemTime) -> Result<usize> {
        let expired: Vec<Bytes> = self
            .data
            .iter()
            .filter(|(_, item)| item.expires_at.is_some_and(|exp| exp <= now))
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.data.remove(&key);
        }
        self.stats.key_count = self.data.len();
        self.stats.expired_count += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let mut backend = MemoryBackend::new();
        let item = StoredItem::new(Bytes::from_static(b"payload"));
        backend.put(b"item/1", &item).unwrap();
        assert!(backend.contains_key(b"item/1").unwrap());
        let got = backend.get(b"item/1").unwrap().unwrap();
        assert_eq!(got.value, item.value);
        let removed = backend.delete(b"item/1").unwrap().unwrap();
        assert_eq!(removed.value, item.value);
        assert!(!backend.contains_key(b"item/1").unwrap());
    }

    #[test]
    fn prefix_scan_is_scoped_to_entity_kind() {
        let mut backend = MemoryBackend::new();
        let item = StoredItem::new(Bytes::from_static(b"x"));
        backend.put(b"item/1", &item).unwrap();
        backend.put(b"item/2", &item).unwrap();
        backend.put(b"sample/1", &item).unwrap();

        assert_eq!(backend.keys_with_prefix(b"item/").unwrap().len(), 2);
        assert_eq!(backend.scan_prefix(b"sample/").unwrap().len(), 1);
    }
}
