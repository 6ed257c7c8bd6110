//! `AofBackend` (A5): a `MemoryBackend` fronting an append-only command log
//! for crash-safe durability. A simplified append-only-file design: no
//! cross-instance `PATH_REGISTRY` coordination or
//! background rewrite thread, because an `AofBackend` here is owned
//! exclusively by the engine's single store-write thread (§5) -- there is no
//! second writer to coordinate with, so compaction runs synchronously on
//! that same thread when triggered.

use crate::error::{LocoError, Result};
use crate::storage::{MemoryBackend, StorageBackend, StorageOp, StoredItem, StorageStats};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum AofCommand {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

struct AofFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
}

impl AofFile {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Self { file, writer, path, size })
    }

    fn append(&mut self, command: &AofCommand) -> Result<()> {
        let encoded = bincode::serialize(command).map_err(|e| LocoError::Serialization(e.to_string()))?;
        let len = encoded.len() as u32;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&encoded)?;
        self.size += 4 + encoded.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn replay<F: FnMut(AofCommand) -> Result<()>>(&mut self, mut callback: F) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;

        let mut offset = 0usize;
        while offset + 4 <= buffer.len() {
            let len = u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + len > buffer.len() {
                break;
            }
            let command: AofCommand = bincode::deserialize(&buffer[offset..offset + len])
                .map_err(|e| LocoError::Serialization(e.to_string()))?;
            offset += len;
            callback(command)?;
        }
        Ok(())
    }

    /// Rewrite the log from scratch, keeping only the entries needed to
    /// reconstruct `snapshot`. Runs synchronously: see the module doc for
    /// why that's sound here.
    fn compact(&mut self, snapshot: &MemoryBackend) -> Result<()> {
        self.sync()?;
        let compact_path = self.path.with_extension("aof.compact");
        let mut compact_file = AofFile::open(&compact_path)?;
        for (key, item) in snapshot.scan_prefix(b"")? {
            compact_file.append(&AofCommand::Put {
                key: key.to_vec(),
                value: item.value.to_vec(),
            })?;
        }
        compact_file.sync()?;
        std::fs::rename(&compact_path, &self.path)?;

        let file = OpenOptions::new().create(true).append(true).read(true).open(&self.path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);
        self.file = file;
        self.writer = writer;
        self.size = size;
        Ok(())
    }
}

/// Triggers a synchronous compaction once the log has grown past this
/// multiple of the live-data byte count it would take to rewrite it.
const DEFAULT_COMPACTION_GROWTH_MULTIPLIER: f64 = 4.0;

pub struct AofBackend {
    memory: MemoryBackend,
    log: AofFile,
    compaction_growth_multiplier: f64,
}

impl AofBackend {
    /// Open (creating if absent) the AOF at `path`, replaying it into an
    /// in-memory snapshot.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut log = AofFile::open(path)?;
        let mut memory = MemoryBackend::new();
        log.replay(|command| {
            match command {
                AofCommand::Put { key, value } => {
                    memory.put(&key, &StoredItem::new(Bytes::from(value)))?;
                }
                AofCommand::Delete { key } => {
                    memory.delete(&key)?;
                }
            }
            Ok(())
        })?;
        Ok(Self {
            memory,
            log,
            compaction_growth_multiplier: DEFAULT_COMPACTION_GROWTH_MULTIPLIER,
        })
    }

    fn maybe_compact(&mut self) -> Result<()> {
        let live_bytes = self.memory.stats()?.size_bytes.max(1) as f64;
        if self.log.size as f64 > live_bytes * self.compaction_growth_multiplier {
            self.log.compact(&self.memory)?;
        }
        Ok(())
    }
}

impl StorageBackend for AofBackend {
    fn put(&mut self, key: &[u8], item: &StoredItem) -> Result<()> {
        self.log.append(&AofCommand::Put {
            key: key.to_vec(),
            value: item.value.to_vec(),
        })?;
        self.memory.put(key, item)?;
        self.maybe_compact()
    }

    fn get(&self, key: &[u8]) -> Result<Option<StoredItem>> {
        self.memory.get(key)
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<StoredItem>> {
        self.log.append(&AofCommand::Delete { key: key.to_vec() })?;
        let old = self.memory.delete(key)?;
        self.maybe_compact()?;
        Ok(old)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.memory.contains_key(key)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        self.memory.keys_with_prefix(prefix)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<std::collections::BTreeMap<Bytes, StoredItem>> {
        self.memory.scan_prefix(prefix)
    }

    fn len(&self) -> Result<usize> {
        self.memory.len()
    }

    fn is_empty(&self) -> Result<bool> {
        self.memory.is_empty()
    }

    fn sync(&mut self) -> Result<()> {
        self.log.sync()
    }

    fn stats(&self) -> Result<StorageStats> {
        self.memory.stats()
    }

    fn batch(&mut self, ops: &[StorageOp]) -> Result<()> {
        for op in ops {
            match op {
                StorageOp::Put { key, item } => {
                    self.log.append(&AofCommand::Put {
                        key: key.to_vec(),
                        value: item.value.to_vec(),
                    })?;
                }
                StorageOp::Delete { key } => {
                    self.log.append(&AofCommand::Delete { key: key.to_vec() })?;
                }
            }
        }
        self.memory.batch(ops)?;
        self.maybe_compact()
    }

    fn cleanup_expired(&mut self, now: SystemTime) -> Result<usize> {
        self.memory.cleanup_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn replays_writes_after_reopen() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut backend = AofBackend::open(temp.path()).unwrap();
            backend.put(b"item/1", &StoredItem::new(Bytes::from_static(b"hello"))).unwrap();
            backend.put(b"item/2", &StoredItem::new(Bytes::from_static(b"world"))).unwrap();
            backend.delete(b"item/1").unwrap();
            backend.sync().unwrap();
        }

        let reopened = AofBackend::open(temp.path()).unwrap();
        assert!(!reopened.contains_key(b"item/1").unwrap());
        assert_eq!(reopened.get(b"item/2").unwrap().unwrap().value, Bytes::from_static(b"world"));
    }

    #[test]
    fn compaction_preserves_latest_state() {
        let temp = NamedTempFile::new().unwrap();
        let mut backend = AofBackend::open(temp.path()).unwrap();
        backend.compaction_growth_multiplier = 0.0;
        for i in 0..10 {
            let key = format!("item/{i}");
            backend.put(key.as_bytes(), &StoredItem::new(Bytes::from(format!("v{i}")))).unwrap();
        }
        assert_eq!(backend.len().unwrap(), 10);

        drop(backend);
        let reopened = AofBackend::open(temp.path()).unwrap();
        assert_eq!(reopened.len().unwrap(), 10);
        assert_eq!(reopened.get(b"item/5").unwrap().unwrap().value, Bytes::from_static(b"v5"));
    }
}
