//! In-memory [`ResourceStore`] implementation.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::volume::{Snapshot, Volume};

use super::{RecordKind, RecordQuery, ResourceStore, StoreError, StoreTransaction};

#[derive(Clone, Debug, Default)]
struct Tables {
    volumes: BTreeMap<String, Volume>,
    snapshots: BTreeMap<String, Snapshot>,
}

#[derive(Clone, Debug)]
enum Write {
    InsertVolume(Volume),
    DeleteVolume(String),
}

/// Process-local store keeping records in ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a snapshot. Snapshots are produced outside this core; the
    /// store only needs them to validate volume sources.
    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        self.tables()
            .snapshots
            .insert(snapshot.snapshot_id.clone(), snapshot);
    }

    /// Returns the number of committed volume records.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        self.tables().volumes.len()
    }

    /// Returns a committed volume by identifier, ignoring ownership.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        self.tables().volumes.get(volume_id).cloned()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceStore for MemoryStore {
    fn begin(&self) -> Box<dyn StoreTransaction + Send + '_> {
        Box::new(MemoryTransaction {
            store: self,
            writes: Vec::new(),
        })
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    writes: Vec<Write>,
}

fn apply(volumes: &mut BTreeMap<String, Volume>, write: &Write) -> Result<(), StoreError> {
    match write {
        Write::InsertVolume(volume) => {
            if volumes.contains_key(&volume.volume_id) {
                return Err(StoreError::Conflict {
                    kind: RecordKind::Volume,
                    key: volume.volume_id.clone(),
                });
            }
            volumes.insert(volume.volume_id.clone(), volume.clone());
        }
        Write::DeleteVolume(volume_id) => {
            if volumes.remove(volume_id).is_none() {
                return Err(StoreError::NotFound {
                    kind: RecordKind::Volume,
                    key: volume_id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn unique<T>(kind: RecordKind, query: &RecordQuery, mut matches: Vec<T>) -> Result<T, StoreError> {
    let key = query.id.clone().unwrap_or_else(|| String::from("*"));
    match matches.len() {
        0 => Err(StoreError::NotFound { kind, key }),
        1 => matches.pop().ok_or(StoreError::NotFound { kind, key }),
        count => Err(StoreError::NotUnique { kind, key, count }),
    }
}

impl MemoryTransaction<'_> {
    /// Committed volumes overlaid with this transaction's staged writes.
    fn visible_volumes(&self) -> Result<BTreeMap<String, Volume>, StoreError> {
        let mut volumes = self.store.tables().volumes.clone();
        for write in &self.writes {
            apply(&mut volumes, write)?;
        }
        Ok(volumes)
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn get_volume(&self, query: &RecordQuery) -> Result<Volume, StoreError> {
        let matches = self.query_volumes(query)?;
        unique(RecordKind::Volume, query, matches)
    }

    fn query_volumes(&self, query: &RecordQuery) -> Result<Vec<Volume>, StoreError> {
        Ok(self
            .visible_volumes()?
            .into_values()
            .filter(|volume| query.matches(&volume.owner, &volume.volume_id))
            .collect())
    }

    fn get_snapshot(&self, query: &RecordQuery) -> Result<Snapshot, StoreError> {
        let matches: Vec<Snapshot> = self
            .store
            .tables()
            .snapshots
            .values()
            .filter(|snapshot| query.matches(&snapshot.owner, &snapshot.snapshot_id))
            .cloned()
            .collect();
        unique(RecordKind::Snapshot, query, matches)
    }

    fn insert_volume(&mut self, volume: Volume) -> Result<(), StoreError> {
        let write = Write::InsertVolume(volume);
        apply(&mut self.visible_volumes()?, &write)?;
        self.writes.push(write);
        Ok(())
    }

    fn delete_volume(&mut self, volume_id: &str) -> Result<(), StoreError> {
        let write = Write::DeleteVolume(volume_id.to_owned());
        apply(&mut self.visible_volumes()?, &write)?;
        self.writes.push(write);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tables = self.store.tables();
        let mut volumes = tables.volumes.clone();
        for write in &self.writes {
            apply(&mut volumes, write)?;
        }
        tables.volumes = volumes;
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        drop(self);
    }
}
