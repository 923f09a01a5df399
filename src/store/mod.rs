//! Transactional record store consumed by the volume workflows.
//!
//! The store is synchronous and database-shaped: a workflow begins a
//! transaction, reads and stages writes through it, then commits or rolls
//! back. Transactions are short-lived and are never held while waiting on
//! the backend.

use thiserror::Error;

use crate::volume::{Snapshot, Volume};

mod memory;

pub use memory::MemoryStore;

/// Kind of record addressed by a store operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// A [`Volume`] record.
    Volume,
    /// A [`Snapshot`] record.
    Snapshot,
}

impl RecordKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup criteria. `None` fields match any value, so an unscoped owner
/// reaches every account's records.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordQuery {
    /// Owning account, or `None` for any owner.
    pub owner: Option<String>,
    /// Record identifier, or `None` for any identifier.
    pub id: Option<String>,
}

impl RecordQuery {
    /// Matches one identifier, optionally scoped to an owner.
    #[must_use]
    pub fn by_id(owner: Option<&str>, id: &str) -> Self {
        Self {
            owner: owner.map(str::to_owned),
            id: Some(id.to_owned()),
        }
    }

    /// Matches every record of the owner, or every record when `None`.
    #[must_use]
    pub fn by_owner(owner: Option<&str>) -> Self {
        Self {
            owner: owner.map(str::to_owned),
            id: None,
        }
    }

    /// Returns whether a record with the given owner and id matches.
    #[must_use]
    pub fn matches(&self, owner: &str, id: &str) -> bool {
        self.owner.as_deref().is_none_or(|want| want == owner)
            && self.id.as_deref().is_none_or(|want| want == id)
    }
}

/// Errors raised by the resource store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when a unique lookup matches nothing.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Record kind looked up.
        kind: RecordKind,
        /// Identifier or criteria description.
        key: String,
    },
    /// Raised when a unique lookup matches more than one record.
    #[error("{kind} lookup for {key} matched {count} records")]
    NotUnique {
        /// Record kind looked up.
        kind: RecordKind,
        /// Identifier or criteria description.
        key: String,
        /// Number of matches.
        count: usize,
    },
    /// Raised at commit when an insert collides with an existing record.
    #[error("{kind} {key} already exists")]
    Conflict {
        /// Record kind inserted.
        kind: RecordKind,
        /// Identifier of the colliding record.
        key: String,
    },
}

/// A scoped unit of work against the store.
///
/// Staged writes become visible to other transactions only on
/// [`StoreTransaction::commit`]. Dropping a transaction without committing
/// discards its writes.
pub trait StoreTransaction {
    /// Returns the single volume matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::NotUnique`].
    fn get_volume(&self, query: &RecordQuery) -> Result<Volume, StoreError>;

    /// Returns every volume matching the query, ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backing store cannot be read.
    fn query_volumes(&self, query: &RecordQuery) -> Result<Vec<Volume>, StoreError>;

    /// Returns the single snapshot matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::NotUnique`].
    fn get_snapshot(&self, query: &RecordQuery) -> Result<Snapshot, StoreError>;

    /// Stages a new volume record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the identifier is already
    /// visible to this transaction.
    fn insert_volume(&mut self, volume: Volume) -> Result<(), StoreError>;

    /// Stages removal of a volume record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the volume is not visible to
    /// this transaction.
    fn delete_volume(&mut self, volume_id: &str) -> Result<(), StoreError>;

    /// Applies all staged writes atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when a staged write no longer applies; no
    /// write is applied in that case.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards all staged writes.
    fn rollback(self: Box<Self>);
}

/// Store able to open transactions.
pub trait ResourceStore: Send + Sync {
    /// Begins a new transaction.
    fn begin(&self) -> Box<dyn StoreTransaction + Send + '_>;
}
