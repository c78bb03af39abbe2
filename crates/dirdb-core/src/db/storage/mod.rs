//! Module: db::storage
//! Responsibility: the transactional key/value capability consumed by indexes.
//! Does not own: locking, retry, or durability; engines implement those.
//! Boundary: every index read and write goes through these traits.

pub mod memory;

#[cfg(test)]
mod tests;

use crate::error::InternalError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// StorageError
///

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("tree '{0}' is not open")]
    TreeNotOpen(TreeName),

    #[error("transaction conflict on tree '{0}'")]
    Conflict(TreeName),

    #[error("storage engine failure: {0}")]
    Engine(String),
}

///
/// TreeName
///
/// Name of one ordered tree: the owning container prefix plus the index id.
/// Ordering is prefix first, then index id.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TreeName {
    prefix: String,
    index_id: String,
}

impl TreeName {
    #[must_use]
    pub fn new(prefix: impl Into<String>, index_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            index_id: index_id.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Stable byte form, used as the key of per-index rows in side stores.
    #[must_use]
    pub fn to_key_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for TreeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.prefix, self.index_id)
    }
}

///
/// Cursor
///
/// Positioned iterator over one tree. A fresh cursor is unpositioned:
/// `next` moves it to the first key and `previous` to the last one.
///

pub trait Cursor {
    /// Position on exactly `key`.
    fn seek_to(&mut self, key: &[u8]) -> bool;

    /// Position on the first key at or after `key`.
    fn seek_to_or_after(&mut self, key: &[u8]) -> bool;

    fn seek_to_last(&mut self) -> bool;

    fn next(&mut self) -> bool;

    fn previous(&mut self) -> bool;

    fn key(&self) -> Option<&[u8]>;

    fn value(&self) -> Option<&[u8]>;
}

///
/// ReadableTransaction
///

pub trait ReadableTransaction {
    /// Non-exclusive read of one key.
    fn read(&self, tree: &TreeName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn open_cursor(&self, tree: &TreeName) -> Result<Box<dyn Cursor + '_>, StorageError>;
}

///
/// CommitHook
///
/// In-memory follow-up of a write, run once its transaction has committed.
///

pub type CommitHook = Box<dyn FnOnce() + Send>;

///
/// WriteableTransaction
///

pub trait WriteableTransaction: ReadableTransaction {
    fn open_tree(&mut self, tree: &TreeName) -> Result<(), StorageError>;

    /// Remove a tree and all of its rows.
    fn delete_tree(&mut self, tree: &TreeName) -> Result<(), StorageError>;

    /// Read one key, locking it until the transaction ends.
    fn read_for_update(
        &mut self,
        tree: &TreeName,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Store `value` only when `key` is absent; returns whether it was stored.
    fn put_if_absent(
        &mut self,
        tree: &TreeName,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError>;

    /// Remove `key`; returns whether it existed.
    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> Result<bool, StorageError>;

    /// Run `hook` after this transaction commits. Hooks run in registration
    /// order and are dropped unrun if the transaction aborts.
    fn on_commit(&mut self, hook: CommitHook);
}

///
/// Storage
///
/// Entry point of a storage engine. A read closure sees one stable snapshot;
/// a write closure's effects become visible atomically when it returns `Ok`
/// and are discarded when it returns `Err`. Commit hooks run after the
/// effects are published and before the next writer starts.
///

pub trait Storage: Send + Sync {
    fn read<T>(
        &self,
        op: impl FnOnce(&dyn ReadableTransaction) -> Result<T, InternalError>,
    ) -> Result<T, InternalError>;

    fn write<T>(
        &self,
        op: impl FnOnce(&mut dyn WriteableTransaction) -> Result<T, InternalError>,
    ) -> Result<T, InternalError>;
}
