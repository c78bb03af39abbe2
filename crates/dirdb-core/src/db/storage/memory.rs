//! In-process storage engine.
//!
//! Trees are copy-on-write maps: a read transaction clones the tree handles
//! of the last commit, a write transaction works on its own handles under a
//! single writer lock and publishes them only when its closure succeeds.

use crate::{
    db::storage::{
        CommitHook, Cursor, ReadableTransaction, Storage, StorageError, TreeName,
        WriteableTransaction,
    },
    error::InternalError,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;
type Trees = BTreeMap<TreeName, Arc<Tree>>;

///
/// StorageStats
///
/// Point reads and writes issued against the engine since the last reset.
/// Cursor movement is not counted.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StorageStats {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl StatsCounters {
    fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

///
/// MemoryStorage
///

#[derive(Debug, Default)]
pub struct MemoryStorage {
    committed: RwLock<Trees>,
    writer: Mutex<()>,
    stats: StatsCounters,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reads.store(0, Ordering::Relaxed);
        self.stats.writes.store(0, Ordering::Relaxed);
    }

    /// Number of rows in one committed tree (diagnostics only).
    #[must_use]
    pub fn tree_len(&self, tree: &TreeName) -> usize {
        self.committed.read().get(tree).map_or(0, |t| t.len())
    }
}

impl Storage for MemoryStorage {
    fn read<T>(
        &self,
        op: impl FnOnce(&dyn ReadableTransaction) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let txn = MemoryReadTransaction {
            trees: self.committed.read().clone(),
            stats: &self.stats,
        };

        op(&txn)
    }

    fn write<T>(
        &self,
        op: impl FnOnce(&mut dyn WriteableTransaction) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let _writer = self.writer.lock();
        let mut txn = MemoryWriteTransaction {
            trees: self.committed.read().clone(),
            stats: &self.stats,
            hooks: Vec::new(),
        };

        let out = op(&mut txn)?;
        let MemoryWriteTransaction { trees, hooks, .. } = txn;
        *self.committed.write() = trees;
        for hook in hooks {
            hook();
        }

        Ok(out)
    }
}

///
/// MemoryReadTransaction
///

struct MemoryReadTransaction<'a> {
    trees: Trees,
    stats: &'a StatsCounters,
}

impl ReadableTransaction for MemoryReadTransaction<'_> {
    fn read(&self, tree: &TreeName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.stats.read();

        Ok(self.trees.get(tree).and_then(|t| t.get(key).cloned()))
    }

    fn open_cursor(&self, tree: &TreeName) -> Result<Box<dyn Cursor + '_>, StorageError> {
        Ok(Box::new(MemoryCursor::new(self.trees.get(tree).cloned())))
    }
}

///
/// MemoryWriteTransaction
///

struct MemoryWriteTransaction<'a> {
    trees: Trees,
    stats: &'a StatsCounters,
    hooks: Vec<CommitHook>,
}

impl MemoryWriteTransaction<'_> {
    fn tree_mut(&mut self, tree: &TreeName) -> Result<&mut Tree, StorageError> {
        self.trees
            .get_mut(tree)
            .map(Arc::make_mut)
            .ok_or_else(|| StorageError::TreeNotOpen(tree.clone()))
    }
}

impl ReadableTransaction for MemoryWriteTransaction<'_> {
    fn read(&self, tree: &TreeName, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.stats.read();

        Ok(self.trees.get(tree).and_then(|t| t.get(key).cloned()))
    }

    fn open_cursor(&self, tree: &TreeName) -> Result<Box<dyn Cursor + '_>, StorageError> {
        Ok(Box::new(MemoryCursor::new(self.trees.get(tree).cloned())))
    }
}

impl WriteableTransaction for MemoryWriteTransaction<'_> {
    fn open_tree(&mut self, tree: &TreeName) -> Result<(), StorageError> {
        self.trees.entry(tree.clone()).or_default();

        Ok(())
    }

    fn delete_tree(&mut self, tree: &TreeName) -> Result<(), StorageError> {
        self.stats.write();
        self.trees.remove(tree);

        Ok(())
    }

    fn read_for_update(
        &mut self,
        tree: &TreeName,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        // The single writer lock already serializes write transactions.
        self.read(tree, key)
    }

    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.stats.write();
        self.tree_mut(tree)?.insert(key.to_vec(), value.to_vec());

        Ok(())
    }

    fn put_if_absent(
        &mut self,
        tree: &TreeName,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError> {
        self.stats.write();
        let tree = self.tree_mut(tree)?;
        if tree.contains_key(key) {
            return Ok(false);
        }
        tree.insert(key.to_vec(), value.to_vec());

        Ok(true)
    }

    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> Result<bool, StorageError> {
        self.stats.write();

        Ok(self.tree_mut(tree)?.remove(key).is_some())
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }
}

///
/// MemoryCursor
///
/// Cursor over a snapshot of one tree. Failed seeks leave the cursor
/// unpositioned; failed `next`/`previous` calls keep the current position.
///

struct MemoryCursor {
    tree: Option<Arc<Tree>>,
    position: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemoryCursor {
    const fn new(tree: Option<Arc<Tree>>) -> Self {
        Self {
            tree,
            position: None,
        }
    }

    fn place(&mut self, entry: Option<(&Vec<u8>, &Vec<u8>)>) -> bool {
        match entry {
            Some((k, v)) => {
                self.position = Some((k.clone(), v.clone()));
                true
            }
            None => false,
        }
    }
}

impl Cursor for MemoryCursor {
    fn seek_to(&mut self, key: &[u8]) -> bool {
        self.position = None;
        let Some(tree) = self.tree.clone() else {
            return false;
        };

        self.place(tree.get_key_value(key))
    }

    fn seek_to_or_after(&mut self, key: &[u8]) -> bool {
        self.position = None;
        let Some(tree) = self.tree.clone() else {
            return false;
        };

        self.place(
            tree.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next(),
        )
    }

    fn seek_to_last(&mut self) -> bool {
        self.position = None;
        let Some(tree) = self.tree.clone() else {
            return false;
        };

        self.place(tree.iter().next_back())
    }

    fn next(&mut self) -> bool {
        let Some(tree) = self.tree.clone() else {
            return false;
        };

        let entry = match &self.position {
            None => tree.iter().next(),
            Some((key, _)) => tree
                .range::<[u8], _>((Bound::Excluded(key.as_slice()), Bound::Unbounded))
                .next(),
        };

        self.place(entry)
    }

    fn previous(&mut self) -> bool {
        let Some(tree) = self.tree.clone() else {
            return false;
        };

        let entry = match &self.position {
            None => tree.iter().next_back(),
            Some((key, _)) => tree
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key.as_slice())))
                .next_back(),
        };

        self.place(entry)
    }

    fn key(&self) -> Option<&[u8]> {
        self.position.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.position.as_ref().map(|(_, v)| v.as_slice())
    }
}
