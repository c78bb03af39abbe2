//! Module: db::index
//! Responsibility: attribute index trees mapping normalized keys to entry ID sets.
//! Does not own: key derivation (`Indexer`) or write combining (`IndexBuffer`).
//! Boundary: every stored key row is read and written through `Index`.

#[cfg(test)]
mod tests;

use crate::{
    db::{
        EntryID,
        buffer::IndexBuffer,
        entry::{DirectoryEntry, Indexer},
        id_set::{EntryIDSet, EntryLimit, SetChange},
        key_hex,
        state::StateStore,
        storage::{ReadableTransaction, TreeName, WriteableTransaction},
        trust::{IndexTrust, TrustState},
    },
    error::InternalError,
    obs::sink::{self, MetricsEvent},
};
use std::{
    borrow::Cow,
    cmp::Ordering as KeyOrdering,
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};
use tracing::{debug, info, trace, warn};

///
/// IndexOptions
///
/// Tuning knobs of one attribute index. A zero limit disables it.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexOptions {
    pub entry_limit: usize,
    pub maintain_count: bool,
    pub cursor_entry_limit: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            entry_limit: dirdb_config::DEFAULT_INDEX_ENTRY_LIMIT,
            maintain_count: false,
            cursor_entry_limit: dirdb_config::DEFAULT_CURSOR_ENTRY_LIMIT,
        }
    }
}

///
/// Index
///
/// One attribute index tree. Each row maps a normalized key to the
/// `EntryIDSet` of entries producing that key. Reads and key creation are
/// gated by the index trust state.
///

#[derive(Debug)]
pub struct Index {
    name: TreeName,
    label: String,
    state: StateStore,
    indexer: Box<dyn Indexer>,
    entry_limit: AtomicUsize,
    maintain_count: bool,
    cursor_entry_limit: usize,
    trust: Arc<TrustState>,
    entry_limit_exceeded: AtomicU64,
}

impl Index {
    /// Open (creating if needed) the tree of `indexer` in the container of `state`.
    ///
    /// An untrusted index over an empty container is promoted to trusted,
    /// since there is nothing to rebuild.
    pub fn open(
        txn: &mut dyn WriteableTransaction,
        state: &StateStore,
        indexer: Box<dyn Indexer>,
        options: IndexOptions,
        container_is_empty: bool,
    ) -> Result<Self, InternalError> {
        let name = TreeName::new(state.tree().prefix(), indexer.index_id());
        txn.open_tree(&name)?;

        let mut trusted = state.get_trusted(&*txn, &name)?;
        if !trusted && container_is_empty {
            state.put_trusted(txn, &name, true)?;
            trusted = true;
            info!(tree = %name, "index trusted: container is empty");
        }

        Ok(Self {
            label: name.to_string(),
            name,
            state: state.clone(),
            indexer,
            entry_limit: AtomicUsize::new(options.entry_limit),
            maintain_count: options.maintain_count,
            cursor_entry_limit: options.cursor_entry_limit,
            trust: Arc::new(TrustState::new(trusted)),
            entry_limit_exceeded: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn name(&self) -> &TreeName {
        &self.name
    }

    #[must_use]
    pub fn trust(&self) -> IndexTrust {
        self.trust.current()
    }

    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.trust.is_trusted()
    }

    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.trust.is_rebuilding()
    }

    #[must_use]
    pub const fn maintain_count(&self) -> bool {
        self.maintain_count
    }

    #[must_use]
    pub fn entry_limit(&self) -> EntryLimit {
        EntryLimit::new(self.entry_limit.load(Ordering::Relaxed), self.maintain_count)
    }

    /// Number of keys that degraded since the index was opened.
    #[must_use]
    pub fn entry_limit_exceeded_count(&self) -> u64 {
        self.entry_limit_exceeded.load(Ordering::Relaxed)
    }

    /// Change the entry limit; returns whether a rebuild is needed for keys
    /// that degraded under the old, smaller limit to enumerate again.
    pub fn set_index_entry_limit(&self, entry_limit: usize) -> bool {
        let previous = self.entry_limit.swap(entry_limit, Ordering::Relaxed);
        let effective = |limit: usize| if limit == 0 { usize::MAX } else { limit };
        let rebuild_required = effective(entry_limit) > effective(previous);

        if rebuild_required {
            info!(
                tree = %self.name,
                previous,
                entry_limit,
                "entry limit raised; rebuild required to re-enumerate degraded keys"
            );
        }

        rebuild_required
    }

    // ------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------

    /// Persist the trusted flag in `txn`. The in-memory state follows when
    /// `txn` commits.
    pub fn set_trusted(
        &self,
        txn: &mut dyn WriteableTransaction,
        trusted: bool,
    ) -> Result<(), InternalError> {
        self.state.put_trusted(txn, &self.name, trusted)?;
        self.trust.set_trusted_on_commit(txn, &self.name, &self.label, trusted);

        Ok(())
    }

    /// Toggle the process-local rebuilding flag.
    pub fn set_rebuild_status(&self, rebuilding: bool) {
        let previous = self.trust.set_rebuilding(rebuilding);
        if previous != rebuilding {
            info!(tree = %self.name, rebuilding, "index rebuild status changed");
        }
    }

    /// Record that a key expected to exist is missing and demote the index.
    pub fn report_missing_key(
        &self,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
    ) -> Result<(), InternalError> {
        warn!(tree = %self.name, key = %key_hex(key), "index corrupt: expected key is missing");
        sink::record(MetricsEvent::CorruptKey { tree: &self.label });

        self.set_trusted(txn, false)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The set stored under `key`, as far as the trust state allows.
    pub fn read_key<T>(&self, txn: &T, key: &[u8]) -> Result<EntryIDSet, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        if self.trust.is_rebuilding() {
            return Ok(EntryIDSet::UndefinedUnknown);
        }

        match txn.read(&self.name, key)? {
            Some(bytes) => EntryIDSet::from_bytes(key, &bytes),
            None if self.trust.is_trusted() => Ok(EntryIDSet::new_defined()),
            None => Ok(EntryIDSet::UndefinedUnknown),
        }
    }

    /// Whether `id` is stored under `key`; `None` when that cannot be known.
    pub fn contains_id<T>(
        &self,
        txn: &T,
        key: &[u8],
        id: EntryID,
    ) -> Result<Option<bool>, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(self.read_key(txn, key)?.contains(id))
    }

    /// Union of the sets stored between two bounds. An empty bound is open.
    pub fn read_range<T>(
        &self,
        txn: &T,
        lower: &[u8],
        upper: &[u8],
        lower_included: bool,
        upper_included: bool,
    ) -> Result<EntryIDSet, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        if !self.trust.can_serve_reads() {
            return Ok(EntryIDSet::UndefinedUnknown);
        }

        let mut cursor = txn.open_cursor(&self.name)?;
        let mut positioned = if lower.is_empty() {
            cursor.next()
        } else {
            cursor.seek_to_or_after(lower)
        };
        if positioned && !lower.is_empty() && !lower_included && cursor.key() == Some(lower) {
            positioned = cursor.next();
        }

        let mut sets = Vec::new();
        let mut total = 0usize;
        while positioned {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if !upper.is_empty() {
                match key.cmp(upper) {
                    KeyOrdering::Greater => break,
                    KeyOrdering::Equal if !upper_included => break,
                    _ => {}
                }
            }

            let set = EntryIDSet::from_bytes(key, value)?;
            let Some(ids) = set.ids() else {
                return Ok(EntryIDSet::UndefinedUnknown);
            };
            total += ids.len();
            if self.cursor_entry_limit > 0 && total > self.cursor_entry_limit {
                debug!(tree = %self.name, total, "range read exceeded cursor entry limit");
                return Ok(EntryIDSet::UndefinedUnknown);
            }
            sets.push(set);

            positioned = cursor.next();
        }

        Ok(EntryIDSet::union(&sets))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Apply one key's buffered delta.
    ///
    /// `None` for both sides deletes the row unconditionally. Empty deltas
    /// are a no-op. IDs may be given in any order.
    pub fn update_key(
        &self,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
        deleted: Option<&[EntryID]>,
        added: Option<&[EntryID]>,
    ) -> Result<(), InternalError> {
        if deleted.is_none() && added.is_none() {
            if txn.delete(&self.name, key)? {
                trace!(tree = %self.name, key = %key_hex(key), "index key deleted");
                sink::record(MetricsEvent::KeyDeleted { tree: &self.label });
            }
            return Ok(());
        }

        let deleted = ascending(deleted.unwrap_or_default());
        let added = ascending(added.unwrap_or_default());
        if deleted.is_empty() && added.is_empty() {
            return Ok(());
        }

        // A counted value always changes, so lock it up front. Otherwise only
        // a defined value needs the exclusive read.
        let stored = if self.maintain_count {
            decode_stored(key, txn.read_for_update(&self.name, key)?)?
        } else {
            match txn.read(&self.name, key)? {
                Some(peeked) => {
                    let set = EntryIDSet::from_bytes(key, &peeked)?;
                    if set.is_defined() {
                        let locked = txn.read_for_update(&self.name, key)?;
                        if locked.as_deref() == Some(peeked.as_slice()) {
                            Some(set)
                        } else {
                            decode_stored(key, locked)?
                        }
                    } else {
                        Some(set)
                    }
                }
                None => None,
            }
        };

        match stored {
            Some(set) => self.merge_existing(txn, key, set, &deleted, &added),
            None => self.create_key(txn, key, &deleted, &added),
        }
    }

    fn merge_existing(
        &self,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
        mut set: EntryIDSet,
        deleted: &[EntryID],
        added: &[EntryID],
    ) -> Result<(), InternalError> {
        match set.apply_delta(deleted, added, self.entry_limit()) {
            SetChange::Unchanged => return Ok(()),
            SetChange::LimitExceeded => self.note_limit_exceeded(key),
            SetChange::Changed => {}
        }

        self.store(txn, key, &set)?;
        sink::record(MetricsEvent::KeyUpdated {
            tree: &self.label,
            inserts: added.len() as u64,
            removes: deleted.len() as u64,
        });

        Ok(())
    }

    fn create_key(
        &self,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
        deleted: &[EntryID],
        added: &[EntryID],
    ) -> Result<(), InternalError> {
        if !deleted.is_empty() && self.trust.current() == IndexTrust::Trusted {
            self.report_missing_key(txn, key)?;
        }

        if added.is_empty() || !self.trust.can_create_keys() {
            return Ok(());
        }

        let mut set = EntryIDSet::new_defined();
        if set.add_all(added, self.entry_limit()) == SetChange::LimitExceeded {
            self.note_limit_exceeded(key);
        }
        let Some(bytes) = set.to_bytes() else {
            return Ok(());
        };

        if txn.put_if_absent(&self.name, key, &bytes)? {
            sink::record(MetricsEvent::KeyUpdated {
                tree: &self.label,
                inserts: added.len() as u64,
                removes: 0,
            });
            return Ok(());
        }

        // Another writer created the key first: merge into its value.
        match decode_stored(key, txn.read_for_update(&self.name, key)?)? {
            Some(set) => self.merge_existing(txn, key, set, deleted, added),
            None => Err(InternalError::index_invariant(format!(
                "{}: key {} vanished after a rejected create",
                self.name,
                key_hex(key)
            ))),
        }
    }

    fn store(
        &self,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
        set: &EntryIDSet,
    ) -> Result<(), InternalError> {
        match set.to_bytes() {
            Some(bytes) => txn.put(&self.name, key, &bytes)?,
            None => {
                txn.delete(&self.name, key)?;
                trace!(tree = %self.name, key = %key_hex(key), "index key emptied");
            }
        }

        Ok(())
    }

    fn note_limit_exceeded(&self, key: &[u8]) {
        self.entry_limit_exceeded.fetch_add(1, Ordering::Relaxed);
        debug!(
            tree = %self.name,
            key = %key_hex(key),
            limit = self.entry_limit.load(Ordering::Relaxed),
            "index entry limit exceeded"
        );
        sink::record(MetricsEvent::EntryLimitExceeded { tree: &self.label });
    }

    /// Drop every row; used before a rebuild.
    pub fn clear(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        txn.delete_tree(&self.name)?;
        txn.open_tree(&self.name)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Buffered mutators
    // ------------------------------------------------------------------

    pub fn insert_id<'a>(&'a self, buffer: &mut IndexBuffer<'a>, key: &[u8], id: EntryID) {
        buffer.buffered_index_values(self, key).add_entry_id(id);
    }

    pub fn remove_id<'a>(&'a self, buffer: &mut IndexBuffer<'a>, key: &[u8], id: EntryID) {
        buffer.buffered_index_values(self, key).delete_entry_id(id);
    }

    /// Buffer an unconditional delete of the whole key row.
    pub fn delete<'a>(&'a self, buffer: &mut IndexBuffer<'a>, key: &[u8]) {
        buffer.buffered_index_values(self, key).delete_key();
    }

    // ------------------------------------------------------------------
    // Entry maintenance
    // ------------------------------------------------------------------

    pub fn add_entry<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) {
        let mut keys = BTreeSet::new();
        self.indexer.index_entry(entry, &mut keys);
        for key in keys {
            self.insert_id(buffer, &key, id);
        }
    }

    pub fn remove_entry<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) {
        let mut keys = BTreeSet::new();
        self.indexer.index_entry(entry, &mut keys);
        for key in keys {
            self.remove_id(buffer, &key, id);
        }
    }

    /// Buffer only the keys whose membership differs between the two versions.
    pub fn modify_entry<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        old_entry: &dyn DirectoryEntry,
        new_entry: &dyn DirectoryEntry,
    ) {
        let mut modified = BTreeMap::new();
        self.indexer.modify_entry(old_entry, new_entry, &mut modified);
        for (key, insert) in modified {
            if insert {
                self.insert_id(buffer, &key, id);
            } else {
                self.remove_id(buffer, &key, id);
            }
        }
    }
}

fn decode_stored(key: &[u8], stored: Option<Vec<u8>>) -> Result<Option<EntryIDSet>, InternalError> {
    stored
        .map(|bytes| EntryIDSet::from_bytes(key, &bytes))
        .transpose()
}

fn ascending(ids: &[EntryID]) -> Cow<'_, [EntryID]> {
    if ids.windows(2).all(|pair| pair[0] < pair[1]) {
        Cow::Borrowed(ids)
    } else {
        let mut owned = ids.to_vec();
        owned.sort_unstable();
        owned.dedup();
        Cow::Owned(owned)
    }
}
