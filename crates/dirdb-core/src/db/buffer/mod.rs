//! Module: db::buffer
//! Responsibility: write combining of index deltas produced by one entry mutation.
//! Does not own: merge semantics; `Index::update_key` and `VlvIndex::update_index` apply deltas.
//! Boundary: flush visits every touched tree and key exactly once, in tree then key order.


use crate::{
    db::{
        EntryID,
        index::Index,
        storage::{TreeName, WriteableTransaction},
        vlv::{SortValues, VlvIndex},
    },
    error::InternalError,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

///
/// BufferedIndexValues
///
/// Pending delta of one attribute index key. Adding and deleting the same ID
/// cancel out.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferedIndexValues {
    added: BTreeSet<EntryID>,
    deleted: BTreeSet<EntryID>,
    delete_row: bool,
}

impl BufferedIndexValues {
    pub fn add_entry_id(&mut self, id: EntryID) {
        if !self.deleted.remove(&id) {
            self.added.insert(id);
        }
    }

    pub fn delete_entry_id(&mut self, id: EntryID) {
        if !self.added.remove(&id) {
            self.deleted.insert(id);
        }
    }

    /// Discard pending IDs and delete the row itself at flush.
    pub fn delete_key(&mut self) {
        self.added.clear();
        self.deleted.clear();
        self.delete_row = true;
    }

    #[must_use]
    pub const fn added(&self) -> &BTreeSet<EntryID> {
        &self.added
    }

    #[must_use]
    pub const fn deleted(&self) -> &BTreeSet<EntryID> {
        &self.deleted
    }

    /// True when flushing would not touch storage.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.delete_row && self.added.is_empty() && self.deleted.is_empty()
    }

    fn flush(
        self,
        index: &Index,
        txn: &mut dyn WriteableTransaction,
        key: &[u8],
    ) -> Result<(), InternalError> {
        if self.delete_row {
            index.update_key(txn, key, None, None)?;
        }
        if self.added.is_empty() && self.deleted.is_empty() {
            return Ok(());
        }

        let deleted: Vec<EntryID> = self.deleted.into_iter().collect();
        let added: Vec<EntryID> = self.added.into_iter().collect();

        index.update_key(txn, key, Some(&deleted), Some(&added))
    }
}

///
/// BufferedVlvValues
///
/// Pending sort values of one VLV index, keyed by their encoded block key.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferedVlvValues {
    added: BTreeMap<Vec<u8>, SortValues>,
    deleted: BTreeMap<Vec<u8>, SortValues>,
}

impl BufferedVlvValues {
    pub fn add_values(&mut self, key: Vec<u8>, values: SortValues) {
        if self.deleted.remove(&key).is_none() {
            self.added.insert(key, values);
        }
    }

    pub fn delete_values(&mut self, key: Vec<u8>, values: SortValues) {
        if self.added.remove(&key).is_none() {
            self.deleted.insert(key, values);
        }
    }

    #[must_use]
    pub const fn added(&self) -> &BTreeMap<Vec<u8>, SortValues> {
        &self.added
    }

    #[must_use]
    pub const fn deleted(&self) -> &BTreeMap<Vec<u8>, SortValues> {
        &self.deleted
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}

///
/// PendingTree
///

#[derive(Debug)]
enum PendingTree<'a> {
    Attribute(&'a Index, BTreeMap<Vec<u8>, BufferedIndexValues>),
    Vlv(&'a VlvIndex, BufferedVlvValues),
}

///
/// IndexBuffer
///
/// Write-combining cache scoped to one logical entry mutation. Consumed by
/// `flush` inside the caller's write transaction.
///

#[derive(Debug, Default)]
pub struct IndexBuffer<'a> {
    attribute: BTreeMap<TreeName, (&'a Index, BTreeMap<Vec<u8>, BufferedIndexValues>)>,
    vlv: BTreeMap<TreeName, (&'a VlvIndex, BufferedVlvValues)>,
}

impl<'a> IndexBuffer<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attribute.is_empty() && self.vlv.is_empty()
    }

    /// Accumulator for one key of an attribute index, created on first use.
    pub fn buffered_index_values(
        &mut self,
        index: &'a Index,
        key: &[u8],
    ) -> &mut BufferedIndexValues {
        let (_, keys) = self
            .attribute
            .entry(index.name().clone())
            .or_insert_with(|| (index, BTreeMap::new()));

        keys.entry(key.to_vec()).or_default()
    }

    /// Accumulator for one VLV index, created on first use.
    pub fn buffered_vlv_values(&mut self, index: &'a VlvIndex) -> &mut BufferedVlvValues {
        let (_, values) = self
            .vlv
            .entry(index.name().clone())
            .or_insert_with(|| (index, BufferedVlvValues::default()));

        values
    }

    /// Apply every pending delta, once per touched key.
    pub fn flush(self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        let mut pending: Vec<(TreeName, PendingTree<'a>)> = self
            .attribute
            .into_iter()
            .map(|(name, (index, keys))| (name, PendingTree::Attribute(index, keys)))
            .chain(
                self.vlv
                    .into_iter()
                    .map(|(name, (index, values))| (name, PendingTree::Vlv(index, values))),
            )
            .collect();
        pending.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (name, tree) in pending {
            match tree {
                PendingTree::Attribute(index, keys) => {
                    for (key, values) in keys {
                        if values.is_noop() {
                            continue;
                        }
                        values.flush(index, txn, &key)?;
                    }
                }
                PendingTree::Vlv(index, values) => {
                    if values.is_noop() {
                        continue;
                    }
                    index.update_index(txn, &values.added, &values.deleted)?;
                }
            }
            trace!(tree = %name, "index buffer flushed");
        }

        Ok(())
    }
}
