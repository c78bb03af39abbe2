//! Module: db::registry
//! Responsibility: the attribute and VLV indexes of one entry container, opened from configuration.
//! Does not own: entry storage or ID assignment; callers pass entries and IDs in.
//! Boundary: one entry mutation produces one `IndexBuffer`, flushed once in the caller's transaction.

use crate::{
    db::{
        EntryID,
        buffer::IndexBuffer,
        entry::{DirectoryEntry, indexer_for},
        index::{Index, IndexOptions},
        rebuild::{RebuildGuard, Rebuildable},
        state::StateStore,
        storage::WriteableTransaction,
        vlv::{ConfigChangeResult, VlvIndex},
    },
    error::{ErrorClass, ErrorOrigin, InternalError},
};
use dirdb_config::{BackendIndexConfig, IndexType, VlvIndexConfig};
use std::collections::BTreeMap;
use tracing::info;

///
/// IndexRegistry
///
/// Attribute indexes keyed by `(attribute, type)` and VLV indexes keyed by
/// name, both lowercased.
///

#[derive(Debug)]
pub struct IndexRegistry {
    state: StateStore,
    attribute: BTreeMap<(String, IndexType), Index>,
    vlv: BTreeMap<String, VlvIndex>,
}

impl IndexRegistry {
    /// Validate `config` and open every index tree under `prefix`.
    pub fn open(
        txn: &mut dyn WriteableTransaction,
        prefix: &str,
        config: &BackendIndexConfig,
        container_is_empty: bool,
    ) -> Result<Self, InternalError> {
        config.validate()?;

        let state = StateStore::new(prefix);
        state.open(txn)?;

        let mut attribute = BTreeMap::new();
        for index_config in &config.indexes {
            let options = IndexOptions {
                entry_limit: config.entry_limit_for(index_config),
                maintain_count: index_config.maintain_count,
                cursor_entry_limit: config.cursor_entry_limit,
            };
            for &index_type in &index_config.types {
                let indexer = indexer_for(&index_config.attribute, index_type)?;
                let index = Index::open(txn, &state, indexer, options, container_is_empty)?;
                attribute.insert(
                    (index_config.attribute.to_ascii_lowercase(), index_type),
                    index,
                );
            }
        }

        let mut vlv = BTreeMap::new();
        for vlv_config in &config.vlv_indexes {
            let index = VlvIndex::open(txn, &state, vlv_config, container_is_empty)?;
            vlv.insert(vlv_config.name.to_ascii_lowercase(), index);
        }

        info!(
            prefix,
            attribute_indexes = attribute.len(),
            vlv_indexes = vlv.len(),
            "index registry opened"
        );

        Ok(Self {
            state,
            attribute,
            vlv,
        })
    }

    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    #[must_use]
    pub fn index(&self, attribute: &str, index_type: IndexType) -> Option<&Index> {
        self.attribute
            .get(&(attribute.to_ascii_lowercase(), index_type))
    }

    #[must_use]
    pub fn vlv_index(&self, name: &str) -> Option<&VlvIndex> {
        self.vlv.get(&name.to_ascii_lowercase())
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.attribute.values()
    }

    pub fn vlv_indexes(&self) -> impl Iterator<Item = &VlvIndex> {
        self.vlv.values()
    }

    // ------------------------------------------------------------------
    // Entry maintenance
    // ------------------------------------------------------------------

    pub fn entry_added(
        &self,
        txn: &mut dyn WriteableTransaction,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) -> Result<(), InternalError> {
        let mut buffer = IndexBuffer::new();
        self.buffer_added(&mut buffer, id, entry);

        buffer.flush(txn)
    }

    pub fn entry_removed(
        &self,
        txn: &mut dyn WriteableTransaction,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) -> Result<(), InternalError> {
        let mut buffer = IndexBuffer::new();
        for index in self.attribute.values() {
            index.remove_entry(&mut buffer, id, entry);
        }
        for index in self.vlv.values() {
            index.remove_entry(&mut buffer, id, entry);
        }

        buffer.flush(txn)
    }

    pub fn entry_modified(
        &self,
        txn: &mut dyn WriteableTransaction,
        id: EntryID,
        old_entry: &dyn DirectoryEntry,
        new_entry: &dyn DirectoryEntry,
    ) -> Result<(), InternalError> {
        let mut buffer = IndexBuffer::new();
        for index in self.attribute.values() {
            index.modify_entry(&mut buffer, id, old_entry, new_entry);
        }
        for index in self.vlv.values() {
            index.modify_entry(&mut buffer, id, old_entry, new_entry);
        }

        buffer.flush(txn)
    }

    fn buffer_added<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) {
        for index in self.attribute.values() {
            index.add_entry(buffer, id, entry);
        }
        for index in self.vlv.values() {
            index.add_entry(buffer, id, entry);
        }
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Rebuild every index from the full entry population.
    ///
    /// All indexes are emptied and marked rebuilding first; they are promoted
    /// only after every entry has been written.
    pub fn rebuild_all<'e>(
        &self,
        txn: &mut dyn WriteableTransaction,
        entries: impl IntoIterator<Item = (EntryID, &'e dyn DirectoryEntry)>,
    ) -> Result<u64, InternalError> {
        let targets: Vec<&dyn Rebuildable> = self
            .attribute
            .values()
            .map(|index| index as &dyn Rebuildable)
            .chain(self.vlv.values().map(|index| index as &dyn Rebuildable))
            .collect();

        let mut guards = Vec::with_capacity(targets.len());
        for target in targets {
            guards.push(RebuildGuard::begin(txn, target)?);
        }

        let mut rebuilt = 0u64;
        for (id, entry) in entries {
            let mut buffer = IndexBuffer::new();
            self.buffer_added(&mut buffer, id, entry);
            buffer.flush(txn)?;
            rebuilt += 1;
        }

        for guard in guards {
            guard.finish(txn)?;
        }
        info!(prefix = %self.state.tree().prefix(), entries = rebuilt, "indexes rebuilt");

        Ok(rebuilt)
    }

    /// Reconfigure the VLV index named in `config`.
    pub fn apply_vlv_config_change(
        &self,
        txn: &mut dyn WriteableTransaction,
        config: &VlvIndexConfig,
    ) -> Result<ConfigChangeResult, InternalError> {
        let index = self.vlv_index(&config.name).ok_or_else(|| {
            InternalError::new(
                ErrorClass::Config,
                ErrorOrigin::Config,
                format!("no vlv index named '{}'", config.name),
            )
        })?;

        index.apply_config_change(txn, config)
    }
}
