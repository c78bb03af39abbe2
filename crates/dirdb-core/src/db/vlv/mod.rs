//! Module: db::vlv
//! Responsibility: virtual-list-view indexes; ordered runs of sort values split into bounded blocks.
//! Does not own: search filtering or sorting of unindexed results.
//! Boundary: block keys and values are produced only by `key` and `block`.

mod block;
mod key;
mod request;
mod sort;


pub use block::SortValuesCorruption;
pub use request::{
    SearchRequest, SortControl, VlvRequest, VlvResponse, VlvResult, VlvResultCode,
};
pub use sort::{SortKey, SortOrder, SortValues};

use crate::{
    db::{
        EntryID,
        buffer::IndexBuffer,
        entry::{DirectoryEntry, Dn},
        key_hex,
        state::StateStore,
        storage::{ReadableTransaction, TreeName, WriteableTransaction},
        trust::{IndexTrust, TrustState},
    },
    error::{ErrorOrigin, InternalError},
    obs::sink::{self, MetricsEvent},
};
use block::SortValuesSet;
use dirdb_config::{SearchScope, VlvIndexConfig};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, info, trace};

const TREE_ID_PREFIX: &str = "vlv.";

///
/// VlvSettings
///

#[derive(Clone, Debug, Eq, PartialEq)]
struct VlvSettings {
    base_dn: Dn,
    scope: SearchScope,
    filter: String,
    sort_order: SortOrder,
    max_block_size: usize,
}

impl VlvSettings {
    fn from_config(config: &VlvIndexConfig) -> Result<Self, InternalError> {
        Ok(Self {
            base_dn: Dn::parse(&config.base_dn),
            scope: config.scope,
            filter: config.filter.trim().to_string(),
            sort_order: SortOrder::from_config(config)?,
            max_block_size: config.max_block_size,
        })
    }

    fn includes(&self, entry: &dyn DirectoryEntry) -> bool {
        entry.dn().matches_base_and_scope(&self.base_dn, self.scope)
            && entry.matches_filter(&self.filter)
    }

    fn serves(&self, search: &SearchRequest, sort_control: &SortControl) -> bool {
        search.base_dn == self.base_dn
            && search.scope == self.scope
            && search.filter.trim() == self.filter
            && sort_control.sort_order == self.sort_order
    }
}

///
/// ConfigChangeResult
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigChangeResult {
    /// The index was demoted and must be rebuilt before it serves searches.
    pub admin_action_required: bool,
    pub messages: Vec<String>,
}

///
/// VlvIndex
///
/// Every entry under `base_dn`/`scope` matching `filter`, kept in sort order
/// as a sequence of blocks. Each block is stored under the key of its largest
/// element, except the last one, which uses the unbounded key.
///

#[derive(Debug)]
pub struct VlvIndex {
    name: TreeName,
    label: String,
    state: StateStore,
    settings: RwLock<VlvSettings>,
    trust: Arc<TrustState>,
    count: Arc<AtomicU64>,
}

impl VlvIndex {
    /// Open (creating if needed) the block tree and recount its elements.
    pub fn open(
        txn: &mut dyn WriteableTransaction,
        state: &StateStore,
        config: &VlvIndexConfig,
        container_is_empty: bool,
    ) -> Result<Self, InternalError> {
        let settings = VlvSettings::from_config(config)?;
        let name = TreeName::new(
            state.tree().prefix(),
            format!("{TREE_ID_PREFIX}{}", config.name.to_ascii_lowercase()),
        );
        txn.open_tree(&name)?;

        let mut trusted = state.get_trusted(&*txn, &name)?;
        if !trusted && container_is_empty {
            state.put_trusted(txn, &name, true)?;
            trusted = true;
            info!(tree = %name, "vlv index trusted: container is empty");
        }

        let index = Self {
            label: name.to_string(),
            name,
            state: state.clone(),
            settings: RwLock::new(settings),
            trust: Arc::new(TrustState::new(trusted)),
            count: Arc::new(AtomicU64::new(0)),
        };
        index.recount(&*txn)?;

        Ok(index)
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
    pub fn sort_order(&self) -> SortOrder {
        self.settings.read().sort_order.clone()
    }

    /// Cached number of elements as of the last committed write.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

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

    pub fn set_rebuild_status(&self, rebuilding: bool) {
        let previous = self.trust.set_rebuilding(rebuilding);
        if previous != rebuilding {
            info!(tree = %self.name, rebuilding, "vlv rebuild status changed");
        }
    }

    /// Drop every block; used before a rebuild.
    pub fn clear(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        txn.delete_tree(&self.name)?;
        txn.open_tree(&self.name)?;
        self.reset_count_on_commit(txn);

        Ok(())
    }

    fn reset_count_on_commit(&self, txn: &mut dyn WriteableTransaction) {
        let count = Arc::clone(&self.count);
        txn.on_commit(Box::new(move || count.store(0, Ordering::Release)));
    }

    fn recount<T>(&self, txn: &T) -> Result<(), InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let settings = self.settings.read();
        let mut cursor = txn.open_cursor(&self.name)?;
        let mut total = 0u64;
        while cursor.next() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            total += self.decode_block(key, value, &settings.sort_order)?.len() as u64;
        }
        self.count.store(total, Ordering::Release);

        Ok(())
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
        let settings = self.settings.read();
        if !settings.includes(entry) {
            return;
        }

        let values = SortValues::from_entry(id, entry, &settings.sort_order);
        let element_key = key::encode_key(&settings.sort_order, &values);
        buffer
            .buffered_vlv_values(self)
            .add_values(element_key, values);
    }

    pub fn remove_entry<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        entry: &dyn DirectoryEntry,
    ) {
        let settings = self.settings.read();
        if !settings.includes(entry) {
            return;
        }

        let values = SortValues::from_entry(id, entry, &settings.sort_order);
        let element_key = key::encode_key(&settings.sort_order, &values);
        buffer
            .buffered_vlv_values(self)
            .delete_values(element_key, values);
    }

    /// Buffer the move of an entry whose inclusion or sort values changed.
    pub fn modify_entry<'a>(
        &'a self,
        buffer: &mut IndexBuffer<'a>,
        id: EntryID,
        old_entry: &dyn DirectoryEntry,
        new_entry: &dyn DirectoryEntry,
    ) {
        let (old_included, new_included, unchanged) = {
            let settings = self.settings.read();
            let old_included = settings.includes(old_entry);
            let new_included = settings.includes(new_entry);
            let unchanged = old_included
                && new_included
                && SortValues::from_entry(id, old_entry, &settings.sort_order)
                    == SortValues::from_entry(id, new_entry, &settings.sort_order);

            (old_included, new_included, unchanged)
        };
        if unchanged {
            return;
        }

        if old_included {
            self.remove_entry(buffer, id, old_entry);
        }
        if new_included {
            self.add_entry(buffer, id, new_entry);
        }
    }

    // ------------------------------------------------------------------
    // Block maintenance
    // ------------------------------------------------------------------

    /// Apply buffered additions and deletions, both keyed by element key.
    ///
    /// Pending values are walked in key order; each owning block is fetched
    /// once, updated with every value it covers, then split, deleted or
    /// rewritten.
    pub fn update_index(
        &self,
        txn: &mut dyn WriteableTransaction,
        added: &BTreeMap<Vec<u8>, SortValues>,
        deleted: &BTreeMap<Vec<u8>, SortValues>,
    ) -> Result<(), InternalError> {
        let settings = self.settings.read();
        let order = &settings.sort_order;
        let mut added = added.iter().peekable();
        let mut deleted = deleted.iter().peekable();
        let (mut inserted, mut removed) = (0u64, 0u64);

        loop {
            let next = match (added.peek(), deleted.peek()) {
                (Some((a, _)), Some((d, _))) => a.min(d).to_vec(),
                (Some((a, _)), None) => a.to_vec(),
                (None, Some((d, _))) => d.to_vec(),
                (None, None) => break,
            };

            let (block_key, mut block) = self.fetch_block(txn, &next, order)?;
            let covered =
                |pending: &(&Vec<u8>, &SortValues)| key::is_covered_by(pending.0, &block_key);

            while let Some((_, values)) = added.next_if(covered) {
                if block.insert(order, values.clone()) {
                    inserted += 1;
                }
            }
            while let Some((_, values)) = deleted.next_if(covered) {
                if block.remove(order, values) {
                    removed += 1;
                }
            }

            self.store_block(txn, &block_key, block, &settings)?;
        }

        if inserted > 0 || removed > 0 {
            let count = Arc::clone(&self.count);
            txn.on_commit(Box::new(move || {
                let _ = count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                    Some(count.saturating_add(inserted).saturating_sub(removed))
                });
            }));
            sink::record(MetricsEvent::VlvUpdated {
                tree: &self.label,
                inserts: inserted,
                removes: removed,
            });
        }

        Ok(())
    }

    // The owning block is the first one keyed at or after the element.
    fn fetch_block(
        &self,
        txn: &mut dyn WriteableTransaction,
        element_key: &[u8],
        order: &SortOrder,
    ) -> Result<(Vec<u8>, SortValuesSet), InternalError> {
        let found = {
            let mut cursor = txn.open_cursor(&self.name)?;
            if cursor.seek_to_or_after(element_key) {
                cursor.key().map(<[u8]>::to_vec)
            } else {
                None
            }
        };

        let Some(block_key) = found else {
            trace!(tree = %self.name, "vlv starting unbounded block");
            return Ok((key::UNBOUNDED_BLOCK_KEY.to_vec(), SortValuesSet::default()));
        };

        trace!(tree = %self.name, block = %key_hex(&block_key), "vlv block fetched");
        match txn.read_for_update(&self.name, &block_key)? {
            Some(bytes) => {
                let block = self.decode_block(&block_key, &bytes, order)?;
                Ok((block_key, block))
            }
            None => Err(InternalError::vlv_invariant(format!(
                "{}: block {} vanished between seek and read",
                self.name,
                key_hex(&block_key)
            ))),
        }
    }

    fn store_block(
        &self,
        txn: &mut dyn WriteableTransaction,
        block_key: &[u8],
        block: SortValuesSet,
        settings: &VlvSettings,
    ) -> Result<(), InternalError> {
        let order = &settings.sort_order;
        if block.is_empty() {
            if txn.delete(&self.name, block_key)? {
                trace!(tree = %self.name, block = %key_hex(block_key), "vlv block deleted");
            }
            return Ok(());
        }
        if block.len() < settings.max_block_size {
            txn.put(&self.name, block_key, &self.encode_block(&block, order)?)?;
            return Ok(());
        }

        // Lower runs are keyed by their own last element; the upper run keeps
        // the original key.
        let runs = block.split(settings.max_block_size);
        let last = runs.len() - 1;
        for (i, run) in runs.iter().enumerate() {
            let run_key = match run.last() {
                Some(values) if i < last => key::encode_key(order, values),
                _ => block_key.to_vec(),
            };
            txn.put(&self.name, &run_key, &self.encode_block(run, order)?)?;
        }

        debug!(tree = %self.name, runs = runs.len(), "vlv block split");
        sink::record(MetricsEvent::VlvBlockSplit { tree: &self.label });

        Ok(())
    }

    fn decode_block(
        &self,
        block_key: &[u8],
        bytes: &[u8],
        order: &SortOrder,
    ) -> Result<SortValuesSet, InternalError> {
        SortValuesSet::decode(bytes, order).map_err(|err| {
            InternalError::corruption(
                ErrorOrigin::Vlv,
                format!("{} block {}: {err}", self.name, key_hex(block_key)),
            )
        })
    }

    fn encode_block(
        &self,
        block: &SortValuesSet,
        order: &SortOrder,
    ) -> Result<Vec<u8>, InternalError> {
        block.encode(order).map_err(|err| {
            InternalError::corruption(ErrorOrigin::Vlv, format!("{}: {err}", self.name))
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Whether `values` is currently stored.
    pub fn contains_values<T>(&self, txn: &T, values: &SortValues) -> Result<bool, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let settings = self.settings.read();
        let order = &settings.sort_order;
        let element_key = key::encode_key(order, values);

        let mut cursor = txn.open_cursor(&self.name)?;
        if !cursor.seek_to_or_after(&element_key) {
            return Ok(false);
        }
        let (Some(block_key), Some(bytes)) = (cursor.key(), cursor.value()) else {
            return Ok(false);
        };

        Ok(self.decode_block(block_key, bytes, order)?.contains(order, values))
    }

    /// Serve one page of a sorted search, or `None` when this index cannot.
    pub fn evaluate<T>(
        &self,
        txn: &T,
        search: &SearchRequest,
        sort_control: &SortControl,
        vlv_request: Option<&VlvRequest>,
    ) -> Result<Option<VlvResult>, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let settings = self.settings.read();
        if !self.trust.can_serve_reads() || !settings.serves(search, sort_control) {
            return Ok(None);
        }
        let order = &settings.sort_order;

        let result = match vlv_request {
            None => VlvResult {
                ids: self.all_ids(txn, order)?,
                response: None,
            },
            Some(VlvRequest::ByOffset {
                before_count,
                after_count,
                offset,
            }) => self.select_by_offset(txn, order, *before_count, *after_count, *offset)?,
            Some(VlvRequest::ByAssertion {
                before_count,
                after_count,
                assertion,
            }) => self.select_by_assertion(txn, order, *before_count, *after_count, assertion)?,
        };

        Ok(Some(result))
    }

    fn all_ids<T>(&self, txn: &T, order: &SortOrder) -> Result<Vec<EntryID>, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut ids = Vec::new();
        let mut cursor = txn.open_cursor(&self.name)?;
        while cursor.next() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            ids.extend(self.decode_block(key, value, order)?.entry_ids());
        }

        Ok(ids)
    }

    fn select_by_offset<T>(
        &self,
        txn: &T,
        order: &SortOrder,
        before_count: usize,
        after_count: usize,
        offset: i64,
    ) -> Result<VlvResult, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let count = self.count();
        if offset < 0 {
            return Err(InternalError::vlv_rejected(
                format!("{}: negative VLV target offset {offset}", self.name),
                VlvResponse {
                    target_position: offset,
                    content_count: count,
                    result_code: VlvResultCode::OffsetRangeError,
                },
            ));
        }

        // Offsets are 1-based; 0 is read as 1.
        let size = usize::try_from(count).unwrap_or(usize::MAX);
        let mut target = usize::try_from(offset.max(1)).unwrap_or(usize::MAX);
        let list_offset = target - 1;
        let (mut before_count, mut after_count) = (before_count, after_count);
        let start = if list_offset < before_count {
            before_count = list_offset;
            0
        } else if list_offset - before_count >= size {
            // Past the end: the page is the last `before_count` elements.
            target = size + 1;
            after_count = 0;
            size.saturating_sub(before_count)
        } else {
            list_offset - before_count
        };
        let wanted = before_count.saturating_add(after_count).saturating_add(1);

        let mut ids = Vec::with_capacity(wanted.min(size));
        let mut seen = 0usize;
        let mut cursor = txn.open_cursor(&self.name)?;
        while ids.len() < wanted && cursor.next() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            let block = self.decode_block(key, value, order)?;
            if seen + block.len() > start {
                let room = wanted - ids.len();
                ids.extend(block.entry_ids().skip(start.saturating_sub(seen)).take(room));
            }
            seen += block.len();
        }

        Ok(VlvResult {
            ids,
            response: Some(VlvResponse::success(
                i64::try_from(target).unwrap_or(i64::MAX),
                count,
            )),
        })
    }

    fn select_by_assertion<T>(
        &self,
        txn: &T,
        order: &SortOrder,
        before_count: usize,
        after_count: usize,
        assertion: &[u8],
    ) -> Result<VlvResult, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let count = self.count();
        let past_end = VlvResult {
            ids: Vec::new(),
            response: Some(VlvResponse::success(
                i64::try_from(count.saturating_add(1)).unwrap_or(i64::MAX),
                count,
            )),
        };
        let Some(first_key) = order.first() else {
            return Ok(past_end);
        };
        let assertion = Some(assertion).filter(|value| !value.is_empty());

        // Locate the block covering the first element not before the assertion.
        let mut cursor = txn.open_cursor(&self.name)?;
        let prefix = key::encode_component(first_key, assertion.unwrap_or_default());
        if !cursor.seek_to_or_after(&prefix) {
            return Ok(past_end);
        }
        let (Some(block_key), Some(bytes)) = (cursor.key(), cursor.value()) else {
            return Ok(past_end);
        };
        let block = self.decode_block(block_key, bytes, order)?;
        let block_key = block_key.to_vec();
        let target = block.first_at_or_after(first_key, assertion);

        // Walk backwards for the preceding page and the target's rank.
        let mut preceding: Vec<EntryID> = block.elements()[..target]
            .iter()
            .rev()
            .take(before_count)
            .map(SortValues::entry_id)
            .collect();
        let mut rank = target;
        while cursor.previous() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            let earlier = self.decode_block(key, value, order)?;
            rank += earlier.len();
            let room = before_count - preceding.len();
            preceding.extend(earlier.entry_ids().rev().take(room));
        }

        // Then forwards from the target for `after_count + 1` elements.
        let wanted = after_count.saturating_add(1);
        let mut ids: Vec<EntryID> = preceding.into_iter().rev().collect();
        let mut following = 0usize;
        for values in block.elements()[target..].iter().take(wanted) {
            ids.push(values.entry_id());
            following += 1;
        }
        if following < wanted && cursor.seek_to(&block_key) {
            while following < wanted && cursor.next() {
                let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                    break;
                };
                let later = self.decode_block(key, value, order)?;
                let taken: Vec<EntryID> = later.entry_ids().take(wanted - following).collect();
                following += taken.len();
                ids.extend(taken);
            }
        }

        Ok(VlvResult {
            ids,
            response: Some(VlvResponse::success(
                i64::try_from(rank.saturating_add(1)).unwrap_or(i64::MAX),
                count,
            )),
        })
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Apply a new configuration under the exclusive settings lock.
    ///
    /// A new sort order invalidates every stored block, so the tree is
    /// recreated. Any change to sort order, base, scope or filter, or a
    /// smaller block size, leaves the index untrusted until rebuilt. A larger
    /// block size is absorbed as blocks fill.
    pub fn apply_config_change(
        &self,
        txn: &mut dyn WriteableTransaction,
        config: &VlvIndexConfig,
    ) -> Result<ConfigChangeResult, InternalError> {
        let updated = VlvSettings::from_config(config)?;
        let mut settings = self.settings.write();
        let mut result = ConfigChangeResult::default();

        if updated.sort_order != settings.sort_order {
            txn.delete_tree(&self.name)?;
            txn.open_tree(&self.name)?;
            self.reset_count_on_commit(txn);
            result.admin_action_required = true;
            result.messages.push(format!(
                "sort order changed from '{}' to '{}'",
                settings.sort_order, updated.sort_order
            ));
        }
        if updated.base_dn != settings.base_dn {
            result.admin_action_required = true;
            result.messages.push(format!(
                "base DN changed from '{}' to '{}'",
                settings.base_dn, updated.base_dn
            ));
        }
        if updated.scope != settings.scope {
            result.admin_action_required = true;
            result.messages.push(format!(
                "scope changed from {:?} to {:?}",
                settings.scope, updated.scope
            ));
        }
        if updated.filter != settings.filter {
            result.admin_action_required = true;
            result.messages.push(format!(
                "filter changed from '{}' to '{}'",
                settings.filter, updated.filter
            ));
        }
        if updated.max_block_size < settings.max_block_size {
            result.admin_action_required = true;
            result.messages.push(format!(
                "block size lowered from {} to {}",
                settings.max_block_size, updated.max_block_size
            ));
        }

        *settings = updated;
        drop(settings);

        if result.admin_action_required {
            self.set_trusted(txn, false)?;
            info!(
                tree = %self.name,
                changes = ?result.messages,
                "vlv configuration changed; rebuild required"
            );
        }

        Ok(result)
    }
}
