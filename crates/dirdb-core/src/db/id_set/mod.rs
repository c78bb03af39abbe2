//! Module: db::id_set
//! Responsibility: the possibly-degraded set of entry IDs stored under one index key.
//! Does not own: entry limits policy or persistence; `Index` decides both.
//! Boundary: sentinel byte encodings exist only in `codec`.

mod codec;


pub use codec::EntryIdSetCorruption;

use crate::db::EntryID;
use derive_more::Deref;
use std::fmt;

///
/// EntryLimit
///
/// Maximum number of IDs a key may enumerate before it degrades, and whether
/// a degraded key keeps an approximate count. `max_entries == 0` disables the
/// limit.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryLimit {
    pub max_entries: usize,
    pub maintain_count: bool,
}

impl EntryLimit {
    pub const UNLIMITED: Self = Self::new(0, false);

    #[must_use]
    pub const fn new(max_entries: usize, maintain_count: bool) -> Self {
        Self {
            max_entries,
            maintain_count,
        }
    }

    /// Whether a defined set growing to `projected` IDs must degrade.
    #[must_use]
    pub const fn is_reached_by(self, projected: u64) -> bool {
        self.max_entries > 0 && projected >= self.max_entries as u64
    }

    const fn degraded(self, projected: u64) -> EntryIDSet {
        if self.maintain_count {
            EntryIDSet::UndefinedCounted(projected)
        } else {
            EntryIDSet::UndefinedUnknown
        }
    }
}

///
/// SetChange
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetChange {
    Unchanged,
    Changed,
    /// The set was defined and has just degraded because of the entry limit.
    LimitExceeded,
}

impl SetChange {
    #[must_use]
    pub const fn is_changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

///
/// DefinedIds
///
/// Strictly ascending, duplicate-free entry IDs.
///

#[derive(Clone, Debug, Default, Deref, Eq, PartialEq)]
pub struct DefinedIds(Vec<EntryID>);

impl DefinedIds {
    /// Build from arbitrary IDs, sorting and removing duplicates.
    pub fn from_unsorted(ids: impl IntoIterator<Item = EntryID>) -> Self {
        let mut ids: Vec<EntryID> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        Self(ids)
    }

    // Caller guarantees strict ascending order.
    pub(crate) const fn from_sorted(ids: Vec<EntryID>) -> Self {
        Self(ids)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[EntryID] {
        &self.0
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<EntryID> {
        self.0
    }

    #[must_use]
    pub fn contains_id(&self, id: EntryID) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    fn insert(&mut self, id: EntryID) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    fn remove(&mut self, id: EntryID) -> bool {
        match self.0.binary_search(&id) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    // Merge another ascending slice in; returns how many IDs were new.
    fn merge(&mut self, ids: &[EntryID]) -> usize {
        let before = self.0.len();
        let mut merged = Vec::with_capacity(before + ids.len());
        let (mut left, mut right) = (self.0.iter().peekable(), ids.iter().peekable());

        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(&&l), Some(&&r)) if l < r => left.next(),
                (Some(&&l), Some(&&r)) if l > r => right.next(),
                (Some(_), Some(_)) => {
                    right.next();
                    left.next()
                }
                (Some(_), None) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };
            if let Some(&id) = next
                && merged.last() != Some(&id)
            {
                merged.push(id);
            }
        }

        self.0 = merged;
        self.0.len() - before
    }

    // Count how many IDs of `ids` are not already present.
    fn count_missing(&self, ids: &[EntryID]) -> usize {
        ids.iter().filter(|id| !self.contains_id(**id)).count()
    }
}

///
/// EntryIDSet
///
/// The IDs currently under one index key. Enumeration degrades to a count or
/// to nothing once it becomes too costly, and never re-enumerates afterwards.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryIDSet {
    Defined(DefinedIds),
    UndefinedCounted(u64),
    UndefinedUnknown,
}

impl Default for EntryIDSet {
    fn default() -> Self {
        Self::Defined(DefinedIds::default())
    }
}

impl EntryIDSet {
    /// A definitive empty set.
    #[must_use]
    pub fn new_defined() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = EntryID>) -> Self {
        Self::Defined(DefinedIds::from_unsorted(ids))
    }

    #[must_use]
    pub const fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }

    /// Exact size when defined, the maintained count when counted, `None`
    /// when unknown.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Defined(ids) => Some(ids.len() as u64),
            Self::UndefinedCounted(count) => Some(*count),
            Self::UndefinedUnknown => None,
        }
    }

    /// True only for a definitive empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Defined(ids) if ids.is_empty())
    }

    /// Membership, or `None` when the set no longer enumerates its IDs.
    #[must_use]
    pub fn contains(&self, id: EntryID) -> Option<bool> {
        match self {
            Self::Defined(ids) => Some(ids.contains_id(id)),
            Self::UndefinedCounted(_) | Self::UndefinedUnknown => None,
        }
    }

    #[must_use]
    pub fn ids(&self) -> Option<&[EntryID]> {
        match self {
            Self::Defined(ids) => Some(ids.as_slice()),
            Self::UndefinedCounted(_) | Self::UndefinedUnknown => None,
        }
    }

    /// Iterate defined IDs in ascending order; undefined sets yield nothing.
    pub fn iter(&self) -> impl Iterator<Item = EntryID> + '_ {
        self.ids().unwrap_or_default().iter().copied()
    }

    pub fn add(&mut self, id: EntryID, limit: EntryLimit) -> SetChange {
        match self {
            Self::Defined(ids) => {
                if ids.contains_id(id) {
                    return SetChange::Unchanged;
                }
                let projected = ids.len() as u64 + 1;
                if limit.is_reached_by(projected) {
                    *self = limit.degraded(projected);
                    return SetChange::LimitExceeded;
                }
                ids.insert(id);
                SetChange::Changed
            }
            Self::UndefinedCounted(count) => {
                *count = count.saturating_add(1);
                SetChange::Changed
            }
            Self::UndefinedUnknown => SetChange::Unchanged,
        }
    }

    /// Add ascending `ids`.
    pub fn add_all(&mut self, ids: &[EntryID], limit: EntryLimit) -> SetChange {
        if ids.is_empty() {
            return SetChange::Unchanged;
        }

        match self {
            Self::Defined(current) => {
                let missing = current.count_missing(ids);
                if missing == 0 {
                    return SetChange::Unchanged;
                }
                let projected = (current.len() + missing) as u64;
                if limit.is_reached_by(projected) {
                    *self = limit.degraded(projected);
                    return SetChange::LimitExceeded;
                }
                current.merge(ids);
                SetChange::Changed
            }
            Self::UndefinedCounted(count) => {
                *count = count.saturating_add(ids.len() as u64);
                SetChange::Changed
            }
            Self::UndefinedUnknown => SetChange::Unchanged,
        }
    }

    pub fn delete(&mut self, id: EntryID) -> bool {
        match self {
            Self::Defined(ids) => ids.remove(id),
            Self::UndefinedCounted(count) => {
                let before = *count;
                *count = count.saturating_sub(1);
                before != *count
            }
            Self::UndefinedUnknown => false,
        }
    }

    pub fn delete_all(&mut self, ids: &[EntryID]) -> bool {
        match self {
            Self::Defined(current) => {
                let before = current.len();
                current.0.retain(|id| ids.binary_search(id).is_err());
                before != current.len()
            }
            Self::UndefinedCounted(count) => {
                let before = *count;
                *count = count.saturating_sub(ids.len() as u64);
                before != *count
            }
            Self::UndefinedUnknown => false,
        }
    }

    /// Apply one buffered delta to the stored value of a key.
    ///
    /// A defined set projects its size as `current + |added| - |deleted|`
    /// without checking membership; reaching the limit degrades it before any
    /// ID is applied. Undefined sets only adjust their count.
    pub fn apply_delta(
        &mut self,
        deleted: &[EntryID],
        added: &[EntryID],
        limit: EntryLimit,
    ) -> SetChange {
        match self {
            Self::Defined(ids) => {
                let projected = (ids.len() + added.len()).saturating_sub(deleted.len()) as u64;
                if limit.is_reached_by(projected) {
                    *self = limit.degraded(projected);
                    return SetChange::LimitExceeded;
                }

                let removed = self.delete_all(deleted);
                let added = self.add_all(added, EntryLimit::UNLIMITED).is_changed();
                if removed || added {
                    SetChange::Changed
                } else {
                    SetChange::Unchanged
                }
            }
            Self::UndefinedCounted(count) => {
                let before = *count;
                *count = count
                    .saturating_add(added.len() as u64)
                    .saturating_sub(deleted.len() as u64);
                if before == *count {
                    SetChange::Unchanged
                } else {
                    SetChange::Changed
                }
            }
            Self::UndefinedUnknown => SetChange::Unchanged,
        }
    }

    /// Union several sets.
    ///
    /// Any unknown operand makes the result unknown; any counted operand makes
    /// it counted with the summed sizes; otherwise the result is defined.
    pub fn union<'a>(sets: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut defined = DefinedIds::default();
        let mut counted: Option<u64> = None;
        let mut defined_total = 0u64;

        for set in sets {
            match set {
                Self::UndefinedUnknown => return Self::UndefinedUnknown,
                Self::UndefinedCounted(count) => {
                    counted = Some(counted.unwrap_or(0).saturating_add(*count));
                }
                Self::Defined(ids) => {
                    defined_total = defined_total.saturating_add(ids.len() as u64);
                    if counted.is_none() {
                        defined.merge(ids);
                    }
                }
            }
        }

        match counted {
            Some(count) => Self::UndefinedCounted(count.saturating_add(defined_total)),
            None => Self::Defined(defined),
        }
    }
}

impl fmt::Display for EntryIDSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(ids) => {
                f.write_str("[")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{id}")?;
                }
                f.write_str("]")
            }
            Self::UndefinedCounted(count) => write!(f, "[LIMIT-EXCEEDED:{count}]"),
            Self::UndefinedUnknown => f.write_str("[NOT-INDEXED]"),
        }
    }
}
