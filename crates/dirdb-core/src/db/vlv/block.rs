//! VLV block values.
//!
//! A block is an ordered run of elements stored as repeated
//! `[entry id: u64 BE][for each sort key: len u32 BE, value bytes]`, where a
//! zero length encodes null.

use crate::db::{
    EntryID,
    vlv::sort::{SortKey, SortOrder, SortValues},
};
use std::cmp::Ordering;
use thiserror::Error as ThisError;

///
/// SortValuesCorruption
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SortValuesCorruption {
    #[error("block truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("value of {len} bytes does not fit the block format")]
    ValueTooLarge { len: usize },

    #[error("block elements out of order at position {position}")]
    OutOfOrder { position: usize },
}

///
/// SortValuesSet
///
/// Elements of one block in `SortOrder::compare` order.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct SortValuesSet {
    elements: Vec<SortValues>,
}

impl SortValuesSet {
    pub(crate) fn decode(
        bytes: &[u8],
        order: &SortOrder,
    ) -> Result<Self, SortValuesCorruption> {
        let mut elements = Vec::new();
        let mut reader = Reader { bytes, offset: 0 };

        while !reader.is_done() {
            let entry_id = EntryID::new(u64::from_be_bytes(reader.take_array()?));
            let mut values = Vec::with_capacity(order.len());
            for _ in 0..order.len() {
                let len = u32::from_be_bytes(reader.take_array()?) as usize;
                let value = if len == 0 {
                    None
                } else {
                    Some(reader.take(len)?.to_vec())
                };
                values.push(value);
            }

            let element = SortValues::new(entry_id, values);
            if elements
                .last()
                .is_some_and(|last| order.compare(last, &element) != Ordering::Less)
            {
                return Err(SortValuesCorruption::OutOfOrder {
                    position: elements.len(),
                });
            }
            elements.push(element);
        }

        Ok(Self { elements })
    }

    pub(crate) fn encode(&self, order: &SortOrder) -> Result<Vec<u8>, SortValuesCorruption> {
        let mut out = Vec::new();
        for element in &self.elements {
            out.extend_from_slice(&element.entry_id().to_be_bytes());
            for i in 0..order.len() {
                let value = element.value(i).unwrap_or_default();
                let len = u32::try_from(value.len())
                    .map_err(|_| SortValuesCorruption::ValueTooLarge { len: value.len() })?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(value);
            }
        }

        Ok(out)
    }

    pub(crate) const fn len(&self) -> usize {
        self.elements.len()
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub(crate) fn elements(&self) -> &[SortValues] {
        &self.elements
    }

    pub(crate) fn entry_ids(&self) -> impl DoubleEndedIterator<Item = EntryID> + '_ {
        self.elements.iter().map(SortValues::entry_id)
    }

    pub(crate) fn contains(&self, order: &SortOrder, values: &SortValues) -> bool {
        self.search(order, values).is_ok()
    }

    /// Insert an element; returns false when it is already present.
    pub(crate) fn insert(&mut self, order: &SortOrder, values: SortValues) -> bool {
        match self.search(order, &values) {
            Ok(_) => false,
            Err(pos) => {
                self.elements.insert(pos, values);
                true
            }
        }
    }

    /// Remove an element; returns whether it was present.
    pub(crate) fn remove(&mut self, order: &SortOrder, values: &SortValues) -> bool {
        match self.search(order, values) {
            Ok(pos) => {
                self.elements.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Position of the first element whose value for `key` is not before
    /// `assertion`. Entry IDs are ignored.
    pub(crate) fn first_at_or_after(&self, key: &SortKey, assertion: Option<&[u8]>) -> usize {
        self.elements.partition_point(|element| {
            key.compare_values(element.value(0), assertion) == Ordering::Less
        })
    }

    /// Split into runs that each stay below `capacity`, halving repeatedly.
    pub(crate) fn split(self, capacity: usize) -> Vec<Self> {
        if self.elements.len() < capacity || self.elements.len() < 2 {
            return vec![self];
        }

        let mut lower = self.elements;
        let upper = lower.split_off(lower.len() / 2);

        let mut runs = Self { elements: lower }.split(capacity);
        runs.extend(Self { elements: upper }.split(capacity));

        runs
    }

    fn search(&self, order: &SortOrder, values: &SortValues) -> Result<usize, usize> {
        self.elements
            .binary_search_by(|element| order.compare(element, values))
    }

    pub(crate) fn last(&self) -> Option<&SortValues> {
        self.elements.last()
    }
}

///
/// Reader
///

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn is_done(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SortValuesCorruption> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(SortValuesCorruption::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;

        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], SortValuesCorruption> {
        let offset = self.offset;
        self.take(N)?
            .try_into()
            .map_err(|_| SortValuesCorruption::Truncated { offset })
    }
}
