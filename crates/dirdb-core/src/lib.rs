//! Core of dirdb: attribute and VLV secondary indexes for a directory
//! storage backend, their write buffer, trust tracking and rebuild hooks.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod db;
pub mod error;
pub mod obs;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, storage engines, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::db::{
        EntryID,
        entry::{DirectoryEntry, Dn, Indexer},
        id_set::EntryIDSet,
        index::Index,
        registry::IndexRegistry,
        trust::IndexTrust,
        vlv::{SortControl, SortKey, SortOrder, VlvIndex, VlvRequest},
    };
}
