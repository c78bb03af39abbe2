//! Module: db
//! Responsibility: secondary indexes of one entry container and their maintenance.
//! Does not own: the entry store, search evaluation, or the storage engine.
//! Boundary: callers hand entry mutations to `IndexRegistry`; storage is reached through `storage` traits.

mod entry_id;

pub mod buffer;
pub mod entry;
pub mod id_set;
pub mod index;
pub mod rebuild;
pub mod registry;
pub mod state;
pub mod storage;
pub mod trust;
pub mod vlv;

pub use entry_id::EntryID;

use std::fmt::Write as _;

/// Lowercase hex rendering of a raw key, for logs and error messages.
pub(crate) fn key_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }

    out
}
