//! Module: db::rebuild
//! Responsibility: bracket an externally driven index rebuild with trust transitions.
//! Does not own: enumeration of entries; the caller feeds them through the normal write path.
//! Boundary: an index only returns to Trusted through `RebuildGuard::finish`.

use crate::{
    db::{
        index::Index,
        storage::{TreeName, WriteableTransaction},
        vlv::VlvIndex,
    },
    error::InternalError,
};
use tracing::{info, warn};

///
/// Rebuildable
///
/// Trust and content hooks shared by attribute and VLV indexes.
///

pub trait Rebuildable: Sync {
    fn tree_name(&self) -> &TreeName;

    fn set_rebuild_status(&self, rebuilding: bool);

    fn set_trusted(
        &self,
        txn: &mut dyn WriteableTransaction,
        trusted: bool,
    ) -> Result<(), InternalError>;

    /// Drop every stored row.
    fn clear(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError>;
}

impl Rebuildable for Index {
    fn tree_name(&self) -> &TreeName {
        self.name()
    }

    fn set_rebuild_status(&self, rebuilding: bool) {
        Self::set_rebuild_status(self, rebuilding);
    }

    fn set_trusted(
        &self,
        txn: &mut dyn WriteableTransaction,
        trusted: bool,
    ) -> Result<(), InternalError> {
        Self::set_trusted(self, txn, trusted)
    }

    fn clear(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        Self::clear(self, txn)
    }
}

impl Rebuildable for VlvIndex {
    fn tree_name(&self) -> &TreeName {
        self.name()
    }

    fn set_rebuild_status(&self, rebuilding: bool) {
        Self::set_rebuild_status(self, rebuilding);
    }

    fn set_trusted(
        &self,
        txn: &mut dyn WriteableTransaction,
        trusted: bool,
    ) -> Result<(), InternalError> {
        Self::set_trusted(self, txn, trusted)
    }

    fn clear(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        Self::clear(self, txn)
    }
}

///
/// RebuildGuard
///
/// In-flight rebuild of one index. While it lives the index accepts key
/// creation and refuses reads. Dropping it without `finish` leaves the
/// index Untrusted once the rebuild transaction commits.
///

pub struct RebuildGuard<'a> {
    index: &'a dyn Rebuildable,
    finished: bool,
}

impl<'a> RebuildGuard<'a> {
    /// Demote and empty `index`, then mark it rebuilding.
    pub fn begin(
        txn: &mut dyn WriteableTransaction,
        index: &'a dyn Rebuildable,
    ) -> Result<Self, InternalError> {
        index.set_trusted(txn, false)?;
        index.clear(txn)?;
        index.set_rebuild_status(true);
        info!(tree = %index.tree_name(), "index rebuild started");

        Ok(Self {
            index,
            finished: false,
        })
    }

    #[must_use]
    pub fn tree_name(&self) -> &TreeName {
        self.index.tree_name()
    }

    /// Promote the index to Trusted and end the rebuild.
    pub fn finish(mut self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        self.index.set_trusted(txn, true)?;
        self.index.set_rebuild_status(false);
        self.finished = true;
        info!(tree = %self.index.tree_name(), "index rebuild finished");

        Ok(())
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.index.set_rebuild_status(false);
            warn!(
                tree = %self.index.tree_name(),
                "index rebuild abandoned; index left untrusted"
            );
        }
    }
}
