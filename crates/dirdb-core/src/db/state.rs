//! Persisted per-index trust flags.
//!
//! One `state` tree per entry container; each row is keyed by the owning
//! index tree name and holds a single byte.

use crate::{
    db::{
        key_hex,
        storage::{ReadableTransaction, TreeName, WriteableTransaction},
    },
    error::{ErrorOrigin, InternalError},
};

const STATE_TREE_ID: &str = "state";
const TRUSTED: u8 = 1;
const UNTRUSTED: u8 = 0;

///
/// StateStore
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    tree: TreeName,
}

impl StateStore {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            tree: TreeName::new(prefix, STATE_TREE_ID),
        }
    }

    #[must_use]
    pub const fn tree(&self) -> &TreeName {
        &self.tree
    }

    pub fn open(&self, txn: &mut dyn WriteableTransaction) -> Result<(), InternalError> {
        txn.open_tree(&self.tree)?;

        Ok(())
    }

    /// Persisted trusted flag of `index`; a missing row reads as untrusted.
    pub fn get_trusted<T>(&self, txn: &T, index: &TreeName) -> Result<bool, InternalError>
    where
        T: ReadableTransaction + ?Sized,
    {
        let key = index.to_key_bytes();
        match txn.read(&self.tree, &key)?.as_deref() {
            None | Some([UNTRUSTED]) => Ok(false),
            Some([TRUSTED]) => Ok(true),
            Some(other) => Err(InternalError::corruption(
                ErrorOrigin::State,
                format!(
                    "state row for {index} has invalid value {}",
                    key_hex(other)
                ),
            )),
        }
    }

    pub fn put_trusted(
        &self,
        txn: &mut dyn WriteableTransaction,
        index: &TreeName,
        trusted: bool,
    ) -> Result<(), InternalError> {
        let value = if trusted { TRUSTED } else { UNTRUSTED };
        txn.put(&self.tree, &index.to_key_bytes(), &[value])?;

        Ok(())
    }

    /// Forget the flag of a removed index.
    pub fn remove(
        &self,
        txn: &mut dyn WriteableTransaction,
        index: &TreeName,
    ) -> Result<bool, InternalError> {
        Ok(txn.delete(&self.tree, &index.to_key_bytes())?)
    }
}
