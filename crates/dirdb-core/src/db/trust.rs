//! Module: db::trust
//! Responsibility: the Trusted / Untrusted / Rebuilding state shared by attribute and VLV indexes.
//! Does not own: persistence of the trusted flag (see `db::state`).
//! Boundary: read and write gating decisions are derived only from this cell.

use crate::{
    db::storage::{TreeName, WriteableTransaction},
    obs::sink::{self, MetricsEvent},
};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};
use tracing::{info, warn};

const TRUSTED: u8 = 1 << 0;
const REBUILDING: u8 = 1 << 1;

///
/// IndexTrust
///
/// Observable trust state. Rebuilding overrides the persisted flag while set.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexTrust {
    Trusted,
    Untrusted,
    Rebuilding,
}

impl fmt::Display for IndexTrust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::Rebuilding => "rebuilding",
        };
        write!(f, "{label}")
    }
}

///
/// TrustState
///
/// Both flags in one atomic cell so readers never observe a torn pair.
///

#[derive(Debug)]
pub(crate) struct TrustState(AtomicU8);

impl TrustState {
    pub(crate) const fn new(trusted: bool) -> Self {
        Self(AtomicU8::new(if trusted { TRUSTED } else { 0 }))
    }

    fn bits(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn current(&self) -> IndexTrust {
        let bits = self.bits();
        if bits & REBUILDING != 0 {
            IndexTrust::Rebuilding
        } else if bits & TRUSTED != 0 {
            IndexTrust::Trusted
        } else {
            IndexTrust::Untrusted
        }
    }

    pub(crate) fn is_trusted(&self) -> bool {
        self.bits() & TRUSTED != 0
    }

    pub(crate) fn is_rebuilding(&self) -> bool {
        self.bits() & REBUILDING != 0
    }

    /// Reads may be answered from stored rows.
    pub(crate) fn can_serve_reads(&self) -> bool {
        self.bits() == TRUSTED
    }

    /// Writes may create keys that do not exist yet.
    pub(crate) fn can_create_keys(&self) -> bool {
        self.bits() != 0
    }

    /// Set the trusted flag; returns its previous value.
    pub(crate) fn set_trusted(&self, trusted: bool) -> bool {
        let previous = if trusted {
            self.0.fetch_or(TRUSTED, Ordering::AcqRel)
        } else {
            self.0.fetch_and(!TRUSTED, Ordering::AcqRel)
        };

        previous & TRUSTED != 0
    }

    /// Apply `trusted` once `txn` commits; an aborted write leaves the flag as is.
    pub(crate) fn set_trusted_on_commit(
        self: &Arc<Self>,
        txn: &mut dyn WriteableTransaction,
        tree: &TreeName,
        label: &str,
        trusted: bool,
    ) {
        let state = Arc::clone(self);
        let tree = tree.clone();
        let label = label.to_string();
        txn.on_commit(Box::new(move || {
            let previous = state.set_trusted(trusted);
            log_trust_change(&tree, &label, previous, trusted);
        }));
    }

    /// Set the rebuilding flag; returns its previous value.
    pub(crate) fn set_rebuilding(&self, rebuilding: bool) -> bool {
        let previous = if rebuilding {
            self.0.fetch_or(REBUILDING, Ordering::AcqRel)
        } else {
            self.0.fetch_and(!REBUILDING, Ordering::AcqRel)
        };

        previous & REBUILDING != 0
    }
}

/// Log and count a change of the persisted trusted flag.
fn log_trust_change(tree: &TreeName, label: &str, previous: bool, trusted: bool) {
    if previous == trusted {
        return;
    }

    if trusted {
        info!(tree = %tree, "index trusted");
    } else {
        warn!(tree = %tree, "index untrusted");
    }
    sink::record(MetricsEvent::TrustChanged {
        tree: label,
        trusted,
    });
}
