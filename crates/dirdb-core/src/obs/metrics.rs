use parking_lot::{Mutex, const_mutex};
use std::collections::BTreeMap;

///
/// EventState
/// Ephemeral, in-memory counters for index maintenance, keyed by tree name.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct EventState {
    trees: BTreeMap<String, TreeCounters>,
}

///
/// TreeCounters
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TreeCounters {
    // Attribute index maintenance
    pub key_updates: u64,
    pub ids_inserted: u64,
    pub ids_removed: u64,
    pub keys_deleted: u64,
    pub entry_limit_exceeded: u64,
    pub corrupt_keys: u64,

    // VLV maintenance
    pub vlv_values_inserted: u64,
    pub vlv_values_removed: u64,
    pub vlv_block_splits: u64,

    // Trust transitions
    pub trusted: u64,
    pub untrusted: u64,
}

///
/// EventReport
/// Point-in-time snapshot of all per-tree counters.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventReport {
    pub trees: BTreeMap<String, TreeCounters>,
}

impl EventReport {
    /// Counters for one tree, or zeroes when the tree never reported.
    #[must_use]
    pub fn tree(&self, name: &str) -> TreeCounters {
        self.trees.get(name).cloned().unwrap_or_default()
    }
}

static EVENT_STATE: Mutex<EventState> = const_mutex(EventState {
    trees: BTreeMap::new(),
});

/// Mutate the counters of one tree.
pub(crate) fn with_tree_mut(tree: &str, f: impl FnOnce(&mut TreeCounters)) {
    let mut state = EVENT_STATE.lock();
    let counters = state.trees.entry(tree.to_string()).or_default();
    f(counters);
}

pub(crate) fn report() -> EventReport {
    let state = EVENT_STATE.lock();

    EventReport {
        trees: state.trees.clone(),
    }
}

pub(crate) fn reset_all() {
    *EVENT_STATE.lock() = EventState::default();
}
