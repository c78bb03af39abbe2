//! Metrics sink boundary.
//!
//! Index code MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
use crate::obs::metrics;
use std::{cell::RefCell, sync::Arc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Arc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent<'a> {
    KeyUpdated {
        tree: &'a str,
        inserts: u64,
        removes: u64,
    },
    KeyDeleted {
        tree: &'a str,
    },
    EntryLimitExceeded {
        tree: &'a str,
    },
    CorruptKey {
        tree: &'a str,
    },
    VlvUpdated {
        tree: &'a str,
        inserts: u64,
        removes: u64,
    },
    VlvBlockSplit {
        tree: &'a str,
    },
    TrustChanged {
        tree: &'a str,
        trusted: bool,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

/// GlobalMetricsSink
/// Default process-wide sink that folds events into the global counters.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::KeyUpdated {
                tree,
                inserts,
                removes,
            } => metrics::with_tree_mut(tree, |m| {
                m.key_updates = m.key_updates.saturating_add(1);
                m.ids_inserted = m.ids_inserted.saturating_add(inserts);
                m.ids_removed = m.ids_removed.saturating_add(removes);
            }),

            MetricsEvent::KeyDeleted { tree } => metrics::with_tree_mut(tree, |m| {
                m.keys_deleted = m.keys_deleted.saturating_add(1);
            }),

            MetricsEvent::EntryLimitExceeded { tree } => metrics::with_tree_mut(tree, |m| {
                m.entry_limit_exceeded = m.entry_limit_exceeded.saturating_add(1);
            }),

            MetricsEvent::CorruptKey { tree } => metrics::with_tree_mut(tree, |m| {
                m.corrupt_keys = m.corrupt_keys.saturating_add(1);
            }),

            MetricsEvent::VlvUpdated {
                tree,
                inserts,
                removes,
            } => metrics::with_tree_mut(tree, |m| {
                m.vlv_values_inserted = m.vlv_values_inserted.saturating_add(inserts);
                m.vlv_values_removed = m.vlv_values_removed.saturating_add(removes);
            }),

            MetricsEvent::VlvBlockSplit { tree } => metrics::with_tree_mut(tree, |m| {
                m.vlv_block_splits = m.vlv_block_splits.saturating_add(1);
            }),

            MetricsEvent::TrustChanged { tree, trusted } => metrics::with_tree_mut(tree, |m| {
                if trusted {
                    m.trusted = m.trusted.saturating_add(1);
                } else {
                    m.untrusted = m.untrusted.saturating_add(1);
                }
            }),
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent<'_>) {
    let sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the process-wide metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all process-wide counters.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a sink override installed for the current thread.
pub fn with_metrics_sink<T>(sink: Arc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Arc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            let prev = self.0.take();
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = prev;
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}
