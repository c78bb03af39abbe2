use crate::{
    db::{
        entry::{DirectoryEntry, Dn},
        state::StateStore,
        storage::{Storage, memory::MemoryStorage},
    },
    obs::sink::{MetricsEvent, MetricsSink},
};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Container prefix used by core unit tests.
pub const TEST_PREFIX: &str = "dc_example_dc_com";

/// Install a fmt subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh storage with the state tree of `TEST_PREFIX` already open.
pub fn storage_with_state() -> (MemoryStorage, StateStore) {
    init_tracing();

    let storage = MemoryStorage::new();
    let state = StateStore::new(TEST_PREFIX);
    storage
        .write(|txn| state.open(txn))
        .expect("state tree should open");

    (storage, state)
}

///
/// TestEntry
///
/// Directory entry with literal attribute values. Filters are limited to a
/// single `(attr=value)` or `(attr=*)` assertion.
///

#[derive(Clone, Debug)]
pub struct TestEntry {
    dn: Dn,
    attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl TestEntry {
    pub fn new(dn: &str) -> Self {
        Self {
            dn: Dn::parse(dn),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, attribute: &str, values: &[&str]) -> Self {
        self.attributes.insert(
            attribute.to_ascii_lowercase(),
            values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        );
        self
    }
}

impl DirectoryEntry for TestEntry {
    fn dn(&self) -> &Dn {
        &self.dn
    }

    fn attribute_values(&self, attribute: &str) -> Vec<&[u8]> {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(|values| values.iter().map(Vec::as_slice).collect())
            .unwrap_or_default()
    }

    fn matches_filter(&self, filter: &str) -> bool {
        let inner = filter
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');
        let Some((attribute, value)) = inner.split_once('=') else {
            return false;
        };

        let values = self.attribute_values(attribute.trim());
        if value == "*" {
            !values.is_empty()
        } else {
            values
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value.trim().as_bytes()))
        }
    }
}

///
/// RecordingSink
///
/// Captures metrics events as owned debug strings for assertions.
///

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: MetricsEvent<'_>) {
        self.events.lock().push(format!("{event:?}"));
    }
}
