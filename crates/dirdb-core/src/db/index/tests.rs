use crate::{
    db::{
        EntryID,
        buffer::IndexBuffer,
        entry::EqualityIndexer,
        id_set::EntryIDSet,
        index::{Index, IndexOptions},
        state::StateStore,
        storage::{Storage, memory::MemoryStorage},
        trust::IndexTrust,
    },
    obs::sink::with_metrics_sink,
    test_support::{RecordingSink, TestEntry, storage_with_state},
};
use proptest::prelude::*;
use std::{collections::BTreeSet, sync::Arc};

const KEY: &[u8] = b"smith";

fn ids(raw: &[u64]) -> Vec<EntryID> {
    raw.iter().copied().map(EntryID::new).collect()
}

fn open_index(
    storage: &MemoryStorage,
    state: &StateStore,
    options: IndexOptions,
    container_is_empty: bool,
) -> Index {
    storage
        .write(|txn| {
            Index::open(
                txn,
                state,
                Box::new(EqualityIndexer::new("sn")),
                options,
                container_is_empty,
            )
        })
        .expect("index should open")
}

fn unlimited() -> IndexOptions {
    IndexOptions {
        entry_limit: 0,
        ..IndexOptions::default()
    }
}

fn limited(entry_limit: usize, maintain_count: bool) -> IndexOptions {
    IndexOptions {
        entry_limit,
        maintain_count,
        ..IndexOptions::default()
    }
}

fn add(storage: &MemoryStorage, index: &Index, key: &[u8], raw: &[u64]) {
    storage
        .write(|txn| index.update_key(txn, key, None, Some(&ids(raw))))
        .expect("add should apply");
}

fn remove(storage: &MemoryStorage, index: &Index, key: &[u8], raw: &[u64]) {
    storage
        .write(|txn| index.update_key(txn, key, Some(&ids(raw)), None))
        .expect("remove should apply");
}

fn read(storage: &MemoryStorage, index: &Index, key: &[u8]) -> EntryIDSet {
    storage
        .read(|txn| index.read_key(txn, key))
        .expect("read should succeed")
}

//
// Opening and trust
//

#[test]
fn empty_container_promotes_new_index() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);

    assert_eq!(index.trust(), IndexTrust::Trusted);
    assert_eq!(index.name().index_id(), "sn.equality");
    assert!(
        storage
            .read(|txn| state.get_trusted(txn, index.name()))
            .unwrap()
    );
}

#[test]
fn untrusted_index_reads_unknown_for_absent_keys() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), false);

    assert_eq!(index.trust(), IndexTrust::Untrusted);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);

    // No new keys while untrusted and not rebuilding.
    add(&storage, &index, KEY, &[1]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
    assert_eq!(storage.tree_len(index.name()), 0);
}

#[test]
fn trust_round_trip_through_rebuild() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), false);

    index.set_rebuild_status(true);
    assert_eq!(index.trust(), IndexTrust::Rebuilding);
    add(&storage, &index, KEY, &[4, 2]);
    add(&storage, &index, b"jones", &[3]);

    // Rebuilding hides stored rows.
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
    assert_eq!(
        storage
            .read(|txn| index.contains_id(txn, KEY, EntryID::new(2)))
            .unwrap(),
        None
    );

    storage
        .write(|txn| index.set_trusted(txn, true))
        .unwrap();
    index.set_rebuild_status(false);

    assert_eq!(index.trust(), IndexTrust::Trusted);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::from_ids(ids(&[2, 4])));
    assert_eq!(read(&storage, &index, b"nobody"), EntryIDSet::new_defined());
    assert_eq!(
        storage
            .read(|txn| index.contains_id(txn, KEY, EntryID::new(3)))
            .unwrap(),
        Some(false)
    );
}

#[test]
fn aborted_write_does_not_change_trust() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), false);

    let result: Result<(), _> = storage.write(|txn| {
        index.set_trusted(txn, true)?;
        assert_eq!(index.trust(), IndexTrust::Untrusted);
        Err(crate::error::InternalError::index_invariant("abort"))
    });
    assert!(result.is_err());

    let persisted = storage
        .read(|txn| state.get_trusted(txn, index.name()))
        .unwrap();
    assert!(!persisted);
    assert_eq!(index.is_trusted(), persisted);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
}

#[test]
fn aborted_demotion_keeps_index_trusted() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);

    let result: Result<(), _> = storage.write(|txn| {
        index.set_trusted(txn, false)?;
        Err(crate::error::InternalError::index_invariant("abort"))
    });
    assert!(result.is_err());

    assert_eq!(index.trust(), IndexTrust::Trusted);
    assert!(
        storage
            .read(|txn| state.get_trusted(txn, index.name()))
            .unwrap()
    );
}

//
// Merging
//

#[test]
fn deleting_last_id_removes_the_row() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);

    add(&storage, &index, KEY, &[1, 2]);
    remove(&storage, &index, KEY, &[1, 2]);

    assert_eq!(storage.tree_len(index.name()), 0);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::new_defined());
}

#[test]
fn empty_delta_is_a_noop() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);
    add(&storage, &index, KEY, &[1]);

    storage.reset_stats();
    storage
        .write(|txn| index.update_key(txn, KEY, Some(&[]), Some(&[])))
        .unwrap();

    assert_eq!(storage.stats().reads, 0);
    assert_eq!(storage.stats().writes, 0);
}

#[test]
fn absent_delta_deletes_row_unconditionally() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, limited(2, false), true);

    add(&storage, &index, KEY, &[1, 2, 3]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);

    storage
        .write(|txn| index.update_key(txn, KEY, None, None))
        .unwrap();

    assert_eq!(read(&storage, &index, KEY), EntryIDSet::new_defined());
}

#[test]
fn reaching_limit_degrades_and_never_reverts() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, limited(3, false), true);

    add(&storage, &index, KEY, &[1]);
    add(&storage, &index, KEY, &[2]);
    assert!(read(&storage, &index, KEY).is_defined());
    assert_eq!(index.entry_limit_exceeded_count(), 0);

    add(&storage, &index, KEY, &[3]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
    assert_eq!(index.entry_limit_exceeded_count(), 1);

    remove(&storage, &index, KEY, &[1, 2, 3]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
}

#[test]
fn counted_keys_track_approximate_size() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, limited(3, true), true);

    add(&storage, &index, KEY, &[1, 2]);
    add(&storage, &index, KEY, &[3]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedCounted(3));

    remove(&storage, &index, KEY, &[2]);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedCounted(2));
}

#[test]
fn raising_the_entry_limit_requires_rebuild() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, limited(10, false), true);

    assert!(!index.set_index_entry_limit(5));
    assert!(index.set_index_entry_limit(20));
    assert!(index.set_index_entry_limit(0));
    assert!(!index.set_index_entry_limit(100));
    assert_eq!(index.entry_limit().max_entries, 100);
}

#[test]
fn deleting_from_missing_key_demotes_index() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);
    let sink = Arc::new(RecordingSink::default());

    with_metrics_sink(sink.clone(), || remove(&storage, &index, KEY, &[9]));

    assert_eq!(sink.count("CorruptKey"), 1);
    assert_eq!(sink.count("TrustChanged"), 1);
    assert_eq!(index.trust(), IndexTrust::Untrusted);
    assert_eq!(read(&storage, &index, KEY), EntryIDSet::UndefinedUnknown);
    assert!(
        !storage
            .read(|txn| state.get_trusted(txn, index.name()))
            .unwrap()
    );
}

#[test]
fn missing_key_delete_while_untrusted_is_silent() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), false);
    let sink = Arc::new(RecordingSink::default());

    with_metrics_sink(sink.clone(), || remove(&storage, &index, KEY, &[9]));

    assert_eq!(sink.count("CorruptKey"), 0);
    assert_eq!(index.trust(), IndexTrust::Untrusted);
}

#[test]
fn corrupt_value_is_a_hard_error() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);

    storage
        .write(|txn| {
            txn.put(index.name(), KEY, &[1, 2, 3])?;
            Ok(())
        })
        .unwrap();

    let err = storage.read(|txn| index.read_key(txn, KEY)).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.message.contains("736d697468"));
}

//
// Range reads
//

#[test]
fn read_range_unions_keys_between_bounds() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);

    add(&storage, &index, b"a", &[1]);
    add(&storage, &index, b"b", &[2, 5]);
    add(&storage, &index, b"c", &[3]);
    add(&storage, &index, b"d", &[4]);

    let range = |lower: &[u8], upper: &[u8], lower_included, upper_included| {
        storage
            .read(|txn| index.read_range(txn, lower, upper, lower_included, upper_included))
            .unwrap()
    };

    assert_eq!(range(b"b", b"c", true, true), EntryIDSet::from_ids(ids(&[2, 3, 5])));
    assert_eq!(range(b"b", b"c", false, true), EntryIDSet::from_ids(ids(&[3])));
    assert_eq!(range(b"b", b"d", true, false), EntryIDSet::from_ids(ids(&[2, 3, 5])));
    assert_eq!(range(b"", b"b", true, false), EntryIDSet::from_ids(ids(&[1])));
    assert_eq!(range(b"c", b"", true, true), EntryIDSet::from_ids(ids(&[3, 4])));
    assert_eq!(range(b"", b"", true, true), EntryIDSet::from_ids(ids(&[1, 2, 3, 4, 5])));
}

#[test]
fn read_range_gives_up_on_undefined_keys_and_cursor_limit() {
    let (storage, state) = storage_with_state();
    let index = open_index(
        &storage,
        &state,
        IndexOptions {
            entry_limit: 3,
            maintain_count: false,
            cursor_entry_limit: 4,
        },
        true,
    );

    add(&storage, &index, b"a", &[1, 2]);
    add(&storage, &index, b"b", &[3, 4]);
    add(&storage, &index, b"c", &[5, 6]);
    add(&storage, &index, b"d", &[7, 8, 9]);

    let range = |lower: &[u8], upper: &[u8]| {
        storage
            .read(|txn| index.read_range(txn, lower, upper, true, true))
            .unwrap()
    };

    assert_eq!(range(b"a", b"b"), EntryIDSet::from_ids(ids(&[1, 2, 3, 4])));
    assert_eq!(range(b"a", b"c"), EntryIDSet::UndefinedUnknown);
    assert_eq!(range(b"c", b"d"), EntryIDSet::UndefinedUnknown);

    index.set_rebuild_status(true);
    assert_eq!(range(b"a", b"a"), EntryIDSet::UndefinedUnknown);
}

//
// Entry maintenance
//

#[test]
fn modify_entry_buffers_only_changed_values() {
    let (storage, state) = storage_with_state();
    let index = open_index(&storage, &state, unlimited(), true);
    let id = EntryID::new(11);
    let old = TestEntry::new("cn=x,dc=example").with("sn", &["smith", "jones"]);
    let new = TestEntry::new("cn=x,dc=example").with("sn", &["smith", "brown"]);

    storage
        .write(|txn| {
            let mut buffer = IndexBuffer::new();
            index.add_entry(&mut buffer, id, &old);
            buffer.flush(txn)
        })
        .unwrap();

    let mut buffer = IndexBuffer::new();
    index.modify_entry(&mut buffer, id, &old, &new);
    assert!(buffer.buffered_index_values(&index, b"smith").is_noop());
    storage.write(|txn| buffer.flush(txn)).unwrap();

    assert_eq!(read(&storage, &index, b"smith"), EntryIDSet::from_ids([id]));
    assert_eq!(read(&storage, &index, b"jones"), EntryIDSet::new_defined());
    assert_eq!(read(&storage, &index, b"brown"), EntryIDSet::from_ids([id]));
}

//
// Properties
//

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replayed_updates_match_set_model(
        ops in prop::collection::vec((any::<bool>(), 0u64..24), 1..40),
    ) {
        let (storage, state) = storage_with_state();
        let index = open_index(&storage, &state, unlimited(), true);
        let mut model = BTreeSet::new();

        for (insert, raw) in ops {
            if insert {
                add(&storage, &index, KEY, &[raw]);
                model.insert(EntryID::new(raw));
            } else if !model.is_empty() {
                // An empty set has no row; deleting from it would demote the index.
                remove(&storage, &index, KEY, &[raw]);
                model.remove(&EntryID::new(raw));
            }
        }

        prop_assert_eq!(index.trust(), IndexTrust::Trusted);
        prop_assert_eq!(read(&storage, &index, KEY), EntryIDSet::from_ids(model));
    }

    #[test]
    fn degraded_keys_never_return_to_defined(
        limit in 2usize..6,
        ops in prop::collection::vec((any::<bool>(), 0u64..12), 1..30),
    ) {
        let (storage, state) = storage_with_state();
        let index = open_index(&storage, &state, limited(limit, false), true);
        let mut degraded = false;

        for (insert, raw) in ops {
            if insert {
                add(&storage, &index, KEY, &[raw]);
            } else if read(&storage, &index, KEY) != EntryIDSet::new_defined() {
                remove(&storage, &index, KEY, &[raw]);
            }

            let set = read(&storage, &index, KEY);
            if degraded {
                prop_assert_eq!(set, EntryIDSet::UndefinedUnknown);
            } else if let Some(ids) = set.ids() {
                prop_assert!(ids.len() < limit);
            } else {
                degraded = true;
            }
        }
    }
}
