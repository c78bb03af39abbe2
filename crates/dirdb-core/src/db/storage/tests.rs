use crate::{
    db::storage::{Storage, StorageError, TreeName, memory::MemoryStorage},
    error::{ErrorClass, InternalError},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

fn tree() -> TreeName {
    TreeName::new("dc_example_dc_com", "cn.equality")
}

fn seeded() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage
        .write(|txn| {
            txn.open_tree(&tree())?;
            for key in [b"b".as_slice(), b"d", b"f"] {
                txn.put(&tree(), key, key)?;
            }
            Ok(())
        })
        .unwrap();

    storage
}

#[test]
fn tree_name_orders_by_prefix_then_id() {
    let a = TreeName::new("a", "z");
    let b = TreeName::new("b", "a");

    assert!(a < b);
    assert_eq!(a.to_string(), "/a/z");
}

#[test]
fn failed_write_is_discarded() {
    let storage = seeded();

    let err = storage
        .write(|txn| -> Result<(), InternalError> {
            txn.put(&tree(), b"x", b"x")?;
            Err(StorageError::Engine("boom".to_string()).into())
        })
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Storage);

    let value = storage.read(|txn| Ok(txn.read(&tree(), b"x")?)).unwrap();
    assert_eq!(value, None);
}

#[test]
fn commit_hooks_run_in_order_only_after_commit() {
    let storage = seeded();
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let committed = Arc::new(AtomicU64::new(0));

    let err = storage
        .write(|txn| -> Result<(), InternalError> {
            let committed = Arc::clone(&committed);
            txn.on_commit(Box::new(move || {
                committed.fetch_add(1, Ordering::Relaxed);
            }));
            Err(StorageError::Engine("boom".to_string()).into())
        })
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Storage);
    assert_eq!(committed.load(Ordering::Relaxed), 0);

    storage
        .write(|txn| {
            for step in 1..=3 {
                let log = Arc::clone(&log);
                txn.on_commit(Box::new(move || log.lock().push(step)));
            }
            assert!(log.lock().is_empty());
            Ok(())
        })
        .unwrap();
    assert_eq!(*log.lock(), vec![1, 2, 3]);
}

#[test]
fn put_requires_open_tree() {
    let storage = MemoryStorage::new();

    let err = storage
        .write(|txn| Ok(txn.put(&tree(), b"k", b"v")?))
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::Storage);
}

#[test]
fn put_if_absent_keeps_existing_value() {
    let storage = seeded();

    let stored = storage
        .write(|txn| {
            let first = txn.put_if_absent(&tree(), b"b", b"other")?;
            let second = txn.put_if_absent(&tree(), b"c", b"c")?;
            Ok((first, second))
        })
        .unwrap();
    assert_eq!(stored, (false, true));

    let value = storage.read(|txn| Ok(txn.read(&tree(), b"b")?)).unwrap();
    assert_eq!(value.as_deref(), Some(b"b".as_slice()));
}

#[test]
fn cursor_walks_both_directions() {
    let storage = seeded();

    storage
        .read(|txn| {
            let mut cursor = txn.open_cursor(&tree())?;

            assert!(cursor.seek_to_or_after(b"c"));
            assert_eq!(cursor.key(), Some(b"d".as_slice()));
            assert!(cursor.next());
            assert_eq!(cursor.key(), Some(b"f".as_slice()));
            assert!(!cursor.next());
            assert_eq!(cursor.key(), Some(b"f".as_slice()));
            assert!(cursor.previous());
            assert!(cursor.previous());
            assert_eq!(cursor.value(), Some(b"b".as_slice()));
            assert!(!cursor.previous());

            assert!(!cursor.seek_to(b"c"));
            assert_eq!(cursor.key(), None);
            assert!(cursor.seek_to_last());
            assert_eq!(cursor.key(), Some(b"f".as_slice()));
            assert!(!cursor.seek_to_or_after(b"g"));

            Ok(())
        })
        .unwrap();
}

#[test]
fn read_snapshot_ignores_later_commits() {
    let storage = seeded();

    storage
        .read(|snapshot| {
            storage.write(|txn| Ok(txn.put(&tree(), b"z", b"z")?))?;
            assert_eq!(snapshot.read(&tree(), b"z")?, None);
            Ok(())
        })
        .unwrap();

    let value = storage.read(|txn| Ok(txn.read(&tree(), b"z")?)).unwrap();
    assert!(value.is_some());
}

#[test]
fn stats_count_point_operations() {
    let storage = seeded();
    storage.reset_stats();

    storage
        .write(|txn| {
            txn.read(&tree(), b"b")?;
            txn.delete(&tree(), b"b")?;
            Ok(())
        })
        .unwrap();

    let stats = storage.stats();
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.writes, 1);
}
