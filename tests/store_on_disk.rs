use assert_matches::assert_matches;
use message_store::storage::{LogOptions, RetentionPolicy};
use message_store::{Error, FixedClock, Store, StoreOptions};
use std::fs::{self, OpenOptions};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const PAIRS: [(&str, &str); 4] = [
    ("one", "wubdakdba"),
    ("two", "asdnladn"),
    ("three", "asdiohaliahdald"),
    ("four", "haoihaoidhda"),
];

fn small_segments() -> StoreOptions {
    StoreOptions {
        log: LogOptions {
            max_segment_bytes: 1024,
            retention: RetentionPolicy::Disabled,
        },
        verify_checksums: true,
    }
}

#[test]
fn write_and_read() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();

    for (i, (key, value)) in PAIRS.iter().enumerate() {
        let offset = store.write(key.as_bytes(), value.as_bytes()).unwrap();
        assert_eq!(offset, i as i64);
    }

    let mut reader = store.reader(0).unwrap();
    for (key, value) in PAIRS {
        let (k, v) = reader.read().unwrap().expect("record");
        assert_eq!(k, key.as_bytes());
        assert_eq!(v, value.as_bytes());
    }
    assert_matches!(reader.read(), Ok(None));

    let mut from_two = store.reader(2).unwrap();
    assert_eq!(from_two.read().unwrap().map(|(k, _)| k), Some(b"three".to_vec()));

    store.close().unwrap();
}

#[test]
fn records_survive_reopen_across_segments() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open_with_options(dir.path(), small_segments())
            .unwrap()
            .with_clock(Arc::new(FixedClock(1_234)));
        for i in 0..100 {
            store
                .write(format!("key-{}", i).as_bytes(), format!("value-{}", i).as_bytes())
                .unwrap();
        }
        store.close().unwrap();
    }

    let mut store = Store::open_with_options(dir.path(), small_segments()).unwrap();
    assert_eq!(store.write(b"key-100", b"value-100").unwrap(), 100);

    let mut reader = store.reader(0).unwrap();
    for i in 0..=100 {
        let record = reader.read_record().unwrap().expect("record");
        assert_eq!(record.offset, i);
        assert_eq!(record.key, format!("key-{}", i).into_bytes());
        assert!(record.verify());
    }
    assert_matches!(reader.read(), Ok(None));

    let tail = store.reader(95).unwrap();
    assert_eq!(tail.count(), 6);
}

#[test]
fn torn_tail_is_dropped_on_reopen() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = Store::open(dir.path()).unwrap();
        for (key, value) in PAIRS {
            store.write(key.as_bytes(), value.as_bytes()).unwrap();
        }
        store.close().unwrap();
    }

    let segment = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.extension().map_or(false, |ext| ext == "log"))
        .expect("segment file");
    let len = fs::metadata(&segment).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&segment)
        .unwrap()
        .set_len(len - 5)
        .unwrap();

    let mut store = Store::open(dir.path()).unwrap();
    let keys: Vec<Vec<u8>> = store.reader(0).unwrap().map(|pair| pair.unwrap().0).collect();
    assert_eq!(keys, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    assert_eq!(store.write(b"four", b"again").unwrap(), 3);
}

#[test]
fn closed_store_rejects_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    store.close().unwrap();
    store.close().unwrap();

    assert_matches!(store.write(b"k", b"v"), Err(Error::Closed));
    assert_matches!(store.reader(0).err(), Some(Error::Closed));
}

#[test]
fn open_fails_when_path_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();
    assert_matches!(Store::open(&file).err(), Some(Error::Open(_)));
}
