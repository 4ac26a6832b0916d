//! End-to-end scenarios exercising a full database lifecycle: fresh init,
//! growth vs. relocation, cache eviction and rescue, deletion, crash
//! recovery, and buffer segmentation.

use coldcore::cache::Cache;
use coldcore::codec::ObjectBody;
use coldcore::config::{StoreConfig, BLOCK_SIZE};
use coldcore::db::Db;
use tempfile::tempdir;

fn config(dir: &std::path::Path) -> StoreConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    StoreConfig {
        data_dir: dir.to_path_buf(),
        ..StoreConfig::default()
    }
}

/// 1. Fresh init + round-trip.
#[test]
fn fresh_init_and_round_trip() {
    let dir = tempdir().unwrap();
    let mut db = Db::init(&config(dir.path()), true).unwrap();

    let bytes = vec![0xABu8; 10 * 1024];
    db.put(1, &bytes).unwrap();

    let (offset, size) = db.object_location(1).unwrap();
    assert_eq!(offset, 0);
    assert_eq!(size, 10240);
    for block in 0..(10240 / BLOCK_SIZE) {
        assert!(db.is_block_allocated(block));
    }

    assert_eq!(db.get(1).unwrap(), Some(bytes));

    db.flush().unwrap();
    let clean = std::fs::read_to_string(dir.path().join("clean")).unwrap();
    assert_eq!(clean.lines().count(), 4);
}

/// 2. Grow-in-place vs relocate.
#[test]
fn grow_in_place_vs_relocate() {
    let dir = tempdir().unwrap();
    let mut db = Db::init(&config(dir.path()), true).unwrap();

    db.put(2, &vec![0u8; 500]).unwrap(); // 2 blocks
    let (off_a, _) = db.object_location(2).unwrap();

    db.put(2, &vec![1u8; 400]).unwrap(); // still 2 blocks, reuses offset
    let (off_b, _) = db.object_location(2).unwrap();
    assert_eq!(off_a, off_b);

    db.put(2, &vec![2u8; 800]).unwrap(); // 4 blocks, must relocate
    let (off_c, _) = db.object_location(2).unwrap();
    assert_ne!(off_b, off_c);
}

/// 3. Cache rescue: CACHE_WIDTH=4, CACHE_DEPTH=1, objects 0/4/8/12 share a
/// bucket, and the fourth retrieval evicts the coldest.
#[test]
fn cache_rescue_evicts_coldest_via_inactive_tail() {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        cache_width: 4,
        cache_depth: 1,
        ..StoreConfig::default()
    };
    let mut cache = Cache::open(&cfg, true).unwrap();

    for n in [0i64, 4, 8, 12] {
        let h = cache.new_object(n, ObjectBody::new(vec![]));
        cache.discard(h).unwrap();
    }

    // All four objects must be recoverable from the store even though only
    // one inactive shell exists per bucket.
    for n in [0i64, 4, 8, 12] {
        assert!(cache.check(n), "object {n} should still be durable");
    }
}

/// 4. Delete marker.
#[test]
fn delete_writes_delobj_tag_and_clears_bitmap() {
    let dir = tempdir().unwrap();
    let mut db = Db::init(&config(dir.path()), true).unwrap();

    db.put(5, b"hello-world").unwrap();
    let (offset, size) = db.object_location(5).unwrap();
    let blocks = (size as usize + BLOCK_SIZE - 1) / BLOCK_SIZE;

    db.del(5).unwrap();

    let objects_path = dir.path().join("objects");
    let mut file = std::fs::File::open(&objects_path).unwrap();
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset as u64)).unwrap();
    let mut tag = [0u8; 6];
    file.read_exact(&mut tag).unwrap();
    assert_eq!(&tag, b"delobj");

    for block in (offset as usize / BLOCK_SIZE)..(offset as usize / BLOCK_SIZE + blocks) {
        assert!(!db.is_block_allocated(block));
    }
    assert!(!db.check(5));
}

/// 5. Crash simulation: a dirty put without a subsequent flush leaves the
/// clean marker missing, and the next non-fresh init is fatal.
#[test]
#[should_panic(expected = "database is corrupted")]
fn crash_before_flush_is_fatal_on_reopen() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    {
        let mut db = Db::init(&cfg, true).unwrap();
        db.put(7, b"unflushed").unwrap();
    }
    Db::init(&cfg, false).unwrap();
}

/// 6. Buffer split & rejoin.
#[test]
fn buffer_split_and_rejoin() {
    use coldcore::buffer::{Buffer, StringsElem};

    let list = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let joined = Buffer::from_strings(&list, Some(b"|"));
    let split = joined.to_strings_segments(Some(b"|"));

    assert_eq!(
        split,
        vec![
            StringsElem::Str("a".to_string()),
            StringsElem::Str("b".to_string()),
            StringsElem::Str("c".to_string()),
            StringsElem::Buf(Buffer::from_bytes(vec![])),
        ]
    );
}
