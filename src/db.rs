//! Lifecycle orchestration and the clean marker: `init` / `flush` /
//! `close`, plus the raw block-store operations (`get`/`put`/`del`/`check`)
//! the object cache calls for write-back and faults.
//!
//! The clean marker is the crate's only durability story: no journal, no
//! fsync discipline beyond "sync before the marker is written". Its
//! presence certifies the index and objects file
//! agree; `put`/`del` remove it on the first mutation after a sync and
//! `flush`/`close` put it back once everything is written back.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{fatal, Result};
use crate::store::bitmap::BlockAllocator;
use crate::store::disk::{block_to_offset, offset_to_block, ObjectFile};
use crate::store::index::ObjectIndex;
use crate::ObjNum;

/// Build version embedded in the clean marker; a mismatch on startup means
/// a binary written by a different build of this crate, which this design
/// treats as untrustworthy rather than attempting forward compatibility.
pub fn current_version() -> (u32, u32, u32) {
    (
        env!("CARGO_PKG_VERSION_MAJOR")
            .parse()
            .expect("CARGO_PKG_VERSION_MAJOR is not numeric"),
        env!("CARGO_PKG_VERSION_MINOR")
            .parse()
            .expect("CARGO_PKG_VERSION_MINOR is not numeric"),
        env!("CARGO_PKG_VERSION_PATCH")
            .parse()
            .expect("CARGO_PKG_VERSION_PATCH is not numeric"),
    )
}

pub struct Db {
    file: ObjectFile,
    index: ObjectIndex,
    alloc: BlockAllocator,
    clean_path: PathBuf,
    clean: bool,
    cur_search: i64,
}

impl Db {
    pub fn init(config: &StoreConfig, force_fresh: bool) -> Result<Self> {
        let data_dir = &config.data_dir;
        ensure_directory(data_dir)?;

        let objects_path = data_dir.join("objects");
        let index_path = data_dir.join("index");
        let clean_path = data_dir.join("clean");

        let (fresh, cur_search) = if force_fresh {
            (true, 0)
        } else if clean_path.exists() {
            let (major, minor, patch, cur_search) = read_clean_marker(&clean_path)?;
            if (major, minor, patch) != current_version() {
                fatal(format!(
                    "clean marker version {major}.{minor}.{patch} does not match build {:?}",
                    current_version()
                ));
            }
            (false, cur_search)
        } else if objects_path.exists() {
            fatal("database is corrupted: objects file exists but clean marker is missing");
        } else {
            (true, 0)
        };

        let file = ObjectFile::open(&objects_path, fresh)?;
        let index = ObjectIndex::open(&index_path, fresh)?;

        let mut alloc = BlockAllocator::new(0);
        for (_, offset, size) in index.iter() {
            alloc.mark(offset_to_block(offset), size as usize);
        }

        let mut db = Self {
            file,
            index,
            alloc,
            clean_path,
            clean: !fresh,
            cur_search,
        };

        if fresh {
            db.is_clean();
        }

        info!(fresh, blocks = db.alloc.bitmap.num_blocks(), "object store initialized");
        Ok(db)
    }

    pub fn cur_search(&self) -> i64 {
        self.cur_search
    }

    pub fn set_cur_search(&mut self, value: i64) {
        self.cur_search = value;
    }

    pub fn is_dirty(&mut self) {
        if self.clean {
            if let Err(e) = fs::remove_file(&self.clean_path) {
                fatal(format!("failed to remove clean marker: {e}"));
            }
            self.clean = false;
        }
    }

    pub fn is_clean(&mut self) {
        if !self.clean {
            if let Err(e) = write_clean_marker(&self.clean_path, self.cur_search) {
                fatal(format!("failed to write clean marker: {e}"));
            }
            self.clean = true;
        }
    }

    pub fn get(&mut self, n: ObjNum) -> Result<Option<Vec<u8>>> {
        match self.index.retrieve(n) {
            Some((offset, size)) => Ok(Some(self.file.read_at(offset, size)?)),
            None => Ok(None),
        }
    }

    /// `put(N, bytes)`: reuse the existing block range when it still fits,
    /// otherwise unmark it and allocate fresh.
    pub fn put(&mut self, n: ObjNum, bytes: &[u8]) -> Result<()> {
        self.is_dirty();
        let new_size = bytes.len() as i32;

        let offset = match self.index.retrieve(n) {
            Some((off_old, size_old)) => {
                let old_blocks = BlockAllocator::needed_blocks(size_old as usize);
                let need_blocks = BlockAllocator::needed_blocks(bytes.len());
                if need_blocks <= old_blocks {
                    off_old
                } else {
                    self.alloc.unmark(offset_to_block(off_old), size_old as usize);
                    block_to_offset(self.alloc.alloc(bytes.len()))
                }
            }
            None => block_to_offset(self.alloc.alloc(bytes.len())),
        };

        self.file.write_at(offset, bytes)?;
        self.index.store(n, offset, new_size)?;
        Ok(())
    }

    pub fn del(&mut self, n: ObjNum) -> Result<()> {
        self.is_dirty();
        if let Some((offset, size)) = self.index.retrieve(n) {
            self.file.mark_deleted(offset)?;
            self.alloc.unmark(offset_to_block(offset), size as usize);
            self.index.remove(n)?;
        }
        Ok(())
    }

    pub fn check(&self, n: ObjNum) -> bool {
        self.index.contains(n)
    }

    /// `(offset, size)` of `n`'s on-disk image, if any. Exposed for
    /// diagnostics and for tests asserting placement behavior directly.
    pub fn object_location(&self, n: ObjNum) -> Option<(i64, i32)> {
        self.index.retrieve(n)
    }

    pub fn is_block_allocated(&self, block: usize) -> bool {
        self.alloc.bitmap.get(block)
    }

    pub fn first(&self) -> Option<ObjNum> {
        self.index.first()
    }

    pub fn next(&self, after: ObjNum) -> Option<ObjNum> {
        self.index.next(after)
    }

    /// Index-sync then rewrite the clean marker.
    pub fn flush(&mut self) -> Result<()> {
        self.index.sync()?;
        self.file.sync()?;
        self.is_clean();
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        warn!("object store closed");
        Ok(())
    }
}

fn ensure_directory(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            fs::remove_file(dir)?;
            fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(_) => {
            fs::create_dir_all(dir)?;
            Ok(())
        }
    }
}

fn write_clean_marker(path: &Path, cur_search: i64) -> Result<()> {
    let (major, minor, patch) = current_version();
    let contents = format!("{major}\n{minor}\n{patch}\n{cur_search}\n");
    fs::write(path, contents)?;
    Ok(())
}

fn read_clean_marker(path: &Path) -> Result<(u32, u32, u32, i64)> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();
    let mut next_num = || -> Result<i64> {
        lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| crate::error::StoreError::Corrupt("malformed clean marker".into()))
    };
    let major = next_num()? as u32;
    let minor = next_num()? as u32;
    let patch = next_num()? as u32;
    let cur_search = next_num()?;
    Ok((major, minor, patch, cur_search))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &Path) -> StoreConfig {
        StoreConfig {
            data_dir: dir.to_path_buf(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn fresh_init_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let mut db = Db::init(&cfg, true).unwrap();
        let bytes = vec![0xABu8; 10 * 1024];
        db.put(1, &bytes).unwrap();
        assert_eq!(db.get(1).unwrap(), Some(bytes));
        db.flush().unwrap();
        assert!(dir.path().join("clean").exists());
    }

    #[test]
    fn grow_in_place_vs_relocate() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let mut db = Db::init(&cfg, true).unwrap();

        db.put(2, &vec![0u8; 500]).unwrap();
        let (off1, _) = db.get_offset(2);

        db.put(2, &vec![1u8; 400]).unwrap();
        let (off2, _) = db.get_offset(2);
        assert_eq!(off1, off2, "shrinking within the same block count reuses the offset");

        db.put(2, &vec![2u8; 800]).unwrap();
        let (off3, _) = db.get_offset(2);
        assert_ne!(off1, off3, "growing past the old block count relocates");
    }

    #[test]
    fn delete_writes_tag_and_clears_bitmap() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let mut db = Db::init(&cfg, true).unwrap();
        db.put(5, b"hello-world").unwrap();
        db.del(5).unwrap();
        assert!(!db.check(5));
    }

    #[test]
    #[should_panic(expected = "database is corrupted")]
    fn missing_clean_marker_on_existing_db_is_fatal() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let mut db = Db::init(&cfg, true).unwrap();
            // put() calls is_dirty(), which removes the clean marker written
            // by init(); simulates a crash before the next flush() restores it.
            db.put(7, b"data").unwrap();
        }
        Db::init(&cfg, false).unwrap();
    }

    impl Db {
        fn get_offset(&self, n: ObjNum) -> (i64, i32) {
            self.index.retrieve(n).unwrap()
        }
    }
}
