//! The flat, block-aligned objects file.
//!
//! A single synchronous file handle: no read-ahead, no write-behind, no
//! `io_uring`. The object cache (`crate::cache`) already owns the working
//! set and this layer only ever runs at eviction and fault time, so that
//! extra machinery would just be complexity without a workload to amortize
//! it over.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::codec::DELOBJ_TAG;
use crate::config::BLOCK_SIZE;
use crate::error::Result;

pub struct ObjectFile {
    file: File,
}

impl ObjectFile {
    pub fn open(path: &Path, fresh: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if fresh {
            options.create(true).truncate(true);
        }
        let file = options.open(path)?;
        Ok(Self { file })
    }

    pub fn read_at(&mut self, offset: i64, size: i32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_at(&mut self, offset: i64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Overwrite the first `DELOBJ_TAG.len()` bytes at `offset` with the
    /// scavenging hint; not used for recovery, only as a visual marker for
    /// anyone inspecting the raw file.
    pub fn mark_deleted(&mut self, offset: i64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(DELOBJ_TAG)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

pub fn block_to_offset(block: usize) -> i64 {
    (block * BLOCK_SIZE) as i64
}

pub fn offset_to_block(offset: i64) -> usize {
    (offset as usize) / BLOCK_SIZE
}
