//! Persistent `object-number -> (offset, size)` index.
//!
//! Supports `first/next`, `retrieve`, `store`, `remove`, `sync`, `close` and
//! a `fresh?` open flag, implemented in-process rather than assuming the
//! index lives outside the store. Persisted as a fixed-width append-only
//! record log (store/remove entries, each CRC-guarded against a torn or bit-
//! flipped write) with an in-memory `BTreeMap` for lookups and ordered
//! iteration.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::ObjNum;

const TAG_STORE: u8 = 1;
const TAG_REMOVE: u8 = 0;
const RECORD_LEN: usize = 1 + 8 + 8 + 4 + 4;

pub struct ObjectIndex {
    file: File,
    map: BTreeMap<ObjNum, (i64, i32)>,
}

impl ObjectIndex {
    pub fn open(path: &Path, fresh: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        if fresh {
            options.truncate(true);
        }
        let mut file = options.open(path)?;

        let mut map = BTreeMap::new();
        if !fresh {
            replay(&mut file, &mut map)?;
        }

        Ok(Self { file, map })
    }

    pub fn retrieve(&self, n: ObjNum) -> Option<(i64, i32)> {
        self.map.get(&n).copied()
    }

    pub fn contains(&self, n: ObjNum) -> bool {
        self.map.contains_key(&n)
    }

    pub fn store(&mut self, n: ObjNum, offset: i64, size: i32) -> Result<()> {
        append_record(&mut self.file, TAG_STORE, n, offset, size)?;
        self.map.insert(n, (offset, size));
        Ok(())
    }

    pub fn remove(&mut self, n: ObjNum) -> Result<()> {
        append_record(&mut self.file, TAG_REMOVE, n, 0, 0)?;
        self.map.remove(&n);
        Ok(())
    }

    pub fn first(&self) -> Option<ObjNum> {
        self.map.keys().next().copied()
    }

    pub fn next(&self, after: ObjNum) -> Option<ObjNum> {
        self.map.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .next()
            .map(|(&k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjNum, i64, i32)> + '_ {
        self.map.iter().map(|(&n, &(off, size))| (n, off, size))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

fn append_record(file: &mut File, tag: u8, n: ObjNum, offset: i64, size: i32) -> Result<()> {
    let mut rec = Vec::with_capacity(RECORD_LEN);
    rec.push(tag);
    rec.extend_from_slice(&n.to_le_bytes());
    rec.extend_from_slice(&offset.to_le_bytes());
    rec.extend_from_slice(&size.to_le_bytes());
    let crc = crc32fast::hash(&rec);
    rec.extend_from_slice(&crc.to_le_bytes());

    file.seek(SeekFrom::End(0))?;
    file.write_all(&rec)?;
    Ok(())
}

fn replay(file: &mut File, map: &mut BTreeMap<ObjNum, (i64, i32)>) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    if buf.len() % RECORD_LEN != 0 {
        return Err(StoreError::Corrupt(format!(
            "index file length {} is not a multiple of the record size {}",
            buf.len(),
            RECORD_LEN
        )));
    }

    for chunk in buf.chunks_exact(RECORD_LEN) {
        let body = &chunk[..RECORD_LEN - 4];
        let stored_crc = u32::from_le_bytes(
            chunk[RECORD_LEN - 4..]
                .try_into()
                .expect("record CRC field is 4 bytes"),
        );
        if crc32fast::hash(body) != stored_crc {
            return Err(StoreError::Corrupt("index record failed checksum".into()));
        }

        let tag = body[0];
        let n = i64::from_le_bytes(body[1..9].try_into().expect("record n field is 8 bytes"));
        let offset = i64::from_le_bytes(
            body[9..17]
                .try_into()
                .expect("record offset field is 8 bytes"),
        );
        let size = i32::from_le_bytes(
            body[17..21]
                .try_into()
                .expect("record size field is 4 bytes"),
        );

        match tag {
            TAG_STORE => {
                map.insert(n, (offset, size));
            }
            TAG_REMOVE => {
                map.remove(&n);
            }
            other => return Err(StoreError::Corrupt(format!("unknown index tag {other}"))),
        }
    }

    Ok(())
}
