//! Interned-identifier table.
//!
//! Short strings (variable names, method names, the handful of keywords the
//! runtime passes around constantly) are interned into a small dense
//! integer so the rest of the core can compare and hash identifiers as
//! `u32`s instead of strings. Grows the table by doubling on exhaustion and
//! rebuilding the hash chains, backed by a freelist rather than a concurrent
//! directory, since at most one mutator ever touches this table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::fatal;

/// Sentinel that terminates both the freelist and hash collision chains.
const NIL: i32 = -1;

/// The "small constant" subtracted from the next power of two when sizing
/// the bucket table: keeps it from wasting a bucket's worth of space once
/// headers are accounted for.
const BUCKET_SLOP: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident(u32);

impl Ident {
    pub fn index(self) -> u32 {
        self.0
    }
}

struct Entry {
    text: Option<Box<str>>,
    refs: u32,
    /// Hash collision chain link while live; freelist link while vacant.
    next: i32,
}

pub struct IdentTable {
    entries: Vec<Entry>,
    buckets: Vec<i32>,
    blanks: i32,
}

impl IdentTable {
    pub fn new() -> Self {
        let mut t = Self {
            entries: Vec::new(),
            buckets: Vec::new(),
            blanks: NIL,
        };
        t.grow();
        t
    }

    /// `get(s)`: intern `s`, incrementing its refcount if it already
    /// exists.
    pub fn get(&mut self, s: &str) -> Ident {
        let bucket = self.bucket_of(s);
        let mut cur = self.buckets[bucket];
        while cur != NIL {
            let e = &self.entries[cur as usize];
            if e.text.as_deref() == Some(s) {
                self.entries[cur as usize].refs += 1;
                return Ident(cur as u32);
            }
            cur = e.next;
        }

        if self.blanks == NIL {
            self.grow();
        }

        let id = self.blanks;
        self.blanks = self.entries[id as usize].next;

        let bucket = self.bucket_of(s);
        self.entries[id as usize] = Entry {
            text: Some(s.into()),
            refs: 1,
            next: self.buckets[bucket],
        };
        self.buckets[bucket] = id;
        Ident(id as u32)
    }

    /// `dup(id)`: increment the refcount of an already-live identifier.
    pub fn dup(&mut self, id: Ident) -> Ident {
        self.entries[id.0 as usize].refs += 1;
        id
    }

    /// `discard(id)`: decrement the refcount, reclaiming the slot at zero.
    pub fn discard(&mut self, id: Ident) {
        let idx = id.0 as usize;
        let refs = {
            let e = &mut self.entries[idx];
            e.refs -= 1;
            e.refs
        };
        if refs > 0 {
            return;
        }

        let text = self.entries[idx]
            .text
            .take()
            .unwrap_or_else(|| fatal("ident_discard: entry has no text"));
        let bucket = self.bucket_of(&text);

        let mut cur = self.buckets[bucket];
        if cur == idx as i32 {
            self.buckets[bucket] = self.entries[idx].next;
        } else {
            while cur != NIL {
                let next = self.entries[cur as usize].next;
                if next == idx as i32 {
                    self.entries[cur as usize].next = self.entries[idx].next;
                    break;
                }
                cur = next;
            }
        }

        self.entries[idx].next = self.blanks;
        self.blanks = idx as i32;
    }

    /// `name(id)`: recover the interned text. Fatal on internal corruption
    /// (a live id with no text is never supposed to happen).
    pub fn name(&self, id: Ident) -> &str {
        self.entries[id.0 as usize]
            .text
            .as_deref()
            .unwrap_or_else(|| fatal("ident_name: live id has no text"))
    }

    fn bucket_of(&self, s: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }

    fn grow(&mut self) {
        let old_len = self.entries.len();
        let new_len = if old_len == 0 { 16 } else { old_len * 2 };

        self.entries.reserve(new_len - old_len);
        for i in old_len..new_len {
            let next = if i + 1 == new_len { self.blanks } else { (i + 1) as i32 };
            self.entries.push(Entry {
                text: None,
                refs: 0,
                next,
            });
        }
        self.blanks = old_len as i32;

        let bucket_count = (new_len.next_power_of_two()).saturating_sub(BUCKET_SLOP).max(1);
        self.buckets = vec![NIL; bucket_count];
        for i in 0..old_len {
            if let Some(text) = self.entries[i].text.clone() {
                let bucket = self.bucket_of(&text);
                self.entries[i].next = self.buckets[bucket];
                self.buckets[bucket] = i as i32;
            }
        }
    }
}

impl Default for IdentTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_unique_for_overlapping_lifetimes() {
        let mut t = IdentTable::new();
        let a = t.get("foo");
        let b = t.get("foo");
        assert_eq!(a, b);
        assert_eq!(t.name(a), "foo");
        t.discard(a);
        t.discard(b);
    }

    #[test]
    fn discard_reclaims_and_reuses_slot() {
        let mut t = IdentTable::new();
        let a = t.get("bar");
        t.discard(a);
        let b = t.get("baz");
        assert_eq!(b.index(), a.index());
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut t = IdentTable::new();
        let a = t.get("one");
        let b = t.get("two");
        assert_ne!(a, b);
        t.discard(a);
        t.discard(b);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut t = IdentTable::new();
        let mut ids = Vec::new();
        for i in 0..100 {
            ids.push(t.get(&format!("ident-{i}")));
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(t.name(*id), format!("ident-{i}"));
        }
        for id in ids {
            t.discard(id);
        }
    }
}
