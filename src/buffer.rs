//! Immutable, reference-counted byte buffer with copy-on-write mutation.
//!
//! Every "mutating" operation either updates the storage in place (sole
//! owner) or forks a fresh copy (shared), via `Arc::make_mut`, and the
//! caller is expected to treat the buffer passed into a mutating call as
//! consumed.

use std::sync::Arc;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer(Arc<Vec<u8>>);

/// One element of a `to_strings` split: either a matched string segment, or
/// the trailing unmatched bytes as a raw buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum StringsElem {
    Str(String),
    Buf(Buffer),
}

const DEFAULT_SEP: &[u8] = b"\n";

/// Default separator for `from_strings`: unlike `to_string`/`to_strings`,
/// which split on a single `\n`, an omitted `from_strings` separator is
/// `\r\n` written after every element, including the trailing one.
const FROM_STRINGS_DEFAULT_SEP: &[u8] = b"\r\n";

impl Buffer {
    pub fn new(n: usize) -> Self {
        Buffer(Arc::new(vec![0u8; n]))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Buffer(Arc::new(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `dup`: a fresh handle sharing storage; bumps the refcount.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// `discard`: drop this handle, freeing storage at refcount zero.
    pub fn discard(self) {
        drop(self)
    }

    pub fn get(&self, i: usize) -> Result<u8> {
        self.0
            .get(i)
            .copied()
            .ok_or_else(|| StoreError::Range(format!("index {i} out of range")))
    }

    pub fn replace(&mut self, i: usize, octet: u8) -> Result<()> {
        if i >= self.0.len() {
            return Err(StoreError::Range(format!("index {i} out of range")));
        }
        Arc::make_mut(&mut self.0)[i] = octet;
        Ok(())
    }

    pub fn add(&mut self, octet: u8) {
        Arc::make_mut(&mut self.0).push(octet);
    }

    pub fn resize(&mut self, n: usize) {
        Arc::make_mut(&mut self.0).resize(n, 0);
    }

    pub fn append(mut self, other: &Buffer) -> Self {
        Arc::make_mut(&mut self.0).extend_from_slice(&other.0);
        self
    }

    pub fn tail(&self, k: usize) -> Self {
        let start = self.0.len().saturating_sub(k);
        Buffer::from_bytes(self.0[start..].to_vec())
    }

    pub fn subrange(&self, start: usize, len: usize) -> Result<Self> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| StoreError::Range("subrange overflow".into()))?;
        if end > self.0.len() {
            return Err(StoreError::Range(format!(
                "subrange [{start}, {end}) out of range for buffer of length {}",
                self.0.len()
            )));
        }
        Ok(Buffer::from_bytes(self.0[start..end].to_vec()))
    }

    /// `from_string`: copy octets, decoding the same backslash escapes the
    /// language's string parser understands. Shorter than the input
    /// whenever an escape collapses two characters into one octet.
    pub fn from_string(s: &str) -> Self {
        let mut out = Vec::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\\' {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('t') => out.push(b'\t'),
                Some('r') => out.push(b'\r'),
                Some('0') => out.push(0),
                Some('\\') => out.push(b'\\'),
                Some('"') => out.push(b'"'),
                Some('\'') => out.push(b'\''),
                Some(other) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => {}
            }
        }
        Buffer::from_bytes(out)
    }

    /// `from_strings`: join `list` with `sep`. An explicit `sep` is placed
    /// only *between* elements; the default (`\r\n`) is written *after*
    /// every element, including the trailing one.
    pub fn from_strings(list: &[String], sep: Option<&[u8]>) -> Self {
        let mut out = Vec::new();
        match sep {
            Some(sep) => {
                for (i, s) in list.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(sep);
                    }
                    out.extend_from_slice(s.as_bytes());
                }
            }
            None => {
                for s in list {
                    out.extend_from_slice(s.as_bytes());
                    out.extend_from_slice(FROM_STRINGS_DEFAULT_SEP);
                }
            }
        }
        Buffer::from_bytes(out)
    }

    /// `to_string`: for each separator-delimited segment, emit only its
    /// printable octets followed by the two-character sequence `\n`; the
    /// trailing segment after the last separator emits only its printable
    /// octets, unterminated.
    pub fn to_string_segments(&self, sep: Option<&[u8]>) -> String {
        let sep = sep.unwrap_or(DEFAULT_SEP);
        let segments = split_on(&self.0, sep);
        let mut out = String::new();
        let last = segments.len().saturating_sub(1);
        for (i, seg) in segments.iter().enumerate() {
            for &b in seg.iter().filter(|&&b| is_printable(b)) {
                out.push(b as char);
            }
            if i != last {
                out.push('\\');
                out.push('n');
            }
        }
        out
    }

    /// `to_strings`: split on `sep`, returning one `Str` per matched
    /// segment and a final `Buf` holding the unmatched trailing bytes
    /// unchanged.
    pub fn to_strings_segments(&self, sep: Option<&[u8]>) -> Vec<StringsElem> {
        let sep = sep.unwrap_or(DEFAULT_SEP);
        let mut out = Vec::new();
        let mut rest = &self.0[..];
        while let Some(pos) = find_subslice(rest, sep) {
            let seg: Vec<u8> = rest[..pos].iter().copied().filter(|&b| is_printable(b)).collect();
            out.push(StringsElem::Str(String::from_utf8_lossy(&seg).into_owned()));
            rest = &rest[pos + sep.len()..];
        }
        out.push(StringsElem::Buf(Buffer::from_bytes(rest.to_vec())));
        out
    }
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on(bytes: &[u8], sep: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while let Some(pos) = find_subslice(rest, sep) {
        out.push(rest[..pos].to_vec());
        rest = &rest[pos + sep.len()..];
    }
    out.push(rest.to_vec());
    out
}
