//! The UTF-8 string engine.
//!
//! Strings are UTF-8 bytes with a separately tracked codepoint length.
//! Codepoint-index to byte-offset translation starts from the nearest of
//! {head, tail, cached bookmarks} and scans, updating the bookmark cache so
//! repeated access near the same position is O(1) amortized. Symbol-backed
//! strings are interned and never own bookmarks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::series::SeriesFlags;

/// A cached (codepoint index, byte offset) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub index: u32,
    pub offset: u32,
}

/// How many bookmarks a string keeps. Head and tail are implicit.
const MAX_BOOKMARKS: usize = 2;

/// A mutable UTF-8 string node.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Text {
    bytes: Vec<u8>,
    char_len: u32,
    pub flags: SeriesFlags,
    bookmarks: SmallVec<[Bookmark; MAX_BOOKMARKS]>,
    /// Total bytes walked by index translation. Test instrumentation for
    /// the amortization guarantee; not part of equality or serialization
    /// round-trips in any meaningful way.
    scan_cost: u64,
}

impl Text {
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        Self {
            bytes: s.as_bytes().to_vec(),
            char_len: s.chars().count() as u32,
            ..Self::default()
        }
    }

    /// Codepoint length.
    #[must_use]
    pub fn len_chars(&self) -> usize {
        self.char_len as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Content is only ever built from &str fragments.
        std::str::from_utf8(&self.bytes).expect("text series holds valid UTF-8")
    }

    /// Bytes from a codepoint index to the tail, without touching the cache.
    #[must_use]
    pub fn slice_from(&self, index: u32) -> &[u8] {
        let offset = self.offset_readonly(index);
        &self.bytes[offset..]
    }

    #[must_use]
    pub fn str_from(&self, index: u32) -> &str {
        let offset = self.offset_readonly(index);
        std::str::from_utf8(&self.bytes[offset..]).expect("text series holds valid UTF-8")
    }

    /// The codepoint at `index`, if in range. Updates the bookmark cache.
    pub fn char_at(&mut self, index: usize) -> Option<char> {
        if index >= self.len_chars() {
            return None;
        }
        let offset = self.offset_of_index(index);
        self.as_str()[offset..].chars().next()
    }

    /// Inserts a string at a codepoint index.
    pub fn insert_str_at(&mut self, index: usize, s: &str) {
        let index = index.min(self.len_chars());
        let offset = self.offset_of_index(index);
        self.bytes.splice(offset..offset, s.bytes());
        self.char_len += s.chars().count() as u32;
        self.invalidate_from(index);
    }

    /// Removes `count` codepoints starting at `index`.
    pub fn remove_at(&mut self, index: usize, count: usize) {
        let count = count.min(self.len_chars().saturating_sub(index));
        if count == 0 {
            return;
        }
        let start = self.offset_of_index(index);
        let end = self.offset_of_index(index + count);
        self.bytes.drain(start..end);
        self.char_len -= count as u32;
        self.invalidate_from(index);
    }

    /// Translates codepoint index -> byte offset, updating the cache.
    ///
    /// Scans forward or backward from the nearest known position. The scan
    /// distance is charged to `scan_cost`, which tests use to verify the
    /// amortization guarantee.
    pub fn offset_of_index(&mut self, index: usize) -> usize {
        let index = index.min(self.len_chars());
        let (anchor_idx, anchor_off) = self.nearest_anchor(index);
        let (offset, walked) = walk(&self.bytes, anchor_idx, anchor_off, index);
        self.scan_cost += walked as u64;
        self.remember(index as u32, offset as u32);
        offset
    }

    /// Read-only translation: same scan, no cache update, no cost charge.
    #[must_use]
    fn offset_readonly(&self, index: u32) -> usize {
        let index = (index as usize).min(self.len_chars());
        let (anchor_idx, anchor_off) = self.nearest_anchor(index);
        walk(&self.bytes, anchor_idx, anchor_off, index).0
    }

    /// Picks the anchor (head, tail, or a bookmark) closest to `index`.
    fn nearest_anchor(&self, index: usize) -> (usize, usize) {
        let mut best = (0usize, 0usize);
        let mut best_dist = index;
        let tail_dist = self.len_chars().abs_diff(index);
        if tail_dist < best_dist {
            best = (self.len_chars(), self.bytes.len());
            best_dist = tail_dist;
        }
        for bm in &self.bookmarks {
            let dist = (bm.index as usize).abs_diff(index);
            if dist < best_dist {
                best = (bm.index as usize, bm.offset as usize);
                best_dist = dist;
            }
        }
        best
    }

    fn remember(&mut self, index: u32, offset: u32) {
        // Push while there is room, else replace the nearest bookmark.
        if self.bookmarks.len() < MAX_BOOKMARKS {
            self.bookmarks.push(Bookmark { index, offset });
            return;
        }
        if let Some(bm) = self.bookmarks.iter_mut().min_by_key(|bm| bm.index.abs_diff(index)) {
            bm.index = index;
            bm.offset = offset;
        }
    }

    /// Drops bookmarks at or past an edit point; offsets before it survive.
    fn invalidate_from(&mut self, index: usize) {
        self.bookmarks.retain(|bm| (bm.index as usize) < index);
    }

    /// Total bytes walked by cached index translation so far.
    #[must_use]
    pub fn scan_cost(&self) -> u64 {
        self.scan_cost
    }
}

/// Walks from a known (index, offset) anchor to a target index.
/// Returns the byte offset and the number of bytes traversed.
fn walk(bytes: &[u8], from_idx: usize, from_off: usize, to_idx: usize) -> (usize, usize) {
    let mut off = from_off;
    if to_idx >= from_idx {
        let mut remaining = to_idx - from_idx;
        while remaining > 0 {
            off += utf8_seq_len(bytes[off]);
            remaining -= 1;
        }
    } else {
        let mut remaining = from_idx - to_idx;
        while remaining > 0 {
            off -= 1;
            while off > 0 && is_continuation(bytes[off]) {
                off -= 1;
            }
            remaining -= 1;
        }
    }
    (off, off.abs_diff(from_off))
}

fn utf8_seq_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xc0 == 0x80
}
