//! BitKey — a compact ordered set of column ordinals.
//!
//! Segments, predicates and cache keys all identify "which columns
//! participate" through a `BitKey`. The bit pattern is the identity: two keys
//! with the same set bits are equal regardless of how they were built, and the
//! total order over bit patterns is the canonical sort key that keeps
//! predicate lists and generated SQL deterministic across processes.
//!
//! Word storage stays inline for schemas up to 128 columns and spills to the
//! heap beyond that.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

const WORD_BITS: usize = 64;

/// An ordered set of column ordinals backed by bit words.
///
/// Cloning and mutating the clone never affects the original; all binary
/// operations (`and`, `or`, `and_not`) return new keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitKey {
    // Invariant: the last word is non-zero (trailing zero words are trimmed
    // so that derived equality and hashing see one canonical form).
    words: SmallVec<[u64; 2]>,
}

impl BitKey {
    /// The empty key.
    pub fn empty() -> Self {
        BitKey::default()
    }

    /// Build a key from an iterator of ordinals.
    pub fn of<I: IntoIterator<Item = usize>>(ordinals: I) -> Self {
        let mut key = BitKey::empty();
        for ordinal in ordinals {
            key.set(ordinal);
        }
        key
    }

    /// Set the bit for `ordinal`.
    pub fn set(&mut self, ordinal: usize) {
        let word = ordinal / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (ordinal % WORD_BITS);
    }

    /// Clear the bit for `ordinal`.
    pub fn clear(&mut self, ordinal: usize) {
        let word = ordinal / WORD_BITS;
        if word < self.words.len() {
            self.words[word] &= !(1u64 << (ordinal % WORD_BITS));
            self.trim();
        }
    }

    /// Whether the bit for `ordinal` is set.
    pub fn get(&self, ordinal: usize) -> bool {
        let word = ordinal / WORD_BITS;
        word < self.words.len() && self.words[word] & (1u64 << (ordinal % WORD_BITS)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Bits set in both keys.
    pub fn and(&self, other: &BitKey) -> BitKey {
        let n = self.words.len().min(other.words.len());
        let mut words: SmallVec<[u64; 2]> = SmallVec::with_capacity(n);
        for i in 0..n {
            words.push(self.words[i] & other.words[i]);
        }
        let mut key = BitKey { words };
        key.trim();
        key
    }

    /// Bits set in either key.
    pub fn or(&self, other: &BitKey) -> BitKey {
        let n = self.words.len().max(other.words.len());
        let mut words: SmallVec<[u64; 2]> = SmallVec::with_capacity(n);
        for i in 0..n {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            words.push(a | b);
        }
        BitKey { words }
    }

    /// Bits set in `self` but not in `other`.
    pub fn and_not(&self, other: &BitKey) -> BitKey {
        let mut words = self.words.clone();
        for (i, word) in words.iter_mut().enumerate() {
            *word &= !other.words.get(i).copied().unwrap_or(0);
        }
        let mut key = BitKey { words };
        key.trim();
        key
    }

    /// Whether every bit of `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &BitKey) -> bool {
        other
            .words
            .iter()
            .enumerate()
            .all(|(i, w)| self.words.get(i).copied().unwrap_or(0) & w == *w)
    }

    /// Iterate set ordinals in ascending order.
    pub fn iter(&self) -> BitKeyIter<'_> {
        BitKeyIter {
            key: self,
            word: 0,
            bits: self.words.first().copied().unwrap_or(0),
        }
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl PartialOrd for BitKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BitKey {
    /// Bit-pattern order: the key with the higher most-significant set bit is
    /// greater. Stable across processes, which makes it safe as the
    /// determinism anchor for compound-predicate sorting.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.words.len().cmp(&other.words.len()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        for i in (0..self.words.len()).rev() {
            match self.words[i].cmp(&other.words[i]) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for BitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, ordinal) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ordinal)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<usize> for BitKey {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        BitKey::of(iter)
    }
}

/// Ascending-ordinal iterator over a `BitKey`.
pub struct BitKeyIter<'a> {
    key: &'a BitKey,
    word: usize,
    bits: u64,
}

impl Iterator for BitKeyIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1;
                return Some(self.word * WORD_BITS + bit);
            }
            self.word += 1;
            if self.word >= self.key.words.len() {
                return None;
            }
            self.bits = self.key.words[self.word];
        }
    }
}

impl<'a> IntoIterator for &'a BitKey {
    type Item = usize;
    type IntoIter = BitKeyIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
