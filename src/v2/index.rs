//! Zero-copy view into the ledger index at the end of a v2 file.
//!
//! The index is an array of 28-byte entries sorted by ledger sequence,
//! enabling O(log n) random access. The view borrows the mapped bytes
//! directly; nothing is copied.

use std::mem::size_of;

use crate::v2::layout::IndexEntry;

/// Borrowed view over the trailing ledger index.
///
/// Obtained from `Reader::index`; `Reader::seek_to_ledger` is the common
/// consumer, but the view is useful on its own for range queries like
/// `find_or_before` and `sequence_range`.
#[derive(Clone, Copy)]
pub struct LedgerIndexView<'a> {
    entries: &'a [IndexEntry],
}

impl<'a> LedgerIndexView<'a> {
    /// Wrap a validated byte range holding `count` entries.
    ///
    /// The caller (the reader) has already checked that the range lies
    /// inside the mapping; `IndexEntry` is packed with alignment 1, so the
    /// reinterpretation below is sound at any byte offset.
    pub(crate) fn new(bytes: &'a [u8], count: usize) -> Self {
        debug_assert!(bytes.len() >= count * size_of::<IndexEntry>());
        let entries =
            unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const IndexEntry, count) };
        LedgerIndexView { entries }
    }

    /// Find the entry for an exact ledger sequence.
    pub fn find(&self, sequence: u32) -> Option<&'a IndexEntry> {
        let idx = self.entries.partition_point(|entry| {
            let seq = entry.sequence;
            seq < sequence
        });
        let entry = self.entries.get(idx)?;
        let seq = entry.sequence;
        (seq == sequence).then_some(entry)
    }

    /// Find the entry with the greatest sequence `<= sequence`, if any.
    ///
    /// Useful for locating the closest available ledger when the exact
    /// sequence is not in the file.
    pub fn find_or_before(&self, sequence: u32) -> Option<&'a IndexEntry> {
        let idx = self.entries.partition_point(|entry| {
            let seq = entry.sequence;
            seq <= sequence
        });
        if idx == 0 {
            return None;
        }
        self.entries.get(idx - 1)
    }

    /// Entry by position, or `None` past the end.
    pub fn at(&self, index: usize) -> Option<&'a IndexEntry> {
        self.entries.get(index)
    }

    /// First entry, if the index is non-empty.
    pub fn front(&self) -> Option<&'a IndexEntry> {
        self.entries.first()
    }

    /// Last entry, if the index is non-empty.
    pub fn back(&self) -> Option<&'a IndexEntry> {
        self.entries.last()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the file holds no ledgers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(first, last)` ledger sequences, or `None` when empty.
    pub fn sequence_range(&self) -> Option<(u32, u32)> {
        let first = self.front()?.sequence;
        let last = self.back()?.sequence;
        Some((first, last))
    }

    /// Whether `sequence` falls inside the index's range (present or not).
    pub fn contains_sequence(&self, sequence: u32) -> bool {
        match self.sequence_range() {
            Some((first, last)) => sequence >= first && sequence <= last,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v2::layout::pod_bytes;

    fn index_bytes(sequences: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &sequence in sequences {
            let entry = IndexEntry {
                sequence,
                header_offset: 1000 + sequence as u64,
                state_tree_offset: 2000 + sequence as u64,
                tx_tree_offset: 0,
            };
            bytes.extend_from_slice(pod_bytes(&entry));
        }
        bytes
    }

    #[test]
    fn find_hits_and_misses() {
        let bytes = index_bytes(&[100, 105, 110]);
        let view = LedgerIndexView::new(&bytes, 3);

        let hit = view.find(105).expect("present");
        assert_eq!({ hit.header_offset }, 1105);
        assert!(view.find(106).is_none());
        assert!(view.find(99).is_none());
        assert!(view.find(111).is_none());
    }

    #[test]
    fn find_or_before_picks_nearest_lower() {
        let bytes = index_bytes(&[100, 105, 110]);
        let view = LedgerIndexView::new(&bytes, 3);

        assert_eq!({ view.find_or_before(107).expect("105").sequence }, 105);
        assert_eq!({ view.find_or_before(110).expect("110").sequence }, 110);
        assert_eq!({ view.find_or_before(500).expect("110").sequence }, 110);
        assert!(view.find_or_before(99).is_none());
    }

    #[test]
    fn empty_index_behaves() {
        let view = LedgerIndexView::new(&[], 0);
        assert!(view.is_empty());
        assert!(view.find(1).is_none());
        assert!(view.find_or_before(1).is_none());
        assert!(view.front().is_none());
        assert!(view.back().is_none());
        assert_eq!(view.sequence_range(), None);
        assert!(!view.contains_sequence(1));
    }

    #[test]
    fn single_entry_range() {
        let bytes = index_bytes(&[42]);
        let view = LedgerIndexView::new(&bytes, 1);
        assert_eq!(view.len(), 1);
        assert_eq!(view.sequence_range(), Some((42, 42)));
        assert!(view.contains_sequence(42));
        assert!(!view.contains_sequence(41));
    }
}
