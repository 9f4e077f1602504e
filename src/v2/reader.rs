//! Memory-mapped reader for the v2 archive format.
//!
//! The reader maps the file read-only and hands out zero-copy views into
//! it: ledger headers, leaf payloads, and the trailing index are all
//! borrowed straight from the mapping. It is designed for streaming access
//! patterns (read a ledger header, query or skip its trees, repeat), with
//! the trailing index available for random access by sequence number.
//!
//! The mapping is shared: [`Reader::share`] yields an independent cursor
//! over the same mapping, and the mapping is released only when the last
//! reader referencing it is dropped.

use std::fs::File;
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{CatlError, Result};
use crate::ledger::LedgerInfo;
use crate::shamap::hash::{LEAF_NODE_PREFIX, TX_NODE_PREFIX};
use crate::types::Key;
use crate::v2::index::LedgerIndexView;
use crate::v2::layout::{pod_read, pod_ref, AbsOff, FileHeader, IndexEntry, TreesHeader};
use crate::v2::tree;
use crate::v2::walk::{self, WalkOptions};

/// Owns the memory mapping; shared by every reader view.
struct Mapping {
    mmap: Mmap,
    path: String,
}

/// Reader over a v2 archive file.
pub struct Reader {
    mapping: Arc<Mapping>,
    header: FileHeader,
    /// Streaming cursor (absolute file offset)
    pos: AbsOff,
    /// Trees-size record captured by the last `read_ledger_info`
    current_trees: TreesHeader,
    /// Sequence of the ledger the cursor last read
    current_seq: u32,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.mapping.path)
            .field("header", &self.header)
            .field("pos", &self.pos)
            .field("current_trees", &self.current_trees)
            .field("current_seq", &self.current_seq)
            .finish()
    }
}

impl Reader {
    /// Map `path` read-only and validate its header and trailing index
    /// bounds. The cursor is positioned at the first ledger.
    pub fn open(path: impl AsRef<Path>) -> Result<Reader> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let file = File::open(path).map_err(|source| CatlError::FileOpen {
            path: display.clone(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| CatlError::FileOpen {
                path: display.clone(),
                source,
            })?
            .len();
        if len == 0 {
            return Err(CatlError::FileEmpty { path: display });
        }

        // Read-only shared mapping; the file is append-finalized and never
        // mutated after finalize, which is a caller obligation.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| CatlError::FileOpen {
            path: display.clone(),
            source,
        })?;
        let mapping = Arc::new(Mapping {
            mmap,
            path: display,
        });

        let data = &mapping.mmap[..];
        let header: FileHeader = pod_read(data, 0)?;
        header.validate()?;

        // The trailing index must fit inside the file; all arithmetic is
        // checked because every operand comes from the (untrusted) header.
        let index_offset = header.ledger_index_offset;
        let file_size = data.len() as u64;
        let index_end = header
            .ledger_count
            .checked_mul(size_of::<IndexEntry>() as u64)
            .and_then(|len| index_offset.checked_add(len));
        match index_end {
            Some(end) if end <= file_size => {}
            _ => {
                return Err(CatlError::Truncated {
                    offset: index_offset,
                    needed: header.ledger_count.saturating_mul(size_of::<IndexEntry>() as u64),
                    file_size,
                });
            }
        }

        let ledger_count = header.ledger_count;
        debug!(
            path = %mapping.path,
            file_size,
            ledgers = ledger_count,
            "opened archive"
        );

        Ok(Reader {
            mapping,
            header,
            pos: size_of::<FileHeader>() as u64,
            current_trees: TreesHeader::default(),
            current_seq: 0,
        })
    }

    /// A new reader sharing this mapping, with its own cursor positioned at
    /// the first ledger. The mapping stays alive as long as any reader
    /// references it.
    pub fn share(&self) -> Reader {
        Reader {
            mapping: Arc::clone(&self.mapping),
            header: self.header,
            pos: size_of::<FileHeader>() as u64,
            current_trees: TreesHeader::default(),
            current_seq: 0,
        }
    }

    /// The validated file header.
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Total mapped size in bytes.
    pub fn file_size(&self) -> u64 {
        self.data().len() as u64
    }

    /// Current cursor position (absolute file offset).
    pub fn current_offset(&self) -> AbsOff {
        self.pos
    }

    /// Sequence of the most recently read ledger header.
    pub fn current_sequence(&self) -> u32 {
        self.current_seq
    }

    /// True once the cursor has consumed every ledger region.
    pub fn at_end_of_ledgers(&self) -> bool {
        let index_offset = self.header.ledger_index_offset;
        self.pos >= index_offset
    }

    /// Read the ledger header at the cursor as a zero-copy view, capturing
    /// the trees-size record that follows it. Afterwards the cursor sits at
    /// the start of the state tree.
    pub fn read_ledger_info(&mut self) -> Result<&LedgerInfo> {
        let needed = (LedgerInfo::SIZE + size_of::<TreesHeader>()) as u64;
        if self.pos + needed > self.file_size() {
            return Err(CatlError::Truncated {
                offset: self.pos,
                needed,
                file_size: self.file_size(),
            });
        }

        self.current_trees = pod_read(self.data(), self.pos + LedgerInfo::SIZE as u64)?;
        let info: &LedgerInfo = pod_ref(&self.mapping.mmap[..], self.pos)?;
        self.pos += needed;
        self.current_seq = info.seq;
        Ok(info)
    }

    /// Advance the cursor past the current ledger's state tree. Returns the
    /// number of bytes skipped.
    pub fn skip_state_trie(&mut self) -> u64 {
        let size = self.current_trees.state_tree_size;
        self.pos += size;
        size
    }

    /// Advance the cursor past the current ledger's transaction tree.
    /// Returns the number of bytes skipped.
    pub fn skip_tx_trie(&mut self) -> u64 {
        let size = self.current_trees.tx_tree_size;
        self.pos += size;
        size
    }

    /// Look up a key in the current ledger's state tree.
    ///
    /// Must be called after [`Reader::read_ledger_info`] and before either
    /// skip; the state root sits exactly at the cursor. Returns a payload
    /// slice borrowed from the mapping, or `None` when absent.
    pub fn lookup_state(&self, key: &Key) -> Result<Option<&[u8]>> {
        let state_size = self.current_trees.state_tree_size;
        if state_size == 0 {
            return Ok(None);
        }
        tree::lookup(self.data(), self.pos, key)
    }

    /// Look up a transaction hash in the current ledger's transaction tree.
    ///
    /// Same cursor contract as [`Reader::lookup_state`]. Ledgers without
    /// transactions have no tree and always answer `None`.
    pub fn lookup_tx(&self, key: &Key) -> Result<Option<&[u8]>> {
        let tx_size = self.current_trees.tx_tree_size;
        if tx_size == 0 {
            return Ok(None);
        }
        let state_size = self.current_trees.state_tree_size;
        tree::lookup(self.data(), self.pos + state_size, key)
    }

    /// Walk every leaf of the current ledger's state tree, sequentially or
    /// via the worker pool per `options`. Returns the number of leaves the
    /// callback saw.
    ///
    /// In parallel mode the callback runs on multiple workers concurrently;
    /// wrap non-thread-safe callbacks with [`walk::serialized`].
    pub fn walk_state_leaves<F>(&self, visit: F, options: &WalkOptions) -> Result<u64>
    where
        F: Fn(&Key, &[u8]) -> bool + Sync,
    {
        let state_size = self.current_trees.state_tree_size;
        if state_size == 0 {
            return Ok(0);
        }
        if options.parallel {
            walk::walk_parallel(self.data(), self.pos, options, &visit)
        } else {
            let mut adapter = |key: &Key, payload: &[u8]| visit(key, payload);
            tree::walk_leaves(self.data(), self.pos, &mut adapter).map(|(count, _)| count)
        }
    }

    /// Walk every leaf of the current ledger's transaction tree
    /// (sequential). Returns the number of leaves the callback saw.
    pub fn walk_tx_leaves<F>(&self, mut visit: F) -> Result<u64>
    where
        F: FnMut(&Key, &[u8]) -> bool,
    {
        let tx_size = self.current_trees.tx_tree_size;
        if tx_size == 0 {
            return Ok(0);
        }
        let state_size = self.current_trees.state_tree_size;
        tree::walk_leaves(self.data(), self.pos + state_size, &mut visit)
            .map(|(count, _)| count)
    }

    /// Re-derive every node digest of the current ledger's trees and compare
    /// them against the perma-cached hashes. Returns the verified node
    /// counts `(state, tx)`.
    pub fn verify_current_trees(&self) -> Result<(u64, u64)> {
        let state_size = self.current_trees.state_tree_size;
        let tx_size = self.current_trees.tx_tree_size;
        let state = if state_size == 0 {
            0
        } else {
            tree::verify_tree(self.data(), self.pos, LEAF_NODE_PREFIX)?
        };
        let tx = if tx_size == 0 {
            0
        } else {
            tree::verify_tree(self.data(), self.pos + state_size, TX_NODE_PREFIX)?
        };
        Ok((state, tx))
    }

    /// Zero-copy view of the trailing ledger index.
    pub fn index(&self) -> LedgerIndexView<'_> {
        // Bounds were validated at open time.
        let start = self.header.ledger_index_offset as usize;
        let count = self.header.ledger_count as usize;
        LedgerIndexView::new(&self.data()[start..], count)
    }

    /// Position the cursor at the header of the ledger with the given
    /// sequence. Returns whether the ledger is present.
    pub fn seek_to_ledger(&mut self, sequence: u32) -> bool {
        match self.index().find(sequence) {
            Some(entry) => {
                let header_offset = entry.header_offset;
                self.pos = header_offset;
                true
            }
            None => false,
        }
    }

    fn data(&self) -> &[u8] {
        &self.mapping.mmap
    }
}
