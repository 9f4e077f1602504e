//! Writer for the v2 archive format.
//!
//! The writer stores multiple ledgers in a single file, using the trie's
//! copy-on-write discipline to achieve structural sharing on disk:
//!
//! 1. First ledger: no node carries a disk offset yet, so the whole tree is
//!    written.
//! 2. Applying the next ledger's delta path-copies only the modified paths;
//!    unchanged subtrees keep their stamped offsets.
//! 3. The next `write_ledger` call emits only the unstamped nodes and
//!    references everything else by its recorded offset.
//!
//! Each ledger therefore adds its delta to the file rather than duplicating
//! the entire state. Tree roots are the one exception: they are re-emitted
//! for every ledger, which pins each ledger's state root to a fixed position
//! right after its trees-size header and keeps the streaming read path
//! position-independent of sharing decisions.
//!
//! Inner nodes are emitted in two phases. The header goes out with zeroed
//! child slots while the subtree is still being written; once every child
//! offset is known the slots are rewritten in one seek, converted to
//! self-relative form against the file position each slot occupies.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::MAX_NODE_DEPTH;
use crate::error::{CatlError, Result};
use crate::ledger::LedgerInfo;
use crate::shamap::{NodeRef, SHAMap};
use crate::v2::layout::{
    pod_bytes, AbsOff, ChildKind, FileHeader, IndexEntry, InnerNodeHeader, LeafHeader, RelOff,
    TreesHeader, CompressionKind,
};
use crate::v2::offsets::{relative_to, slot_file_offset};

/// Serialization counters, exposed for tooling and tests.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriterStats {
    pub inner_nodes_written: u64,
    pub leaf_nodes_written: u64,
    pub inner_bytes_written: u64,
    pub leaf_bytes_written: u64,
    pub total_bytes_written: u64,
}

/// In-flight state for one inner node during the depth-first emission.
struct Frame {
    /// The inner node being serialized
    node: NodeRef,
    /// File offset of its header
    offset: AbsOff,
    /// Non-empty children in ascending branch order
    children: Vec<NodeRef>,
    /// Completed child offsets, collected in the same branch order
    child_offsets: Vec<AbsOff>,
    /// Next entry of `children` to process
    next: usize,
}

/// Writer producing v2 archive files.
///
/// Single-threaded and append-oriented; the only in-place rewrites are the
/// child-slot backpatches, the per-ledger trees-size header, and the file
/// header at finalize time. Any I/O error leaves the output in an undefined
/// state: the writer marks itself failed and the caller must discard the
/// file.
pub struct Writer {
    output: BufWriter<File>,
    pos: AbsOff,
    network_id: u32,
    ledger_index: Vec<IndexEntry>,
    stats: WriterStats,
    failed: bool,
    finalized: bool,
}

impl Writer {
    /// Create a new archive at `path`, truncating any existing file, and
    /// write the placeholder header.
    pub fn create(path: impl AsRef<Path>, network_id: u32) -> Result<Writer> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| CatlError::FileOpen {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = Writer {
            output: BufWriter::new(file),
            pos: 0,
            network_id,
            ledger_index: Vec::new(),
            stats: WriterStats::default(),
            failed: false,
            finalized: false,
        };
        let header = FileHeader::placeholder(network_id);
        writer.append(pod_bytes(&header))?;
        Ok(writer)
    }

    /// Current file position (end of written data).
    pub fn current_offset(&self) -> AbsOff {
        self.pos
    }

    /// Serialization statistics so far.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Write a complete ledger: canonical header, trees-size record, state
    /// tree, and transaction tree.
    ///
    /// Both maps must have consistent hashes; the writer forces recursive
    /// hash computation before emission so every node's perma-cached digest
    /// is populated. An empty transaction map is recorded as absent
    /// (`tx_tree_offset = 0`, zero bytes); an empty state map is a
    /// programming error.
    pub fn write_ledger(
        &mut self,
        ledger_info: &LedgerInfo,
        state_map: &SHAMap,
        tx_map: &SHAMap,
    ) -> Result<()> {
        if self.failed || self.finalized {
            return Err(CatlError::WriterFailed);
        }
        if state_map.is_empty() {
            return Err(CatlError::EmptyStateTree {
                sequence: ledger_info.seq,
            });
        }

        match self.write_ledger_inner(ledger_info, state_map, tx_map) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Bytes for this ledger may be partially on disk.
                self.failed = true;
                Err(err)
            }
        }
    }

    fn write_ledger_inner(
        &mut self,
        ledger_info: &LedgerInfo,
        state_map: &SHAMap,
        tx_map: &SHAMap,
    ) -> Result<()> {
        let header_offset = self.pos;
        self.append(pod_bytes(ledger_info))?;

        // Reserve the trees-size record; filled in once both sizes are known.
        let trees_header_offset = self.pos;
        self.append(pod_bytes(&TreesHeader::default()))?;

        // Populate the cached hash in every node before emission.
        state_map.root_hash();
        tx_map.root_hash();

        let state_start = self.pos;
        let state_tree_offset = self.serialize_tree(state_map)?;
        let state_tree_size = self.pos - state_start;

        let (tx_tree_offset, tx_tree_size) = if tx_map.is_empty() {
            (0, 0)
        } else {
            let tx_start = self.pos;
            let offset = self.serialize_tree(tx_map)?;
            (offset, self.pos - tx_start)
        };

        let trees_header = TreesHeader {
            state_tree_size,
            tx_tree_size,
        };
        self.write_at(trees_header_offset, pod_bytes(&trees_header))?;

        self.ledger_index.push(IndexEntry {
            sequence: ledger_info.seq,
            header_offset,
            state_tree_offset,
            tx_tree_offset,
        });

        let sequence = ledger_info.seq;
        debug!(sequence, state_tree_size, tx_tree_size, "wrote ledger");
        self.flush()
    }

    /// Finalize the file: append the accumulated index and rewrite the file
    /// header with the filled totals.
    pub fn finalize(&mut self) -> Result<()> {
        if self.failed {
            return Err(CatlError::WriterFailed);
        }
        if self.finalized {
            return Ok(());
        }

        let result = self.finalize_inner();
        match result {
            Ok(()) => {
                self.finalized = true;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn finalize_inner(&mut self) -> Result<()> {
        let ledger_index_offset = self.pos;
        let entries = std::mem::take(&mut self.ledger_index);
        for entry in &entries {
            self.append(pod_bytes(entry))?;
        }

        let mut header = FileHeader::placeholder(self.network_id);
        header.ledger_count = entries.len() as u64;
        header.first_ledger_seq = entries.first().map(|e| e.sequence as u64).unwrap_or(0);
        header.last_ledger_seq = entries.last().map(|e| e.sequence as u64).unwrap_or(0);
        header.ledger_index_offset = ledger_index_offset;
        self.ledger_index = entries;

        self.write_at(0, pod_bytes(&header))?;
        self.flush()?;

        info!(
            ledgers = self.ledger_index.len(),
            file_size = self.pos,
            inner_nodes = self.stats.inner_nodes_written,
            leaf_nodes = self.stats.leaf_nodes_written,
            "finalized archive"
        );
        Ok(())
    }

    /// Depth-first tree emission with on-disk structural sharing.
    ///
    /// Returns the root's file offset. Already-persisted subtrees are
    /// referenced by their recorded offsets and contribute no bytes; the
    /// root itself is always emitted fresh.
    fn serialize_tree(&mut self, map: &SHAMap) -> Result<AbsOff> {
        let leaf_prefix = map.leaf_prefix();
        let root = map.root();

        // Recursion depth can reach 64, so the traversal runs on an
        // explicit stack instead.
        let mut stack: Vec<Frame> = vec![self.emit_inner(root, leaf_prefix)?];

        loop {
            let next_child = {
                let frame = stack.last_mut().expect("emission stack is non-empty");
                if frame.next < frame.children.len() {
                    let child = frame.children[frame.next].clone();
                    frame.next += 1;
                    Some(child)
                } else {
                    None
                }
            };

            match next_child {
                Some(child) => {
                    let existing = child.disk_offset();
                    let child_offset = if existing != 0 {
                        // Shared with an earlier snapshot; reference in place.
                        existing
                    } else if child.is_leaf() {
                        self.emit_leaf(&child, leaf_prefix)?
                    } else {
                        let frame = self.emit_inner(&child, leaf_prefix)?;
                        stack.push(frame);
                        continue;
                    };
                    stack
                        .last_mut()
                        .expect("emission stack is non-empty")
                        .child_offsets
                        .push(child_offset);
                }
                None => {
                    let frame = stack.pop().expect("emission stack is non-empty");
                    self.patch_child_slots(&frame)?;
                    match stack.last_mut() {
                        Some(parent) => parent.child_offsets.push(frame.offset),
                        None => return Ok(frame.offset),
                    }
                }
            }
        }
    }

    /// Write an inner node header followed by zeroed child slots; the slots
    /// are rewritten by `patch_child_slots` once the subtree is complete.
    fn emit_inner(&mut self, node: &NodeRef, leaf_prefix: [u8; 4]) -> Result<Frame> {
        let inner = node
            .as_inner()
            .expect("tree descent reaches inner nodes only");
        let depth = inner.depth();
        if depth > MAX_NODE_DEPTH {
            return Err(CatlError::DepthExceeded {
                depth: depth as usize,
                max: MAX_NODE_DEPTH as usize,
            });
        }

        let mut header = InnerNodeHeader {
            child_types: 0,
            depth_plus: 0,
            overlay_mask: 0,
            hash: *node.hash(leaf_prefix).as_bytes(),
        };
        header.set_depth(depth);

        let mut children = Vec::new();
        for branch in 0..16 {
            if let Some(child) = inner.child(branch) {
                let kind = if child.is_leaf() {
                    ChildKind::Leaf
                } else {
                    ChildKind::Inner
                };
                header.set_child_kind(branch, kind);
                children.push(child.clone());
            }
        }

        let offset = self.pos;
        self.append(pod_bytes(&header))?;
        let slots = vec![0u8; children.len() * size_of::<RelOff>()];
        self.append(&slots)?;

        node.set_disk_offset(offset);
        self.stats.inner_nodes_written += 1;
        self.stats.inner_bytes_written += (size_of::<InnerNodeHeader>() + slots.len()) as u64;

        let child_count = children.len();
        Ok(Frame {
            node: node.clone(),
            offset,
            children,
            child_offsets: Vec::with_capacity(child_count),
            next: 0,
        })
    }

    /// Write a leaf header and payload; returns the leaf's offset.
    fn emit_leaf(&mut self, node: &NodeRef, leaf_prefix: [u8; 4]) -> Result<AbsOff> {
        let leaf = node.as_leaf().expect("caller classified the node as a leaf");

        let mut header = LeafHeader {
            key: *leaf.key().as_bytes(),
            hash: *node.hash(leaf_prefix).as_bytes(),
            size_and_flags: 0,
        };
        header.set_data_size(leaf.data().len())?;
        header.set_compression(CompressionKind::None);

        let offset = self.pos;
        self.append(pod_bytes(&header))?;
        self.append(leaf.data())?;

        node.set_disk_offset(offset);
        self.stats.leaf_nodes_written += 1;
        self.stats.leaf_bytes_written += (size_of::<LeafHeader>() + leaf.data().len()) as u64;
        Ok(offset)
    }

    /// Rewrite an inner node's zeroed child slots with the collected
    /// offsets, converted to self-relative form against the file position
    /// each slot occupies.
    fn patch_child_slots(&mut self, frame: &Frame) -> Result<()> {
        debug_assert_eq!(frame.child_offsets.len(), frame.children.len());
        debug_assert_eq!(frame.node.disk_offset(), frame.offset);

        let array_base = frame.offset + size_of::<InnerNodeHeader>() as u64;
        let mut rels = Vec::with_capacity(frame.child_offsets.len() * size_of::<RelOff>());
        for (index, &child_offset) in frame.child_offsets.iter().enumerate() {
            debug_assert!(child_offset != 0, "child offset not collected");
            let rel = relative_to(child_offset, slot_file_offset(array_base, index));
            rels.extend_from_slice(&rel.to_ne_bytes());
        }
        self.write_at(array_base, &rels)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.output
            .write_all(bytes)
            .map_err(|source| CatlError::WriteIo { source })?;
        self.pos += bytes.len() as u64;
        self.stats.total_bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Overwrite previously appended bytes, restoring the append position.
    fn write_at(&mut self, offset: AbsOff, bytes: &[u8]) -> Result<()> {
        let io = |source| CatlError::WriteIo { source };
        self.output
            .seek(SeekFrom::Start(offset))
            .map_err(io)?;
        self.output.write_all(bytes).map_err(io)?;
        self.output.seek(SeekFrom::Start(self.pos)).map_err(io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.output
            .flush()
            .map_err(|source| CatlError::WriteIo { source })
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finalized && !self.failed {
            if let Err(err) = self.finalize() {
                error!("failed to finalize archive on drop: {err}");
            }
        }
    }
}
