//! Copy-on-write 16-way authenticated radix trie (SHAMap).
//!
//! This is the in-memory, mutable side of the archive pipeline: the importer
//! applies ledger deltas to a `SHAMap`, and the v2 writer consumes the
//! resulting tree, persisting only the nodes that are not yet on disk.
//!
//! ## Structural sharing contract
//!
//! Every node carries an atomic disk offset, `0` meaning "not yet persisted"
//! (offset 0 always falls inside the file header, so no real node can live
//! there). The writer stamps a node's offset after emitting it. Mutation
//! never touches a stamped node in place: any write through a persisted or
//! shared node first path-copies it, and the copy starts life with a cleared
//! hash cache and a zero disk offset. Unchanged subtrees therefore keep
//! their stamps across snapshots, which is exactly what the writer's
//! on-disk structural sharing relies on.
//!
//! ## Shape invariants
//!
//! The root is always an inner node at depth 0. Distinct keys sharing a
//! nibble prefix hang below a chain of inner nodes, one per shared nibble.
//! Removal collapses any non-root inner left with a single leaf child into
//! that leaf, so a map's shape (and hence its root hash) depends only on
//! its content, never on the order of edits.

pub mod hash;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::types::{Hash256, Key};

/// Which trie a map represents; selects the leaf hash prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    /// Account-state trie (`MLN\0` leaves)
    AccountState,
    /// Transaction trie with metadata (`SND\0` leaves)
    Transaction,
}

impl TreeType {
    fn leaf_prefix(self) -> [u8; 4] {
        match self {
            TreeType::AccountState => hash::LEAF_NODE_PREFIX,
            TreeType::Transaction => hash::TX_NODE_PREFIX,
        }
    }
}

pub(crate) struct InnerNode {
    depth: u8,
    children: [Option<NodeRef>; 16],
    hash: OnceLock<Hash256>,
    disk_offset: AtomicU64,
}

impl InnerNode {
    fn new(depth: u8) -> Self {
        InnerNode {
            depth,
            children: Default::default(),
            hash: OnceLock::new(),
            disk_offset: AtomicU64::new(0),
        }
    }

    pub(crate) fn depth(&self) -> u8 {
        self.depth
    }

    pub(crate) fn child(&self, branch: usize) -> Option<&NodeRef> {
        self.children[branch].as_ref()
    }

    /// Number of non-empty branches
    pub(crate) fn child_count(&self) -> usize {
        self.children.iter().flatten().count()
    }
}

impl Clone for InnerNode {
    fn clone(&self) -> Self {
        // A copy is by definition not the node on disk: caches start empty.
        InnerNode {
            depth: self.depth,
            children: self.children.clone(),
            hash: OnceLock::new(),
            disk_offset: AtomicU64::new(0),
        }
    }
}

pub(crate) struct LeafNode {
    key: Key,
    data: Box<[u8]>,
    hash: OnceLock<Hash256>,
    disk_offset: AtomicU64,
}

impl LeafNode {
    fn new(key: Key, data: Vec<u8>) -> Self {
        LeafNode {
            key,
            data: data.into_boxed_slice(),
            hash: OnceLock::new(),
            disk_offset: AtomicU64::new(0),
        }
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Clone for LeafNode {
    fn clone(&self) -> Self {
        LeafNode {
            key: self.key,
            data: self.data.clone(),
            hash: OnceLock::new(),
            disk_offset: AtomicU64::new(0),
        }
    }
}

#[derive(Clone)]
pub(crate) enum Node {
    Inner(InnerNode),
    Leaf(LeafNode),
}

pub(crate) type NodeRef = Arc<Node>;

impl Node {
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn as_inner(&self) -> Option<&InnerNode> {
        match self {
            Node::Inner(inner) => Some(inner),
            Node::Leaf(_) => None,
        }
    }

    pub(crate) fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Inner(_) => None,
        }
    }

    /// File offset this node was written at, or 0 if not yet persisted.
    pub(crate) fn disk_offset(&self) -> u64 {
        self.offset_cell().load(Ordering::Relaxed)
    }

    /// Record where the writer emitted this node.
    pub(crate) fn set_disk_offset(&self, offset: u64) {
        debug_assert!(offset != 0);
        self.offset_cell().store(offset, Ordering::Relaxed);
    }

    fn offset_cell(&self) -> &AtomicU64 {
        match self {
            Node::Inner(inner) => &inner.disk_offset,
            Node::Leaf(leaf) => &leaf.disk_offset,
        }
    }

    /// Digest of this node, computing and memoizing the whole subtree on
    /// first use. `leaf_prefix` selects the leaf hash domain.
    pub(crate) fn hash(&self, leaf_prefix: [u8; 4]) -> Hash256 {
        match self {
            Node::Leaf(leaf) => *leaf
                .hash
                .get_or_init(|| hash::leaf_node_hash(leaf_prefix, &leaf.data, &leaf.key)),
            Node::Inner(inner) => *inner.hash.get_or_init(|| {
                let mut child_hashes = [Hash256::ZERO; 16];
                for (branch, child) in inner.children.iter().enumerate() {
                    if let Some(child) = child {
                        child_hashes[branch] = child.hash(leaf_prefix);
                    }
                }
                hash::inner_node_hash(&child_hashes)
            }),
        }
    }

    fn leaf_key(&self) -> Option<Key> {
        match self {
            Node::Leaf(leaf) => Some(leaf.key),
            Node::Inner(_) => None,
        }
    }
}

/// Get a mutable inner node, path-copying when the node is shared with a
/// snapshot or already has bytes on disk.
fn make_mut_inner(node: &mut NodeRef) -> &mut InnerNode {
    if node.disk_offset() != 0 {
        *node = Arc::new((**node).clone());
    }
    match Arc::make_mut(node) {
        Node::Inner(inner) => {
            // In-place mutation of an unshared, unpersisted node still
            // invalidates its cached digest.
            inner.hash = OnceLock::new();
            inner
        }
        Node::Leaf(_) => unreachable!("mutation descends through inner nodes only"),
    }
}

/// The mutable authenticated trie consumed by the v2 writer.
pub struct SHAMap {
    tree_type: TreeType,
    root: NodeRef,
    item_count: usize,
}

impl SHAMap {
    /// Create an empty map of the given type.
    pub fn new(tree_type: TreeType) -> Self {
        SHAMap {
            tree_type,
            root: Arc::new(Node::Inner(InnerNode::new(0))),
            item_count: 0,
        }
    }

    /// Which trie this map represents.
    pub fn tree_type(&self) -> TreeType {
        self.tree_type
    }

    /// Number of leaves in the map.
    pub fn len(&self) -> usize {
        self.item_count
    }

    /// True if the map holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    /// Take an immutable snapshot sharing all nodes with this map.
    ///
    /// Later mutation of either map path-copies instead of disturbing the
    /// shared structure.
    pub fn snapshot(&self) -> SHAMap {
        SHAMap {
            tree_type: self.tree_type,
            root: Arc::clone(&self.root),
            item_count: self.item_count,
        }
    }

    /// Insert or replace the value under `key`.
    pub fn set_item(&mut self, key: Key, data: Vec<u8>) {
        let leaf = Arc::new(Node::Leaf(LeafNode::new(key, data)));
        if Self::insert(&mut self.root, &key, leaf) {
            self.item_count += 1;
        }
    }

    /// Remove the value under `key`. Returns whether anything was removed.
    pub fn remove_item(&mut self, key: &Key) -> bool {
        if self.get_item(key).is_none() {
            return false;
        }
        Self::remove_present(&mut self.root, key, true);
        self.item_count -= 1;
        true
    }

    /// Borrow the value under `key`, if present.
    pub fn get_item(&self, key: &Key) -> Option<&[u8]> {
        let mut node: &NodeRef = &self.root;
        loop {
            match &**node {
                Node::Inner(inner) => {
                    let branch = key.nibble(inner.depth as usize) as usize;
                    node = inner.children[branch].as_ref()?;
                }
                Node::Leaf(leaf) => {
                    return if leaf.key == *key {
                        Some(&leaf.data)
                    } else {
                        None
                    }
                }
            }
        }
    }

    /// Visit every `(key, value)` pair in ascending key order.
    pub fn for_each_item<F: FnMut(&Key, &[u8])>(&self, mut visit: F) {
        fn walk<F: FnMut(&Key, &[u8])>(node: &NodeRef, visit: &mut F) {
            match &**node {
                Node::Inner(inner) => {
                    for child in inner.children.iter().flatten() {
                        walk(child, visit);
                    }
                }
                Node::Leaf(leaf) => visit(&leaf.key, &leaf.data),
            }
        }
        walk(&self.root, &mut visit);
    }

    /// Root digest of the whole map; the empty map hashes to zero.
    ///
    /// Computing the root hash populates the cached digest of every node,
    /// which the writer copies into the perma-cached hash fields on disk.
    pub fn root_hash(&self) -> Hash256 {
        if self.is_empty() {
            return Hash256::ZERO;
        }
        self.root.hash(self.tree_type.leaf_prefix())
    }

    pub(crate) fn root(&self) -> &NodeRef {
        &self.root
    }

    pub(crate) fn leaf_prefix(&self) -> [u8; 4] {
        self.tree_type.leaf_prefix()
    }

    /// Returns true if a new key was added (false for replacement).
    fn insert(node: &mut NodeRef, key: &Key, leaf: NodeRef) -> bool {
        let inner = make_mut_inner(node);
        let depth = inner.depth as usize;
        let branch = key.nibble(depth) as usize;

        let slot = &mut inner.children[branch];
        let Some(child) = slot else {
            *slot = Some(leaf);
            return true;
        };

        match child.leaf_key() {
            None => Self::insert(child, key, leaf),
            Some(existing_key) if existing_key == *key => {
                *slot = Some(leaf);
                false
            }
            Some(existing_key) => {
                let old = slot.take().expect("occupied slot");
                *slot = Some(Self::split(depth + 1, old, existing_key, leaf, *key));
                true
            }
        }
    }

    /// Build the inner chain separating two leaves whose keys agree on every
    /// nibble before `depth` but differ somewhere at or after it.
    fn split(depth: usize, old: NodeRef, old_key: Key, new: NodeRef, new_key: Key) -> NodeRef {
        let mut d = depth;
        while old_key.nibble(d) == new_key.nibble(d) {
            d += 1;
        }
        debug_assert!(d < 64, "distinct keys must diverge within 64 nibbles");

        let mut bottom = InnerNode::new(d as u8);
        bottom.children[old_key.nibble(d) as usize] = Some(old);
        bottom.children[new_key.nibble(d) as usize] = Some(new);
        let mut node: NodeRef = Arc::new(Node::Inner(bottom));

        while d > depth {
            d -= 1;
            let mut link = InnerNode::new(d as u8);
            link.children[old_key.nibble(d) as usize] = Some(node);
            node = Arc::new(Node::Inner(link));
        }
        node
    }

    /// Remove a key known to be present, collapsing single-leaf inners on
    /// the way back up.
    fn remove_present(node: &mut NodeRef, key: &Key, is_root: bool) {
        {
            let inner = make_mut_inner(node);
            let branch = key.nibble(inner.depth as usize) as usize;
            let child_is_leaf = inner.children[branch]
                .as_deref()
                .map(Node::is_leaf)
                .unwrap_or(false);
            if child_is_leaf {
                inner.children[branch] = None;
            } else {
                let child = inner.children[branch]
                    .as_mut()
                    .expect("presence checked by caller");
                Self::remove_present(child, key, false);
            }
        }

        if !is_root {
            let lone_leaf = match &**node {
                Node::Inner(inner) => {
                    let mut present = inner.children.iter().flatten();
                    match (present.next(), present.next()) {
                        (Some(only), None) if only.is_leaf() => Some(Arc::clone(only)),
                        _ => None,
                    }
                }
                Node::Leaf(_) => None,
            };
            if let Some(leaf) = lone_leaf {
                *node = leaf;
            }
        }
    }
}
