//! The v2 archive engine: a random-access, memory-mappable container for
//! consecutive ledgers.
//!
//! Key properties of the format:
//!
//! - **Structural sharing on disk**: tree nodes written for one ledger are
//!   referenced by offset from later ledgers instead of being rewritten, so
//!   each appended ledger costs only its delta.
//! - **Self-relative child pointers**: any contiguous byte range is
//!   relocatable without rewriting pointers.
//! - **Perma-cached hashes**: every node stores the first 256 bits of its
//!   SHA-512 digest, making subtree verification O(1) instead of requiring
//!   materialization.
//! - **Trailing index**: a sorted array of per-ledger entries at EOF gives
//!   O(log n) random access by sequence number.
//! - **Depth-first layout**: pre-order node placement keeps reads local,
//!   and the root's child array is a natural fan-out point for the
//!   parallel leaf walk.

pub mod index;
pub mod layout;
pub mod offsets;
pub mod reader;
pub mod tree;
pub mod walk;
pub mod writer;

pub use index::LedgerIndexView;
pub use layout::{AbsOff, ChildKind, CompressionKind, FileHeader, IndexEntry, RelOff, TreesHeader};
pub use reader::Reader;
pub use tree::verify_tree;
pub use walk::{serialized, WalkOptions};
pub use writer::{Writer, WriterStats};
