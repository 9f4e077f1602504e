//! Centralized configuration for the CATL archive formats.
//!
//! This module contains the format constants and tunables used throughout
//! the library to ensure consistency and ease of modification.

// --- v2 Format Constants ---

/// Magic bytes opening every v2 file
pub const V2_MAGIC: [u8; 4] = *b"CAT2";

/// The only v2 format version this build reads and writes
pub const V2_VERSION: u32 = 1;

/// Endianness witness constant.
///
/// The writer stores this word in its native byte order; a reader whose
/// native reading of the stored bytes differs is on a host with the other
/// byte order and must refuse the file.
pub const ENDIANNESS_WITNESS: u32 = 0x0102_0304;

/// Maximum leaf payload size (24-bit length field)
pub const MAX_LEAF_PAYLOAD: usize = 0x00FF_FFFF;

/// Maximum depth an inner node may record (6-bit field)
pub const MAX_NODE_DEPTH: u8 = 63;

/// Maximum number of nodes on any root-to-leaf path
pub const MAX_TREE_PATH: usize = 64;

/// Number of branches in an inner node (one per key nibble value)
pub const BRANCH_COUNT: usize = 16;

// --- Parallel Walk Parameters ---

/// Default worker count for the parallel leaf walk
pub const DEFAULT_WALK_THREADS: usize = 8;

/// Practical worker ceiling enforced at the option-parsing layer
pub const MAX_WALK_THREADS: usize = 32;

/// Root subtrees claimed per batch by each walk worker
pub const WALK_BATCH_SIZE: usize = 2;

// --- v1 Format Constants ---

/// v1 magic word ("CATL" read little-endian)
pub const V1_MAGIC: u32 = 0x4C54_4143;

/// Mask selecting the catalogue version from the v1 version field
pub const V1_VERSION_MASK: u16 = 0x00FF;

/// Mask selecting the zlib compression level from the v1 version field
pub const V1_COMPRESS_LEVEL_MASK: u16 = 0x0F00;

/// Base v1 catalogue version this build understands
pub const V1_BASE_VERSION: u8 = 1;

// --- Time Constants ---

/// Seconds between the Unix epoch and the Ripple epoch (2000-01-01T00:00:00Z)
pub const RIPPLE_EPOCH_OFFSET: u64 = 946_684_800;
