//! Error types for the CATL archive library

use crate::types::Hash256;

/// Error type covering every failure the archive formats can report.
///
/// Query-path errors are returned to the caller and never abort the process.
/// A lookup that encounters malformed data returns [`CatlError::MalformedNode`]
/// rather than silently reporting "not found".
#[derive(Debug, thiserror::Error)]
pub enum CatlError {
    /// Opening or mapping a file failed at the OS level
    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but contains no bytes
    #[error("file is empty: {path}")]
    FileEmpty { path: String },

    /// First 4 bytes are not the v2 magic `'CAT2'`
    #[error("invalid file magic: {found:02x?} (expected 'CAT2')")]
    BadMagic { found: [u8; 4] },

    /// Format version is not one this build understands
    #[error("unsupported file version: {found} (only version {supported} is supported)")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The stored endianness witness does not match this host
    #[error(
        "endianness mismatch: file witness {file:#010x}, host witness {host:#010x}; \
         files cannot be mapped across byte orders"
    )]
    EndiannessMismatch { file: u32, host: u32 },

    /// A structure or the trailing index extends past end of file
    #[error("truncated file: need {needed} bytes at offset {offset}, file is {file_size} bytes")]
    Truncated {
        offset: u64,
        needed: u64,
        file_size: u64,
    },

    /// A tree node violates a structural invariant
    #[error("malformed node at offset {offset}: {reason}")]
    MalformedNode { offset: u64, reason: String },

    /// A perma-cached hash does not match the digest of the node's content
    #[error("hash mismatch at offset {offset}: stored {stored}, computed {computed}")]
    HashMismatch {
        offset: u64,
        stored: Hash256,
        computed: Hash256,
    },

    /// An append or in-place rewrite failed while building a file.
    /// The output must be discarded; the writer refuses further work.
    #[error("write failed: {source}")]
    WriteIo {
        #[source]
        source: std::io::Error,
    },

    /// `finalize` was called on a writer that already failed
    #[error("writer is in a failed state; the output file must be discarded")]
    WriterFailed,

    /// A ledger was handed to the writer with an empty state trie
    #[error("cannot serialize ledger {sequence}: state trie is empty")]
    EmptyStateTree { sequence: u32 },

    /// Leaf payload exceeds the 24-bit size field
    #[error("leaf payload of {size} bytes exceeds the {max} byte ceiling")]
    PayloadTooLarge { size: usize, max: usize },

    /// A trie node sits deeper than the format can express
    #[error("node depth {depth} exceeds maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    /// The parallel walk was asked to run with zero workers
    #[error("walk thread count must be at least 1")]
    ZeroWalkThreads,

    /// Generic I/O failure outside the writer append path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Legacy v1 file has a bad magic word
    #[error("invalid v1 file magic: {found:#010x} (expected 'CATL')")]
    V1BadMagic { found: u32 },

    /// Legacy v1 file declares a version this build does not read
    #[error("unsupported v1 catalogue version: {found}")]
    V1UnsupportedVersion { found: u8 },

    /// Legacy v1 node stream contained an unexpected node type
    #[error("unexpected node type {found} in v1 map stream")]
    V1UnexpectedNodeType { found: u8 },

    /// Legacy v1 header fields are internally inconsistent
    #[error("invalid v1 header: {reason}")]
    V1InvalidHeader { reason: String },
}

/// Convenience Result type for archive operations
pub type Result<T> = std::result::Result<T, CatlError>;
