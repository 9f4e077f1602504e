//! Legacy v1 catalogue format (streaming, optionally zlib-compressed).
//!
//! A v1 file is an 88-byte header followed by one region per ledger: a
//! 164-byte ledger header, the state map as a typed node stream, and the
//! transaction map as a typed node stream. The first ledger's state stream
//! carries the full state; later ledgers carry deltas, using removal
//! markers for deleted keys. Each stream is terminated by a terminal
//! marker.
//!
//! Everything after the file header may be wrapped in a single zlib stream
//! when the header's version field carries a non-zero compression level.

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

use std::io::{self, Read, Write};

use crate::config::{V1_COMPRESS_LEVEL_MASK, V1_VERSION_MASK};
use crate::ledger::LedgerInfo;

/// Node markers used by the v1 map streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Inner = 1,
    TransactionNm = 2,
    TransactionMd = 3,
    AccountState = 4,
    Remove = 254,
    Terminal = 255,
}

impl NodeType {
    pub fn from_u8(byte: u8) -> Option<NodeType> {
        match byte {
            1 => Some(NodeType::Inner),
            2 => Some(NodeType::TransactionNm),
            3 => Some(NodeType::TransactionMd),
            4 => Some(NodeType::AccountState),
            254 => Some(NodeType::Remove),
            255 => Some(NodeType::Terminal),
            _ => None,
        }
    }
}

/// Compose a v1 version field from a catalogue version and zlib level.
pub fn make_version_field(catalogue_version: u8, compression_level: u8) -> u16 {
    let level = compression_level.min(9);
    (catalogue_version as u16 & V1_VERSION_MASK) | ((level as u16) << 8)
}

/// v1 file header. Serialized little-endian, 88 bytes.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub magic: u32,
    pub min_ledger: u32,
    pub max_ledger: u32,
    /// Low byte: catalogue version; bits 8-11: zlib compression level
    pub version: u16,
    pub network_id: u16,
    /// Total file size, backfilled at finalize time
    pub filesize: u64,
    /// SHA-512 of the file with this field zeroed, backfilled at finalize
    pub hash: [u8; 64],
}

impl FileHeader {
    /// Serialized size in bytes
    pub const SIZE: usize = 4 + 4 + 4 + 2 + 2 + 8 + 64;

    /// Byte offset of the `hash` field within the serialized header
    pub const HASH_OFFSET: u64 = 24;

    pub fn catalogue_version(&self) -> u8 {
        (self.version & V1_VERSION_MASK) as u8
    }

    pub fn compression_level(&self) -> u8 {
        ((self.version & V1_COMPRESS_LEVEL_MASK) >> 8) as u8
    }

    pub fn write_bytes<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(&self.magic.to_le_bytes())?;
        w.write_all(&self.min_ledger.to_le_bytes())?;
        w.write_all(&self.max_ledger.to_le_bytes())?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.network_id.to_le_bytes())?;
        w.write_all(&self.filesize.to_le_bytes())?;
        w.write_all(&self.hash)?;
        Ok(())
    }

    pub fn read_bytes<R: Read>(mut r: R) -> io::Result<FileHeader> {
        let mut buf = [0u8; FileHeader::SIZE];
        r.read_exact(&mut buf)?;

        let mut hash = [0u8; 64];
        hash.copy_from_slice(&buf[24..88]);
        Ok(FileHeader {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            min_ledger: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            max_ledger: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            version: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
            network_id: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            filesize: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            hash,
        })
    }
}

const _: () = assert!(FileHeader::SIZE == 88);

/// v1 per-ledger header. Serialized little-endian, 164 bytes; the field
/// order and widths differ from the canonical [`LedgerInfo`].
#[derive(Debug, Clone)]
pub struct LedgerHeader {
    pub sequence: u32,
    pub hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub account_hash: [u8; 32],
    pub tx_hash: [u8; 32],
    pub drops: u64,
    pub close_flags: i32,
    pub close_time_resolution: u32,
    pub close_time: u64,
    pub parent_close_time: u64,
}

impl LedgerHeader {
    /// Serialized size in bytes
    pub const SIZE: usize = 4 + 32 * 4 + 8 + 4 + 4 + 8 + 8;

    pub fn write_bytes<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(&self.sequence.to_le_bytes())?;
        w.write_all(&self.hash)?;
        w.write_all(&self.parent_hash)?;
        w.write_all(&self.account_hash)?;
        w.write_all(&self.tx_hash)?;
        w.write_all(&self.drops.to_le_bytes())?;
        w.write_all(&self.close_flags.to_le_bytes())?;
        w.write_all(&self.close_time_resolution.to_le_bytes())?;
        w.write_all(&self.close_time.to_le_bytes())?;
        w.write_all(&self.parent_close_time.to_le_bytes())?;
        Ok(())
    }

    pub fn read_bytes<R: Read>(mut r: R) -> io::Result<LedgerHeader> {
        let mut buf = [0u8; LedgerHeader::SIZE];
        r.read_exact(&mut buf)?;

        let mut hash = [0u8; 32];
        let mut parent_hash = [0u8; 32];
        let mut account_hash = [0u8; 32];
        let mut tx_hash = [0u8; 32];
        hash.copy_from_slice(&buf[4..36]);
        parent_hash.copy_from_slice(&buf[36..68]);
        account_hash.copy_from_slice(&buf[68..100]);
        tx_hash.copy_from_slice(&buf[100..132]);

        Ok(LedgerHeader {
            sequence: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            hash,
            parent_hash,
            account_hash,
            tx_hash,
            drops: u64::from_le_bytes(buf[132..140].try_into().unwrap()),
            close_flags: i32::from_le_bytes(buf[140..144].try_into().unwrap()),
            close_time_resolution: u32::from_le_bytes(buf[144..148].try_into().unwrap()),
            close_time: u64::from_le_bytes(buf[148..156].try_into().unwrap()),
            parent_close_time: u64::from_le_bytes(buf[156..164].try_into().unwrap()),
        })
    }

    /// Convert into the canonical network representation.
    pub fn to_canonical(&self) -> LedgerInfo {
        LedgerInfo {
            seq: self.sequence,
            drops: self.drops,
            parent_hash: self.parent_hash,
            tx_hash: self.tx_hash,
            account_hash: self.account_hash,
            parent_close_time: self.parent_close_time as u32,
            close_time: self.close_time as u32,
            close_time_resolution: self.close_time_resolution as u8,
            close_flags: self.close_flags as u8,
            hash: self.hash,
        }
    }
}

/// Build a v1 ledger header from a canonical record.
pub fn from_canonical(info: &LedgerInfo) -> LedgerHeader {
    LedgerHeader {
        sequence: info.seq,
        hash: info.hash,
        parent_hash: info.parent_hash,
        account_hash: info.account_hash,
        tx_hash: info.tx_hash,
        drops: info.drops,
        close_flags: info.close_flags as i32,
        close_time_resolution: info.close_time_resolution as u32,
        close_time: info.close_time as u64,
        parent_close_time: info.parent_close_time as u64,
    }
}

const _: () = assert!(LedgerHeader::SIZE == 164);
