//! Canonical ledger header record shared by the v1 and v2 formats.
//!
//! `LedgerInfo` matches the canonical binary serialization used by the
//! Ripple/Xahau network protocol, with the ledger's own hash appended. The
//! first [`LedgerInfo::HASHABLE_LEN`] bytes are exactly the on-wire ledger
//! header (the region the ledger hash is computed over), so consumers that
//! already speak that format can reinterpret a stored record directly.

use std::fmt;
use std::mem::{align_of, offset_of, size_of};

use crate::config::RIPPLE_EPOCH_OFFSET;
use crate::types::Hash256;

/// Canonical representation of Ripple/Xahau ledger information.
///
/// Stored byte-for-byte in v2 files; the v1 reader converts its own ledger
/// header layout into this form.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct LedgerInfo {
    /// The sequence number of this ledger
    pub seq: u32,
    /// The total number of drops in existence
    pub drops: u64,
    /// Hash of the previous ledger
    pub parent_hash: [u8; 32],
    /// Hash of the transaction tree
    pub tx_hash: [u8; 32],
    /// Hash of the state tree
    pub account_hash: [u8; 32],
    /// When the previous ledger closed (Ripple epoch time)
    pub parent_close_time: u32,
    /// When this ledger closed (Ripple epoch time)
    pub close_time: u32,
    /// Resolution of close time (seconds)
    pub close_time_resolution: u8,
    /// Flags indicating how this ledger closed
    pub close_flags: u8,
    /// Hash of this ledger (computed over the preceding fields)
    pub hash: [u8; 32],
}

impl LedgerInfo {
    /// Length of the on-wire prefix the ledger hash is computed over
    /// (everything before the trailing `hash` field).
    pub const HASHABLE_LEN: usize = 118;

    /// Total stored size of the record
    pub const SIZE: usize = size_of::<LedgerInfo>();
}

// Wire-format layout guarantees. The record must be packed with every field
// at its canonical offset; the trailing hash begins exactly where the
// on-wire header ends.
const _: () = {
    assert!(size_of::<LedgerInfo>() == 150);
    assert!(align_of::<LedgerInfo>() == 1);
    assert!(offset_of!(LedgerInfo, seq) == 0);
    assert!(offset_of!(LedgerInfo, drops) == 4);
    assert!(offset_of!(LedgerInfo, parent_hash) == 12);
    assert!(offset_of!(LedgerInfo, tx_hash) == 44);
    assert!(offset_of!(LedgerInfo, account_hash) == 76);
    assert!(offset_of!(LedgerInfo, parent_close_time) == 108);
    assert!(offset_of!(LedgerInfo, close_time) == 112);
    assert!(offset_of!(LedgerInfo, close_time_resolution) == 116);
    assert!(offset_of!(LedgerInfo, close_flags) == 117);
    assert!(offset_of!(LedgerInfo, hash) == 118);
    assert!(offset_of!(LedgerInfo, hash) == LedgerInfo::HASHABLE_LEN);
};

/// Render a Ripple-epoch timestamp as a UTC date-time string.
pub fn format_ripple_time(ripple_seconds: u32) -> String {
    let unix = ripple_seconds as u64 + RIPPLE_EPOCH_OFFSET;
    // Civil-from-days conversion; good for the full u32 Ripple epoch range.
    let days = unix / 86_400;
    let secs = unix % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

impl fmt::Display for LedgerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Copy out of the packed struct before formatting.
        let seq = self.seq;
        let drops = self.drops;
        let close_time = self.close_time;
        let parent_close_time = self.parent_close_time;
        let resolution = self.close_time_resolution;
        let flags = self.close_flags;
        writeln!(f, "Ledger {}:", seq)?;
        writeln!(f, "  Hash:           {}", Hash256(self.hash))?;
        writeln!(f, "  Parent Hash:    {}", Hash256(self.parent_hash))?;
        writeln!(f, "  Account Hash:   {}", Hash256(self.account_hash))?;
        writeln!(f, "  TX Hash:        {}", Hash256(self.tx_hash))?;
        writeln!(f, "  Close Time:     {}", format_ripple_time(close_time))?;
        writeln!(
            f,
            "  Parent Close:   {}",
            format_ripple_time(parent_close_time)
        )?;
        writeln!(f, "  Close Resolution: {} sec", resolution)?;
        writeln!(f, "  Close Flags:    {}", flags)?;
        write!(f, "  Drops:          {}", drops)
    }
}
