//! Writer for v1 catalogue files (uncompressed).
//!
//! Used by tooling and tests to synthesize legacy input; the importer only
//! reads the format. Output is always compression level 0; the legacy
//! compressed variant exists in the wild but nothing here needs to produce
//! it.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::config::{V1_BASE_VERSION, V1_MAGIC};
use crate::error::{CatlError, Result};
use crate::ledger::LedgerInfo;
use crate::shamap::SHAMap;
use crate::types::Key;
use crate::v1::{from_canonical, make_version_field, FileHeader, NodeType};

/// Sequential writer producing v1 catalogue files.
pub struct Writer {
    output: BufWriter<File>,
    network_id: u16,
    header_written: bool,
    finalized: bool,
}

impl Writer {
    /// Create a v1 file at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, network_id: u16) -> Result<Writer> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| CatlError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Writer {
            output: BufWriter::new(file),
            network_id,
            header_written: false,
            finalized: false,
        })
    }

    /// Write the file header; `filesize` and `hash` stay zero until
    /// [`Writer::finalize`].
    pub fn write_header(&mut self, min_ledger: u32, max_ledger: u32) -> Result<()> {
        let header = FileHeader {
            magic: V1_MAGIC,
            min_ledger,
            max_ledger,
            version: make_version_field(V1_BASE_VERSION, 0),
            network_id: self.network_id,
            filesize: 0,
            hash: [0u8; 64],
        };
        header.write_bytes(&mut self.output)?;
        self.header_written = true;
        Ok(())
    }

    /// Write a ledger with its full state map (used for the first ledger of
    /// a file) and full transaction map.
    pub fn write_ledger(
        &mut self,
        info: &LedgerInfo,
        state_map: &SHAMap,
        tx_map: &SHAMap,
    ) -> Result<()> {
        debug_assert!(self.header_written);
        from_canonical(info).write_bytes(&mut self.output)?;
        self.write_full_map(state_map, NodeType::AccountState)?;
        self.write_full_map(tx_map, NodeType::TransactionMd)?;
        Ok(())
    }

    /// Write a ledger whose state stream is the delta from `base_state` to
    /// `state_map` (changed and added keys, plus removal markers).
    pub fn write_ledger_delta(
        &mut self,
        info: &LedgerInfo,
        base_state: &SHAMap,
        state_map: &SHAMap,
        tx_map: &SHAMap,
    ) -> Result<()> {
        debug_assert!(self.header_written);
        from_canonical(info).write_bytes(&mut self.output)?;

        let base = collect_items(base_state);
        let new = collect_items(state_map);

        for (key, data) in &new {
            if base.get(key).map(Vec::as_slice) != Some(data.as_slice()) {
                self.write_item(NodeType::AccountState, key, data)?;
            }
        }
        for key in base.keys() {
            if !new.contains_key(key) {
                self.write_remove(key)?;
            }
        }
        self.write_terminal()?;

        self.write_full_map(tx_map, NodeType::TransactionMd)?;
        Ok(())
    }

    /// Backfill the header's file size, then its whole-file SHA-512 (taken
    /// with the hash field zeroed).
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.output.flush()?;

        let file = self.output.get_mut();
        let filesize = file.seek(SeekFrom::End(0))?;

        // Reread the written header so min/max survive without separate
        // bookkeeping; only filesize (and later the hash) change.
        file.seek(SeekFrom::Start(0))?;
        let mut written = FileHeader::read_bytes(&mut *file)?;
        written.filesize = filesize;
        written.hash = [0u8; 64];
        file.seek(SeekFrom::Start(0))?;
        written.write_bytes(&mut *file)?;

        // Hash the whole file with the hash field as zeros, then patch it.
        file.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha512::new();
        io::copy(&mut *file, &mut hasher)?;
        let digest = hasher.finalize();
        file.seek(SeekFrom::Start(FileHeader::HASH_OFFSET))?;
        file.write_all(&digest)?;
        file.flush()?;

        self.finalized = true;
        Ok(())
    }

    fn write_full_map(&mut self, map: &SHAMap, node_type: NodeType) -> Result<()> {
        let mut failure: Option<io::Error> = None;
        map.for_each_item(|key, data| {
            if failure.is_some() {
                return;
            }
            if let Err(err) = write_item_to(&mut self.output, node_type, key, data) {
                failure = Some(err);
            }
        });
        if let Some(err) = failure {
            return Err(err.into());
        }
        self.write_terminal()
    }

    fn write_item(&mut self, node_type: NodeType, key: &Key, data: &[u8]) -> Result<()> {
        write_item_to(&mut self.output, node_type, key, data)?;
        Ok(())
    }

    fn write_remove(&mut self, key: &Key) -> Result<()> {
        self.output.write_all(&[NodeType::Remove as u8])?;
        self.output.write_all(key.as_bytes())?;
        Ok(())
    }

    fn write_terminal(&mut self) -> Result<()> {
        self.output.write_all(&[NodeType::Terminal as u8])?;
        Ok(())
    }
}

fn write_item_to<W: Write>(mut w: W, node_type: NodeType, key: &Key, data: &[u8]) -> io::Result<()> {
    w.write_all(&[node_type as u8])?;
    w.write_all(key.as_bytes())?;
    w.write_all(&(data.len() as u32).to_le_bytes())?;
    w.write_all(data)
}

fn collect_items(map: &SHAMap) -> BTreeMap<Key, Vec<u8>> {
    let mut items = BTreeMap::new();
    map.for_each_item(|key, data| {
        items.insert(*key, data.to_vec());
    });
    items
}
