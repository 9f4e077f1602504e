//! Streaming reader for v1 catalogue files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::ZlibDecoder;
use tracing::debug;

use crate::config::{V1_BASE_VERSION, V1_MAGIC};
use crate::error::{CatlError, Result};
use crate::ledger::LedgerInfo;
use crate::shamap::SHAMap;
use crate::types::Key;
use crate::v1::{FileHeader, LedgerHeader, NodeType};

/// The body of a v1 file is either raw or one long zlib stream.
enum Input {
    Plain(BufReader<File>),
    Zlib(Box<ZlibDecoder<BufReader<File>>>),
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Input::Plain(inner) => inner.read(buf),
            Input::Zlib(inner) => inner.read(buf),
        }
    }
}

/// Sequential reader over a v1 catalogue stream.
///
/// v1 has no index; access is strictly front to back. Each ledger is
/// consumed as a header plus two map streams, in file order.
pub struct Reader {
    input: Input,
    header: FileHeader,
}

impl Reader {
    /// Open a v1 file, validate its header, and position the stream at the
    /// first ledger. Compressed bodies are decoded transparently.
    pub fn open(path: impl AsRef<Path>) -> Result<Reader> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CatlError::FileOpen {
            path: path.display().to_string(),
            source,
        })?;
        let mut buffered = BufReader::new(file);

        let header = FileHeader::read_bytes(&mut buffered)?;
        if header.magic != V1_MAGIC {
            return Err(CatlError::V1BadMagic {
                found: header.magic,
            });
        }
        if header.catalogue_version() != V1_BASE_VERSION {
            return Err(CatlError::V1UnsupportedVersion {
                found: header.catalogue_version(),
            });
        }
        if header.min_ledger > header.max_ledger {
            return Err(CatlError::V1InvalidHeader {
                reason: format!(
                    "min_ledger {} exceeds max_ledger {}",
                    header.min_ledger, header.max_ledger
                ),
            });
        }

        debug!(
            min_ledger = header.min_ledger,
            max_ledger = header.max_ledger,
            compression = header.compression_level(),
            "opened v1 catalogue"
        );

        let input = if header.compression_level() > 0 {
            Input::Zlib(Box::new(ZlibDecoder::new(buffered)))
        } else {
            Input::Plain(buffered)
        };

        Ok(Reader { input, header })
    }

    /// The validated file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Read the next ledger header, converted to canonical form.
    pub fn read_ledger_info(&mut self) -> Result<LedgerInfo> {
        let header = LedgerHeader::read_bytes(&mut self.input)?;
        Ok(header.to_canonical())
    }

    /// Apply the next map stream to `map`: leaf entries are inserted or
    /// replaced, removal markers delete, and the terminal marker ends the
    /// stream. Returns the number of nodes processed.
    pub fn read_map_delta(&mut self, map: &mut SHAMap, node_type: NodeType) -> Result<u32> {
        let mut processed = 0u32;
        loop {
            let current = self.read_node_type()?;
            if current == NodeType::Terminal {
                break;
            }

            if current == node_type {
                let key = self.read_key()?;
                let data = self.read_sized_data()?;
                map.set_item(key, data);
            } else if current == NodeType::Remove {
                let key = self.read_key()?;
                map.remove_item(&key);
            } else {
                return Err(CatlError::V1UnexpectedNodeType {
                    found: current as u8,
                });
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Consume and discard the next map stream.
    pub fn skip_map(&mut self, node_type: NodeType) -> Result<()> {
        loop {
            let current = self.read_node_type()?;
            if current == NodeType::Terminal {
                return Ok(());
            }
            if current != node_type && current != NodeType::Remove {
                return Err(CatlError::V1UnexpectedNodeType {
                    found: current as u8,
                });
            }
            self.read_key()?;
            if current != NodeType::Remove {
                self.read_sized_data()?;
            }
        }
    }

    fn read_node_type(&mut self) -> Result<NodeType> {
        let mut byte = [0u8; 1];
        self.input.read_exact(&mut byte)?;
        NodeType::from_u8(byte[0]).ok_or(CatlError::V1UnexpectedNodeType { found: byte[0] })
    }

    fn read_key(&mut self) -> Result<Key> {
        let mut bytes = [0u8; 32];
        self.input.read_exact(&mut bytes)?;
        Ok(Key::new(bytes))
    }

    fn read_sized_data(&mut self) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        self.input.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut data = vec![0u8; len];
        self.input.read_exact(&mut data)?;
        Ok(data)
    }
}
