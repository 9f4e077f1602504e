//! CATL ledger-history archive library
//!
//! This library reads and writes archive files holding many consecutive
//! ledgers of a Ripple/Xahau-style chain, each ledger being a canonical
//! header plus two authenticated 16-way radix tries (account state and
//! transactions).
//!
//! ## Main Components
//!
//! - [`v2`]: the random-access archive engine: memory-mapped reads,
//!   structural sharing between successive ledgers on disk, perma-cached
//!   node hashes, a trailing index for seeks, and a parallel leaf walk
//! - [`v1`]: the legacy streaming format (reader and writer)
//! - [`import`]: replay of a v1 stream into a v2 archive
//! - [`shamap`]: the in-memory copy-on-write trie the writer consumes
//! - [`ledger`]: the canonical ledger header record
//! - [`config`]: centralized format constants
//!
//! ## Error Handling
//!
//! Fallible operations return `Result<T, CatlError>` with the failure kind
//! and enough context (offsets, expected vs actual) to diagnose corrupt
//! inputs. Query-path errors never abort the process, and malformed data is
//! reported as an error rather than a silent "not found".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use catl::shamap::{SHAMap, TreeType};
//! use catl::types::Key;
//! use catl::v2::{Reader, WalkOptions, Writer};
//!
//! # fn ledger_info() -> catl::ledger::LedgerInfo { unimplemented!() }
//! // Build a ledger's tries and append them to an archive.
//! let mut state = SHAMap::new(TreeType::AccountState);
//! state.set_item(Key::new([1u8; 32]), b"account".to_vec());
//! let txs = SHAMap::new(TreeType::Transaction);
//!
//! let mut writer = Writer::create("history.catl2", 21337)?;
//! writer.write_ledger(&ledger_info(), &state, &txs)?;
//! writer.finalize()?;
//!
//! // Map it back and query.
//! let mut reader = Reader::open("history.catl2")?;
//! reader.read_ledger_info()?;
//! let payload = reader.lookup_state(&Key::new([1u8; 32]))?;
//! assert_eq!(payload, Some(&b"account"[..]));
//!
//! let leaves = reader.walk_state_leaves(|_key, _data| true, &WalkOptions::sequential())?;
//! assert_eq!(leaves, 1);
//! # Ok::<(), catl::CatlError>(())
//! ```

pub mod config;
pub mod error;
pub mod import;
pub mod ledger;
pub mod shamap;
pub mod types;
pub mod v1;
pub mod v2;

// Re-export commonly used types for convenience
pub use error::{CatlError, Result};
pub use import::{import_file, ImportSummary};
pub use ledger::LedgerInfo;
pub use shamap::{SHAMap, TreeType};
pub use types::{Hash256, Key};
pub use v2::{Reader, WalkOptions, Writer};
