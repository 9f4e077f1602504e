//! v1 → v2 conversion pipeline.
//!
//! Replays a legacy catalogue stream into the v2 writer: one persistent
//! account-state map accumulates each ledger's delta, a fresh transaction
//! map is built per ledger, and both are handed to the writer. After a
//! ledger is written every node in the state map carries its disk offset,
//! so the next delta path-copies exactly the modified paths and the writer
//! emits exactly the per-ledger change set.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::shamap::{SHAMap, TreeType};
use crate::v1;
use crate::v2;

/// Counters reported after a conversion.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImportSummary {
    pub ledgers: u64,
    pub first_ledger_seq: u32,
    pub last_ledger_seq: u32,
    pub inner_nodes_written: u64,
    pub leaf_nodes_written: u64,
    pub total_bytes_written: u64,
}

/// Convert the v1 catalogue at `src` into a v2 archive at `dst`.
///
/// `network_id` overrides the network recorded in the source header.
/// Conversion is deterministic: the same source produces a byte-identical
/// archive.
pub fn import_file(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    network_id: Option<u32>,
) -> Result<ImportSummary> {
    let mut reader = v1::Reader::open(src)?;
    let min_ledger = reader.header().min_ledger;
    let max_ledger = reader.header().max_ledger;
    let network_id = network_id.unwrap_or(reader.header().network_id as u32);

    info!(min_ledger, max_ledger, network_id, "importing v1 catalogue");

    let mut writer = v2::Writer::create(dst, network_id)?;
    let mut state_map = SHAMap::new(TreeType::AccountState);

    for expected_seq in min_ledger..=max_ledger {
        let info = reader.read_ledger_info()?;

        let state_nodes = reader.read_map_delta(&mut state_map, v1::NodeType::AccountState)?;

        let mut tx_map = SHAMap::new(TreeType::Transaction);
        let tx_nodes = reader.read_map_delta(&mut tx_map, v1::NodeType::TransactionMd)?;

        let stats_before = writer.stats();
        writer.write_ledger(&info, &state_map, &tx_map)?;
        let stats_after = writer.stats();

        let sequence = info.seq;
        debug!(
            sequence,
            expected_seq,
            state_nodes,
            tx_nodes,
            new_inners = stats_after.inner_nodes_written - stats_before.inner_nodes_written,
            new_leaves = stats_after.leaf_nodes_written - stats_before.leaf_nodes_written,
            "imported ledger"
        );
    }

    writer.finalize()?;
    let stats = writer.stats();

    info!(
        ledgers = (max_ledger - min_ledger + 1),
        total_bytes = stats.total_bytes_written,
        "import complete"
    );

    Ok(ImportSummary {
        ledgers: (max_ledger - min_ledger + 1) as u64,
        first_ledger_seq: min_ledger,
        last_ledger_seq: max_ledger,
        inner_nodes_written: stats.inner_nodes_written,
        leaf_nodes_written: stats.leaf_nodes_written,
        total_bytes_written: stats.total_bytes_written,
    })
}
