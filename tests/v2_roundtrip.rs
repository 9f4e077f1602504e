//! Write/read round trips: structural sharing, lookups across ledgers,
//! walk completeness, skip correctness, and byte accounting.

use std::collections::BTreeMap;
use std::mem::size_of;

use catl::shamap::{SHAMap, TreeType};
use catl::v2::{Reader, WalkOptions, Writer};
use catl::CatlError;

mod common;
use common::{empty_tx, ledger_info, tail_key, tx_map, wide_key};

/// Three consecutive ledgers with overlapping state.
///
/// A: {01→"a", 02→"b"}; B applies {02→"B", +03→"c"}; C removes 01.
/// Unchanged paths must share storage: only "a", "b", "B", "c" are ever
/// written as leaves, and ledger C writes none at all.
#[test]
fn three_ledgers_share_unchanged_leaves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("overlap.catl2");

    let k1 = tail_key(0x01);
    let k2 = tail_key(0x02);
    let k3 = tail_key(0x03);

    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);

    state.set_item(k1, b"a".to_vec());
    state.set_item(k2, b"b".to_vec());
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("write ledger A");
    let after_a = writer.stats();
    assert_eq!(after_a.leaf_nodes_written, 2);

    state.set_item(k2, b"B".to_vec());
    state.set_item(k3, b"c".to_vec());
    writer
        .write_ledger(&ledger_info(2), &state, &empty_tx())
        .expect("write ledger B");
    let after_b = writer.stats();
    assert_eq!(after_b.leaf_nodes_written - after_a.leaf_nodes_written, 2);

    state.remove_item(&k1);
    writer
        .write_ledger(&ledger_info(3), &state, &empty_tx())
        .expect("write ledger C");
    let after_c = writer.stats();
    assert_eq!(
        after_c.leaf_nodes_written - after_b.leaf_nodes_written,
        0,
        "ledger C changes no leaf content"
    );

    // Every distinct leaf value hits the disk exactly once.
    assert_eq!(after_c.leaf_nodes_written, 4);
    writer.finalize().expect("finalize");

    let mut reader = Reader::open(&path).expect("open archive");

    // k1 is present in A and B, gone in C.
    for (seq, expected) in [(1, Some(&b"a"[..])), (2, Some(&b"a"[..])), (3, None)] {
        assert!(reader.seek_to_ledger(seq));
        reader.read_ledger_info().expect("ledger header");
        assert_eq!(
            reader.lookup_state(&k1).expect("lookup k1"),
            expected,
            "k1 in ledger {seq}"
        );
    }

    // k2 transitions "b" -> "B" -> "B".
    for (seq, expected) in [(1, &b"b"[..]), (2, &b"B"[..]), (3, &b"B"[..])] {
        assert!(reader.seek_to_ledger(seq));
        reader.read_ledger_info().expect("ledger header");
        assert_eq!(
            reader.lookup_state(&k2).expect("lookup k2"),
            Some(expected),
            "k2 in ledger {seq}"
        );
    }

    // Walk completeness: each ledger enumerates exactly its source keys.
    let walk = |reader: &mut Reader, seq: u32| -> BTreeMap<Vec<u8>, Vec<u8>> {
        assert!(reader.seek_to_ledger(seq));
        reader.read_ledger_info().expect("ledger header");
        let collected = std::sync::Mutex::new(BTreeMap::new());
        reader
            .walk_state_leaves(
                |key, payload| {
                    collected
                        .lock()
                        .unwrap()
                        .insert(key.as_bytes().to_vec(), payload.to_vec());
                    true
                },
                &WalkOptions::sequential(),
            )
            .expect("walk");
        collected.into_inner().unwrap()
    };

    let a = walk(&mut reader, 1);
    assert_eq!(a.len(), 2);
    assert_eq!(a[&k1.as_bytes().to_vec()], b"a");
    assert_eq!(a[&k2.as_bytes().to_vec()], b"b");

    let b = walk(&mut reader, 2);
    assert_eq!(b.len(), 3);
    assert_eq!(b[&k2.as_bytes().to_vec()], b"B");
    assert_eq!(b[&k3.as_bytes().to_vec()], b"c");

    let c = walk(&mut reader, 3);
    assert_eq!(c.len(), 2);
    assert!(!c.contains_key(&k1.as_bytes().to_vec()));
}

/// After `read_ledger_info; skip_state_trie; skip_tx_trie`, the next header
/// is the next ledger, for every consecutive pair.
#[test]
fn skip_steps_through_every_ledger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stream.catl2");

    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);
    for seq in 100..110u32 {
        state.set_item(wide_key(seq), seq.to_be_bytes().to_vec());
        let txs = tx_map(&[(wide_key(seq ^ 0xFFFF_FFFF), &seq.to_le_bytes())]);
        writer
            .write_ledger(&ledger_info(seq), &state, &txs)
            .expect("write ledger");
    }
    writer.finalize().expect("finalize");

    let mut reader = Reader::open(&path).expect("open archive");
    let mut seen = Vec::new();
    while !reader.at_end_of_ledgers() {
        let info = reader.read_ledger_info().expect("ledger header");
        seen.push({ info.seq });
        reader.skip_state_trie();
        reader.skip_tx_trie();
    }
    assert_eq!(seen, (100..110).collect::<Vec<_>>());
    assert!(reader.at_end_of_ledgers());
}

/// Ledgers without transactions store no tx tree at all; ledgers with
/// transactions answer tx lookups.
#[test]
fn empty_tx_tree_is_absent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("txless.catl2");

    let tx_key = wide_key(777);
    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);
    state.set_item(wide_key(1), b"x".to_vec());
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("txless ledger");
    state.set_item(wide_key(2), b"y".to_vec());
    writer
        .write_ledger(
            &ledger_info(2),
            &state,
            &tx_map(&[(tx_key, b"tx blob")]),
        )
        .expect("ledger with tx");
    writer.finalize().expect("finalize");

    let mut reader = Reader::open(&path).expect("open archive");

    assert!(reader.seek_to_ledger(1));
    reader.read_ledger_info().expect("header");
    assert_eq!(reader.lookup_tx(&tx_key).expect("tx lookup"), None);
    assert_eq!(reader.walk_tx_leaves(|_, _| true).expect("tx walk"), 0);
    let entry = reader.index().find(1).expect("indexed");
    assert!(!entry.has_tx_tree());

    assert!(reader.seek_to_ledger(2));
    reader.read_ledger_info().expect("header");
    assert_eq!(
        reader.lookup_tx(&tx_key).expect("tx lookup"),
        Some(&b"tx blob"[..])
    );
    assert_eq!(reader.walk_tx_leaves(|_, _| true).expect("tx walk"), 1);
    assert!(reader.index().find(2).expect("indexed").has_tx_tree());
}

/// Zero-length payloads are legal.
#[test]
fn zero_length_payload_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty-payload.catl2");

    let key = wide_key(9);
    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);
    state.set_item(key, Vec::new());
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("write");
    writer.finalize().expect("finalize");

    let mut reader = Reader::open(&path).expect("open");
    reader.read_ledger_info().expect("header");
    assert_eq!(reader.lookup_state(&key).expect("lookup"), Some(&b""[..]));
}

/// A second ledger that modifies one leaf adds exactly the modified path:
/// ledger header, trees record, the path's inner nodes with their slots,
/// and the one new leaf.
#[test]
fn second_ledger_byte_accounting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accounting.catl2");

    // Keys diverging at the first nibble keep the modified path at depth 1:
    // the root inner is the only inner on it.
    let mut a = [0u8; 32];
    a[0] = 0xA0;
    let mut b = [0u8; 32];
    b[0] = 0xB0;
    let (ka, kb) = (catl::types::Key::new(a), catl::types::Key::new(b));

    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);
    state.set_item(ka, b"left".to_vec());
    state.set_item(kb, b"right".to_vec());
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("first ledger");
    let before = writer.current_offset();

    let new_payload = b"right, version 2";
    state.set_item(kb, new_payload.to_vec());
    writer
        .write_ledger(&ledger_info(2), &state, &empty_tx())
        .expect("second ledger");
    let added = writer.current_offset() - before;

    let ledger_info_size = 150u64;
    let trees_header_size = 16u64;
    let inner_header_size = 40u64;
    let slots = 2 * size_of::<i64>() as u64;
    let leaf_header_size = 68u64;
    let expected = ledger_info_size
        + trees_header_size
        + inner_header_size
        + slots
        + leaf_header_size
        + new_payload.len() as u64;

    assert!(
        added.abs_diff(expected) <= 8,
        "added {added} bytes, expected {expected} +/- 8"
    );
    writer.finalize().expect("finalize");
}

/// Misuse is rejected: empty state tries, oversized payloads, zero-thread
/// walks; a failed writer refuses further work.
#[test]
fn writer_misuse_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("misuse.catl2");

    let mut writer = Writer::create(&path, 0).expect("create archive");

    let empty_state = SHAMap::new(TreeType::AccountState);
    assert!(matches!(
        writer.write_ledger(&ledger_info(1), &empty_state, &empty_tx()),
        Err(CatlError::EmptyStateTree { sequence: 1 })
    ));

    // The empty-state check fires before any bytes are written, so the
    // writer is still usable.
    let mut state = SHAMap::new(TreeType::AccountState);
    state.set_item(wide_key(1), b"fine".to_vec());
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("valid ledger still writes");

    state.set_item(wide_key(2), vec![0u8; 0x0100_0000]);
    assert!(matches!(
        writer.write_ledger(&ledger_info(2), &state, &empty_tx()),
        Err(CatlError::PayloadTooLarge { .. })
    ));

    // The oversized payload aborted mid-ledger; the file is now invalid.
    assert!(matches!(
        writer.write_ledger(&ledger_info(3), &state, &empty_tx()),
        Err(CatlError::WriterFailed)
    ));
    assert!(matches!(writer.finalize(), Err(CatlError::WriterFailed)));
}

/// `share` yields an independent cursor over the same mapping, which
/// outlives the original reader.
#[test]
fn shared_readers_have_independent_cursors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("share.catl2");

    let mut writer = Writer::create(&path, 0).expect("create archive");
    let mut state = SHAMap::new(TreeType::AccountState);
    for seq in 1..=3u32 {
        state.set_item(wide_key(seq), vec![seq as u8]);
        writer
            .write_ledger(&ledger_info(seq), &state, &empty_tx())
            .expect("write ledger");
    }
    writer.finalize().expect("finalize");

    let mut first = Reader::open(&path).expect("open");
    let mut second = first.share();

    // Advance the first cursor to ledger 3; the second still sees ledger 1.
    assert!(first.seek_to_ledger(3));
    assert_eq!({ first.read_ledger_info().expect("header").seq }, 3);
    assert_eq!({ second.read_ledger_info().expect("header").seq }, 1);

    // The mapping survives dropping the reader that created it.
    drop(first);
    let mut third = second.share();
    drop(second);
    assert!(third.seek_to_ledger(2));
    assert_eq!({ third.read_ledger_info().expect("header").seq }, 2);
}
