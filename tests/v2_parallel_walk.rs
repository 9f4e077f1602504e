//! Sequential/parallel walk equivalence and cancellation behavior.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use catl::shamap::{SHAMap, TreeType};
use catl::types::Key;
use catl::v2::{serialized, Reader, WalkOptions, Writer};
use catl::CatlError;

mod common;
use common::{empty_tx, ledger_info};

const LEAF_COUNT: usize = 100_000;
const SMALL_LEAF_COUNT: usize = 10_000;

/// Build a single-ledger archive whose state trie holds `leaves`
/// random-keyed leaves, each payload opening with a u32 checksum
/// contribution. Returns the expected checksum.
fn archive_with(path: &std::path::Path, leaves: usize) -> u64 {
    let mut rng = StdRng::seed_from_u64(42);
    let mut state = SHAMap::new(TreeType::AccountState);
    let mut expected = 0u64;

    for _ in 0..leaves {
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes);
        let value: u32 = rng.gen();
        // Duplicate random keys would overwrite; with 256-bit keys the
        // chance is negligible and the checksum would catch it anyway.
        state.set_item(Key::new(key_bytes), value.to_le_bytes().to_vec());
        expected += value as u64;
    }

    let mut writer = Writer::create(path, 0).expect("create archive");
    writer
        .write_ledger(&ledger_info(1), &state, &empty_tx())
        .expect("write ledger");
    writer.finalize().expect("finalize");
    expected
}

fn checksum(reader: &Reader, options: &WalkOptions) -> (u64, u64) {
    let sum = AtomicU64::new(0);
    let count = reader
        .walk_state_leaves(
            |_key, payload| {
                let value = u32::from_le_bytes(payload[..4].try_into().unwrap());
                sum.fetch_add(value as u64, Ordering::Relaxed);
                true
            },
            options,
        )
        .expect("walk");
    (count, sum.into_inner())
}

#[test]
fn parallel_walk_matches_sequential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("big.catl2");
    let expected = archive_with(&path, LEAF_COUNT);

    let mut reader = Reader::open(&path).expect("open archive");
    reader.read_ledger_info().expect("ledger header");

    let (seq_count, seq_sum) = checksum(&reader, &WalkOptions::sequential());
    assert_eq!(seq_count, LEAF_COUNT as u64);
    assert_eq!(seq_sum, expected);

    let parallel = WalkOptions {
        parallel: true,
        prefetch: false,
        threads: 8,
    };
    let (par_count, par_sum) = checksum(&reader, &parallel);
    assert_eq!(par_count, seq_count);
    assert_eq!(par_sum, seq_sum);

    // The prefetch pass is an orthogonal optimization; results are equal.
    let (pf_count, pf_sum) = checksum(&reader, &WalkOptions::parallel_with_prefetch());
    assert_eq!(pf_count, seq_count);
    assert_eq!(pf_sum, seq_sum);

    // Thread counts beyond the child fan-out still work.
    let many = WalkOptions {
        parallel: true,
        prefetch: false,
        threads: 32,
    };
    let (many_count, many_sum) = checksum(&reader, &many);
    assert_eq!(many_count, seq_count);
    assert_eq!(many_sum, seq_sum);
}

#[test]
fn sequential_early_stop_is_exact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stop-seq.catl2");
    archive_with(&path, SMALL_LEAF_COUNT);

    let mut reader = Reader::open(&path).expect("open archive");
    reader.read_ledger_info().expect("ledger header");

    let seen = AtomicU64::new(0);
    let count = reader
        .walk_state_leaves(
            |_key, _payload| seen.fetch_add(1, Ordering::Relaxed) + 1 < 5,
            &WalkOptions::sequential(),
        )
        .expect("walk");
    assert_eq!(count, 5);
    assert_eq!(seen.into_inner(), 5);
}

#[test]
fn parallel_early_stop_cuts_the_walk_short() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stop-par.catl2");
    archive_with(&path, SMALL_LEAF_COUNT);

    let mut reader = Reader::open(&path).expect("open archive");
    reader.read_ledger_info().expect("ledger header");

    let options = WalkOptions {
        parallel: true,
        prefetch: false,
        threads: 8,
    };
    let count = reader
        .walk_state_leaves(|_key, _payload| false, &options)
        .expect("walk");

    // Every worker observes the stop flag before claiming another batch;
    // only the callbacks already in flight complete.
    assert!(count >= 1);
    assert!(
        count < SMALL_LEAF_COUNT as u64 / 2,
        "stop flag should prevent most of the walk, saw {count}"
    );
}

#[test]
fn zero_threads_is_misuse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("zero.catl2");
    archive_with(&path, SMALL_LEAF_COUNT);

    let mut reader = Reader::open(&path).expect("open archive");
    reader.read_ledger_info().expect("ledger header");

    let options = WalkOptions {
        parallel: true,
        prefetch: false,
        threads: 0,
    };
    assert!(matches!(
        reader.walk_state_leaves(|_, _| true, &options),
        Err(CatlError::ZeroWalkThreads)
    ));
}

#[test]
fn serialized_adapter_allows_mutable_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("serialized.catl2");
    let expected = archive_with(&path, SMALL_LEAF_COUNT);

    let mut reader = Reader::open(&path).expect("open archive");
    reader.read_ledger_info().expect("ledger header");

    let mut sum = 0u64;
    let options = WalkOptions {
        parallel: true,
        prefetch: false,
        threads: 4,
    };
    let count = {
        let visit = serialized(|_key: &Key, payload: &[u8]| {
            sum += u32::from_le_bytes(payload[..4].try_into().unwrap()) as u64;
            true
        });
        reader.walk_state_leaves(visit, &options).expect("walk")
    };
    assert_eq!(count, SMALL_LEAF_COUNT as u64);
    assert_eq!(sum, expected);
}
