//! Parallel leaf walk over a single tree.
//!
//! A root inner node has at most 16 independent child subtrees, which makes
//! the walk embarrassingly parallel: a fixed pool of workers claims small
//! batches of root children from a mutex-guarded cursor and runs the
//! ordinary sequential walk over each claimed subtree. A shared atomic stop
//! flag lets any callback short-circuit the whole walk (in-flight callbacks
//! complete, no new batches are claimed) and a shared atomic counter
//! accumulates the leaf count.
//!
//! The user callback is invoked from multiple workers concurrently; its
//! thread-safety is the caller's responsibility (see [`serialized`] for a
//! mutex-wrapped adapter). No ordering is guaranteed across subtrees;
//! within one subtree leaves arrive in pre-order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::debug;

use crate::config::{DEFAULT_WALK_THREADS, WALK_BATCH_SIZE};
use crate::error::{CatlError, Result};
use crate::types::Key;
use crate::v2::layout::AbsOff;
use crate::v2::tree::{self, ChildRef};

/// Options controlling tree traversal behavior.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Fan the walk out over a worker pool
    pub parallel: bool,
    /// Run a single-threaded page-touching pass before dispatch
    pub prefetch: bool,
    /// Worker count for parallel mode (must be at least 1)
    pub threads: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            parallel: false,
            prefetch: false,
            threads: DEFAULT_WALK_THREADS,
        }
    }
}

impl WalkOptions {
    /// Single-threaded traversal.
    pub fn sequential() -> Self {
        WalkOptions::default()
    }

    /// Parallel traversal with the default pool size.
    pub fn parallel_only() -> Self {
        WalkOptions {
            parallel: true,
            ..WalkOptions::default()
        }
    }

    /// Parallel traversal preceded by the prefetch pass.
    pub fn parallel_with_prefetch() -> Self {
        WalkOptions {
            parallel: true,
            prefetch: true,
            ..WalkOptions::default()
        }
    }
}

/// Wrap a non-thread-safe callback in a mutex so it can be handed to the
/// parallel walk.
pub fn serialized<F>(visit: F) -> impl Fn(&Key, &[u8]) -> bool + Sync
where
    F: FnMut(&Key, &[u8]) -> bool + Send,
{
    let visit = Mutex::new(visit);
    move |key: &Key, payload: &[u8]| {
        let mut visit = visit.lock().expect("walk callback mutex");
        (*visit)(key, payload)
    }
}

/// Walk all leaves under `root_offset` using a worker pool.
///
/// Returns the number of leaves delivered to the callback. The first
/// structural error encountered in any worker stops the walk and is
/// returned; ties are broken arbitrarily.
pub(crate) fn walk_parallel<F>(
    data: &[u8],
    root_offset: AbsOff,
    options: &WalkOptions,
    visit: &F,
) -> Result<u64>
where
    F: Fn(&Key, &[u8]) -> bool + Sync,
{
    if options.threads == 0 {
        return Err(CatlError::ZeroWalkThreads);
    }

    if options.prefetch {
        // Touch the first byte of each key and payload to trigger demand
        // paging before the workers start. Results are unaffected.
        let mut touched = 0u64;
        tree::walk_leaves(data, root_offset, &mut |key, payload| {
            std::hint::black_box(key.as_bytes()[0]);
            if let Some(&byte) = payload.first() {
                std::hint::black_box(byte);
            }
            touched += 1;
            true
        })?;
        debug!(touched, "prefetch pass complete");
    }

    // Collect the root's direct children as the unit of work distribution.
    let root = tree::inner_at(data, root_offset)?;
    let subtree_min_depth = root.header.depth() as usize + 1;
    let children: Vec<ChildRef> = root.children(data).collect::<Result<_>>()?;

    let cursor = Mutex::new(0usize);
    let should_stop = AtomicBool::new(false);
    let total = AtomicU64::new(0);
    let first_error: Mutex<Option<CatlError>> = Mutex::new(None);

    debug!(
        children = children.len(),
        threads = options.threads,
        "starting parallel walk"
    );

    thread::scope(|scope| {
        for _ in 0..options.threads {
            scope.spawn(|| {
                loop {
                    if should_stop.load(Ordering::Relaxed) {
                        return;
                    }
                    // Claim the next batch of root children.
                    let batch: Vec<ChildRef> = {
                        let mut next = cursor.lock().expect("walk cursor mutex");
                        if *next >= children.len() {
                            return;
                        }
                        let end = (*next + WALK_BATCH_SIZE).min(children.len());
                        let claimed = children[*next..end].to_vec();
                        *next = end;
                        claimed
                    };

                    for child in batch {
                        if should_stop.load(Ordering::Relaxed) {
                            return;
                        }
                        let outcome = if child.is_leaf {
                            tree::leaf_at(data, child.offset).map(|leaf| {
                                total.fetch_add(1, Ordering::Relaxed);
                                if !visit(&leaf.key(), leaf.payload) {
                                    should_stop.store(true, Ordering::Relaxed);
                                }
                            })
                        } else {
                            tree::walk_leaves_from(
                                data,
                                child.offset,
                                subtree_min_depth,
                                &mut |key: &Key, payload: &[u8]| {
                                    if should_stop.load(Ordering::Relaxed) {
                                        return false;
                                    }
                                    total.fetch_add(1, Ordering::Relaxed);
                                    let keep_going = visit(key, payload);
                                    if !keep_going {
                                        should_stop.store(true, Ordering::Relaxed);
                                    }
                                    keep_going
                                },
                            )
                            .map(|_| ())
                        };
                        if let Err(err) = outcome {
                            let mut slot = first_error.lock().expect("walk error mutex");
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            should_stop.store(true, Ordering::Relaxed);
                            return;
                        }
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner().expect("walk error mutex") {
        return Err(err);
    }
    Ok(total.load(Ordering::Relaxed))
}
