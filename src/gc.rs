//! Retired-table garbage collector.
//!
//! Every publish pushes the table it superseded onto this MPSC stack,
//! tagged with a retirement timestamp. A single GC thread wakes
//! periodically, drains the stack, and reclaims any table whose
//! quarantine has expired: each of its metas is released from the
//! dictionary pool and the table itself is dropped. Not-yet-expired nodes
//! are pushed back for the next cycle.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dict::pool::DictionaryPool;
use crate::dict::table::RoutingTable;

struct RetiredNode {
    table: Arc<RoutingTable>,
    retired_at: u64,
    next: *mut RetiredNode,
}

/// Treiber stack of tables awaiting reclamation. Pushed to on every
/// publish; drained by the GC thread.
pub struct RetiredQueue {
    head: AtomicPtr<RetiredNode>,
}

impl RetiredQueue {
    pub fn new() -> RetiredQueue {
        RetiredQueue {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn push(&self, table: Arc<RoutingTable>, retired_at: u64) {
        let node = Box::into_raw(Box::new(RetiredNode {
            table,
            retired_at,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Relaxed);
            unsafe {
                (*node).next = head;
            }
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    fn drain(&self) -> Vec<(Arc<RoutingTable>, u64)> {
        let mut head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut out = Vec::new();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            out.push((node.table, node.retired_at));
        }
        out
    }

    fn push_back(&self, items: Vec<(Arc<RoutingTable>, u64)>) {
        for (table, retired_at) in items {
            self.push(table, retired_at);
        }
    }

    /// Number of tables currently awaiting reclamation; observational,
    /// used by tests.
    pub fn pending_count(&self) -> usize {
        let items = self.drain();
        let n = items.len();
        self.push_back(items);
        n
    }
}

impl Default for RetiredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RetiredQueue {
    fn drop(&mut self) {
        self.drain();
    }
}

unsafe impl Send for RetiredQueue {}
unsafe impl Sync for RetiredQueue {}

fn now_unix() -> u64 {
    crate::dict::meta::now_unix()
}

/// Reclaim every meta in `table` from the pool. Errors (a meta whose
/// signature is somehow already absent) are logged and otherwise ignored:
/// the pool entry is gone either way, which is the desired end state.
fn reclaim_table(table: &RoutingTable, pool: &DictionaryPool) {
    for entry in &table.spaces {
        for meta in &entry.dicts {
            match pool.release(meta) {
                Ok(remaining) => {
                    debug!(id = meta.id, remaining, "released dictionary pool reference");
                }
                Err(err) => {
                    warn!(id = meta.id, %err, "pool release failed during GC reclaim");
                }
            }
        }
    }
}

/// Owns the background GC thread. Dropping the handle does not stop the
/// thread; call `shutdown` explicitly and join it.
pub struct GcHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GcHandle {
    /// Spawn the GC thread. `cool_period` is both how often it wakes
    /// (scaled down and clamped to a sane polling cadence) and, per §4.7,
    /// the minimum time a retired table must sit before its metas may be
    /// released back to the pool. Id-reuse quarantine (`gc_quarantine_period`)
    /// is a separate, longer-lived concern handled by
    /// `RoutingTable::next_available_id`, not by this thread.
    pub fn spawn(queue: Arc<RetiredQueue>, pool: Arc<DictionaryPool>, cool_period: Duration) -> GcHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let wake_interval = cool_period.min(Duration::from_secs(1)).max(Duration::from_millis(50));
        let cool_secs = cool_period.as_secs();

        let thread = thread::Builder::new()
            .name("dictcomp-gc".into())
            .spawn(move || {
                info!("retired-table gc started");
                while !stop_thread.load(Ordering::Relaxed) {
                    thread::sleep(wake_interval);
                    let now = now_unix();
                    let items = queue.drain();
                    if items.is_empty() {
                        continue;
                    }
                    let mut kept = Vec::new();
                    for (table, retired_at) in items {
                        if now.saturating_sub(retired_at) >= cool_secs {
                            reclaim_table(&table, &pool);
                            info!(gen = table.gen, "reclaimed retired routing table");
                        } else {
                            kept.push((table, retired_at));
                        }
                    }
                    queue.push_back(kept);
                }
                info!("retired-table gc stopped");
            })
            .expect("failed to spawn gc thread");

        GcHandle {
            stop,
            thread: Some(thread),
        }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
