//! Background trainer: drains samples, trains a dictionary, persists it,
//! and republishes the routing table.
//!
//! Cooperative single thread. Every cycle it checks three predicates —
//! `need_training`, `active`, `budget_met` — and only proceeds when all
//! three hold. Training errors never propagate to a caller; they bump a
//! counter and the trainer retries on its next cycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::{Config, TrainMode};
use crate::dict::manifest;
use crate::dict::meta::now_unix;
use crate::dict::pool::DictionaryPool;
use crate::dict::table::{NamespaceEntry, RoutingTable, TableSlot, DEFAULT_NAMESPACE};
use crate::efficiency::EfficiencyTracker;
use crate::gc::RetiredQueue;
use crate::sampler::intake::SampleIntake;

/// Minimum dictionary size the trainer accepts; anything smaller is
/// treated as a failed train.
const MIN_DICT_BYTES: usize = 1024;

const CYCLE_PERIOD: Duration = Duration::from_secs(1);

/// Counters for the trainer's own activity, surfaced on the admin surface
/// alongside the per-namespace stats.
#[derive(Default)]
pub struct TrainerStats {
    pub runs: AtomicU64,
    pub published: AtomicU64,
    pub codec_errs: AtomicU64,
    pub small_dict_errs: AtomicU64,
}

struct TrainerShared {
    config: Arc<Config>,
    pool: Arc<DictionaryPool>,
    table: Arc<TableSlot>,
    efficiency: Arc<EfficiencyTracker>,
    samples: Arc<SampleIntake>,
    retired: Arc<RetiredQueue>,
    stats: Arc<TrainerStats>,
    active: AtomicBool,
}

/// Handle to the background trainer thread.
pub struct TrainerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pub stats: Arc<TrainerStats>,
}

impl TrainerHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: Arc<Config>,
        pool: Arc<DictionaryPool>,
        table: Arc<TableSlot>,
        efficiency: Arc<EfficiencyTracker>,
        samples: Arc<SampleIntake>,
        retired: Arc<RetiredQueue>,
    ) -> TrainerHandle {
        let stats = Arc::new(TrainerStats::default());
        let shared = Arc::new(TrainerShared {
            config,
            pool,
            table,
            efficiency,
            samples,
            retired,
            stats: Arc::clone(&stats),
            active: AtomicBool::new(false),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("dictcomp-trainer".into())
            .spawn(move || {
                info!("trainer started");
                while !stop_thread.load(Ordering::Relaxed) {
                    thread::sleep(CYCLE_PERIOD);
                    run_cycle(&shared);
                }
                info!("trainer stopped");
            })
            .expect("failed to spawn trainer thread");

        TrainerHandle {
            stop,
            thread: Some(thread),
            stats,
        }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TrainerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn need_training(shared: &TrainerShared, now: u64) -> bool {
    if !shared.table.load().has_default() {
        return true;
    }
    shared.efficiency.should_retrain(now)
}

fn run_cycle(shared: &Arc<TrainerShared>) {
    let now = now_unix();

    if need_training(shared, now) {
        shared.active.store(true, Ordering::Release);
    }
    if !shared.active.load(Ordering::Acquire) {
        return;
    }

    let min_training_size = shared.config.min_training_size;
    if shared.samples.bytes_pending() < min_training_size {
        return;
    }

    shared.stats.runs.fetch_add(1, Ordering::Relaxed);
    fire(shared, now);
}

fn fire(shared: &Arc<TrainerShared>, now: u64) {
    let values = shared.samples.drain();
    let mut total_bytes: u64 = 0;
    let mut overflowed = false;
    for v in &values {
        match total_bytes.checked_add(v.len() as u64) {
            Some(n) => total_bytes = n,
            None => {
                overflowed = true;
                break;
            }
        }
    }

    if overflowed {
        warn!("sample batch byte count overflowed; dropping batch");
        let observed: usize = values.iter().map(|v| v.len()).sum::<usize>().min(usize::MAX);
        shared.samples.release_bytes(observed);
        return;
    }

    let observed_bytes = total_bytes as usize;

    let dict_dir = match &shared.config.dict_dir {
        Some(dir) => dir.clone(),
        None => {
            debug!("no dict_dir configured; trainer idle");
            shared.samples.release_bytes(observed_bytes);
            return;
        }
    };

    let max_size = shared.config.dict_size;
    let trained = match shared.config.train_mode {
        TrainMode::Fast => codec::train_dictionary(&values, max_size),
        TrainMode::Optimize => codec::train_dictionary_optimize(&values, max_size),
    };

    let dict_bytes = match trained {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "dictionary training failed");
            shared.stats.codec_errs.fetch_add(1, Ordering::Relaxed);
            shared.samples.release_bytes(observed_bytes);
            return;
        }
    };

    if dict_bytes.len() < MIN_DICT_BYTES {
        warn!(size = dict_bytes.len(), "trained dictionary too small, discarding");
        shared.stats.small_dict_errs.fetch_add(1, Ordering::Relaxed);
        shared.samples.release_bytes(observed_bytes);
        return;
    }

    if let Err(err) = persist_and_publish(shared, &dict_dir, &dict_bytes, now) {
        warn!(%err, "failed to persist or publish trained dictionary");
        shared.stats.codec_errs.fetch_add(1, Ordering::Relaxed);
        shared.samples.release_bytes(observed_bytes);
        return;
    }

    shared.samples.release_bytes(observed_bytes);
    shared.efficiency.mark_retrained(now);
    shared.active.store(false, Ordering::Release);
    shared.stats.published.fetch_add(1, Ordering::Relaxed);
    info!(bytes = observed_bytes, "published freshly trained dictionary");
}

fn persist_and_publish(
    shared: &Arc<TrainerShared>,
    dict_dir: &PathBuf,
    dict_bytes: &[u8],
    now: u64,
) -> crate::error::Result<()> {
    let current = shared.table.load();
    let id = current.next_available_id(now, shared.config.gc_quarantine_period.as_secs())?;

    manifest::save_dictionary_and_manifest(
        dict_dir,
        dict_bytes,
        &[DEFAULT_NAMESPACE.to_string()],
        shared.config.zstd_level,
        id,
        now,
    )?;

    let spaces = manifest::scan_dict_dir(
        dict_dir,
        shared.config.dict_retain_max,
        shared.config.gc_quarantine_period.as_secs(),
        now,
    )?;
    let spaces = ensure_default_present(spaces);

    // Every meta in the freshly scanned table is a brand new instance, so
    // each needs its own retain before the table is published — the old
    // table's eventual GC reclaim will release the instances it holds.
    shared.pool.retain_all(&spaces)?;

    let new_table = match RoutingTable::build(spaces.clone(), current.gen + 1) {
        Ok(t) => t,
        Err(err) => {
            // Build itself currently cannot fail once retain_all succeeded,
            // but roll back the retains if it ever does.
            shared.pool.release_all(&spaces);
            return Err(err);
        }
    };

    let old = shared.table.publish(new_table);
    shared.retired.push(old, now);
    Ok(())
}

fn ensure_default_present(mut spaces: Vec<NamespaceEntry>) -> Vec<NamespaceEntry> {
    if !spaces.iter().any(|e| e.prefix == DEFAULT_NAMESPACE) {
        spaces.push(NamespaceEntry {
            prefix: DEFAULT_NAMESPACE.to_string(),
            dicts: Vec::new(),
        });
    }
    spaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config(dict_dir: PathBuf) -> Arc<Config> {
        let mut cfg = Config::default();
        cfg.dict_dir = Some(dict_dir);
        cfg.dict_size = 16 * 1024;
        cfg.min_training_size = 8 * 1024;
        Arc::new(cfg)
    }

    #[test]
    fn cold_start_trains_and_publishes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let pool = Arc::new(DictionaryPool::new());
        let table = Arc::new(TableSlot::new(RoutingTable::empty()));
        let efficiency = Arc::new(EfficiencyTracker::new(0.05, true, 0, config.min_training_size, 0.10));
        let samples = Arc::new(SampleIntake::new());
        let retired = Arc::new(RetiredQueue::new());

        for i in 0..64 {
            let value = format!("feed-item-{i}-payload\n").repeat(8).into_bytes();
            samples.maybe_sample(&value, 1.0, usize::MAX);
        }
        assert!(samples.bytes_pending() >= config.min_training_size);

        let shared = Arc::new(TrainerShared {
            config: Arc::clone(&config),
            pool: Arc::clone(&pool),
            table: Arc::clone(&table),
            efficiency,
            samples,
            retired,
            stats: Arc::new(TrainerStats::default()),
            active: AtomicBool::new(false),
        });

        run_cycle(&shared);
        assert!(shared.active.load(Ordering::Acquire) || shared.stats.published.load(Ordering::Relaxed) == 1);
        // need_training latches active before budget_met allows firing in
        // the same pass; drive one more cycle to guarantee the fire ran.
        if shared.stats.published.load(Ordering::Relaxed) == 0 {
            run_cycle(&shared);
        }

        assert_eq!(shared.stats.published.load(Ordering::Relaxed), 1);
        assert!(table.load().has_default());
        assert_eq!(table.load().gen, 1);
    }

    #[test]
    fn handle_spawns_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let pool = Arc::new(DictionaryPool::new());
        let table = Arc::new(TableSlot::new(RoutingTable::empty()));
        let efficiency = Arc::new(EfficiencyTracker::new(0.05, true, 0, config.min_training_size, 0.10));
        let samples = Arc::new(SampleIntake::new());
        let retired = Arc::new(RetiredQueue::new());

        let mut handle = TrainerHandle::spawn(config, pool, table, efficiency, samples, retired);
        std::thread::sleep(StdDuration::from_millis(50));
        handle.shutdown();
    }
}
