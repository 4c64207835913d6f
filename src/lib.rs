//! Transparent dictionary-based compression substrate for an in-memory
//! key/value cache.
//!
//! [`CacheCompressor`] is the single owning handle for every piece of
//! process-wide state this crate needs: the dictionary pool, the current
//! routing table, the efficiency tracker, the sample intake, the stats
//! registry, and the background trainer/GC threads. A host cache builds
//! one at process start and passes it by reference into its store/fetch
//! hot paths; nothing here is a mutable static.

pub mod codec;
pub mod config;
pub mod dict;
pub mod efficiency;
pub mod error;
pub mod filter;
pub mod gc;
pub mod item;
pub mod sampler;
pub mod stats;
pub mod trainer;

use std::sync::Arc;

pub use config::Config;
pub use error::{Error, Result};
pub use item::{Outcome, StoredItem};

use crate::dict::meta::now_unix;
use crate::dict::pool::DictionaryPool;
use crate::dict::table::{RoutingTable, TableSlot, DEFAULT_NAMESPACE};
use crate::efficiency::EfficiencyTracker;
use crate::gc::{GcHandle, RetiredQueue};
use crate::sampler::intake::SampleIntake;
use crate::sampler::spool::Spooler;
use crate::stats::StatsRegistry;
use crate::trainer::TrainerHandle;

/// Bytes and dictionary id produced by a successful `maybe_compress` call.
#[derive(Debug)]
pub struct CompressedValue {
    pub bytes: Vec<u8>,
    pub dict_id: u16,
}

/// The compression substrate's single owning handle.
///
/// Built once by [`CacheCompressor::new`]; every public method takes
/// `&self` and is safe to call concurrently from any number of cache
/// worker threads.
pub struct CacheCompressor {
    config: Arc<Config>,
    pool: Arc<DictionaryPool>,
    table: Arc<TableSlot>,
    efficiency: Arc<EfficiencyTracker>,
    samples: Arc<SampleIntake>,
    retired: Arc<RetiredQueue>,
    stats: Arc<StatsRegistry>,
    spooler: Option<Arc<Spooler>>,
    trainer: Option<TrainerHandle>,
    gc: Option<GcHandle>,
}

impl CacheCompressor {
    /// Build the substrate: scan `config.dict_dir` for existing
    /// dictionaries, retain them all in the pool, publish the initial
    /// routing table, and spawn the trainer and GC threads.
    pub fn new(config: Config) -> Result<CacheCompressor> {
        let config = Arc::new(config);
        let pool = Arc::new(DictionaryPool::new());
        let now = now_unix();

        let initial_spaces = match &config.dict_dir {
            Some(dir) => crate::dict::manifest::scan_dict_dir(
                dir,
                config.dict_retain_max,
                config.gc_quarantine_period.as_secs(),
                now,
            )?,
            None => Vec::new(),
        };
        pool.retain_all(&initial_spaces)?;
        let initial_table = RoutingTable::build(initial_spaces, 1)?;
        let table = Arc::new(TableSlot::new(initial_table));

        let efficiency = Arc::new(EfficiencyTracker::new(
            config.ewma_alpha,
            config.enable_training,
            config.retraining_interval.as_secs(),
            config.min_training_size,
            config.retrain_drop,
        ));
        let samples = Arc::new(SampleIntake::new());
        let retired = Arc::new(RetiredQueue::new());
        let stats = Arc::new(StatsRegistry::new());

        let spooler = config
            .spool_dir
            .clone()
            .map(|dir| Arc::new(Spooler::new(dir, config.spool_max_bytes, config.sample_window_duration)));

        let trainer = TrainerHandle::spawn(
            Arc::clone(&config),
            Arc::clone(&pool),
            Arc::clone(&table),
            Arc::clone(&efficiency),
            Arc::clone(&samples),
            Arc::clone(&retired),
        );
        let gc = GcHandle::spawn(Arc::clone(&retired), Arc::clone(&pool), config.gc_cool_period);

        Ok(CacheCompressor {
            config,
            pool,
            table,
            efficiency,
            samples,
            retired,
            stats,
            spooler,
            trainer: Some(trainer),
            gc: Some(gc),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &StatsRegistry {
        &self.stats
    }

    pub fn spooler(&self) -> Option<&Spooler> {
        self.spooler.as_deref()
    }

    pub fn current_generation(&self) -> u64 {
        self.table.load().gen
    }

    /// Entry point called from the cache's store hot path.
    ///
    /// Returns `NoOp` whenever the caller should store the value
    /// unchanged: compression disabled, size out of range, the codec's
    /// output was not smaller than the input, or (per §7) a codec error —
    /// which falls back to storing uncompressed rather than failing the
    /// write.
    pub fn maybe_compress(&self, key: &[u8], value: &[u8]) -> Outcome<CompressedValue> {
        if !self.config.enable_comp {
            return Outcome::NoOp;
        }

        let table = self.table.load();
        let namespace = table.namespace_for_key(key).to_string();
        let ns_stats = self.stats.get_or_create(&namespace);
        ns_stats.record_write(value.len() as u64);
        self.stats.global().record_write(value.len() as u64);

        if value.len() < self.config.min_comp_size {
            ns_stats.inc_skip_too_small();
            return Outcome::NoOp;
        }
        if value.len() > self.config.max_comp_size {
            ns_stats.inc_skip_too_large();
            return Outcome::NoOp;
        }
        if filter::is_likely_incompressible(value) {
            ns_stats.inc_skip_incompressible();
            return Outcome::NoOp;
        }

        self.sample(&table, key, value);

        let (level, cdict, dict_id) = if self.config.enable_dict {
            match table.pick_by_key(key) {
                Some(meta) => {
                    let handles = self.pool.get(&meta.signature);
                    (meta.level, handles.map(|h| h.cdict), meta.id)
                }
                None => (self.config.zstd_level, None, 0u16),
            }
        } else {
            (self.config.zstd_level, None, 0u16)
        };

        let bound = codec::scratch::compress_bound(value.len());
        let compressed = codec::scratch::with_scratch(bound, |scratch| {
            codec::compress_into(value, level, cdict.as_deref(), scratch).map(|n| scratch[..n].to_vec())
        });

        let compressed = match compressed {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::trace!(%err, "compression failed, storing value uncompressed");
                ns_stats.inc_compress_err();
                return Outcome::NoOp;
            }
        };

        if namespace == DEFAULT_NAMESPACE {
            self.efficiency.on_observation(value.len(), compressed.len());
        }

        if compressed.len() >= value.len() {
            ns_stats.inc_skip_incompressible();
            return Outcome::NoOp;
        }

        ns_stats.record_compressed(compressed.len() as u64);
        self.stats.global().record_compressed(compressed.len() as u64);

        Outcome::Ok(CompressedValue {
            bytes: compressed,
            dict_id,
        })
    }

    fn sample(&self, table: &RoutingTable, key: &[u8], value: &[u8]) {
        if !self.config.enable_sampling {
            return;
        }
        // Cold start (no dictionary yet for this key's namespace) always
        // samples; once a dictionary exists, sampling drops to `sample_p`.
        let has_dict = table.pick_by_key(key).is_some();
        let p = if has_dict { self.config.sample_p } else { 1.0 };
        self.samples
            .maybe_sample(value, p, self.config.min_training_size);
    }

    /// Entry point called from the cache's fetch hot path.
    ///
    /// Returns `NoOp` when the item's "compressed" flag is unset or it is
    /// chunked (both treated as plain). A codec error here is surfaced to
    /// the caller rather than swallowed: decompression failure is a
    /// stored-data-loss event, counted via `dict_miss_errs`/
    /// `decompress_errs`. Per the item boundary, this crate never sees the
    /// item's key, so the namespace charged is the one the resolved
    /// dictionary was trained for (falling back to "default" for a
    /// dictionary-less frame).
    pub fn maybe_decompress(
        &self,
        item: &impl StoredItem,
        compressed: &[u8],
    ) -> Result<Outcome<Vec<u8>>> {
        if !item.is_compressed() || item.is_chunked() {
            return Ok(Outcome::NoOp);
        }

        let table = self.table.load();
        let dict_id = item.dict_id();

        let (ddict, namespace) = if dict_id == 0 {
            (None, DEFAULT_NAMESPACE.to_string())
        } else {
            match table.lookup_by_id(dict_id) {
                Some(meta) => {
                    let namespace = meta
                        .prefixes
                        .first()
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
                    match self.pool.get(&meta.signature) {
                        Some(handles) => (Some(handles.ddict), namespace),
                        None => {
                            self.stats.get_or_create(&namespace).inc_dict_miss();
                            return Err(Error::NotFound(format!(
                                "dictionary id {dict_id} not compiled in pool"
                            )));
                        }
                    }
                }
                None => {
                    self.stats.get_or_create(DEFAULT_NAMESPACE).inc_dict_miss();
                    return Err(Error::NotFound(format!(
                        "dictionary id {dict_id} not present in current routing table"
                    )));
                }
            }
        };

        let ns_stats = self.stats.get_or_create(&namespace);
        ns_stats.record_read();
        self.stats.global().record_read();

        match codec::decompress_alloc(compressed, ddict.as_deref()) {
            Ok(bytes) => Ok(Outcome::Ok(bytes)),
            Err(err) => {
                ns_stats.inc_decompress_err();
                Err(err)
            }
        }
    }

    /// Orchestrated shutdown: stop sampling further writes into the
    /// trainer, join the trainer and GC threads, and stop the standalone
    /// spooler if one was configured. Safe to call once; subsequent calls
    /// are no-ops since the handles are already taken.
    pub fn shutdown(&mut self) {
        if let Some(mut trainer) = self.trainer.take() {
            trainer.shutdown();
        }
        if let Some(mut gc) = self.gc.take() {
            gc.shutdown();
        }
        if let Some(spooler) = &self.spooler {
            spooler.stop();
        }
    }
}

impl Drop for CacheCompressor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
