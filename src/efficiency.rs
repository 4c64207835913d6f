//! Lock-free EWMA tracker of compression efficiency on the "default"
//! namespace, and the retrain trigger it feeds.
//!
//! Doubles are stored by bit-pattern in 64-bit atomic words so that load
//! and store are each a single atomic op; `alpha` is cached at
//! construction and is read-only thereafter.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct EfficiencyTracker {
    ewma_bits: AtomicU64,
    ewma_initialized: AtomicBool,
    baseline_bits: AtomicU64,
    baseline_initialized: AtomicBool,
    last_retrain_s: AtomicU64,
    bytes_since_train: AtomicUsize,
    alpha: f64,
    enable_training: bool,
    retraining_interval_s: u64,
    min_training_size: usize,
    retrain_drop: f64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl EfficiencyTracker {
    pub fn new(
        alpha: f64,
        enable_training: bool,
        retraining_interval_s: u64,
        min_training_size: usize,
        retrain_drop: f64,
    ) -> EfficiencyTracker {
        EfficiencyTracker {
            ewma_bits: AtomicU64::new(0),
            ewma_initialized: AtomicBool::new(false),
            baseline_bits: AtomicU64::new(0),
            baseline_initialized: AtomicBool::new(false),
            last_retrain_s: AtomicU64::new(now_secs()),
            bytes_since_train: AtomicUsize::new(0),
            alpha,
            enable_training,
            retraining_interval_s,
            min_training_size,
            retrain_drop,
        }
    }

    /// Record one successful compression's ratio (compressed/original) on
    /// the hot path.
    pub fn on_observation(&self, original_bytes: usize, compressed_bytes: usize) {
        if original_bytes == 0 {
            return;
        }
        let ratio = compressed_bytes as f64 / original_bytes as f64;

        if !self.ewma_initialized.swap(true, Ordering::AcqRel) {
            self.ewma_bits.store(ratio.to_bits(), Ordering::Release);
        } else {
            let cur = f64::from_bits(self.ewma_bits.load(Ordering::Acquire));
            let next = self.alpha * ratio + (1.0 - self.alpha) * cur;
            self.ewma_bits.store(next.to_bits(), Ordering::Release);
        }
        self.bytes_since_train
            .fetch_add(original_bytes, Ordering::AcqRel);
    }

    pub fn ewma(&self) -> f64 {
        f64::from_bits(self.ewma_bits.load(Ordering::Acquire))
    }

    pub fn baseline(&self) -> f64 {
        f64::from_bits(self.baseline_bits.load(Ordering::Acquire))
    }

    pub fn last_retrain_seconds(&self) -> u64 {
        self.last_retrain_s.load(Ordering::Acquire)
    }

    pub fn bytes_since_train(&self) -> usize {
        self.bytes_since_train.load(Ordering::Acquire)
    }

    /// True iff training is enabled, the retrain interval has elapsed,
    /// enough raw bytes have been observed since the last retrain, and the
    /// ratio has grown (compression worsened) past the baseline by
    /// `retrain_drop`.
    pub fn should_retrain(&self, now: u64) -> bool {
        if !self.enable_training {
            return false;
        }
        if now.saturating_sub(self.last_retrain_seconds()) < self.retraining_interval_s {
            return false;
        }
        if self.bytes_since_train() < self.min_training_size {
            return false;
        }
        if !self.baseline_initialized.load(Ordering::Acquire) {
            // No baseline yet: any genuine signal should be allowed through;
            // need_training's "no default dict yet" branch is what actually
            // drives the very first train in practice.
            return true;
        }
        self.ewma() >= self.baseline() * (1.0 + self.retrain_drop)
    }

    /// Called only after a genuine publish. Baseline is clamped to be
    /// non-increasing: the first call sets it to the current EWMA
    /// unconditionally; every later call only lowers it.
    pub fn mark_retrained(&self, now: u64) {
        let ewma = self.ewma();
        if !self.baseline_initialized.swap(true, Ordering::AcqRel) {
            self.baseline_bits.store(ewma.to_bits(), Ordering::Release);
        } else {
            let cur = self.baseline();
            if ewma < cur {
                self.baseline_bits.store(ewma.to_bits(), Ordering::Release);
            }
        }
        self.last_retrain_s.store(now, Ordering::Release);
        self.bytes_since_train.store(0, Ordering::AcqRel);
    }
}
