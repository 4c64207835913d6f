//! One trained dictionary's metadata.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata describing a single trained dictionary.
///
/// A `DictionaryMeta` is exclusively owned by the [`crate::dict::table::RoutingTable`]
/// whose meta array holds it; it is mutated only to stamp `retired_at`, and
/// destroyed only when that table is reclaimed by the GC. It never owns the
/// compiled codec handles that correspond to it — those live in
/// [`crate::dict::pool::DictionaryPool`], keyed by `signature`.
#[derive(Debug, Clone)]
pub struct DictionaryMeta {
    /// 1..=65535; never zero for a meta that exists.
    pub id: u16,
    pub dict_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds; 0 means active (not retired).
    pub retired_at: u64,
    /// Advisory suggested zstd level.
    pub level: i32,
    pub dict_size: usize,
    pub prefixes: Vec<String>,
    /// Content-addressable id used for pool keying.
    pub signature: String,
}

impl DictionaryMeta {
    pub fn is_active(&self) -> bool {
        self.retired_at == 0
    }

    pub fn is_quarantined(&self, now: u64, quarantine_secs: u64) -> bool {
        !self.is_active() && now.saturating_sub(self.retired_at) < quarantine_secs
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
