//! Immutable routing table snapshots and their copy-on-write publication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::dict::meta::{now_unix, DictionaryMeta};
use crate::error::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "default";

/// One namespace prefix paired with its ordered, newest-first list of
/// dictionaries. Position 0 is the active dictionary for the prefix;
/// positions beyond it are retained only so that older stored items can
/// still be decompressed.
#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    pub prefix: String,
    pub dicts: Vec<Arc<DictionaryMeta>>,
}

impl NamespaceEntry {
    pub fn active(&self) -> Option<&Arc<DictionaryMeta>> {
        self.dicts.first()
    }
}

/// An immutable routing table snapshot.
pub struct RoutingTable {
    pub spaces: Vec<NamespaceEntry>,
    by_id: Vec<Option<Arc<DictionaryMeta>>>,
    pub built_at: u64,
    pub gen: u64,
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("spaces", &self.spaces.len())
            .field("gen", &self.gen)
            .finish()
    }
}

impl RoutingTable {
    /// Build a new table from its namespace entries. The id index covers
    /// the full 16-bit range; on id reuse across entries, the meta with
    /// the more recent `created_at` wins.
    pub fn build(spaces: Vec<NamespaceEntry>, gen: u64) -> Result<RoutingTable> {
        let mut by_id: Vec<Option<Arc<DictionaryMeta>>> = vec![None; 65536];
        for entry in &spaces {
            for meta in &entry.dicts {
                let slot = &mut by_id[meta.id as usize];
                let replace = match slot {
                    None => true,
                    Some(existing) => meta.created_at >= existing.created_at,
                };
                if replace {
                    *slot = Some(Arc::clone(meta));
                }
            }
        }
        Ok(RoutingTable {
            spaces,
            by_id,
            built_at: now_unix(),
            gen,
        })
    }

    pub fn empty() -> RoutingTable {
        RoutingTable {
            spaces: Vec::new(),
            by_id: vec![None; 65536],
            built_at: now_unix(),
            gen: 0,
        }
    }

    pub fn has_default(&self) -> bool {
        self.spaces.iter().any(|e| e.prefix == DEFAULT_NAMESPACE)
    }

    fn default_entry(&self) -> Option<&NamespaceEntry> {
        self.spaces.iter().find(|e| e.prefix == DEFAULT_NAMESPACE)
    }

    /// Longest-prefix match of `key` against namespace prefixes (other than
    /// "default"), falling back to "default" if present. Among prefixes of
    /// equal length a matched (non-default) prefix wins over default;
    /// otherwise the first inserted wins.
    pub fn pick_by_key(&self, key: &[u8]) -> Option<&Arc<DictionaryMeta>> {
        let mut best: Option<&NamespaceEntry> = None;
        for entry in &self.spaces {
            if entry.prefix == DEFAULT_NAMESPACE {
                continue;
            }
            if key.starts_with(entry.prefix.as_bytes()) {
                match best {
                    None => best = Some(entry),
                    Some(b) if entry.prefix.len() > b.prefix.len() => best = Some(entry),
                    _ => {}
                }
            }
        }
        best.or_else(|| self.default_entry())
            .and_then(|e| e.active())
    }

    /// O(1) lookup by id, returning the meta regardless of whether it is
    /// still active.
    pub fn lookup_by_id(&self, id: u16) -> Option<&Arc<DictionaryMeta>> {
        self.by_id[id as usize].as_ref()
    }

    /// Namespace the matched prefix resolves to, for stats bookkeeping.
    pub fn namespace_for_key(&self, key: &[u8]) -> &str {
        let mut best: Option<&str> = None;
        let mut best_len = 0usize;
        for entry in &self.spaces {
            if entry.prefix == DEFAULT_NAMESPACE {
                continue;
            }
            if key.starts_with(entry.prefix.as_bytes()) && entry.prefix.len() > best_len {
                best_len = entry.prefix.len();
                best = Some(entry.prefix.as_str());
            }
        }
        best.unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The lowest id not currently in use by any meta whose retirement is
    /// either zero (active) or more recent than `now - quarantine_secs`.
    pub fn next_available_id(&self, now: u64, quarantine_secs: u64) -> Result<u16> {
        let mut in_use: HashMap<u16, bool> = HashMap::new();
        for entry in &self.spaces {
            for meta in &entry.dicts {
                let blocked = meta.is_active() || meta.is_quarantined(now, quarantine_secs);
                in_use
                    .entry(meta.id)
                    .and_modify(|b| *b = *b || blocked)
                    .or_insert(blocked);
            }
        }
        for id in 1u32..=65535 {
            let id = id as u16;
            if !in_use.get(&id).copied().unwrap_or(false) {
                return Ok(id);
            }
        }
        Err(Error::Invalid("no available dictionary id".into()))
    }
}

/// Copy-on-write holder for the current routing table. Publication is a
/// single atomic store with release ordering; readers load with acquire
/// ordering and always observe a fully-built table, never a partial one.
pub struct TableSlot {
    ptr: AtomicPtr<RoutingTable>,
}

impl TableSlot {
    pub fn new(initial: RoutingTable) -> TableSlot {
        let raw = Arc::into_raw(Arc::new(initial)) as *mut RoutingTable;
        TableSlot {
            ptr: AtomicPtr::new(raw),
        }
    }

    /// Acquire-load the current snapshot. The returned `Arc` keeps the
    /// table alive for as long as the caller holds it, independent of any
    /// subsequent publish.
    pub fn load(&self) -> Arc<RoutingTable> {
        let raw = self.ptr.load(Ordering::Acquire);
        unsafe {
            Arc::increment_strong_count(raw);
            Arc::from_raw(raw)
        }
    }

    /// Publish `new_table`, returning the table that was previously
    /// current so the caller can hand it to the GC's retired list.
    pub fn publish(&self, new_table: RoutingTable) -> Arc<RoutingTable> {
        let new_raw = Arc::into_raw(Arc::new(new_table)) as *mut RoutingTable;
        let old_raw = self.ptr.swap(new_raw, Ordering::Release);
        unsafe { Arc::from_raw(old_raw) }
    }
}

impl Drop for TableSlot {
    fn drop(&mut self) {
        let raw = self.ptr.load(Ordering::Acquire);
        unsafe {
            drop(Arc::from_raw(raw));
        }
    }
}

// Safety: the raw pointer is only ever produced from `Arc::into_raw`/read
// back through `Arc::from_raw`/`increment_strong_count`, both of which are
// safe to call across threads; the `AtomicPtr` itself provides the
// necessary synchronization for the pointer value.
unsafe impl Send for TableSlot {}
unsafe impl Sync for TableSlot {}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: u16, prefix: &str, created_at: u64) -> Arc<DictionaryMeta> {
        Arc::new(DictionaryMeta {
            id,
            dict_path: format!("/tmp/{id}.dict").into(),
            manifest_path: format!("/tmp/{id}.mf").into(),
            created_at,
            retired_at: 0,
            level: 3,
            dict_size: 1024,
            prefixes: vec![prefix.to_string()],
            signature: format!("sig{id}"),
        })
    }

    #[test]
    fn longest_prefix_wins_over_default() {
        let table = RoutingTable::build(
            vec![
                NamespaceEntry {
                    prefix: "feed:".into(),
                    dicts: vec![meta(1, "feed:", 1)],
                },
                NamespaceEntry {
                    prefix: DEFAULT_NAMESPACE.into(),
                    dicts: vec![meta(2, DEFAULT_NAMESPACE, 1)],
                },
            ],
            1,
        )
        .unwrap();

        let picked = table.pick_by_key(b"feed:123").unwrap();
        assert_eq!(picked.id, 1);

        let picked = table.pick_by_key(b"other:123").unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn lookup_by_id_finds_retired_metas_too() {
        let mut retired = meta(3, "default", 1);
        Arc::get_mut(&mut retired).unwrap().retired_at = 500;
        let table = RoutingTable::build(
            vec![NamespaceEntry {
                prefix: DEFAULT_NAMESPACE.into(),
                dicts: vec![meta(4, DEFAULT_NAMESPACE, 2), retired],
            }],
            1,
        )
        .unwrap();
        assert!(table.lookup_by_id(4).is_some());
        assert!(table.lookup_by_id(3).is_some());
        assert!(table.lookup_by_id(5).is_none());
    }

    #[test]
    fn publish_increments_generation_and_preserves_readers() {
        let slot = TableSlot::new(RoutingTable::empty());
        let first = slot.load();
        assert_eq!(first.gen, 0);

        let next_gen = first.gen + 1;
        let built = RoutingTable::build(
            vec![NamespaceEntry {
                prefix: DEFAULT_NAMESPACE.into(),
                dicts: vec![meta(1, DEFAULT_NAMESPACE, 1)],
            }],
            next_gen,
        )
        .unwrap();
        let old = slot.publish(built);
        assert_eq!(old.gen, 0);

        let current = slot.load();
        assert_eq!(current.gen, 1);
        assert!(current.has_default());
        // The snapshot the first reader saw is still a valid gen-0 table.
        assert_eq!(first.gen, 0);
    }

    #[test]
    fn next_available_id_skips_quarantine() {
        let mut retired = meta(7, "default", 1);
        Arc::get_mut(&mut retired).unwrap().retired_at = 900;
        let table = RoutingTable::build(
            vec![NamespaceEntry {
                prefix: DEFAULT_NAMESPACE.into(),
                dicts: vec![retired],
            }],
            1,
        )
        .unwrap();
        let id = table.next_available_id(1000, 1000).unwrap();
        assert_ne!(id, 7);
        let id2 = table.next_available_id(3000, 1000).unwrap();
        assert_eq!(id2, 1);
    }
}
