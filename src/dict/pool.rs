//! Process-wide reference-counted registry of compiled dictionary handles.
//!
//! The pool, not the meta, owns compiled handles: compilation happens
//! exactly at the 0→1 refcount transition and destruction exactly at 1→0.
//! Concurrent retains of the same signature must collapse to one
//! compilation and a final refcount equal to the number of retain calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use zstd::dict::{DecoderDictionary, EncoderDictionary};

use crate::codec;
use crate::dict::meta::DictionaryMeta;
use crate::dict::table::NamespaceEntry;
use crate::error::{Error, Result};

/// Compiled handles for one dictionary, shared by every routing table that
/// references its meta.
pub struct CompiledHandles {
    pub cdict: Arc<EncoderDictionary<'static>>,
    pub ddict: Arc<DecoderDictionary<'static>>,
}

struct PoolEntry {
    cdict: Arc<EncoderDictionary<'static>>,
    ddict: Arc<DecoderDictionary<'static>>,
    refcount: usize,
}

pub struct DictionaryPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl DictionaryPool {
    pub fn new() -> DictionaryPool {
        DictionaryPool {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Retain compiled handles for `meta`'s signature, compiling them from
    /// the on-disk blob if this is the first retain. Compilation happens
    /// outside the lock; a presence check on re-acquiring it collapses
    /// concurrent duplicate compiles down to one.
    pub fn retain(&self, meta: &DictionaryMeta) -> Result<CompiledHandles> {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(&meta.signature) {
                entry.refcount += 1;
                return Ok(CompiledHandles {
                    cdict: Arc::clone(&entry.cdict),
                    ddict: Arc::clone(&entry.ddict),
                });
            }
        }

        let blob = std::fs::read(&meta.dict_path)?;
        let cdict = Arc::new(codec::compile_encoder_dict(&blob, meta.level));
        let ddict = Arc::new(codec::compile_decoder_dict(&blob));

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&meta.signature) {
            // Someone else compiled and inserted while we were compiling.
            entry.refcount += 1;
            return Ok(CompiledHandles {
                cdict: Arc::clone(&entry.cdict),
                ddict: Arc::clone(&entry.ddict),
            });
        }

        entries.insert(
            meta.signature.clone(),
            PoolEntry {
                cdict: Arc::clone(&cdict),
                ddict: Arc::clone(&ddict),
                refcount: 1,
            },
        );
        Ok(CompiledHandles { cdict, ddict })
    }

    /// Release one retain for `meta`'s signature. Returns the post-decrement
    /// refcount, or an error if the signature was not present.
    pub fn release(&self, meta: &DictionaryMeta) -> Result<usize> {
        let mut entries = self.entries.lock();
        let remove = match entries.get_mut(&meta.signature) {
            Some(entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            }
            None => {
                return Err(Error::NotFound(format!(
                    "signature {} not in pool",
                    meta.signature
                )))
            }
        };
        if remove {
            entries.remove(&meta.signature);
            Ok(0)
        } else {
            Ok(entries[&meta.signature].refcount)
        }
    }

    /// Hot-path lookup of already-retained compiled handles, without
    /// touching the refcount. Used by `maybe_compress`/`maybe_decompress`,
    /// which must not pay the pool's retain/release bookkeeping on every
    /// call — only table publication and reclamation do that.
    pub fn get(&self, signature: &str) -> Option<CompiledHandles> {
        self.entries.lock().get(signature).map(|entry| CompiledHandles {
            cdict: Arc::clone(&entry.cdict),
            ddict: Arc::clone(&entry.ddict),
        })
    }

    /// Observational refcount; -1 if the signature is absent.
    pub fn refcount(&self, signature: &str) -> i64 {
        self.entries
            .lock()
            .get(signature)
            .map(|e| e.refcount as i64)
            .unwrap_or(-1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Retain every meta referenced by `spaces`, one retain per meta
    /// instance (even if several instances share a signature — each
    /// represents a distinct table's reference). On the first failure,
    /// every retain already taken in this call is released and the error
    /// is returned, leaving the pool's accounting exactly as it was
    /// before the call — the "roll back the partially built table" rule
    /// applied to pool state specifically.
    pub fn retain_all(&self, spaces: &[NamespaceEntry]) -> Result<()> {
        let mut retained: Vec<&DictionaryMeta> = Vec::new();
        for entry in spaces {
            for meta in &entry.dicts {
                match self.retain(meta) {
                    Ok(_) => retained.push(meta),
                    Err(err) => {
                        for m in retained {
                            let _ = self.release(m);
                        }
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Release every meta referenced by `spaces`; used when reclaiming a
    /// retired table.
    pub fn release_all(&self, spaces: &[NamespaceEntry]) {
        for entry in spaces {
            for meta in &entry.dicts {
                let _ = self.release(meta);
            }
        }
    }
}

impl Default for DictionaryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dict(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let samples: Vec<Vec<u8>> = (0..32)
            .map(|i| format!("feed-item-{i}-payload\n").repeat(8).into_bytes())
            .collect();
        let bytes = codec::train_dictionary(&samples, 8 * 1024).unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    fn meta(path: std::path::PathBuf, signature: &str) -> DictionaryMeta {
        DictionaryMeta {
            id: 1,
            dict_path: path,
            manifest_path: "/tmp/x.mf".into(),
            created_at: 0,
            retired_at: 0,
            level: 3,
            dict_size: 1024,
            prefixes: vec!["default".into()],
            signature: signature.to_string(),
        }
    }

    #[test]
    fn retain_release_refcounts_balance() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dict(&dir, "a.dict");
        let m = meta(path, "sig-a");
        let pool = DictionaryPool::new();

        pool.retain(&m).unwrap();
        pool.retain(&m).unwrap();
        assert_eq!(pool.refcount("sig-a"), 2);

        assert_eq!(pool.release(&m).unwrap(), 1);
        assert_eq!(pool.release(&m).unwrap(), 0);
        assert_eq!(pool.refcount("sig-a"), -1);
        assert!(pool.is_empty());
    }

    #[test]
    fn release_unknown_signature_errors() {
        let pool = DictionaryPool::new();
        let m = meta("/nonexistent".into(), "nope");
        assert!(pool.release(&m).is_err());
    }

    #[test]
    fn concurrent_retain_collapses_to_one_compile() {
        use std::sync::Arc as StdArc;
        let dir = tempfile::tempdir().unwrap();
        let path = write_dict(&dir, "b.dict");
        let m = StdArc::new(meta(path, "sig-b"));
        let pool = StdArc::new(DictionaryPool::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = StdArc::clone(&pool);
                let m = StdArc::clone(&m);
                std::thread::spawn(move || pool.retain(&m).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.refcount("sig-b"), 8);
    }
}
