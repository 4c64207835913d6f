//! On-disk layout: `<uuid>.dict` blobs and `<uuid>.mf` sidecar manifests,
//! written with the durable-replace pattern and scanned back at startup
//! and after every successful train.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::dict::meta::DictionaryMeta;
use crate::dict::table::{NamespaceEntry, DEFAULT_NAMESPACE};
use crate::error::{Error, Result};

/// Content-addressable signature used as the dictionary pool's key.
pub fn signature_of(dict_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dict_bytes);
    hex::encode(hasher.finalize())
}

/// Write a temporary sibling, fsync it, rename over the target, and fsync
/// the parent directory — a failed half-write leaves the prior file
/// (if any) intact.
fn durable_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Invalid("manifest path has no parent".into()))?;
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
        uuid::Uuid::new_v4()
    );
    let tmp_path = dir.join(tmp_name);

    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    {
        if let Ok(dir_file) = std::fs::File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }

    Ok(())
}

fn format_time(unix_secs: u64) -> String {
    if unix_secs == 0 {
        return "0".to_string();
    }
    Utc.timestamp_opt(unix_secs as i64, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "0".to_string())
}

fn parse_time(s: &str) -> u64 {
    if s == "0" || s.is_empty() {
        return 0;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0)
}

fn manifest_text(meta: &DictionaryMeta) -> String {
    format!(
        "id={}\ndict_path={}\ncreated_at={}\nretired_at={}\nlevel={}\nprefixes={}\nsignature={}\ndict_size={}\n",
        meta.id,
        meta.dict_path.display(),
        format_time(meta.created_at),
        format_time(meta.retired_at),
        meta.level,
        meta.prefixes.join(","),
        meta.signature,
        meta.dict_size,
    )
}

fn parse_manifest(text: &str, manifest_path: &Path) -> Result<DictionaryMeta> {
    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for line in text.lines() {
        if let Some((k, v)) = line.split_once('=') {
            fields.insert(k, v);
        }
    }
    let get = |k: &str| -> Result<&str> {
        fields
            .get(k)
            .copied()
            .ok_or_else(|| Error::Corrupt(format!("manifest missing field {k}")))
    };

    let id: u16 = get("id")?
        .parse()
        .map_err(|_| Error::Corrupt("bad id field".into()))?;
    let dict_path = PathBuf::from(get("dict_path")?);
    let created_at = parse_time(get("created_at")?);
    let retired_at = parse_time(get("retired_at")?);
    let level: i32 = get("level")?
        .parse()
        .map_err(|_| Error::Corrupt("bad level field".into()))?;
    let prefixes: Vec<String> = get("prefixes")?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let signature = get("signature")?.to_string();
    let dict_size: usize = get("dict_size")?
        .parse()
        .map_err(|_| Error::Corrupt("bad dict_size field".into()))?;

    Ok(DictionaryMeta {
        id,
        dict_path,
        manifest_path: manifest_path.to_path_buf(),
        created_at,
        retired_at,
        level,
        dict_size,
        prefixes,
        signature,
    })
}

/// Persist a freshly trained dictionary blob and its sidecar manifest,
/// using the durable-replace pattern for both files.
pub fn save_dictionary_and_manifest(
    dir: &Path,
    dict_data: &[u8],
    prefixes: &[String],
    level: i32,
    id: u16,
    created_at: u64,
) -> Result<DictionaryMeta> {
    std::fs::create_dir_all(dir)?;
    let uuid = uuid::Uuid::new_v4();
    let dict_path = dir.join(format!("{uuid}.dict"));
    let manifest_path = dir.join(format!("{uuid}.mf"));

    durable_write(&dict_path, dict_data)?;

    let meta = DictionaryMeta {
        id,
        dict_path: dict_path.clone(),
        manifest_path: manifest_path.clone(),
        created_at,
        retired_at: 0,
        level,
        dict_size: dict_data.len(),
        prefixes: prefixes.to_vec(),
        signature: signature_of(dict_data),
    };

    durable_write(&manifest_path, manifest_text(&meta).as_bytes())?;
    Ok(meta)
}

/// Stamp a meta retired by rewriting its manifest with `retired_at = now`.
/// The in-memory meta this crate hands around is immutable once built into
/// a table, so callers pass a freshly cloned meta and the table rebuild
/// picks up the new retirement stamp on the next scan, or — for the
/// in-process bookkeeping used by the GC quarantine check — a sibling copy
/// with the field set is kept alongside the table entry.
pub fn mark_retired_manifest(meta: &DictionaryMeta, now: u64) -> Result<()> {
    let mut retired = meta.clone();
    retired.retired_at = now;
    durable_write(&retired.manifest_path, manifest_text(&retired).as_bytes())
}

/// Scan `dir` for manifests, group by namespace prefix (newest first,
/// truncated to `dict_retain_max`), and drop manifests whose dictionary
/// retired longer ago than `quarantine_secs`.
pub fn scan_dict_dir(
    dir: &Path,
    dict_retain_max: usize,
    quarantine_secs: u64,
    now: u64,
) -> Result<Vec<NamespaceEntry>> {
    let mut by_prefix: BTreeMap<String, Vec<DictionaryMeta>> = BTreeMap::new();

    if !dir.exists() {
        return Ok(Vec::new());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mf") {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        let meta = match parse_manifest(&text, &path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.retired_at != 0 && now.saturating_sub(meta.retired_at) > quarantine_secs {
            continue;
        }
        let prefixes = if meta.prefixes.is_empty() {
            vec![DEFAULT_NAMESPACE.to_string()]
        } else {
            meta.prefixes.clone()
        };
        for prefix in prefixes {
            by_prefix.entry(prefix).or_default().push(meta.clone());
        }
    }

    let mut spaces = Vec::new();
    for (prefix, mut metas) in by_prefix {
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        metas.truncate(dict_retain_max);
        spaces.push(NamespaceEntry {
            prefix,
            dicts: metas.into_iter().map(std::sync::Arc::new).collect(),
        });
    }
    Ok(spaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_scan_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"trained-dictionary-blob".to_vec();
        let meta = save_dictionary_and_manifest(
            dir.path(),
            &data,
            &["default".to_string()],
            3,
            1,
            1_700_000_000,
        )
        .unwrap();
        assert!(meta.dict_path.exists());
        assert!(meta.manifest_path.exists());

        let spaces = scan_dict_dir(dir.path(), 10, 7 * 24 * 3600, 1_700_000_100).unwrap();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].prefix, "default");
        assert_eq!(spaces[0].dicts[0].id, 1);
        assert_eq!(spaces[0].dicts[0].signature, signature_of(&data));
    }

    #[test]
    fn retired_past_quarantine_is_skipped_on_scan() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"old-dict".to_vec();
        let meta =
            save_dictionary_and_manifest(dir.path(), &data, &["default".into()], 3, 5, 0).unwrap();
        mark_retired_manifest(&meta, 1000).unwrap();

        let spaces = scan_dict_dir(dir.path(), 10, 500, 10_000).unwrap();
        assert!(spaces.is_empty());
    }

    #[test]
    fn retain_max_truncates_oldest() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5u16 {
            save_dictionary_and_manifest(
                dir.path(),
                format!("dict-{i}").as_bytes(),
                &["default".into()],
                3,
                i + 1,
                1000 + i as u64,
            )
            .unwrap();
        }
        let spaces = scan_dict_dir(dir.path(), 3, 7 * 24 * 3600, 2000).unwrap();
        assert_eq!(spaces[0].dicts.len(), 3);
        // newest first
        assert_eq!(spaces[0].dicts[0].id, 5);
    }
}
