//! Configuration surface: the keys recognized by the compression substrate,
//! their defaults, and the clamping rules applied when they are loaded from
//! an external admin config file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Dictionary training strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Single-shot trainer call at the configured dictionary size.
    Fast,
    /// Bounded parameter search over candidate dictionary sizes.
    Optimize,
}

impl Default for TrainMode {
    fn default() -> Self {
        TrainMode::Fast
    }
}

impl std::str::FromStr for TrainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(TrainMode::Fast),
            "optimize" => Ok(TrainMode::Optimize),
            other => Err(Error::Invalid(format!("unknown train_mode: {other}"))),
        }
    }
}

/// Fully validated configuration for the compression substrate.
///
/// Every field here corresponds 1:1 to a configuration key named in the
/// external interfaces; defaults match those exactly.
#[derive(Debug, Clone)]
pub struct Config {
    pub enable_comp: bool,
    pub enable_dict: bool,
    pub dict_dir: Option<PathBuf>,
    pub dict_size: usize,
    pub zstd_level: i32,
    pub min_comp_size: usize,
    pub max_comp_size: usize,
    pub enable_training: bool,
    pub retraining_interval: Duration,
    pub min_training_size: usize,
    pub ewma_alpha: f64,
    pub retrain_drop: f64,
    pub train_mode: TrainMode,
    pub gc_cool_period: Duration,
    pub gc_quarantine_period: Duration,
    pub dict_retain_max: usize,
    pub enable_sampling: bool,
    pub sample_p: f64,
    pub sample_window_duration: Duration,
    pub spool_dir: Option<PathBuf>,
    pub spool_max_bytes: u64,
}

const DEFAULT_DICT_SIZE: usize = 256 * 1024;
const DEFAULT_MAX_COMP_SIZE: usize = 100 * 1024;

impl Default for Config {
    fn default() -> Self {
        let dict_size = DEFAULT_DICT_SIZE;
        Self {
            enable_comp: true,
            enable_dict: true,
            dict_dir: None,
            dict_size,
            zstd_level: 3,
            min_comp_size: 32,
            max_comp_size: DEFAULT_MAX_COMP_SIZE,
            enable_training: true,
            retraining_interval: Duration::from_secs(7200),
            min_training_size: derived_min_training_size(dict_size),
            ewma_alpha: 0.05,
            retrain_drop: 0.10,
            train_mode: TrainMode::Fast,
            gc_cool_period: Duration::from_secs(3600),
            gc_quarantine_period: Duration::from_secs(7 * 24 * 3600),
            dict_retain_max: 10,
            enable_sampling: true,
            sample_p: 0.02,
            sample_window_duration: Duration::from_secs(0),
            spool_dir: None,
            spool_max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// `min_training_size` is derived from the target dictionary size when the
/// caller does not set it explicitly: enough raw sample bytes to give the
/// trainer a corpus that comfortably dwarfs the dictionary it is asked to
/// produce.
fn derived_min_training_size(dict_size: usize) -> usize {
    (dict_size * 40).max(1024 * 1024)
}

impl Config {
    /// Build a `Config` from a flat string map, the shape an external admin
    /// config-file parser would hand to this crate. Unknown keys are
    /// ignored; recognized keys are validated and clamped per spec.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Config> {
        let mut cfg = Config::default();
        let mut dict_size_overridden = false;

        macro_rules! get_bool {
            ($key:literal, $field:ident) => {
                if let Some(v) = map.get($key) {
                    cfg.$field = parse_bool(v)?;
                }
            };
        }
        macro_rules! get_usize {
            ($key:literal, $field:ident) => {
                if let Some(v) = map.get($key) {
                    cfg.$field = v
                        .parse::<usize>()
                        .map_err(|_| Error::Invalid(format!("{}: expected integer", $key)))?;
                }
            };
        }
        macro_rules! get_f64 {
            ($key:literal, $field:ident) => {
                if let Some(v) = map.get($key) {
                    cfg.$field = v
                        .parse::<f64>()
                        .map_err(|_| Error::Invalid(format!("{}: expected float", $key)))?;
                }
            };
        }

        get_bool!("enable_comp", enable_comp);
        get_bool!("enable_dict", enable_dict);
        if let Some(v) = map.get("dict_dir") {
            cfg.dict_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = map.get("dict_size") {
            cfg.dict_size = v
                .parse::<usize>()
                .map_err(|_| Error::Invalid("dict_size: expected integer".into()))?;
            dict_size_overridden = true;
        }
        if let Some(v) = map.get("zstd_level") {
            let level: i32 = v
                .parse()
                .map_err(|_| Error::Invalid("zstd_level: expected integer".into()))?;
            cfg.zstd_level = level.clamp(1, 22);
        }
        get_usize!("min_comp_size", min_comp_size);
        if let Some(v) = map.get("max_comp_size") {
            cfg.max_comp_size = v
                .parse()
                .map_err(|_| Error::Invalid("max_comp_size: expected integer".into()))?;
        }
        get_bool!("enable_training", enable_training);
        if let Some(v) = map.get("retraining_interval_s") {
            let secs: u64 = v
                .parse()
                .map_err(|_| Error::Invalid("retraining_interval_s: expected integer".into()))?;
            cfg.retraining_interval = Duration::from_secs(secs);
        }
        get_usize!("min_training_size", min_training_size);
        get_f64!("ewma_alpha", ewma_alpha);
        cfg.ewma_alpha = cfg.ewma_alpha.clamp(0.0, 1.0);
        get_f64!("retrain_drop", retrain_drop);
        cfg.retrain_drop = cfg.retrain_drop.clamp(0.0, 1.0);
        if let Some(v) = map.get("train_mode") {
            cfg.train_mode = v.parse()?;
        }
        if let Some(v) = map.get("gc_cool_period") {
            let secs: u64 = v
                .parse()
                .map_err(|_| Error::Invalid("gc_cool_period: expected integer".into()))?;
            cfg.gc_cool_period = Duration::from_secs(secs);
        }
        if let Some(v) = map.get("gc_quarantine_period") {
            let secs: u64 = v
                .parse()
                .map_err(|_| Error::Invalid("gc_quarantine_period: expected integer".into()))?;
            cfg.gc_quarantine_period = Duration::from_secs(secs);
        }
        if let Some(v) = map.get("dict_retain_max") {
            let v: usize = v
                .parse()
                .map_err(|_| Error::Invalid("dict_retain_max: expected integer".into()))?;
            cfg.dict_retain_max = v.clamp(1, 256);
        }
        get_bool!("enable_sampling", enable_sampling);
        if let Some(v) = map.get("sample_p") {
            let p: f64 = v
                .parse()
                .map_err(|_| Error::Invalid("sample_p: expected float".into()))?;
            if !(p > 0.0 && p <= 1.0) {
                return Err(Error::Invalid("sample_p: must be in (0,1]".into()));
            }
            cfg.sample_p = p;
        }
        if let Some(v) = map.get("sample_window_duration") {
            let secs: u64 = v.parse().map_err(|_| {
                Error::Invalid("sample_window_duration: expected integer".into())
            })?;
            cfg.sample_window_duration = Duration::from_secs(secs);
        }
        if let Some(v) = map.get("spool_dir") {
            cfg.spool_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = map.get("spool_max_bytes") {
            cfg.spool_max_bytes = v
                .parse::<u64>()
                .map_err(|_| Error::Invalid("spool_max_bytes: expected integer".into()))?;
        }

        if dict_size_overridden && !map.contains_key("min_training_size") {
            cfg.min_training_size = derived_min_training_size(cfg.dict_size);
        }

        Ok(cfg)
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Invalid(format!("expected boolean, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert!(cfg.enable_comp);
        assert!(cfg.enable_dict);
        assert_eq!(cfg.dict_size, 256 * 1024);
        assert_eq!(cfg.zstd_level, 3);
        assert_eq!(cfg.min_comp_size, 32);
        assert_eq!(cfg.max_comp_size, 100 * 1024);
        assert!(cfg.enable_training);
        assert_eq!(cfg.retraining_interval, Duration::from_secs(7200));
        assert_eq!(cfg.ewma_alpha, 0.05);
        assert_eq!(cfg.retrain_drop, 0.10);
        assert_eq!(cfg.train_mode, TrainMode::Fast);
        assert_eq!(cfg.gc_cool_period, Duration::from_secs(3600));
        assert_eq!(cfg.gc_quarantine_period, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(cfg.dict_retain_max, 10);
        assert!(cfg.enable_sampling);
        assert_eq!(cfg.sample_p, 0.02);
        assert_eq!(cfg.spool_max_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("zstd_level".to_string(), "99".to_string());
        map.insert("dict_retain_max".to_string(), "0".to_string());
        map.insert("ewma_alpha".to_string(), "4.0".to_string());
        let cfg = Config::from_map(&map).unwrap();
        assert_eq!(cfg.zstd_level, 22);
        assert_eq!(cfg.dict_retain_max, 1);
        assert_eq!(cfg.ewma_alpha, 1.0);
    }

    #[test]
    fn rejects_bad_sample_p() {
        let mut map = HashMap::new();
        map.insert("sample_p".to_string(), "1.5".to_string());
        assert!(Config::from_map(&map).is_err());
    }

    #[test]
    fn unknown_train_mode_is_invalid() {
        let mut map = HashMap::new();
        map.insert("train_mode".to_string(), "bogus".to_string());
        assert!(Config::from_map(&map).is_err());
    }
}
