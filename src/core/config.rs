//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsError};

/// Full wattshare configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub series: SeriesConfig,
    pub ingest: IngestConfig,
    pub attribution: AttributionConfig,
    pub paths: PathsConfig,
}

/// How dangling sessions from an unclean shutdown are closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Every open link ends at the dangling interval.
    #[default]
    SharedBoundary,
    /// Each open link ends at the interval holding its user's last heartbeat,
    /// falling back to the dangling interval when none was recorded.
    LastSeen,
}

/// Session (users/intervals/links) store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub db_path: PathBuf,
    pub recovery_policy: RecoveryPolicy,
}

/// Backend for the energy time series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeriesBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Time-series store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SeriesConfig {
    pub backend: SeriesBackend,
    pub db_path: PathBuf,
}

/// Which sample producer feeds the ingestion relay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    None,
    Csv,
    Rapl,
    Synthetic,
}

/// What the CSV tailer does with a complete row it cannot parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    #[default]
    Skip,
    Abort,
}

/// Ingestion relay and sample-source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    pub source: SourceKind,
    pub csv_path: Option<PathBuf>,
    pub csv_delimiter: char,
    pub cpu_energy_label: String,
    pub malformed_rows: MalformedRowPolicy,
    pub rapl_path: PathBuf,
    pub poll_interval_ms: u64,
    pub empty_read_backoff_ms: u64,
    pub max_empty_reads: u32,
    pub writer_workers: usize,
    pub channel_capacity: usize,
    pub synthetic_samples: u64,
    pub synthetic_seed: u64,
}

/// Read-path parallelism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AttributionConfig {
    /// Workers fetching one user's intervals.
    pub workers: usize,
    /// Workers computing per-user means for ranking.
    pub rank_workers: usize,
}

/// Filesystem paths used by wattshare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

fn data_dir() -> PathBuf {
    let home_dir = env::var_os("HOME").map_or_else(
        || {
            eprintln!("[WS-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    );
    home_dir.join(".local").join("share").join("wattshare")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("sessions.sqlite3"),
            recovery_policy: RecoveryPolicy::default(),
        }
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            backend: SeriesBackend::default(),
            db_path: data_dir().join("energy.sqlite3"),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            csv_path: None,
            csv_delimiter: ';',
            cpu_energy_label: "CPU Energy".to_string(),
            malformed_rows: MalformedRowPolicy::default(),
            rapl_path: PathBuf::from("/sys/class/powercap/intel-rapl/intel-rapl:0/energy_uj"),
            poll_interval_ms: 5_000,
            empty_read_backoff_ms: 10_000,
            max_empty_reads: 3,
            writer_workers: 5,
            channel_capacity: 10,
            synthetic_samples: 1_200,
            synthetic_seed: 7,
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn empty_read_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_read_backoff_ms)
    }
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            rank_workers: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            config_file: home_dir
                .join(".config")
                .join("wattshare")
                .join("config.toml"),
            jsonl_log: data_dir().join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| WsError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(WsError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for the startup log record.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // session
        if let Some(raw) = lookup("WATTSHARE_SESSION_DB_PATH") {
            self.session.db_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WATTSHARE_SESSION_RECOVERY_POLICY") {
            self.session.recovery_policy = parse_env_enum("WATTSHARE_SESSION_RECOVERY_POLICY", &raw)?;
        }

        // series
        if let Some(raw) = lookup("WATTSHARE_SERIES_BACKEND") {
            self.series.backend = parse_env_enum("WATTSHARE_SERIES_BACKEND", &raw)?;
        }
        if let Some(raw) = lookup("WATTSHARE_SERIES_DB_PATH") {
            self.series.db_path = PathBuf::from(raw);
        }

        // ingest
        if let Some(raw) = lookup("WATTSHARE_INGEST_SOURCE") {
            self.ingest.source = parse_env_enum("WATTSHARE_INGEST_SOURCE", &raw)?;
        }
        if let Some(raw) = lookup("WATTSHARE_INGEST_CSV_PATH") {
            self.ingest.csv_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("WATTSHARE_INGEST_RAPL_PATH") {
            self.ingest.rapl_path = PathBuf::from(raw);
        }
        set_u64(&mut lookup, "WATTSHARE_INGEST_POLL_INTERVAL_MS", &mut self.ingest.poll_interval_ms)?;
        set_u64(
            &mut lookup,
            "WATTSHARE_INGEST_EMPTY_READ_BACKOFF_MS",
            &mut self.ingest.empty_read_backoff_ms,
        )?;
        if let Some(raw) = lookup("WATTSHARE_INGEST_MAX_EMPTY_READS") {
            self.ingest.max_empty_reads = parse_env_num("WATTSHARE_INGEST_MAX_EMPTY_READS", &raw)?;
        }
        set_usize(&mut lookup, "WATTSHARE_INGEST_WRITER_WORKERS", &mut self.ingest.writer_workers)?;
        set_usize(
            &mut lookup,
            "WATTSHARE_INGEST_CHANNEL_CAPACITY",
            &mut self.ingest.channel_capacity,
        )?;

        // attribution
        set_usize(&mut lookup, "WATTSHARE_ATTRIBUTION_WORKERS", &mut self.attribution.workers)?;
        set_usize(
            &mut lookup,
            "WATTSHARE_ATTRIBUTION_RANK_WORKERS",
            &mut self.attribution.rank_workers,
        )?;

        // paths
        if let Some(raw) = lookup("WATTSHARE_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.ingest.cpu_energy_label = self.ingest.cpu_energy_label.trim().to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.attribution.workers == 0 || self.attribution.rank_workers == 0 {
            return Err(WsError::InvalidConfig {
                details: "attribution.workers and attribution.rank_workers must be >= 1"
                    .to_string(),
            });
        }
        if self.ingest.writer_workers == 0 {
            return Err(WsError::InvalidConfig {
                details: "ingest.writer_workers must be >= 1".to_string(),
            });
        }
        if self.ingest.channel_capacity == 0 {
            return Err(WsError::InvalidConfig {
                details: "ingest.channel_capacity must be >= 1".to_string(),
            });
        }
        if !self.ingest.csv_delimiter.is_ascii() {
            return Err(WsError::InvalidConfig {
                details: format!(
                    "ingest.csv_delimiter must be a single ASCII character, got {:?}",
                    self.ingest.csv_delimiter
                ),
            });
        }
        if self.ingest.cpu_energy_label.is_empty() {
            return Err(WsError::InvalidConfig {
                details: "ingest.cpu_energy_label must not be empty".to_string(),
            });
        }
        if self.ingest.source == SourceKind::Csv && self.ingest.csv_path.is_none() {
            return Err(WsError::InvalidConfig {
                details: "ingest.source = \"csv\" requires ingest.csv_path".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env_num(name, &raw)?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env_num(name, &raw)?;
    }
    Ok(())
}

fn parse_env_num<N>(name: &str, raw: &str) -> Result<N>
where
    N: std::str::FromStr,
    N::Err: std::fmt::Display,
{
    raw.trim().parse::<N>().map_err(|error| WsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

/// Parse a snake_case enum value through its serde representation.
fn parse_env_enum<T>(name: &str, raw: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let quoted = serde_json::Value::String(raw.trim().to_ascii_lowercase());
    serde_json::from_value(quoted).map_err(|error| WsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.attribution.workers, 5);
        assert_eq!(cfg.ingest.max_empty_reads, 3);
        assert_eq!(cfg.session.recovery_policy, RecoveryPolicy::SharedBoundary);
    }

    #[test]
    fn toml_sections_parse() {
        let cfg = Config::from_toml_str(
            r#"
            [session]
            recovery_policy = "last_seen"

            [series]
            backend = "memory"

            [ingest]
            source = "csv"
            csv_path = "/var/log/demeter.csv"
            malformed_rows = "abort"
            writer_workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.recovery_policy, RecoveryPolicy::LastSeen);
        assert_eq!(cfg.series.backend, SeriesBackend::Memory);
        assert_eq!(cfg.ingest.source, SourceKind::Csv);
        assert_eq!(cfg.ingest.malformed_rows, MalformedRowPolicy::Abort);
        assert_eq!(cfg.ingest.writer_workers, 2);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.ingest.cpu_energy_label, "CPU Energy");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn csv_source_requires_path() {
        let mut cfg = Config::default();
        cfg.ingest.source = SourceKind::Csv;
        let err = cfg.validate().expect_err("expected missing csv path");
        assert!(err.to_string().contains("csv_path"));
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.attribution.workers = 0;
        assert!(matches!(
            cfg.validate(),
            Err(WsError::InvalidConfig { .. })
        ));

        let mut cfg = Config::default();
        cfg.ingest.channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("WATTSHARE_SESSION_RECOVERY_POLICY", "LAST_SEEN"),
            ("WATTSHARE_SERIES_BACKEND", "memory"),
            ("WATTSHARE_INGEST_SOURCE", "rapl"),
            ("WATTSHARE_INGEST_MAX_EMPTY_READS", "4"),
            ("WATTSHARE_ATTRIBUTION_WORKERS", "8"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        assert_eq!(cfg.session.recovery_policy, RecoveryPolicy::LastSeen);
        assert_eq!(cfg.series.backend, SeriesBackend::Memory);
        assert_eq!(cfg.ingest.source, SourceKind::Rapl);
        assert_eq!(cfg.ingest.max_empty_reads, 4);
        assert_eq!(cfg.attribution.workers, 8);
    }

    #[test]
    fn env_invalid_values_rejected() {
        let env = vars(&[("WATTSHARE_INGEST_WRITER_WORKERS", "many")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("expected parse failure");
        assert_eq!(err.code(), "WS-1003");

        let env = vars(&[("WATTSHARE_SERIES_BACKEND", "influx")]);
        let mut cfg = Config::default();
        assert!(
            cfg.apply_env_overrides_from(|name| env.get(name).cloned())
                .is_err()
        );
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml")))
            .expect_err("expected missing config");
        assert!(matches!(err, WsError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wattshare.toml");
        fs::write(&path, "[attribution]\nworkers = 3\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.attribution.workers, 3);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_deterministic_and_sensitive() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());

        let mut modified = Config::default();
        modified.attribution.workers += 1;
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }
}
