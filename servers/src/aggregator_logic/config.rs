use clap::Parser;
use lib_telemetry::core::{Liveness, ScoringPolicy};
use lib_telemetry::tasks::TaskIntervals;
use lib_telemetry::EngineSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "server_aggregator.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "StepMesh telemetry aggregator", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "STEPMESH_PORT", help = "Port to listen on for receivers and dashboards.")]
    pub port: Option<u16>,

    #[clap(long, env = "STEPMESH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STEPMESH_DATA_DIR", help = "Directory holding the persisted history documents.")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, env = "STEPMESH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STEPMESH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STEPMESH_DEVICE_TIMEOUT_SECS", help = "Seconds without a report before a device is archived.")]
    pub device_timeout_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_RECEIVER_TIMEOUT_SECS", help = "Seconds without a batch before a receiver is removed.")]
    pub receiver_timeout_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_SWEEP_INTERVAL_SECS", help = "Interval in seconds of the lifecycle sweep.")]
    pub sweep_interval_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_STATS_INTERVAL_SECS", help = "Interval in seconds of the statistics refresh.")]
    pub stats_interval_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_SNAPSHOT_INTERVAL_SECS", help = "Interval in seconds between system snapshots.")]
    pub snapshot_interval_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_PERSIST_INTERVAL_SECS", help = "Interval in seconds between writes of the persisted state.")]
    pub persist_interval_secs: Option<u64>,

    #[clap(long, env = "STEPMESH_SNAPSHOT_RETENTION", help = "Number of system snapshots kept.")]
    pub snapshot_retention: Option<usize>,

    #[clap(long, env = "STEPMESH_SIGNAL_WEIGHT", help = "Weight of signal strength (dBm) in arbitration.")]
    pub signal_weight: Option<f64>,

    #[clap(long, env = "STEPMESH_AGE_WEIGHT", help = "Weight of reading age (seconds) in arbitration.")]
    pub age_weight: Option<f64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            data_dir: other.data_dir.or(self.data_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            device_timeout_secs: other.device_timeout_secs.or(self.device_timeout_secs),
            receiver_timeout_secs: other.receiver_timeout_secs.or(self.receiver_timeout_secs),
            sweep_interval_secs: other.sweep_interval_secs.or(self.sweep_interval_secs),
            stats_interval_secs: other.stats_interval_secs.or(self.stats_interval_secs),
            snapshot_interval_secs: other.snapshot_interval_secs.or(self.snapshot_interval_secs),
            persist_interval_secs: other.persist_interval_secs.or(self.persist_interval_secs),
            snapshot_retention: other.snapshot_retention.or(self.snapshot_retention),
            signal_weight: other.signal_weight.or(self.signal_weight),
            age_weight: other.age_weight.or(self.age_weight),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(8080),
            data_dir: Some(PathBuf::from("./data")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            device_timeout_secs: Some(300),
            receiver_timeout_secs: Some(120),
            sweep_interval_secs: Some(10),
            stats_interval_secs: Some(5),
            snapshot_interval_secs: Some(300),
            persist_interval_secs: Some(60),
            snapshot_retention: Some(288),
            signal_weight: Some(1.0),
            age_weight: Some(1.0),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("./data"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let device_secs = self.device_timeout_secs.unwrap_or(300);
        let receiver_secs = self.receiver_timeout_secs.unwrap_or(120);
        let liveness = Liveness::new(device_secs, receiver_secs);
        if liveness.receiver_timeout().num_seconds() != i64::try_from(receiver_secs).unwrap_or(i64::MAX) {
            warn!(
                device_timeout_secs = device_secs,
                requested = receiver_secs,
                effective = liveness.receiver_timeout().num_seconds(),
                "receiver timeout must be shorter than the device timeout; lowered"
            );
        }
        let defaults = ScoringPolicy::default();
        EngineSettings {
            liveness,
            scoring: ScoringPolicy {
                signal_weight: self.signal_weight.filter(|w| w.is_finite()).unwrap_or(defaults.signal_weight),
                age_weight: self.age_weight.filter(|w| w.is_finite()).unwrap_or(defaults.age_weight),
            },
            snapshot_retention: self.snapshot_retention.unwrap_or(288).max(1),
        }
    }

    pub fn task_intervals(&self) -> TaskIntervals {
        let defaults = TaskIntervals::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(fallback)
        };
        TaskIntervals {
            sweep: secs(self.sweep_interval_secs, defaults.sweep),
            stats: secs(self.stats_interval_secs, defaults.stats),
            snapshot: secs(self.snapshot_interval_secs, defaults.snapshot),
            persist: secs(self.persist_interval_secs, defaults.persist),
        }
    }
}

/// Outcome of reading the optional config file, reported once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    Loaded(PathBuf),
    NotFound(PathBuf),
    Invalid(PathBuf, String),
}

pub fn load_config() -> (Config, FileSource) {
    // Environment variables and CLI arguments, parsed once.
    let cli = Config::parse();
    layer(cli)
}

/// Defaults, then the JSON config file, then environment/CLI.
pub fn layer(cli: Config) -> (Config, FileSource) {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let (file_config, source) = read_file(&config_file_path);
    let mut current_config = Config::defaults();
    if let Some(file_config) = file_config {
        current_config = current_config.merge(file_config);
    }
    (current_config.merge(cli), source)
}

fn read_file(path: &Path) -> (Option<Config>, FileSource) {
    if !path.exists() {
        return (None, FileSource::NotFound(path.to_path_buf()));
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => (Some(file_config), FileSource::Loaded(path.to_path_buf())),
            Err(e) => (None, FileSource::Invalid(path.to_path_buf(), e.to_string())),
        },
        Err(e) => (None, FileSource::Invalid(path.to_path_buf(), e.to_string())),
    }
}
