//! Node configuration loading and resolution
//!
//! Every setting resolves with the priority order:
//! 1. Command-line arguments (applied by the binary after resolution)
//! 2. Environment variables (`EFFIN_*`)
//! 3. TOML config file
//! 4. Built-in defaults
//!
//! The result is a single [`NodeConfig`] value built once at startup and passed
//! explicitly to the scheduler, workers and coordinator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "EFFIN_CONFIG";

pub const DEFAULT_BANK_ID: &str = "bank1";
pub const DEFAULT_INDEX_NAME: &str = "effin_global_fraud_index";
pub const DEFAULT_DIMENSION: usize = 32;
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_TRAIN_AFTER: u64 = 500;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.3;
pub const DEFAULT_TPS: f64 = 20.0;
pub const DEFAULT_FRAUD_PROBABILITY: f64 = 0.10;
pub const DEFAULT_HTTP_PORT: u16 = 8001;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_AUDIT_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// TOML bootstrap file
// ============================================================================

/// Raw TOML configuration
///
/// Every field is optional; anything missing falls through to the
/// environment or built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub bank_id: Option<String>,
    pub debug_neighbors: Option<bool>,
    pub index: IndexSection,
    pub pipeline: PipelineSection,
    pub thresholds: ThresholdSection,
    pub source: SourceSection,
    pub audit: AuditSection,
    pub http: HttpSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub name: Option<String>,
    pub key: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub dimension: Option<usize>,
    pub recreate_on_start: Option<bool>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub queue_capacity: Option<usize>,
    pub batch_size: Option<usize>,
    pub train_after: Option<u64>,
    pub top_k: Option<usize>,
    pub workers: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub flush_on_shutdown: Option<bool>,
    pub audit_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSection {
    pub similarity: Option<f64>,
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub tps: Option<f64>,
    pub fraud_probability: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub file: Option<PathBuf>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub port: Option<u16>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default config file location: `<config_dir>/effin/node.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("effin").join("node.toml"))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML file if present
///
/// An explicitly requested file must exist; the platform default path is
/// optional and a missing file only produces a warning.
pub fn load_toml_config_or_default(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        info!("Loading config from {}", path.display());
        return load_toml_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            load_toml_config(&path)
        }
        Some(path) => {
            warn!(
                "No config file at {}, using environment and defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using environment and defaults");
            Ok(TomlConfig::default())
        }
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Remote index settings
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub name: String,
    pub key: String,
    /// `None` selects the in-process index
    pub endpoint: Option<String>,
    pub api_key: String,
    pub dimension: usize,
    pub recreate_on_start: bool,
    pub request_timeout: Duration,
}

/// Queue, batching and training settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub train_after: u64,
    pub top_k: usize,
    pub workers: usize,
    /// Time-based flush of partial batches; `None` flushes only when full
    pub flush_interval: Option<Duration>,
    pub flush_on_shutdown: bool,
    pub audit_timeout: Duration,
}

/// Alert thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum similarity score that triggers an alert
    pub similarity: f64,
    /// Maximum distance that triggers an alert (used only without a score)
    pub distance: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            similarity: DEFAULT_SIMILARITY_THRESHOLD,
            distance: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

/// Synthetic source settings
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub tps: f64,
    pub fraud_probability: f64,
}

/// Audit ledger settings
#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub file: PathBuf,
    /// Base64 AES-256 key; required by the node binary
    pub key: Option<String>,
}

/// Fully resolved node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bank_id: String,
    pub index: IndexSettings,
    pub pipeline: PipelineSettings,
    pub thresholds: Thresholds,
    pub source: SourceSettings,
    pub audit: AuditSettings,
    pub http_port: u16,
    pub debug_neighbors: bool,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        // Resolving an empty TOML with no environment cannot fail.
        Self::resolve(&TomlConfig::default(), |_| None)
            .unwrap_or_else(|_| unreachable!("built-in defaults always parse"))
    }
}

impl NodeConfig {
    /// Read the TOML file (explicit path, `EFFIN_CONFIG`, or default location)
    /// and resolve it against the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = explicit.map(Path::to_path_buf).or(env_path);
        let toml = load_toml_config_or_default(path.as_deref())?;
        Self::resolve(&toml, |name| std::env::var(name).ok())
    }

    /// Resolve settings from a TOML config and an environment lookup
    ///
    /// The lookup is a parameter so tests can supply a fixed environment.
    pub fn resolve<E>(toml: &TomlConfig, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let env = &env;

        let bank_id = pick(env, "EFFIN_BANK_ID", toml.bank_id.clone(), DEFAULT_BANK_ID.to_string(), parse_string)?;

        let index = IndexSettings {
            name: pick(env, "EFFIN_INDEX_NAME", toml.index.name.clone(), DEFAULT_INDEX_NAME.to_string(), parse_string)?,
            key: pick(env, "EFFIN_INDEX_KEY", toml.index.key.clone(), String::new(), parse_string)?,
            endpoint: pick_optional(env, "EFFIN_INDEX_ENDPOINT", toml.index.endpoint.clone())?
                .map(|e| e.trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            api_key: pick(env, "EFFIN_INDEX_API_KEY", toml.index.api_key.clone(), String::new(), parse_string)?,
            dimension: pick(env, "EFFIN_INDEX_DIMENSION", toml.index.dimension, DEFAULT_DIMENSION, parse_from_str)?,
            recreate_on_start: pick(env, "EFFIN_INDEX_RECREATE", toml.index.recreate_on_start, true, parse_bool)?,
            request_timeout: Duration::from_millis(pick(
                env,
                "EFFIN_REQUEST_TIMEOUT_MS",
                toml.index.request_timeout_ms,
                DEFAULT_REQUEST_TIMEOUT_MS,
                parse_from_str,
            )?),
        };

        let flush_interval_ms = pick(env, "EFFIN_FLUSH_INTERVAL_MS", toml.pipeline.flush_interval_ms, 0, parse_from_str)?;
        let pipeline = PipelineSettings {
            queue_capacity: pick(env, "EFFIN_QUEUE_CAPACITY", toml.pipeline.queue_capacity, DEFAULT_QUEUE_CAPACITY, parse_from_str)?,
            batch_size: pick(env, "EFFIN_BATCH_SIZE", toml.pipeline.batch_size, DEFAULT_BATCH_SIZE, parse_from_str)?,
            train_after: pick(env, "EFFIN_TRAIN_AFTER", toml.pipeline.train_after, DEFAULT_TRAIN_AFTER, parse_from_str)?,
            top_k: pick(env, "EFFIN_TOP_K", toml.pipeline.top_k, DEFAULT_TOP_K, parse_from_str)?,
            workers: pick(env, "EFFIN_WORKERS", toml.pipeline.workers, DEFAULT_WORKERS, parse_from_str)?,
            flush_interval: (flush_interval_ms > 0).then(|| Duration::from_millis(flush_interval_ms)),
            flush_on_shutdown: pick(env, "EFFIN_FLUSH_ON_SHUTDOWN", toml.pipeline.flush_on_shutdown, true, parse_bool)?,
            audit_timeout: Duration::from_millis(pick(
                env,
                "EFFIN_AUDIT_TIMEOUT_MS",
                toml.pipeline.audit_timeout_ms,
                DEFAULT_AUDIT_TIMEOUT_MS,
                parse_from_str,
            )?),
        };

        let thresholds = Thresholds {
            similarity: pick(env, "EFFIN_ALERT_SIMILARITY_THRESHOLD", toml.thresholds.similarity, DEFAULT_SIMILARITY_THRESHOLD, parse_from_str)?,
            distance: pick(env, "EFFIN_ALERT_DISTANCE_THRESHOLD", toml.thresholds.distance, DEFAULT_DISTANCE_THRESHOLD, parse_from_str)?,
        };

        let source = SourceSettings {
            tps: pick(env, "EFFIN_TPS", toml.source.tps, DEFAULT_TPS, parse_from_str)?,
            fraud_probability: pick(env, "EFFIN_FRAUD_PROB", toml.source.fraud_probability, DEFAULT_FRAUD_PROBABILITY, parse_from_str)?,
        };

        let default_audit_file = PathBuf::from(format!("audit_{}.jsonl", bank_id));
        let audit = AuditSettings {
            file: pick(env, "EFFIN_AUDIT_FILE", toml.audit.file.clone(), default_audit_file, parse_from_str)?,
            key: pick_optional(env, "EFFIN_AUDIT_KEY", toml.audit.key.clone())?,
        };

        Ok(Self {
            bank_id,
            index,
            pipeline,
            thresholds,
            source,
            audit,
            http_port: pick(env, "EFFIN_HTTP_PORT", toml.http.port, DEFAULT_HTTP_PORT, parse_from_str)?,
            debug_neighbors: pick(env, "EFFIN_DEBUG_NEIGHBORS", toml.debug_neighbors, false, parse_bool)?,
            log_level: toml.logging.level.clone(),
        })
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bank_id.trim().is_empty() {
            return Err(Error::Config("bank_id must not be empty".to_string()));
        }
        if self.index.name.trim().is_empty() {
            return Err(Error::Config("index name must not be empty".to_string()));
        }
        for (name, value) in [
            ("index.dimension", self.index.dimension),
            ("pipeline.queue_capacity", self.pipeline.queue_capacity),
            ("pipeline.batch_size", self.pipeline.batch_size),
            ("pipeline.top_k", self.pipeline.top_k),
            ("pipeline.workers", self.pipeline.workers),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.pipeline.train_after == 0 {
            return Err(Error::Config("pipeline.train_after must be at least 1".to_string()));
        }
        if !self.thresholds.similarity.is_finite() || !self.thresholds.distance.is_finite() {
            return Err(Error::Config("alert thresholds must be finite".to_string()));
        }
        if !(self.source.tps.is_finite() && self.source.tps > 0.0) {
            return Err(Error::Config(format!(
                "source.tps must be positive, got {}",
                self.source.tps
            )));
        }
        if !(0.0..=1.0).contains(&self.source.fraud_probability) {
            return Err(Error::Config(format!(
                "source.fraud_probability must be within [0, 1], got {}",
                self.source.fraud_probability
            )));
        }
        if self.index.request_timeout.is_zero() || self.pipeline.audit_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Resolution helpers
// ============================================================================

type Parser<T> = fn(&str) -> std::result::Result<T, String>;

fn pick<T>(
    env: &dyn Fn(&str) -> Option<String>,
    var: &str,
    toml_value: Option<T>,
    default: T,
    parse: Parser<T>,
) -> Result<T> {
    if let Some(raw) = env(var) {
        return parse(raw.trim())
            .map_err(|e| Error::Config(format!("{}={:?} is invalid: {}", var, raw, e)));
    }
    Ok(toml_value.unwrap_or(default))
}

fn pick_optional(
    env: &dyn Fn(&str) -> Option<String>,
    var: &str,
    toml_value: Option<String>,
) -> Result<Option<String>> {
    Ok(env(var).or(toml_value))
}

fn parse_string(raw: &str) -> std::result::Result<String, String> {
    Ok(raw.to_string())
}

fn parse_from_str<T>(raw: &str) -> std::result::Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}
