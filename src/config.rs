use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{bus::DEFAULT_QUEUE_CAPACITY, pegging::ScaleFunction, training::GateRule};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub secure_store: SecureStoreConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub pegging: PeggingConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs/peghub")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

fn default_key_env() -> String {
    "PEGHUB_SECRET_KEY".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./state/peg.sealed")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureStoreConfig {
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default)]
    pub persist_peg: bool,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for SecureStoreConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
            persist_peg: false,
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelLoadPolicy {
    #[default]
    FailFast,
    WaitAndRetry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureSource {
    Field {
        field: String,
        #[serde(default)]
        source_id: Option<String>,
    },
    ObservedAt,
}

impl FeatureSource {
    pub fn field(name: &str) -> Self {
        FeatureSource::Field {
            field: name.to_string(),
            source_id: None,
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./models/linear.json")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_model_backoff_base_ms() -> u64 {
    200
}

fn default_model_backoff_max_ms() -> u64 {
    5_000
}

fn default_load_timeout_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_features() -> Vec<FeatureSource> {
    vec![
        FeatureSource::field("price"),
        FeatureSource::field("volume"),
        FeatureSource::ObservedAt,
        FeatureSource::field("energy_price"),
        FeatureSource::field("commodity_index"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default)]
    pub load_policy: ModelLoadPolicy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_model_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_model_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_features")]
    pub features: Vec<FeatureSource>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            load_policy: ModelLoadPolicy::default(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_model_backoff_base_ms(),
            backoff_max_ms: default_model_backoff_max_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            cooldown_ms: default_cooldown_ms(),
            features: default_features(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FeedConfig {
    HttpPull {
        source_id: String,
        url: String,
        #[serde(default = "default_pull_interval_ms")]
        interval_ms: u64,
    },
    UnixSocketStream {
        source_id: String,
        socket_path: PathBuf,
    },
}

impl FeedConfig {
    pub fn source_id(&self) -> &str {
        match self {
            FeedConfig::HttpPull { source_id, .. } => source_id,
            FeedConfig::UnixSocketStream { source_id, .. } => source_id,
        }
    }
}

fn default_bus_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Per-subscriber queue bound. Readings wait for room, so a stalled
/// predictor backs up into `sensors.queue_capacity` and then the feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_bus_queue_capacity(),
        }
    }
}

fn default_pull_interval_ms() -> u64 {
    5_000
}

fn default_dedup_window_ms() -> u64 {
    250
}

fn default_pull_timeout_ms() -> u64 {
    3_000
}

fn default_reconnect_base_ms() -> u64 {
    250
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_cache_capacity() -> usize {
    256
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

fn default_ingest_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_ingest_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            pull_timeout_ms: default_pull_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_ms: default_cache_ttl_ms(),
            queue_capacity: default_ingest_queue_capacity(),
            feeds: Vec::new(),
        }
    }
}

fn default_initial_peg() -> f64 {
    3_141_590_000_000.0
}

fn default_peg_min() -> f64 {
    0.0
}

fn default_peg_max() -> f64 {
    4_000_000_000_000.0
}

fn default_peg_epsilon() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeggingConfig {
    #[serde(default = "default_initial_peg")]
    pub initial_value: f64,
    #[serde(default = "default_peg_min")]
    pub min: f64,
    #[serde(default = "default_peg_max")]
    pub max: f64,
    #[serde(default = "default_peg_epsilon")]
    pub epsilon: f64,
    #[serde(default)]
    pub scale: ScaleFunction,
}

impl Default for PeggingConfig {
    fn default() -> Self {
        Self {
            initial_value: default_initial_peg(),
            min: default_peg_min(),
            max: default_peg_max(),
            epsilon: default_peg_epsilon(),
            scale: ScaleFunction::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    #[default]
    Any,
    All,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./state/contributions")
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_gate_rules() -> Vec<GateRule> {
    vec![GateRule::above("energy_price", 50.0)]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_enabled_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: GateMode,
    #[serde(default = "default_gate_rules")]
    pub rules: Vec<GateRule>,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub encrypt_payloads: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: GateMode::default(),
            rules: default_gate_rules(),
            store_dir: default_store_dir(),
            store_timeout_ms: default_store_timeout_ms(),
            encrypt_payloads: false,
        }
    }
}

fn default_grace_period_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize peghub config")?;
        config.resolve_paths(config_base);
        config.validate()?;

        Ok(config)
    }

    fn resolve_paths(&mut self, config_base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if !path.is_absolute() {
                *path = config_base.join(&*path);
            }
        };

        resolve(&mut self.secure_store.state_path);
        resolve(&mut self.prediction.model_path);
        resolve(&mut self.training.store_dir);
        for feed in &mut self.sensors.feeds {
            match feed {
                FeedConfig::HttpPull { .. } => {}
                FeedConfig::UnixSocketStream { socket_path, .. } => resolve(socket_path),
            }
        }
    }

    /// Checks the cross-field constraints the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        let pegging = &self.pegging;
        for (name, value) in [
            ("pegging.min", pegging.min),
            ("pegging.max", pegging.max),
            ("pegging.initial_value", pegging.initial_value),
            ("pegging.epsilon", pegging.epsilon),
        ] {
            if !value.is_finite() {
                bail!("{name} must be a finite number");
            }
        }
        if pegging.min > pegging.max {
            bail!(
                "pegging.min ({}) must not exceed pegging.max ({})",
                pegging.min,
                pegging.max
            );
        }
        if pegging.epsilon < 0.0 {
            bail!("pegging.epsilon must not be negative");
        }
        pegging
            .scale
            .validate()
            .map_err(|err| anyhow!("pegging.scale is invalid: {err}"))?;

        if self.bus.queue_capacity == 0 {
            bail!("bus.queue_capacity must be at least 1");
        }
        if self.sensors.queue_capacity == 0 {
            bail!("sensors.queue_capacity must be at least 1");
        }

        if self.prediction.max_attempts == 0 {
            bail!("prediction.max_attempts must be at least 1");
        }
        if self.prediction.features.is_empty() {
            bail!("prediction.features cannot be empty");
        }

        for feed in &self.sensors.feeds {
            if feed.source_id().trim().is_empty() {
                bail!("sensors.feeds[].source_id cannot be empty");
            }
        }

        for rule in &self.training.rules {
            if rule.field.trim().is_empty() {
                bail!("training.rules[].field cannot be empty");
            }
            if !rule.threshold.is_finite() {
                bail!("training.rules[].threshold must be a finite number");
            }
        }

        Ok(())
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("peghub.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or peghub.schema.json next to it"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
