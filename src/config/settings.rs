//! TOML-based configuration for the engine.
//!
//! Supports a config file (`schemata.toml`) with environment variable
//! expansion in the provider connection string.
//!
//! Example configuration:
//! ```toml
//! [provider]
//! driver = "mysql"
//! connection_string = "${SHOP_DB_URL}"
//! worker_path = "./schemata-worker"
//! request_timeout_ms = 5000
//!
//! [cache]
//! capacity = 10000
//! metadata_ttl_seconds = 300
//! mapping_ttl_seconds = 3600
//! query_result_ttl_seconds = 60
//! warm_keys = ["table:shop.sales"]
//!
//! [mapper]
//! confidence_threshold = 0.85
//! min_feedback_count = 5
//!
//! [resilience.retry]
//! max_attempts = 3
//!
//! [resilience.breaker]
//! failure_threshold = 5
//! cooldown_ms = 30000
//!
//! [detector]
//! poll_interval_seconds = 300
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl SettingsError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub mapper: MapperSettings,
    pub query: QuerySettings,
    pub resilience: ResilienceSettings,
    pub detector: DetectorSettings,
    pub store: StoreSettings,
}

/// Remote provider connection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Logical endpoint name; defaults to `worker:<driver>`.
    pub endpoint: Option<String>,
    pub driver: String,
    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,
    pub worker_path: Option<String>,
    /// Per-call network timeout.
    pub request_timeout_ms: u64,
    /// Default end-to-end timeout for `resolve`/`build` when the caller gives none.
    pub operation_timeout_ms: u64,
    /// Databases to discover and monitor. Empty means all visible ones.
    pub databases: Vec<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            driver: "mysql".to_string(),
            connection_string: String::new(),
            worker_path: None,
            request_timeout_ms: 5_000,
            operation_timeout_ms: 30_000,
            databases: Vec::new(),
        }
    }
}

impl ProviderSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Schema cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of entries before eviction.
    pub capacity: usize,
    /// TTL for database/table/column/index metadata and listings.
    pub metadata_ttl_seconds: u64,
    /// TTL for resolved business-term mappings.
    pub mapping_ttl_seconds: u64,
    /// TTL for cached generated queries and query results.
    pub query_result_ttl_seconds: u64,
    /// Half-life of the access-frequency score used for eviction.
    pub recency_half_life_seconds: u64,
    /// Keys repopulated at startup and after invalidation.
    pub warm_keys: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            metadata_ttl_seconds: 300,
            mapping_ttl_seconds: 3_600,
            query_result_ttl_seconds: 60,
            recency_half_life_seconds: 600,
            warm_keys: Vec::new(),
        }
    }
}

/// Semantic mapper settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MapperSettings {
    /// A single strategy reaching this confidence short-circuits the pipeline.
    pub confidence_threshold: f64,
    /// Below this no mapping is usable and the build asks for disambiguation.
    pub min_confidence: f64,
    /// Candidates within this delta of the top one are treated as ambiguous.
    pub ambiguity_delta: f64,
    /// Fuzzy matches below this similarity are discarded.
    pub fuzzy_floor: f64,
    /// Multiplier applied to vector scores outside the caller's context.
    pub context_discount: f64,
    /// Maximum confidence change per feedback event.
    pub feedback_step: f64,
    /// Feedback events required before learned evidence may dominate.
    pub min_feedback_count: u32,
    /// Half-life of feedback weight.
    pub feedback_half_life_days: f64,
    pub max_candidates: usize,
    pub ai: AiSettings,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            min_confidence: 0.5,
            ambiguity_delta: 0.05,
            fuzzy_floor: 0.6,
            context_discount: 0.8,
            feedback_step: 0.1,
            min_feedback_count: 5,
            feedback_half_life_days: 30.0,
            max_candidates: 10,
            ai: AiSettings::default(),
        }
    }
}

/// AI-assisted matching.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub timeout_ms: u64,
    /// Candidate elements sent along with the term.
    pub max_candidates: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 2_000,
            max_candidates: 25,
        }
    }
}

/// Query builder settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    /// `mysql` or `ansi`.
    pub dialect: String,
    pub max_alternatives: usize,
    /// Row estimate above which an unindexed filter makes a query high cost.
    pub large_table_rows: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            dialect: "mysql".to_string(),
            max_alternatives: 4,
            large_table_rows: 1_000_000,
        }
    }
}

/// Resilience layer settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of the backoff added as random jitter (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub window_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of connections checked out at once.
    pub max_open_conns: usize,
    /// Maximum number of idle connections kept for reuse.
    pub max_idle_conns: usize,
    pub health_check_interval_seconds: u64,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            max_idle_conns: 5,
            health_check_interval_seconds: 30,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Schema change detector settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub history_capacity: usize,
    /// Changes older than this are dropped from history.
    pub history_retention_hours: u64,
    pub listener_timeout_ms: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 300,
            history_capacity: 1_000,
            history_retention_hours: 24 * 7,
            listener_timeout_ms: 5_000,
        }
    }
}

/// Snapshot and feedback store settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Keep the store in memory only.
    pub in_memory: bool,
    /// Store file; defaults to `~/.schemata/store.db`.
    pub path: Option<String>,
}

fn check_unit(field: &str, value: f64) -> Result<(), SettingsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::invalid(field, format!("must be within [0, 1], got {}", value)))
    }
}

fn check_positive(field: &str, value: u64) -> Result<(), SettingsError> {
    if value > 0 {
        Ok(())
    } else {
        Err(SettingsError::invalid(field, "must be greater than zero"))
    }
}

impl EngineSettings {
    /// Load settings from a TOML file and validate them.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: EngineSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SCHEMATA_CONFIG`
    /// 2. `./schemata.toml`
    /// 3. `~/.config/schemata/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SCHEMATA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("schemata.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("schemata").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(EngineSettings::default())
    }

    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_positive("provider.request_timeout_ms", self.provider.request_timeout_ms)?;
        check_positive("provider.operation_timeout_ms", self.provider.operation_timeout_ms)?;

        let cache = &self.cache;
        if cache.capacity == 0 {
            return Err(SettingsError::invalid("cache.capacity", "must be at least 1"));
        }
        check_positive("cache.metadata_ttl_seconds", cache.metadata_ttl_seconds)?;
        check_positive("cache.mapping_ttl_seconds", cache.mapping_ttl_seconds)?;
        check_positive("cache.query_result_ttl_seconds", cache.query_result_ttl_seconds)?;
        check_positive("cache.recency_half_life_seconds", cache.recency_half_life_seconds)?;

        let mapper = &self.mapper;
        check_unit("mapper.confidence_threshold", mapper.confidence_threshold)?;
        check_unit("mapper.min_confidence", mapper.min_confidence)?;
        check_unit("mapper.fuzzy_floor", mapper.fuzzy_floor)?;
        check_unit("mapper.context_discount", mapper.context_discount)?;
        if mapper.min_confidence > mapper.confidence_threshold {
            return Err(SettingsError::invalid(
                "mapper.min_confidence",
                format!(
                    "must not exceed confidence_threshold ({})",
                    mapper.confidence_threshold
                ),
            ));
        }
        if !(0.0..=0.5).contains(&mapper.ambiguity_delta) {
            return Err(SettingsError::invalid("mapper.ambiguity_delta", "must be within [0, 0.5]"));
        }
        if !(mapper.feedback_step > 0.0 && mapper.feedback_step <= 0.5) {
            return Err(SettingsError::invalid("mapper.feedback_step", "must be within (0, 0.5]"));
        }
        if mapper.min_feedback_count == 0 {
            return Err(SettingsError::invalid("mapper.min_feedback_count", "must be at least 1"));
        }
        if mapper.feedback_half_life_days.is_nan() || mapper.feedback_half_life_days <= 0.0 {
            return Err(SettingsError::invalid("mapper.feedback_half_life_days", "must be greater than zero"));
        }
        if mapper.max_candidates == 0 {
            return Err(SettingsError::invalid("mapper.max_candidates", "must be at least 1"));
        }
        if mapper.ai.enabled {
            check_positive("mapper.ai.timeout_ms", mapper.ai.timeout_ms)?;
        }

        if !matches!(self.query.dialect.as_str(), "mysql" | "ansi") {
            return Err(SettingsError::invalid(
                "query.dialect",
                format!("unsupported dialect '{}'", self.query.dialect),
            ));
        }

        let retry = &self.resilience.retry;
        if !(1..=10).contains(&retry.max_attempts) {
            return Err(SettingsError::invalid("resilience.retry.max_attempts", "must be within [1, 10]"));
        }
        check_positive("resilience.retry.initial_backoff_ms", retry.initial_backoff_ms)?;
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(SettingsError::invalid(
                "resilience.retry.max_backoff_ms",
                "must be at least initial_backoff_ms",
            ));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(SettingsError::invalid("resilience.retry.multiplier", "must be at least 1.0"));
        }
        check_unit("resilience.retry.jitter", retry.jitter)?;

        let breaker = &self.resilience.breaker;
        if breaker.failure_threshold == 0 {
            return Err(SettingsError::invalid("resilience.breaker.failure_threshold", "must be at least 1"));
        }
        check_positive("resilience.breaker.window_ms", breaker.window_ms)?;
        check_positive("resilience.breaker.cooldown_ms", breaker.cooldown_ms)?;

        let pool = &self.resilience.pool;
        if pool.max_open_conns == 0 {
            return Err(SettingsError::invalid("resilience.pool.max_open_conns", "must be at least 1"));
        }
        if pool.max_idle_conns > pool.max_open_conns {
            return Err(SettingsError::invalid(
                "resilience.pool.max_idle_conns",
                "must not exceed max_open_conns",
            ));
        }
        check_positive(
            "resilience.pool.health_check_interval_seconds",
            pool.health_check_interval_seconds,
        )?;
        check_positive("resilience.pool.acquire_timeout_ms", pool.acquire_timeout_ms)?;

        let detector = &self.detector;
        check_positive("detector.poll_interval_seconds", detector.poll_interval_seconds)?;
        if detector.history_capacity == 0 {
            return Err(SettingsError::invalid("detector.history_capacity", "must be at least 1"));
        }
        check_positive("detector.history_retention_hours", detector.history_retention_hours)?;
        check_positive("detector.listener_timeout_ms", detector.listener_timeout_ms)?;

        Ok(())
    }

    /// Path of the persistent store, if not in memory.
    pub fn store_path(&self) -> Option<PathBuf> {
        if self.store.in_memory {
            return None;
        }
        if let Some(path) = &self.store.path {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".schemata").join("store.db"))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
