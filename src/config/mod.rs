// src/config/mod.rs
//! Service configuration loaded from TOML.
//!
//! Load order:
//! 1) read the file (`--config` / `PULSEWIRE_CONFIG`, default `config/pulsewire.toml`)
//! 2) expand `${NAME}` from the environment; `${NAME:-fallback}` uses the
//!    fallback when NAME is unset, a bare unset `${NAME}` is left as-is so
//!    template placeholders like `${title}` survive
//! 3) deserialize and validate
//!
//! A `Config` is immutable once loaded; reload builds a new one.

pub mod zone;
pub use zone::Zone;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::dedupe::KeyStrategy;
use crate::notify::MessageKind;
use crate::scoring::SessionWindow;

pub const DEFAULT_CONFIG_PATH: &str = "config/pulsewire.toml";
pub const ENV_CONFIG_PATH: &str = "PULSEWIRE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub network: NetworkConfig,
    pub redis: RedisConfig,
    #[serde(alias = "dingding")]
    pub dingtalk: DingTalkConfig,
    pub scoring: ScoringConfig,
    pub sources: Vec<SourceConfig>,
    pub topics: Vec<TopicConfig>,
    pub triggers: TriggerConfig,
    pub push: PushConfig,
    pub dedupe: DedupeConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `local`, `UTC` or a fixed offset such as `+08:00`.
    pub timezone: String,
    pub default_poll_interval_seconds: u64,
    /// 0 disables the periodic reload timer.
    pub reload_interval_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: "local".to_string(),
            default_poll_interval_seconds: 0,
            reload_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub default_timeout_ms: u64,
    pub retry: RetryConfig,
}

/// Retry knobs as written in config. Zero / empty means "inherit".
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    pub retry_on_status: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            key_prefix: "pulsewire:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DingTalkConfig {
    /// Empty webhook means "log only".
    pub webhook: String,
    pub secret: String,
    pub msg_type: MessageKind,
    pub title: String,
    pub timeout_ms: u64,
}

impl Default for DingTalkConfig {
    fn default() -> Self {
        Self {
            webhook: String::new(),
            secret: String::new(),
            msg_type: MessageKind::Markdown,
            title: "pulsewire".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub push_threshold: i64,
    pub market_hours: MarketHoursConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketHoursConfig {
    pub enabled: bool,
    pub in_session_bonus: i64,
    pub off_session_penalty: i64,
    /// `HH:MM-HH:MM`, inclusive on both ends.
    pub sessions: Vec<String>,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            in_session_bonus: 0,
            off_session_penalty: 0,
            sessions: vec!["09:30-11:30".to_string(), "13:00-15:00".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Json,
    #[serde(alias = "atom", alias = "feed")]
    Rss,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<SourceKind>,
    pub url: String,
    pub poll_interval_seconds: u64,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    pub base_score: i64,
    pub headers: BTreeMap<String, String>,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    #[default]
    Auto,
    Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub mode: ParserMode,
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Dotted path to the item list, e.g. `data.items`.
    pub list_path: String,
    /// Message field (`title`, `content`, `url`, `id`, `time`) → dotted path in an item.
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub name: String,
    pub weight: i64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub strong: StrongTriggerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrongTriggerConfig {
    pub weight: i64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// <= 0 means unlimited.
    pub max_push_per_minute: i64,
    pub template: TemplateConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub markdown: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupeBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub backend: DedupeBackend,
    /// 0 falls back to 72h.
    pub ttl_hours: u64,
    /// Empty falls back to url → id → source_title → source_title_time.
    pub key_strategy: Vec<KeyStrategy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// e.g. `0.0.0.0:9100`; unset disables the Prometheus listener.
    pub listen: Option<String>,
}

/* ----------------------------
Loading & validation
---------------------------- */

/// Read, expand, parse and validate a config file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_named(&raw, &path.display().to_string())
}

/// Parse and validate config from a TOML string.
pub fn from_toml_str(raw: &str) -> Result<Config, ConfigError> {
    parse_named(raw, "<inline>")
}

fn parse_named(raw: &str, name: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env(raw);
    let cfg: Config = toml::from_str(&expanded).map_err(|source| ConfigError::Parse {
        path: name.to_string(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Replace `${NAME}` / `${NAME:-fallback}` from the environment.
pub fn expand_env(raw: &str) -> String {
    static RE_VAR: OnceCell<Regex> = OnceCell::new();
    let re = RE_VAR.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap()
    });
    re.replace_all(raw, |caps: &regex::Captures<'_>| {
        match (std::env::var(&caps[1]), caps.get(2)) {
            (Ok(v), _) => v,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => caps[0].to_string(),
        }
    })
    .into_owned()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(invalid("no sources configured"));
        }
        if self.runtime.default_poll_interval_seconds == 0 {
            return Err(invalid("runtime.default_poll_interval_seconds must be > 0"));
        }
        if self.network.default_timeout_ms == 0 {
            return Err(invalid("network.default_timeout_ms must be > 0"));
        }
        if self.network.retry.max_attempts == 0 {
            return Err(invalid("network.retry.max_attempts must be > 0"));
        }

        let mut names = HashSet::new();
        for (i, src) in self.sources.iter().enumerate() {
            if src.name.trim().is_empty() {
                return Err(invalid(format!("sources[{i}].name required")));
            }
            if src.kind.is_none() {
                return Err(invalid(format!("sources[{i}].type required")));
            }
            if src.url.trim().is_empty() {
                return Err(invalid(format!("sources[{i}].url required")));
            }
            if !names.insert(src.name.as_str()) {
                return Err(invalid(format!("sources[{i}].name `{}` is duplicated", src.name)));
            }
        }

        self.zone()?;
        self.session_windows()?;
        Ok(())
    }

    /// Zone used for naive timestamps, market hours and rendered times.
    pub fn zone(&self) -> Result<Zone, ConfigError> {
        zone::parse_zone(&self.runtime.timezone).ok_or_else(|| {
            invalid(format!(
                "runtime.timezone `{}` is not `local`, `UTC`, ±HH:MM or an IANA zone name",
                self.runtime.timezone
            ))
        })
    }

    pub fn session_windows(&self) -> Result<Vec<SessionWindow>, ConfigError> {
        self.scoring
            .market_hours
            .sessions
            .iter()
            .map(|s| {
                SessionWindow::parse(s).ok_or_else(|| {
                    invalid(format!("scoring.market_hours.sessions entry `{s}` is not HH:MM-HH:MM"))
                })
            })
            .collect()
    }

    /// Poll interval for a source, falling back to the runtime default.
    pub fn poll_interval_secs(&self, src: &SourceConfig) -> u64 {
        if src.poll_interval_seconds > 0 {
            src.poll_interval_seconds
        } else {
            self.runtime.default_poll_interval_seconds
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
