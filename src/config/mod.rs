//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CliArgs, Command, ExportArgs, ExportTarget, GetArgs, GlobalOverrides, SignArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "medtrack";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 500;
const DEFAULT_CACHE_MAX_ENTRY_BYTES: usize = 200 * 1024;
const DEFAULT_CACHE_NAMESPACE: &str = "api";
const DEFAULT_EXPORT_CONCURRENCY: usize = 4;
const DEFAULT_SIGN_CONCURRENCY: usize = 3;

/// Fully validated application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
    pub bulk: BulkSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Required by every command that talks to the backend.
    pub base_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub max_entry_bytes: usize,
    pub namespace: String,
    pub sensitive_segments: Vec<String>,
    pub preview_segments: Vec<String>,
    pub volatile_prefixes: Vec<String>,
    pub coarse_invalidation: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BulkSettings {
    pub export_concurrency: NonZeroUsize,
    pub sign_concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("MEDTRACK")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.sensitive_segments")
            .with_list_parse_key("cache.preview_segments")
            .with_list_parse_key("cache.volatile_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);
    match &cli.command {
        Command::Export(args) => raw.apply_export_overrides(args),
        Command::Sign(args) => raw.apply_sign_overrides(args),
        Command::Get(_) => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
    bulk: RawBulkSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(path) = overrides.token_file.as_ref() {
            self.api.token_file = Some(path.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_export_overrides(&mut self, args: &ExportArgs) {
        if let Some(value) = args.concurrency {
            self.bulk.export_concurrency = Some(value);
        }
    }

    fn apply_sign_overrides(&mut self, args: &SignArgs) {
        if let Some(value) = args.concurrency {
            self.bulk.sign_concurrency = Some(value);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            cache,
            logging,
            bulk,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
            logging: build_logging_settings(logging)?,
            bulk: build_bulk_settings(bulk)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let base_url = api.base_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if let Some(url) = base_url.as_deref() {
        url::Url::parse(url)
            .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    }

    let token_file = api.token_file.filter(|path| !path.as_os_str().is_empty());

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        token_file,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = crate::cache::CacheConfig::default();

    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        "cache.max_entries",
    )?;

    let max_entry_bytes = cache
        .max_entry_bytes
        .unwrap_or(DEFAULT_CACHE_MAX_ENTRY_BYTES);

    let namespace = cache
        .namespace
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string());
    if namespace.is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_secs(ttl_secs),
        max_entries,
        max_entry_bytes,
        namespace,
        sensitive_segments: normalize_segments(
            cache.sensitive_segments,
            defaults.sensitive_segments,
        ),
        preview_segments: normalize_segments(cache.preview_segments, defaults.preview_segments),
        volatile_prefixes: normalize_segments(
            cache.volatile_prefixes,
            defaults.volatile_prefixes,
        ),
        coarse_invalidation: cache.coarse_invalidation.unwrap_or(true),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_bulk_settings(bulk: RawBulkSettings) -> Result<BulkSettings, LoadError> {
    Ok(BulkSettings {
        export_concurrency: non_zero_usize(
            bulk.export_concurrency
                .unwrap_or(DEFAULT_EXPORT_CONCURRENCY),
            "bulk.export_concurrency",
        )?,
        sign_concurrency: non_zero_usize(
            bulk.sign_concurrency.unwrap_or(DEFAULT_SIGN_CONCURRENCY),
            "bulk.sign_concurrency",
        )?,
    })
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Lowercase, trim and drop empty entries; `None` keeps the defaults.
fn normalize_segments(values: Option<Vec<String>>, defaults: Vec<String>) -> Vec<String> {
    match values {
        Some(values) => values
            .into_iter()
            .map(|value| value.trim().trim_matches('/').to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .collect(),
        None => defaults,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    token_file: Option<PathBuf>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    max_entries: Option<usize>,
    max_entry_bytes: Option<usize>,
    namespace: Option<String>,
    sensitive_segments: Option<Vec<String>>,
    preview_segments: Option<Vec<String>>,
    volatile_prefixes: Option<Vec<String>>,
    coarse_invalidation: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBulkSettings {
    export_concurrency: Option<usize>,
    sign_concurrency: Option<usize>,
}
