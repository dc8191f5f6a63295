//! Cache configuration.
//!
//! Controls TTL, capacity and the admission/invalidation heuristics via
//! the `[cache]` table of `medtrack.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 15 * 60;
const DEFAULT_MAX_ENTRIES: usize = 500;
const DEFAULT_MAX_ENTRY_BYTES: usize = 200 * 1024;
const DEFAULT_NAMESPACE: &str = "api";
const DEFAULT_SENSITIVE_SEGMENTS: &[&str] = &[
    "auth",
    "user",
    "users",
    "notification",
    "notifications",
    "signature",
    "signatures",
];
const DEFAULT_PREVIEW_SEGMENTS: &[&str] = &["preview"];
const DEFAULT_VOLATILE_PREFIXES: &[&str] = &["form", "location"];

/// Cache configuration from `medtrack.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the read cache at all.
    pub enabled: bool,
    /// Lifetime of an entry in seconds.
    pub ttl_seconds: u64,
    /// Maximum entries kept before LRU eviction.
    pub max_entries: usize,
    /// Responses larger than this are never stored.
    pub max_entry_bytes: usize,
    /// First component of every query key.
    pub namespace: String,
    /// Path segments whose responses must always be fetched fresh.
    pub sensitive_segments: Vec<String>,
    /// Path segments of routes expected to change on every render.
    pub preview_segments: Vec<String>,
    /// Path prefixes whose invalidation clears the whole store.
    pub volatile_prefixes: Vec<String>,
    /// Enable the clear-everything fallback for volatile prefixes.
    pub coarse_invalidation: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            namespace: DEFAULT_NAMESPACE.to_string(),
            sensitive_segments: to_owned(DEFAULT_SENSITIVE_SEGMENTS),
            preview_segments: to_owned(DEFAULT_PREVIEW_SEGMENTS),
            volatile_prefixes: to_owned(DEFAULT_VOLATILE_PREFIXES),
            coarse_invalidation: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_seconds: settings.ttl.as_secs(),
            max_entries: settings.max_entries.get(),
            max_entry_bytes: settings.max_entry_bytes,
            namespace: settings.namespace.clone(),
            sensitive_segments: settings.sensitive_segments.clone(),
            preview_segments: settings.preview_segments.clone(),
            volatile_prefixes: settings.volatile_prefixes.clone(),
            coarse_invalidation: settings.coarse_invalidation,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}
