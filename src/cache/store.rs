//! Time-bounded read cache.
//!
//! Entries expire after their TTL and are evicted LRU-first once the
//! configured capacity is reached. Every invalidation bumps the generation
//! of the tags it targets; writes that started under an older generation of
//! their tag are discarded. Other tags keep caching undisturbed.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::{Discriminator, QueryKey, normalize_path};
use super::lock::{rw_read, rw_write};
use crate::domain::endpoint::tags_for_path;
use crate::domain::types::ResourceTag;

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "medtrack_cache_hit_total";
const METRIC_MISS: &str = "medtrack_cache_miss_total";
const METRIC_SKIP: &str = "medtrack_cache_skip_total";
const METRIC_INVALIDATED: &str = "medtrack_cache_invalidated_total";

/// Transport hint about how long a response stays trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessHint {
    /// The server signalled the data will go stale soon.
    Revalidate,
    Fresh,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    /// Normalized transport path the value was read from.
    pub path: String,
    pub value: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub freshness: Option<FreshnessHint>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// What the admission predicate looks at.
#[derive(Debug, Clone, Copy)]
pub struct CacheCandidate<'a> {
    pub path: &'a str,
    pub body_len: usize,
}

/// A value to store, stamped with the generation it was read under.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: QueryKey,
    pub path: String,
    pub value: Value,
    pub freshness: Option<FreshnessHint>,
    pub generation: u64,
}

/// Which generations a removal advances.
enum Scope<'a> {
    Tag(&'a ResourceTag),
    /// Tags the path belongs to, plus the tags of whatever was removed.
    Path(&'a str),
    Everything,
}

#[derive(Debug, Default)]
struct Generations {
    /// Advanced by `clear`; part of every tag's generation.
    epoch: u64,
    per_tag: HashMap<ResourceTag, u64>,
}

impl Generations {
    fn of(&self, tag: &ResourceTag) -> u64 {
        self.epoch + self.per_tag.get(tag).copied().unwrap_or(0)
    }

    fn bump(&mut self, tag: &ResourceTag) {
        *self.per_tag.entry(tag.clone()).or_default() += 1;
    }
}

/// Sole owner of cached entries.
pub struct CacheStore {
    config: CacheConfig,
    entries: RwLock<LruCache<QueryKey, CacheEntry>>,
    generations: RwLock<Generations>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let entries = LruCache::new(config.max_entries_non_zero());
        Self {
            config,
            entries: RwLock::new(entries),
            generations: RwLock::new(Generations::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current invalidation generation of `tag`.
    pub fn generation(&self, tag: &ResourceTag) -> u64 {
        rw_read(&self.generations, SOURCE, "generation").of(tag)
    }

    /// Fetch a live entry; expired entries are evicted and reported absent.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }

        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                counter!(METRIC_HIT).increment(1);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            debug!(cache_key = %key, "cache entry expired");
        }
        counter!(METRIC_MISS).increment(1);
        None
    }

    /// Store a value with the configured TTL.
    ///
    /// Returns false when the write was discarded because an invalidation
    /// happened after the value was read.
    pub fn set(&self, write: CacheWrite) -> bool {
        self.set_with_ttl(write, self.config.ttl())
    }

    pub fn set_with_ttl(&self, write: CacheWrite, ttl: Duration) -> bool {
        if !self.config.enabled {
            return false;
        }

        // Held across the insert so an invalidation cannot interleave.
        let generations = rw_read(&self.generations, SOURCE, "set.generation");
        let current = generations.of(&write.key.tag);
        if current != write.generation {
            debug!(
                cache_key = %write.key,
                read_generation = write.generation,
                current_generation = current,
                "discarding cache write from before invalidation"
            );
            return false;
        }

        let entry = CacheEntry {
            key: write.key.clone(),
            path: normalize_path(&write.path),
            value: write.value,
            stored_at: Instant::now(),
            ttl,
            freshness: write.freshness,
        };
        rw_write(&self.entries, SOURCE, "set").put(write.key, entry);
        true
    }

    /// Remove one key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &QueryKey) -> bool {
        !self
            .remove_where("remove", Scope::Tag(&key.tag), |candidate, _| candidate == key)
            .is_empty()
    }

    /// Remove every path-keyed entry of `tag` at or below `folder`.
    pub fn remove_by_prefix(&self, tag: &ResourceTag, folder: &str) -> Vec<QueryKey> {
        self.remove_where("remove_by_prefix", Scope::Tag(tag), |key, _| {
            key.is_under(tag, folder)
        })
    }

    /// Remove the collection views of `tag`: the "all" key and every filter key.
    pub fn remove_collection_views(&self, tag: &ResourceTag) -> Vec<QueryKey> {
        self.remove_where("remove_collection_views", Scope::Tag(tag), |key, _| {
            &key.tag == tag
                && matches!(key.discriminator, Discriminator::All | Discriminator::Query(_))
        })
    }

    /// Remove every entry read from exactly this transport path.
    pub fn remove_path(&self, path: &str) -> Vec<QueryKey> {
        let normalized = normalize_path(path);
        self.remove_where("remove_path", Scope::Path(&normalized), |_, entry| {
            entry.path == normalized
        })
    }

    pub fn clear(&self) -> Vec<QueryKey> {
        self.remove_where("clear", Scope::Everything, |_, _| true)
    }

    fn remove_where<F>(&self, op: &'static str, scope: Scope<'_>, predicate: F) -> Vec<QueryKey>
    where
        F: Fn(&QueryKey, &CacheEntry) -> bool,
    {
        let mut generations = rw_write(&self.generations, SOURCE, op);

        let mut entries = rw_write(&self.entries, SOURCE, op);
        let doomed: Vec<QueryKey> = entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }

        match scope {
            Scope::Tag(tag) => generations.bump(tag),
            Scope::Path(path) => {
                let tags: BTreeSet<ResourceTag> = tags_for_path(path)
                    .into_iter()
                    .chain(doomed.iter().map(|key| key.tag.clone()))
                    .collect();
                for tag in &tags {
                    generations.bump(tag);
                }
            }
            Scope::Everything => generations.epoch += 1,
        }

        if !doomed.is_empty() {
            counter!(METRIC_INVALIDATED).increment(doomed.len() as u64);
        }
        doomed
    }

    /// Admission predicate: oversized, sensitive and preview responses are
    /// never cached.
    pub fn should_cache(&self, candidate: CacheCandidate<'_>) -> bool {
        let verdict = self.admission(candidate);
        if let Err(reason) = verdict {
            counter!(METRIC_SKIP, "reason" => reason).increment(1);
            debug!(path = candidate.path, reason, "response not cacheable");
        }
        verdict.is_ok()
    }

    fn admission(&self, candidate: CacheCandidate<'_>) -> Result<(), &'static str> {
        if !self.config.enabled {
            return Err("disabled");
        }
        if candidate.body_len > self.config.max_entry_bytes {
            return Err("too_large");
        }

        let normalized = normalize_path(candidate.path).to_ascii_lowercase();
        let segments: Vec<&str> = normalized.split('/').collect();
        let has_segment = |needles: &[String]| {
            segments
                .iter()
                .any(|segment| needles.iter().any(|needle| *segment == needle.as_str()))
        };

        if has_segment(&self.config.sensitive_segments) {
            return Err("sensitive");
        }
        if has_segment(&self.config.preview_segments) {
            return Err("preview");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
