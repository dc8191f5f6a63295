//! Client-side read cache.
//!
//! - **Store**: TTL + LRU bounded map from [`QueryKey`] to JSON values
//! - **Invalidation**: mutation events are planned and applied synchronously
//! - **Side channels**: cache events and per-key change subscriptions
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `medtrack.toml`:
//!
//! ```toml
//! [cache]
//! ttl_seconds = 900
//! max_entries = 500
//! coarse_invalidation = true
//! volatile_prefixes = ["form", "location"]
//! ```

mod config;
mod events;
mod keys;
pub(crate) mod lock;
mod planner;
mod registry;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{Discriminator, QueryKey, canonical_json, normalize_path, parent_path};
pub use planner::{InvalidationPlan, MutationEvent};
pub use registry::{ChangeListener, SubscriptionId, SubscriptionRegistry};
pub use store::{CacheCandidate, CacheEntry, CacheStore, CacheWrite, FreshnessHint};
pub use trigger::Invalidator;
