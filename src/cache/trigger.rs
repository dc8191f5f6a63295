//! Invalidation service.
//!
//! Turns mutation events into a plan, applies it to the store before the
//! mutation reports success, then publishes events and notifies
//! subscribers of every key the plan covers, cached or not.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::events::{EventKind, EventQueue};
use super::keys::QueryKey;
use super::planner::{InvalidationPlan, MutationEvent};
use super::registry::SubscriptionRegistry;
use super::store::CacheStore;

pub struct Invalidator {
    store: Arc<CacheStore>,
    registry: Arc<SubscriptionRegistry>,
    events: Arc<EventQueue>,
}

impl Invalidator {
    pub fn new(
        store: Arc<CacheStore>,
        registry: Arc<SubscriptionRegistry>,
        events: Arc<EventQueue>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
        }
    }

    /// Apply the invalidations implied by `events`; returns the removed keys.
    pub fn trigger(&self, events: Vec<MutationEvent>) -> Vec<QueryKey> {
        let plan = InvalidationPlan::from_events(events, self.store.config());
        self.apply(&plan)
    }

    /// Path-based entry point used when only a transport path is known.
    pub fn invalidate(&self, path: &str) -> Vec<QueryKey> {
        self.trigger(vec![MutationEvent::PathTouched {
            path: path.to_string(),
        }])
    }

    pub fn apply(&self, plan: &InvalidationPlan) -> Vec<QueryKey> {
        if plan.is_empty() {
            return Vec::new();
        }
        debug!(%plan, "applying invalidation plan");

        let mut removed = BTreeSet::new();
        if plan.clear_all {
            let cleared = self.store.clear();
            info!(removed = cleared.len(), "cache cleared by coarse invalidation");
            self.events.publish(EventKind::Cleared {
                removed: cleared.len(),
            });
            removed.extend(cleared);
        } else {
            for key in &plan.keys {
                if self.store.remove(key) {
                    removed.insert(key.clone());
                }
            }
            for tag in &plan.collection_views {
                removed.extend(self.store.remove_collection_views(tag));
            }
            for (tag, folder) in &plan.folders {
                removed.extend(self.store.remove_by_prefix(tag, folder));
            }
            for path in &plan.paths {
                removed.extend(self.store.remove_path(path));
            }
            for key in &removed {
                self.events
                    .publish(EventKind::Invalidated { key: key.clone() });
            }
        }

        let mut affected = removed.clone();
        affected.extend(self.registry.keys_matching(|key| plan.targets(key)));
        let affected: Vec<QueryKey> = affected.into_iter().collect();
        self.registry.notify(&affected);

        removed.into_iter().collect()
    }

    /// Forward a transport "stale soon" signal to the event channel.
    pub fn stale_soon(&self, path: &str) {
        self.events.publish(EventKind::StaleSoon {
            path: path.to_string(),
        });
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventQueue> {
        &self.events
    }
}
