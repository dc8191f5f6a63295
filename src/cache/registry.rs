//! Subscription registry.
//!
//! Tracks key → subscriptions and subscription → key so invalidations can
//! notify interested callers, and dropped subscriptions clean up after
//! themselves.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Callback invoked with the key that changed.
pub type ChangeListener = Arc<dyn Fn(&QueryKey) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    key: QueryKey,
    listener: ChangeListener,
}

pub struct SubscriptionRegistry {
    key_to_subscriptions: RwLock<HashMap<QueryKey, HashSet<SubscriptionId>>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            key_to_subscriptions: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, key: QueryKey, listener: ChangeListener) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut by_key = rw_write(&self.key_to_subscriptions, SOURCE, "subscribe.by_key");
        let mut subscriptions = rw_write(&self.subscriptions, SOURCE, "subscribe.by_id");

        by_key.entry(key.clone()).or_default().insert(id);
        subscriptions.insert(id, Subscription { key, listener });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut by_key = rw_write(&self.key_to_subscriptions, SOURCE, "unsubscribe.by_key");
        let mut subscriptions = rw_write(&self.subscriptions, SOURCE, "unsubscribe.by_id");

        let Some(subscription) = subscriptions.remove(&id) else {
            return false;
        };
        if let Some(ids) = by_key.get_mut(&subscription.key) {
            ids.remove(&id);
            if ids.is_empty() {
                by_key.remove(&subscription.key);
            }
        }
        true
    }

    /// Invoke every listener registered for the given keys.
    ///
    /// Listeners run after the locks are released, so they may subscribe or
    /// read the cache themselves.
    pub fn notify(&self, keys: &[QueryKey]) -> usize {
        let pending: Vec<(QueryKey, ChangeListener)> = {
            let by_key = rw_read(&self.key_to_subscriptions, SOURCE, "notify.by_key");
            let subscriptions = rw_read(&self.subscriptions, SOURCE, "notify.by_id");
            keys.iter()
                .filter_map(|key| by_key.get(key).map(|ids| (key, ids)))
                .flat_map(|(key, ids)| {
                    ids.iter()
                        .filter_map(|id| subscriptions.get(id))
                        .map(|subscription| (key.clone(), Arc::clone(&subscription.listener)))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        for (key, listener) in &pending {
            listener(key);
        }
        pending.len()
    }

    /// Subscribed keys accepted by `predicate`, whether or not they are cached.
    pub fn keys_matching<F>(&self, predicate: F) -> Vec<QueryKey>
    where
        F: Fn(&QueryKey) -> bool,
    {
        rw_read(&self.key_to_subscriptions, SOURCE, "keys_matching")
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        rw_read(&self.subscriptions, SOURCE, "subscription_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_subscriptions, SOURCE, "key_count").len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
