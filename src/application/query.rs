//! Cache-through read facade.
//!
//! Every read resolves a [`QueryKey`], serves it from the store when live,
//! and otherwise issues one transport call shared by all concurrent callers
//! of the same key. Failed reads are never cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use medtrack_api_types::PaginatedResponse;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::application::error::AppError;
use crate::application::transport::{Transport, TransportRequest};
use crate::cache::{
    CacheCandidate, CacheStore, CacheWrite, ChangeListener, Discriminator, FreshnessHint,
    Invalidator, QueryKey, SubscriptionId,
};
use crate::domain::types::ResourceTag;

const METRIC_COALESCED: &str = "medtrack_query_coalesced_total";

type Shared = Result<Value, AppError>;
type FlightKey = (QueryKey, u64);
type Waiters = Arc<DashMap<FlightKey, Vec<oneshot::Sender<Shared>>>>;

/// Page request; extra filters are flattened into the query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageQuery {
    pub page: u32,
    #[serde(rename = "limit")]
    pub per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(flatten)]
    pub filters: BTreeMap<String, Value>,
}

impl PageQuery {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page,
            per_page,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct QueryService {
    transport: Arc<dyn Transport>,
    invalidator: Arc<Invalidator>,
    inflight: Waiters,
}

impl QueryService {
    pub fn new(transport: Arc<dyn Transport>, invalidator: Arc<Invalidator>) -> Self {
        Self {
            transport,
            invalidator,
            inflight: Arc::new(DashMap::new()),
        }
    }

    fn store(&self) -> &CacheStore {
        self.invalidator.store()
    }

    pub fn namespace(&self) -> &str {
        &self.store().config().namespace
    }

    pub async fn fetch_all<T: DeserializeOwned>(&self, tag: &ResourceTag) -> Result<T, AppError> {
        let key = QueryKey::all(self.namespace(), tag);
        self.fetch_key(&key).await
    }

    pub async fn fetch_by_id<T: DeserializeOwned>(
        &self,
        tag: &ResourceTag,
        id: &str,
    ) -> Result<T, AppError> {
        if id.trim().is_empty() {
            return Err(AppError::validation(format!("empty id for {tag}")));
        }
        let key = QueryKey::by_id(self.namespace(), tag, id);
        self.fetch_key(&key).await
    }

    /// Filtered listing. The filter must serialize to a JSON object.
    pub async fn fetch_by_query<T, F>(&self, tag: &ResourceTag, filter: &F) -> Result<T, AppError>
    where
        T: DeserializeOwned,
        F: Serialize + ?Sized,
    {
        let key = QueryKey::by_query(self.namespace(), tag, filter)?;
        self.fetch_key(&key).await
    }

    pub async fn fetch_paginated<T: DeserializeOwned>(
        &self,
        tag: &ResourceTag,
        query: &PageQuery,
    ) -> Result<PaginatedResponse<T>, AppError> {
        if query.page == 0 || query.per_page == 0 {
            return Err(AppError::validation("page and per_page start at 1"));
        }
        self.fetch_by_query(tag, query).await
    }

    pub async fn fetch_by_path<T: DeserializeOwned>(
        &self,
        tag: &ResourceTag,
        path: &str,
    ) -> Result<T, AppError> {
        let key = QueryKey::by_path(self.namespace(), tag, path);
        self.fetch_key(&key).await
    }

    /// Drop the cached value for `key` and read it again from the backend.
    pub async fn refresh<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<T, AppError> {
        self.store().remove(key);
        self.fetch_key(key).await
    }

    /// Register `listener` to run whenever `key` is invalidated.
    pub fn subscribe(&self, key: QueryKey, listener: ChangeListener) -> SubscriptionId {
        self.invalidator.registry().subscribe(key, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.invalidator.registry().unsubscribe(id)
    }

    pub async fn fetch_key<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<T, AppError> {
        let value = self.fetch_value(key).await?;
        serde_json::from_value(value).map_err(AppError::from)
    }

    #[instrument(level = "debug", skip(self, key), fields(cache_key = %key))]
    async fn fetch_value(&self, key: &QueryKey) -> Shared {
        if let Some(entry) = self.store().get(key) {
            debug!("served from cache");
            return Ok(entry.value);
        }

        let generation = self.store().generation(&key.tag);
        let flight = (key.clone(), generation);

        let follower = match self.inflight.entry(flight.clone()) {
            Entry::Occupied(mut waiting) => {
                let (tx, rx) = oneshot::channel();
                waiting.get_mut().push(tx);
                Some(rx)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Vec::new());
                None
            }
        };

        if let Some(rx) = follower {
            counter!(METRIC_COALESCED).increment(1);
            debug!("joined in-flight request");
            return rx
                .await
                .unwrap_or_else(|_| Err(AppError::transport(None, "shared request was abandoned")));
        }

        let leader = Flight {
            waiters: Arc::clone(&self.inflight),
            key: Some(flight),
        };
        let outcome = self.load(key, generation).await;
        leader.settle(&outcome);
        outcome
    }

    async fn load(&self, key: &QueryKey, generation: u64) -> Shared {
        let request = request_for(key)?;
        let path = request.path.clone();
        let response = self.transport.send(request).await?;
        let value: Value = response.decode()?;

        let freshness = if response.stale_soon {
            self.invalidator.stale_soon(&path);
            FreshnessHint::Revalidate
        } else {
            FreshnessHint::Fresh
        };

        let candidate = CacheCandidate {
            path: &path,
            body_len: response.body.len(),
        };
        if self.store().should_cache(candidate) {
            self.store().set(CacheWrite {
                key: key.clone(),
                path,
                value: value.clone(),
                freshness: Some(freshness),
                generation,
            });
        }
        Ok(value)
    }
}

/// Leader's claim on an in-flight key. Waiters are answered on settle, or
/// see a closed channel if the leader is dropped first.
struct Flight {
    waiters: Waiters,
    key: Option<FlightKey>,
}

impl Flight {
    fn settle(mut self, outcome: &Shared) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some((_, waiting)) = self.waiters.remove(&key) {
            for tx in waiting {
                let _ = tx.send(outcome.clone());
            }
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.waiters.remove(&key);
        }
    }
}

/// Rebuild the transport request a cache key stands for.
pub fn request_for(key: &QueryKey) -> Result<TransportRequest, AppError> {
    let request = TransportRequest::get(key.transport_path());
    Ok(match &key.discriminator {
        Discriminator::Query(canonical) => {
            let filter: Value = serde_json::from_str(canonical)?;
            request.with_query(query_pairs(&filter)?)
        }
        _ => request,
    })
}

/// Flatten a JSON object into query pairs; arrays repeat the key and nulls
/// are skipped.
fn query_pairs(filter: &Value) -> Result<Vec<(String, String)>, AppError> {
    let Value::Object(map) = filter else {
        return Err(AppError::validation("filters must be a JSON object"));
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (name, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (name.clone(), scalar(item))));
            }
            other => pairs.push((name.clone(), scalar(other))),
        }
    }
    Ok(pairs)
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
