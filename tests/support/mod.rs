//! In-memory backend shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use medtrack::application::error::AppError;
use medtrack::application::mutation::MutationService;
use medtrack::application::query::QueryService;
use medtrack::application::transport::{HttpMethod, Transport, TransportRequest, TransportResponse};
use medtrack::cache::{CacheConfig, CacheStore, EventQueue, Invalidator, SubscriptionRegistry};
use serde_json::Value;

type Responder = dyn Fn(&TransportRequest) -> Result<Value, AppError> + Send + Sync;

/// Answers every request through one closure and records what it saw.
pub struct FakeBackend {
    respond: Box<Responder>,
    latency: Option<Duration>,
    log: Mutex<Vec<(HttpMethod, String, Vec<(String, String)>)>>,
}

impl FakeBackend {
    pub fn new(
        respond: impl Fn(&TransportRequest) -> Result<Value, AppError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            latency: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(
        latency: Duration,
        respond: impl Fn(&TransportRequest) -> Result<Value, AppError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            latency: Some(latency),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.log.lock().expect("log lock").len()
    }

    pub fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .filter(|(seen_method, seen_path, _)| *seen_method == method && seen_path == path)
            .count()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
        self.log.lock().expect("log lock").push((
            request.method,
            request.path.clone(),
            request.query.clone(),
        ));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.respond)(&request).map(|value| TransportResponse::json(&value))
    }
}

/// Value of query parameter `name`, if present.
pub fn query_param<'a>(request: &'a TransportRequest, name: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

pub struct Services {
    pub queries: QueryService,
    pub mutations: MutationService,
    pub invalidator: Arc<Invalidator>,
}

pub fn services(backend: Arc<FakeBackend>, config: CacheConfig) -> Services {
    let invalidator = Arc::new(Invalidator::new(
        Arc::new(CacheStore::new(config)),
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(EventQueue::new()),
    ));
    let transport: Arc<dyn Transport> = backend;
    Services {
        queries: QueryService::new(Arc::clone(&transport), Arc::clone(&invalidator)),
        mutations: MutationService::new(transport, Arc::clone(&invalidator)),
        invalidator,
    }
}
