//! Fan-out of child queries over a set of parent records.
//!
//! An [`AggregationJob`] issues one filtered read per distinct parent and
//! tracks each one independently. The merged lookup table only becomes
//! visible once every parent has settled.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use medtrack_api_types::{Accessory, MaintenanceRecord};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::application::error::AppError;
use crate::application::pool::panic_message;
use crate::application::query::QueryService;
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::types::{EntityId, ResourceTag};

const LOCK_TARGET: &str = "application::aggregate";

/// Outcome of one parent's sub-query.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<C> {
    Pending,
    Fulfilled(Vec<C>),
    Failed(AppError),
}

impl<C> Settlement<C> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }
}

/// Maps a child to the parent it claims to belong to, if it says.
pub type Correlate<C> = Arc<dyn Fn(&C) -> Option<EntityId> + Send + Sync>;

/// Which children to fetch for each parent and how to recognise them.
pub struct ChildSpec<C> {
    pub tag: ResourceTag,
    /// Filter field carrying the parent id, e.g. `equipment`.
    pub parent_field: String,
    pub correlate: Correlate<C>,
}

impl<C> Clone for ChildSpec<C> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            parent_field: self.parent_field.clone(),
            correlate: Arc::clone(&self.correlate),
        }
    }
}

impl<C> fmt::Debug for ChildSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("tag", &self.tag)
            .field("parent_field", &self.parent_field)
            .finish_non_exhaustive()
    }
}

impl<C> ChildSpec<C> {
    pub fn new(
        tag: ResourceTag,
        parent_field: impl Into<String>,
        correlate: impl Fn(&C) -> Option<EntityId> + Send + Sync + 'static,
    ) -> Self {
        Self {
            tag,
            parent_field: parent_field.into(),
            correlate: Arc::new(correlate),
        }
    }
}

impl ChildSpec<Accessory> {
    pub fn accessories() -> Self {
        Self::new(ResourceTag::ACCESSORY, "equipment", |accessory: &Accessory| {
            Some(accessory.equipment.clone())
        })
    }
}

impl ChildSpec<MaintenanceRecord> {
    pub fn maintenances() -> Self {
        Self::new(
            ResourceTag::MAINTENANCE,
            "equipment",
            |record: &MaintenanceRecord| Some(record.equipment.clone()),
        )
    }
}

pub struct AggregationJob<C> {
    generation: u64,
    tag: ResourceTag,
    parents: Vec<EntityId>,
    settlements: RwLock<HashMap<EntityId, Settlement<C>>>,
    pending: watch::Sender<usize>,
}

impl<C> fmt::Debug for AggregationJob<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationJob")
            .field("generation", &self.generation)
            .field("tag", &self.tag)
            .field("parents", &self.parents.len())
            .field("pending", &*self.pending.borrow())
            .finish()
    }
}

impl<C: Clone> AggregationJob<C> {
    fn new(generation: u64, tag: ResourceTag, parents: Vec<EntityId>) -> Self {
        let settlements = parents
            .iter()
            .map(|parent| (parent.clone(), Settlement::Pending))
            .collect();
        let (pending, _) = watch::channel(parents.len());
        Self {
            generation,
            tag,
            parents,
            settlements: RwLock::new(settlements),
            pending,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tag(&self) -> &ResourceTag {
        &self.tag
    }

    /// Distinct parents in first-seen order.
    pub fn parents(&self) -> &[EntityId] {
        &self.parents
    }

    pub fn is_loading(&self) -> bool {
        *self.pending.borrow() > 0
    }

    pub fn is_complete(&self) -> bool {
        !self.is_loading()
    }

    /// Resolves once no parent is pending.
    pub async fn wait_complete(&self) {
        let mut receiver = self.pending.subscribe();
        // The sender lives as long as `self`, so this only returns on completion.
        let _ = receiver.wait_for(|pending| *pending == 0).await;
    }

    pub fn settlement(&self, parent: &str) -> Option<Settlement<C>> {
        rw_read(&self.settlements, LOCK_TARGET, "settlement")
            .get(parent)
            .cloned()
    }

    pub fn failures(&self) -> Vec<(EntityId, AppError)> {
        let settlements = rw_read(&self.settlements, LOCK_TARGET, "failures");
        self.parents
            .iter()
            .filter_map(|parent| match settlements.get(parent) {
                Some(Settlement::Failed(err)) => Some((parent.clone(), err.clone())),
                _ => None,
            })
            .collect()
    }

    /// One entry per parent once complete; failed parents map to no children.
    pub fn merged_result(&self) -> Option<HashMap<EntityId, Vec<C>>> {
        if self.is_loading() {
            return None;
        }
        let settlements = rw_read(&self.settlements, LOCK_TARGET, "merged_result");
        let merged = self
            .parents
            .iter()
            .map(|parent| {
                let children = match settlements.get(parent) {
                    Some(Settlement::Fulfilled(children)) => children.clone(),
                    _ => Vec::new(),
                };
                (parent.clone(), children)
            })
            .collect();
        Some(merged)
    }

    /// Children for one parent, empty unless fulfilled.
    pub fn children_of(&self, parent: &str) -> Vec<C> {
        match self.settlement(parent) {
            Some(Settlement::Fulfilled(children)) => children,
            _ => Vec::new(),
        }
    }

    fn settle(&self, parent: &str, outcome: Settlement<C>) {
        let mut settlements = rw_write(&self.settlements, LOCK_TARGET, "settle");
        let Some(slot) = settlements.get_mut(parent) else {
            return;
        };
        if !slot.is_pending() {
            return;
        }
        *slot = outcome;
        drop(settlements);
        self.pending
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Starts aggregation jobs and remembers the most recent one.
pub struct Aggregator<C> {
    queries: QueryService,
    current: RwLock<Option<Arc<AggregationJob<C>>>>,
    generation: AtomicU64,
}

impl<C> Aggregator<C>
where
    C: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(queries: QueryService) -> Self {
        Self {
            queries,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Spawn one sub-query per distinct parent and make the job current.
    ///
    /// Must be called from within a Tokio runtime. A job started earlier keeps
    /// running but is no longer returned by [`Aggregator::current`].
    pub fn aggregate<I>(&self, parents: I, spec: ChildSpec<C>) -> Arc<AggregationJob<C>>
    where
        I: IntoIterator<Item = EntityId>,
    {
        let mut seen = HashSet::new();
        let parents: Vec<EntityId> = parents
            .into_iter()
            .filter(|parent| seen.insert(parent.clone()))
            .collect();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Arc::new(AggregationJob::new(
            generation,
            spec.tag.clone(),
            parents.clone(),
        ));

        let superseded = rw_write(&self.current, LOCK_TARGET, "aggregate")
            .replace(Arc::clone(&job));
        if let Some(previous) = superseded.filter(|previous| previous.is_loading()) {
            debug!(
                superseded = previous.generation(),
                generation, "aggregation superseded"
            );
        }

        for parent in parents {
            let job = Arc::clone(&job);
            let queries = self.queries.clone();
            let spec = spec.clone();
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(fetch_children(&queries, &spec, &parent))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        warn!(tag = %spec.tag, parent = %parent, panic = %message, "child query panicked");
                        Settlement::Failed(AppError::internal(format!(
                            "child query panicked: {message}"
                        )))
                    });
                job.settle(&parent, outcome);
            });
        }

        job
    }

    pub fn current(&self) -> Option<Arc<AggregationJob<C>>> {
        rw_read(&self.current, LOCK_TARGET, "current").clone()
    }
}

async fn fetch_children<C>(
    queries: &QueryService,
    spec: &ChildSpec<C>,
    parent: &str,
) -> Settlement<C>
where
    C: DeserializeOwned,
{
    let mut filter = Map::new();
    filter.insert(spec.parent_field.clone(), Value::String(parent.to_string()));

    match queries
        .fetch_by_query::<Vec<C>, _>(&spec.tag, &Value::Object(filter))
        .await
    {
        Ok(children) => Settlement::Fulfilled(
            children
                .into_iter()
                .filter(|child| (spec.correlate)(child).is_none_or(|owner| owner == parent))
                .collect(),
        ),
        Err(err) => {
            warn!(tag = %spec.tag, parent, error = %err, "child query failed");
            Settlement::Failed(err)
        }
    }
}
