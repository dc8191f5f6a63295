//! Mass signing of maintenance records.

use std::collections::HashSet;
use std::time::Instant;

use metrics::histogram;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, instrument, warn};

use crate::application::error::AppError;
use crate::application::guard::OperationFlags;
use crate::application::mutation::MutationService;
use crate::application::pool::{BoundedPool, TaskError};
use crate::domain::types::{BulkOperation, EntityId, ResourceTag};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub succeeded: Vec<EntityId>,
    pub failed: Vec<(EntityId, String)>,
}

impl BulkSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SigningService {
    mutations: MutationService,
    flags: OperationFlags,
    pool: BoundedPool,
}

impl SigningService {
    pub fn new(mutations: MutationService, flags: OperationFlags, concurrency: usize) -> Self {
        Self {
            mutations,
            flags,
            pool: BoundedPool::new(concurrency),
        }
    }

    /// Apply `signature` to every maintenance record in `ids`.
    ///
    /// Every record is attempted. With `strict` the first failure is returned
    /// as the error instead of a summary. `Ok(None)` means another mass-sign
    /// was already running.
    #[instrument(skip_all, fields(records = ids.len(), strict = strict))]
    pub async fn sign_maintenances(
        &self,
        ids: &[EntityId],
        signature: &str,
        strict: bool,
    ) -> Result<Option<BulkSummary>, AppError> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Err(AppError::validation("signature must not be empty"));
        }
        let mut seen = HashSet::new();
        let ids: Vec<&EntityId> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        if ids.is_empty() {
            return Err(AppError::validation("no maintenance records to sign"));
        }

        let Some(_guard) = self.flags.try_acquire(BulkOperation::MassSign) else {
            info!("mass signing already running, request ignored");
            return Ok(None);
        };
        let started = Instant::now();
        let signed_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| AppError::internal(format!("clock unavailable: {err}")))?;

        let tag = ResourceTag::MAINTENANCE;
        let tasks = ids.iter().map(|id| {
            let payload = json!({ "signature": signature, "signedAt": signed_at });
            self.mutations.update::<Value>(&tag, id.as_str(), payload)
        });
        let outcomes = self.pool.run(tasks).await;

        let mut summary = BulkSummary::default();
        let mut first_failure = None;
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => summary.succeeded.push(id.clone()),
                Err(TaskError::Failed(err)) => {
                    warn!(id = %id, error = %err, "signing failed");
                    summary.failed.push((id.clone(), err.to_string()));
                    first_failure.get_or_insert(err);
                }
                Err(TaskError::Panicked(message)) => {
                    let err = AppError::internal(format!("signing task panicked: {message}"));
                    summary.failed.push((id.clone(), err.to_string()));
                    first_failure.get_or_insert(err);
                }
            }
        }

        histogram!("medtrack_sign_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "mass signing finished"
        );

        match first_failure {
            Some(err) if strict => Err(err),
            _ => Ok(Some(summary)),
        }
    }
}
