//! Single-flight flags for bulk operations, released when the guard drops.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::domain::types::BulkOperation;

/// Tracks bulk operations that currently have an in-flight instance.
///
/// Each operation kind is flagged independently: an export and a mass-sign
/// may overlap, two exports may not. Clones share the same flags.
#[derive(Default, Clone)]
pub struct OperationFlags {
    running: Arc<DashMap<BulkOperation, ()>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("{} already in progress", .operation.as_str())]
    AlreadyRunning { operation: BulkOperation },
}

impl OperationFlags {
    pub fn new() -> Self {
        Self {
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn acquire(&self, operation: BulkOperation) -> Result<BulkGuard, GuardError> {
        match self.running.entry(operation) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(BulkGuard {
                    operation,
                    running: Arc::clone(&self.running),
                })
            }
            Entry::Occupied(_) => Err(GuardError::AlreadyRunning { operation }),
        }
    }

    /// Like [`acquire`](Self::acquire), for callers that ignore re-entrant calls.
    pub fn try_acquire(&self, operation: BulkOperation) -> Option<BulkGuard> {
        self.acquire(operation).ok()
    }

    pub fn is_running(&self, operation: BulkOperation) -> bool {
        self.running.contains_key(&operation)
    }
}

/// Clears its flag on drop, including when the operation fails or panics.
pub struct BulkGuard {
    operation: BulkOperation,
    running: Arc<DashMap<BulkOperation, ()>>,
}

impl BulkGuard {
    pub fn operation(&self) -> BulkOperation {
        self.operation
    }
}

impl Drop for BulkGuard {
    fn drop(&mut self) {
        self.running.remove(&self.operation);
    }
}
