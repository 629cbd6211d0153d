use crate::error::GateError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per dataset. Holding a [`DatasetGuard`] is the proof that
/// no other merge or overwrite touches that dataset's canonical table.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Debug)]
pub struct DatasetGuard {
    dataset_id: String,
    _held: OwnedMutexGuard<()>,
}

impl DatasetGuard {
    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, dataset_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(dataset_id.to_string()).or_default())
    }

    /// Waits up to `timeout` for the dataset; a timeout is a retryable `Conflict`.
    pub async fn acquire(
        &self,
        dataset_id: &str,
        timeout: Duration,
    ) -> Result<DatasetGuard, GateError> {
        let slot = self.slot(dataset_id);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(held) => Ok(DatasetGuard {
                dataset_id: dataset_id.to_string(),
                _held: held,
            }),
            Err(_) => Err(GateError::Conflict(format!(
                "timed out waiting for dataset '{dataset_id}'"
            ))),
        }
    }

    pub fn held_count(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|m| m.try_lock().is_err())
            .count()
    }
}
