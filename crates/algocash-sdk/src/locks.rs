/// In-process serialization: one async mutex per key, created on demand.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::LedgerResult;
use crate::ledger::{LedgerGateway, Submission, SubmissionId};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the map are idle
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Single-writer lanes, one per signing identity. A lane is held from
/// submission until the ledger has assigned an id.
#[derive(Default)]
pub struct SignerLanes {
    lanes: KeyedLocks,
}

impl SignerLanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(
        &self,
        ledger: &dyn LedgerGateway,
        submission: Submission,
    ) -> LedgerResult<SubmissionId> {
        let _lane = self.lanes.lock(&submission.sender).await;
        ledger.submit(submission).await
    }
}
