// ============================================================================
// OPERATION TRACKER - Waits for broadcast operations to reach depth
// ============================================================================
//
// Outcomes:
//   Included with confirmations >= depth  → Ok(TransactionId)     (terminal)
//   Failed / Expired / Rejected by ledger → Err(Rejected)          (terminal)
//   Window elapsed                        → Err(Timeout)           (not terminal)
//
// Terminal outcomes are remembered per operation id, so waiting again on the
// same handle returns the same result without touching the ledger. A
// confirmation only answers waits up to the depth it was observed at; a
// deeper wait polls again. A timeout only stops the wait; the operation can
// still land afterwards.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::ledger::SharedLedger;
use crate::types::{InclusionStatus, OperationHandle, TransactionId};

pub const DEFAULT_CONFIRMATION_DEPTH: u32 = 1;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

const RESOLVED_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, timeout: DEFAULT_CONFIRMATION_TIMEOUT }
    }
}

#[derive(Debug, Clone)]
enum Resolved {
    Confirmed { tx: TransactionId, depth: u32 },
    Failed(LedgerError),
}

impl Resolved {
    fn answers(&self, depth: u32) -> Option<Result<TransactionId, LedgerError>> {
        match self {
            Resolved::Confirmed { tx, depth: reached } if *reached >= depth => Some(Ok(tx.clone())),
            Resolved::Confirmed { .. } => None,
            Resolved::Failed(e) => Some(Err(e.clone())),
        }
    }
}

pub struct OperationTracker {
    ledger: SharedLedger,
    config: TrackerConfig,
    resolved: Mutex<LruCache<String, Resolved>>,
}

impl OperationTracker {
    pub fn new(ledger: SharedLedger, config: TrackerConfig) -> Self {
        let capacity = NonZeroUsize::new(RESOLVED_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self { ledger, config, resolved: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Wait until `handle` has `depth` confirmations (at least 1).
    pub async fn await_confirmation(
        &self,
        handle: &OperationHandle,
        depth: u32,
    ) -> Result<TransactionId, LedgerError> {
        let depth = depth.max(1);
        let cached = self.resolved.lock().get(&handle.operation_id).and_then(|r| r.answers(depth));
        if let Some(outcome) = cached {
            return outcome;
        }

        let outcome = tokio::time::timeout(self.config.timeout, self.poll(handle, depth)).await;
        self.ledger.release(handle);
        match outcome {
            Ok(Ok(tx)) => {
                self.resolved
                    .lock()
                    .put(handle.operation_id.clone(), Resolved::Confirmed { tx: tx.clone(), depth });
                Ok(tx)
            }
            Ok(Err(e)) => {
                self.resolved.lock().put(handle.operation_id.clone(), Resolved::Failed(e.clone()));
                Err(e)
            }
            Err(_) => {
                warn!(
                    "⏳ {} not confirmed after {:?}; it may still be included",
                    handle.operation_id, self.config.timeout
                );
                Err(LedgerError::Timeout {
                    operation_id: handle.operation_id.clone(),
                    waited: self.config.timeout,
                })
            }
        }
    }

    async fn poll(&self, handle: &OperationHandle, depth: u32) -> Result<TransactionId, LedgerError> {
        loop {
            match self.ledger.operation_status(handle).await {
                Ok(InclusionStatus::Included { level, confirmations }) if confirmations >= depth => {
                    info!(
                        "✅ {} confirmed at level {} ({} confirmations)",
                        handle.operation_id, level, confirmations
                    );
                    return Ok(TransactionId(handle.operation_id.clone()));
                }
                Ok(InclusionStatus::Included { confirmations, .. }) => {
                    debug!("{} has {}/{} confirmations", handle.operation_id, confirmations, depth);
                }
                Ok(InclusionStatus::Pending) => {}
                Ok(InclusionStatus::Failed { reason }) => {
                    warn!("❌ {} included but failed: {}", handle.operation_id, reason);
                    return Err(LedgerError::Rejected(reason));
                }
                Ok(InclusionStatus::Expired) => {
                    warn!("❌ {} expired without inclusion", handle.operation_id);
                    return Err(LedgerError::Rejected(format!(
                        "operation {} expired without being included",
                        handle.operation_id
                    )));
                }
                Err(LedgerError::Connection(reason)) => {
                    warn!("Status poll for {} failed, retrying: {}", handle.operation_id, reason);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
