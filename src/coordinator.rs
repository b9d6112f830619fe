// ============================================================================
// WALLET MUTATION COORDINATOR - Serialized credit/debit per wallet
// ============================================================================
//
// Lifecycle of one mutation:
//
//   validate amount ──► wallet lock (FIFO) ──► idempotency replay?
//        │                                          │ no
//        │ (no ledger calls on failure)             ▼
//        │                          [debit pre-check] ──► submit call
//        │                                                   │
//        ▼                                                   ▼
//   ValidationError             await confirmation ──► fresh balance read
//                                                            │
//                                            release lock ◄──┘
//
// Mutations on different wallets run in parallel. Reads are never serialized.
// Nothing here retries a failed mutation; a retry could double-apply on
// chain unless the client sends an idempotency key.
//
// A keyed mutation is recorded as soon as it is broadcast. Repeating the key
// while the outcome is unknown waits on the recorded operation again instead
// of broadcasting a second one. A definite rejection clears the record.

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, MutationError};
use crate::ledger::{SharedLedger, TokenContract};
use crate::tracker::{OperationTracker, DEFAULT_CONFIRMATION_DEPTH};
use crate::types::{
    Amount, BalanceSnapshot, LedgerInfo, MutationKind, MutationRequest, OperationHandle, WalletAddress,
};

pub const DEFAULT_IDEMPOTENCY_CAPACITY: usize = 10_000;

// ============================================================================
// AMOUNT POLICY
// ============================================================================

/// Decides how much `performReward` / `spendTokens` move when the caller
/// does not name an amount.
pub trait AmountPolicy: Send + Sync {
    fn reward_amount(&self, wallet: &WalletAddress) -> Amount;
    fn spend_amount(&self, wallet: &WalletAddress) -> Amount;
}

/// Same reward and spend for every wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAmountPolicy {
    pub reward: Amount,
    pub spend: Amount,
}

impl AmountPolicy for FixedAmountPolicy {
    fn reward_amount(&self, _wallet: &WalletAddress) -> Amount {
        self.reward
    }

    fn spend_amount(&self, _wallet: &WalletAddress) -> Amount {
        self.spend
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub confirmation_depth: u32,
    /// Refuse debits above the current balance without broadcasting.
    pub debit_precheck: bool,
    pub idempotency_capacity: NonZeroUsize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: DEFAULT_CONFIRMATION_DEPTH,
            debit_precheck: true,
            idempotency_capacity: NonZeroUsize::new(DEFAULT_IDEMPOTENCY_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// State recorded under an idempotency key.
#[derive(Debug, Clone)]
enum IdempotencyRecord {
    /// Broadcast, outcome not known yet.
    InFlight { request: MutationRequest, handle: OperationHandle },
    Completed { request: MutationRequest, snapshot: BalanceSnapshot },
}

impl IdempotencyRecord {
    fn request(&self) -> &MutationRequest {
        match self {
            IdempotencyRecord::InFlight { request, .. } | IdempotencyRecord::Completed { request, .. } => request,
        }
    }
}

enum Replay {
    Fresh,
    Completed(BalanceSnapshot),
    Resume(OperationHandle),
}

pub struct WalletMutationCoordinator {
    contract: TokenContract,
    tracker: OperationTracker,
    policy: Arc<dyn AmountPolicy>,
    config: CoordinatorConfig,
    locks: DashMap<WalletAddress, Arc<tokio::sync::Mutex<()>>>,
    idempotency: Mutex<LruCache<String, IdempotencyRecord>>,
}

impl WalletMutationCoordinator {
    pub fn new(
        ledger: SharedLedger,
        tracker: OperationTracker,
        policy: Arc<dyn AmountPolicy>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            contract: TokenContract::new(ledger),
            tracker,
            policy,
            config,
            locks: DashMap::new(),
            idempotency: Mutex::new(LruCache::new(config.idempotency_capacity)),
        }
    }

    // ------------------------------------------------------------------
    // Reads (never serialized)
    // ------------------------------------------------------------------

    pub async fn balance(&self, wallet: &WalletAddress) -> Result<BalanceSnapshot, MutationError> {
        let amount = self.contract.balance_of(wallet).await?;
        Ok(BalanceSnapshot::now(wallet.clone(), amount))
    }

    pub async fn token_supply(&self) -> Result<u64, MutationError> {
        Ok(self.contract.total_supply().await?)
    }

    pub async fn ledger_info(&self) -> Result<LedgerInfo, MutationError> {
        Ok(self.contract.ledger().describe().await?)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn credit(
        self: &Arc<Self>,
        wallet: &WalletAddress,
        amount: i64,
    ) -> Result<BalanceSnapshot, MutationError> {
        let request = MutationRequest::new(wallet.clone(), Amount::new(amount)?, MutationKind::Credit);
        self.execute(request).await
    }

    pub async fn debit(
        self: &Arc<Self>,
        wallet: &WalletAddress,
        amount: i64,
    ) -> Result<BalanceSnapshot, MutationError> {
        let request = MutationRequest::new(wallet.clone(), Amount::new(amount)?, MutationKind::Debit);
        self.execute(request).await
    }

    /// Credit the policy's reward amount.
    pub async fn reward(self: &Arc<Self>, wallet: &WalletAddress) -> Result<BalanceSnapshot, MutationError> {
        self.execute(self.reward_request(wallet)).await
    }

    /// Debit the policy's spend amount.
    pub async fn spend(self: &Arc<Self>, wallet: &WalletAddress) -> Result<BalanceSnapshot, MutationError> {
        self.execute(self.spend_request(wallet)).await
    }

    pub fn reward_request(&self, wallet: &WalletAddress) -> MutationRequest {
        MutationRequest::new(wallet.clone(), self.policy.reward_amount(wallet), MutationKind::Credit)
    }

    pub fn spend_request(&self, wallet: &WalletAddress) -> MutationRequest {
        MutationRequest::new(wallet.clone(), self.policy.spend_amount(wallet), MutationKind::Debit)
    }

    /// Run a mutation under its wallet's lock.
    ///
    /// The work runs on its own task: if the caller goes away mid-flight the
    /// lock is still held until the operation resolves, so the next request
    /// for the wallet cannot overtake a broadcast operation.
    pub async fn execute(self: &Arc<Self>, request: MutationRequest) -> Result<BalanceSnapshot, MutationError> {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.execute_serialized(request).await });
        join_outcome(task.await)
    }

    async fn execute_serialized(&self, request: MutationRequest) -> Result<BalanceSnapshot, MutationError> {
        let lock = self.wallet_lock(&request.wallet);
        let outcome = {
            let _guard = lock.lock().await;
            self.execute_locked(&request).await
        };
        drop(lock);
        self.release_wallet_lock(&request.wallet);

        if let Err(e) = &outcome {
            warn!("❌ {} {} for {} failed: {}", request.kind.as_str(), request.amount, request.wallet, e);
        }
        outcome
    }

    async fn execute_locked(&self, request: &MutationRequest) -> Result<BalanceSnapshot, MutationError> {
        let handle = match self.replay(request)? {
            Replay::Completed(snapshot) => {
                info!("🔁 Replayed {} for {} (idempotent)", request.kind.as_str(), request.wallet);
                return Ok(snapshot);
            }
            Replay::Resume(handle) => {
                info!(
                    "🔁 Resuming {} for {} ({} already broadcast)",
                    request.kind.as_str(),
                    request.wallet,
                    handle.operation_id
                );
                handle
            }
            Replay::Fresh => self.broadcast(request).await?,
        };
        self.confirm(request, &handle).await
    }

    async fn broadcast(&self, request: &MutationRequest) -> Result<OperationHandle, MutationError> {
        if request.kind == MutationKind::Debit && self.config.debit_precheck {
            let available = self.contract.balance_of(&request.wallet).await?;
            if available < request.amount.get() {
                return Err(MutationError::InsufficientBalance {
                    available,
                    requested: request.amount.get(),
                });
            }
        }

        let handle = match request.kind {
            MutationKind::Credit => self.contract.perform_reward(&request.wallet, request.amount).await?,
            MutationKind::Debit => self.contract.spend_tokens(&request.wallet, request.amount).await?,
        };
        debug!(
            "{} {} for {} broadcast as {}",
            request.kind.as_str(),
            request.amount,
            request.wallet,
            handle.operation_id
        );

        if let Some(key) = &request.idempotency_key {
            self.idempotency.lock().put(
                key.clone(),
                IdempotencyRecord::InFlight { request: request.clone(), handle: handle.clone() },
            );
        }
        Ok(handle)
    }

    async fn confirm(
        &self,
        request: &MutationRequest,
        handle: &OperationHandle,
    ) -> Result<BalanceSnapshot, MutationError> {
        let tx = match self
            .tracker
            .await_confirmation(handle, self.config.confirmation_depth)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                // rejected operations never applied, so the key is free again
                if let (LedgerError::Rejected(_), Some(key)) = (&e, &request.idempotency_key) {
                    self.idempotency.lock().pop(key);
                }
                return Err(e.into());
            }
        };

        let amount = self.contract.balance_of(&request.wallet).await.map_err(|e| {
            warn!("{} confirmed but the balance read failed: {}", tx, e);
            e
        })?;
        let snapshot = BalanceSnapshot::now(request.wallet.clone(), amount);
        info!(
            "💰 {} {} BMT for {} confirmed ({}), balance {}",
            request.kind.as_str(),
            request.amount,
            request.wallet,
            tx,
            snapshot.amount
        );

        if let Some(key) = &request.idempotency_key {
            self.idempotency.lock().put(
                key.clone(),
                IdempotencyRecord::Completed { request: request.clone(), snapshot: snapshot.clone() },
            );
        }
        Ok(snapshot)
    }

    /// What a repeated key already did, or an error if the key was used for a
    /// different mutation.
    fn replay(&self, request: &MutationRequest) -> Result<Replay, MutationError> {
        let Some(key) = &request.idempotency_key else {
            return Ok(Replay::Fresh);
        };
        let mut records = self.idempotency.lock();
        match records.get(key) {
            None => Ok(Replay::Fresh),
            Some(record) if !record.request().same_mutation(request) => Err(MutationError::Validation(format!(
                "idempotency key '{}' was already used for a different request",
                key
            ))),
            Some(IdempotencyRecord::Completed { snapshot, .. }) => Ok(Replay::Completed(snapshot.clone())),
            Some(IdempotencyRecord::InFlight { handle, .. }) => Ok(Replay::Resume(handle.clone())),
        }
    }

    // ------------------------------------------------------------------
    // Wallet locks
    // ------------------------------------------------------------------

    fn wallet_lock(&self, wallet: &WalletAddress) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(wallet.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    /// Forget the lock once nobody holds or waits on it.
    fn release_wallet_lock(&self, wallet: &WalletAddress) {
        self.locks.remove_if(wallet, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Wallets with a mutation running or queued.
    pub fn active_wallets(&self) -> usize {
        self.locks.len()
    }
}

/// Result of the spawned mutation task. Panics propagate to the caller; a
/// cancelled task, e.g. at runtime shutdown, becomes `Interrupted`.
fn join_outcome(
    joined: Result<Result<BalanceSnapshot, MutationError>, JoinError>,
) -> Result<BalanceSnapshot, MutationError> {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!("Mutation task stopped before finishing: {}", e);
            Err(MutationError::Interrupted(e.to_string()))
        }
    }
}
