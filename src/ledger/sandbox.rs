// ============================================================================
// SANDBOX LEDGER - In-process BMT contract with simulated blocks
// ============================================================================
//
// Mirrors the deployed contract's rules:
// - performReward: amount > 0, credits up to MAX_ACCOUNT_BALANCE per account,
//   anything above the cap is dropped silently
// - spendTokens:   amount > 0, balance >= amount, burns from balance + supply
// - getBalance:    0 for accounts the contract has never seen
//
// Blocks are derived from tokio time, so tests can pause the clock. An
// operation lands in the block after the one it was submitted in. Contract
// effects are applied at submission, except for operations dropped with
// `drop_next_operation`: those are checked against the rules but never take
// effect, and expire MAX_OPERATION_TTL levels after submission.
//
// Inclusion is derived from the handle's submission level, so only dropped
// operations are remembered, and only `drop_next_operation` adds to them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

use super::contract::{
    decode_address_arg, decode_mutation_arg, ENTRYPOINT_PERFORM_REWARD, ENTRYPOINT_SPEND_TOKENS,
    VIEW_BALANCE, VIEW_TOTAL_SUPPLY,
};
use super::crypto::{self, prefix};
use super::rpc::MAX_OPERATION_TTL;
use super::{LedgerClient, Micheline};
use crate::error::LedgerError;
use crate::types::{InclusionStatus, LedgerInfo, OperationHandle};

/// Supply of a freshly originated contract.
pub const INITIAL_TOTAL_SUPPLY: u64 = 0;

/// Per-account balance ceiling enforced by `performReward`.
pub const MAX_ACCOUNT_BALANCE: u64 = 10_000;

pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_millis(500);

pub const SANDBOX_CONTRACT: &str = "KT1BMTSandboxBMTSandboxBMTSandbox111";
pub const SANDBOX_SIGNER: &str = "tz1BMTSandboxAdministratorBMTSandbox";

#[derive(Debug, Default)]
struct ContractState {
    balances: HashMap<String, u64>,
    total_supply: u64,
}

#[derive(Debug, Clone, Copy)]
struct DroppedOperation {
    submitted_level: i64,
}

pub struct SandboxLedger {
    contract: String,
    genesis: Instant,
    block_interval: Duration,
    state: Mutex<ContractState>,
    dropped: DashMap<String, DroppedOperation>,
    next_operation: AtomicU64,
    queued_failures: Mutex<VecDeque<LedgerError>>,
    drop_next: AtomicBool,
    failing_polls: AtomicU32,
    submissions: AtomicU64,
    status_polls: AtomicU64,
    releases: AtomicU64,
}

impl SandboxLedger {
    pub fn new(block_interval: Duration) -> Self {
        Self {
            contract: SANDBOX_CONTRACT.to_string(),
            genesis: Instant::now(),
            block_interval: block_interval.max(Duration::from_millis(1)),
            state: Mutex::new(ContractState { balances: HashMap::new(), total_supply: INITIAL_TOTAL_SUPPLY }),
            dropped: DashMap::new(),
            next_operation: AtomicU64::new(0),
            queued_failures: Mutex::new(VecDeque::new()),
            drop_next: AtomicBool::new(false),
            failing_polls: AtomicU32::new(0),
            submissions: AtomicU64::new(0),
            status_polls: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = contract.into();
        self
    }

    pub fn head_level(&self) -> i64 {
        (self.genesis.elapsed().as_millis() / self.block_interval.as_millis()) as i64
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// The next `submit_call` fails with `error` before touching state.
    pub fn fail_next_submit(&self, error: LedgerError) {
        self.queued_failures.lock().push_back(error);
    }

    /// The next accepted operation is never included.
    pub fn drop_next_operation(&self) {
        self.drop_next.store(true, Ordering::SeqCst);
    }

    /// The next `count` status polls fail with a connection error.
    pub fn fail_status_polls(&self, count: u32) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    /// Set a balance directly, adjusting total supply to match.
    pub fn seed_balance(&self, address: &str, amount: u64) {
        let mut state = self.state.lock();
        let previous = state.balances.insert(address.to_string(), amount).unwrap_or(0);
        state.total_supply = state.total_supply - previous + amount;
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn status_poll_count(&self) -> u64 {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Operations the sandbox still holds bookkeeping for.
    pub fn tracked_operations(&self) -> usize {
        self.dropped.len()
    }

    // ------------------------------------------------------------------
    // Contract rules
    // ------------------------------------------------------------------

    /// Check `entrypoint` against the contract rules and, when `commit` is
    /// set, apply it.
    fn apply(&self, entrypoint: &str, amount: u64, address: &str, commit: bool) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::Rejected("BMT_NonpositiveAmount".to_string()));
        }
        let mut state = self.state.lock();
        let balance = state.balances.get(address).copied().unwrap_or(0);
        let (balance, supply) = match entrypoint {
            ENTRYPOINT_PERFORM_REWARD => {
                let credited = amount.min(MAX_ACCOUNT_BALANCE.saturating_sub(balance));
                (balance + credited, state.total_supply + credited)
            }
            ENTRYPOINT_SPEND_TOKENS => {
                if balance < amount {
                    return Err(LedgerError::Rejected("BMT_InsufficientBalance".to_string()));
                }
                (balance - amount, state.total_supply - amount)
            }
            other => {
                return Err(LedgerError::Rejected(format!("unknown entrypoint '{}'", other)));
            }
        };
        if commit {
            state.balances.insert(address.to_string(), balance);
            state.total_supply = supply;
        }
        Ok(())
    }

    fn next_operation_hash(&self) -> String {
        let n = self.next_operation.fetch_add(1, Ordering::SeqCst);
        let digest = crypto::blake2b_256(format!("{}:{}", self.contract, n).as_bytes());
        crypto::b58check_encode(prefix::OPERATION, &digest)
    }
}

impl Default for SandboxLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_INTERVAL)
    }
}

#[async_trait]
impl LedgerClient for SandboxLedger {
    async fn read_view(&self, view: &str, arg: Micheline) -> Result<Micheline, LedgerError> {
        let state = self.state.lock();
        let value = match view {
            VIEW_TOTAL_SUPPLY => state.total_supply,
            VIEW_BALANCE => {
                let address = decode_address_arg(&arg)
                    .ok_or_else(|| LedgerError::Rejected(format!("getBalance expects an address, got {}", arg)))?;
                state.balances.get(address).copied().unwrap_or(0)
            }
            other => return Err(LedgerError::Rejected(format!("unknown view '{}'", other))),
        };
        Ok(json!({ "int": value.to_string() }))
    }

    async fn submit_call(&self, entrypoint: &str, arg: Micheline) -> Result<OperationHandle, LedgerError> {
        if let Some(error) = self.queued_failures.lock().pop_front() {
            return Err(error);
        }
        let (amount, address) = decode_mutation_arg(&arg)
            .ok_or_else(|| LedgerError::Rejected(format!("invalid parameter for {}: {}", entrypoint, arg)))?;
        let dropped = self.drop_next.swap(false, Ordering::SeqCst);
        if let Err(e) = self.apply(entrypoint, amount, &address, !dropped) {
            if dropped {
                self.drop_next.store(true, Ordering::SeqCst);
            }
            return Err(e);
        }

        let submitted_level = self.head_level();
        let operation_id = self.next_operation_hash();
        if dropped {
            self.dropped.insert(operation_id.clone(), DroppedOperation { submitted_level });
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        debug!("🧪 Sandbox {} {} for {} -> {}", entrypoint, amount, address, operation_id);

        Ok(OperationHandle { operation_id, submitted_at: Utc::now(), submitted_level })
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<InclusionStatus, LedgerError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Connection("sandbox node unavailable".to_string()));
        }

        let head = self.head_level();
        if let Some(operation) = self.dropped.get(&handle.operation_id).map(|entry| *entry.value()) {
            return Ok(if head > operation.submitted_level + MAX_OPERATION_TTL {
                InclusionStatus::Expired
            } else {
                InclusionStatus::Pending
            });
        }

        let included_level = handle.submitted_level + 1;
        if head < included_level {
            return Ok(InclusionStatus::Pending);
        }
        Ok(InclusionStatus::Included {
            level: included_level,
            confirmations: (head - included_level + 1) as u32,
        })
    }

    async fn describe(&self) -> Result<LedgerInfo, LedgerError> {
        Ok(LedgerInfo {
            backend: "sandbox".to_string(),
            network: "sandbox".to_string(),
            contract: self.contract.clone(),
            signer: SANDBOX_SIGNER.to_string(),
            head_level: self.head_level(),
        })
    }

    fn release(&self, _handle: &OperationHandle) {
        // dropped operations are kept: forgetting one would report it as included
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
