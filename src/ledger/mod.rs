// ============================================================================
// LEDGER - Seam between the gateway and the Tezos contract
// ============================================================================
//
// Backends:
// - rpc.rs:      Tezos node over HTTP JSON RPC (production)
// - sandbox.rs:  In-process simulation of the BMT contract (dev + tests)
//
// Support:
// - contract.rs: Typed BMT views/entrypoints on top of any backend
// - signer.rs:   Credential import + operation signing
// - crypto.rs:   Base58check prefixes and blake2b hashing

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{InclusionStatus, LedgerInfo, OperationHandle};

pub mod contract;
pub mod crypto;
pub mod rpc;
pub mod sandbox;
pub mod signer;

pub use contract::TokenContract;
pub use rpc::{RpcConfig, TezosRpcClient};
pub use sandbox::SandboxLedger;
pub use signer::{TezosSigner, WalletCredentials};

/// Michelson value in the node's JSON encoding.
pub type Micheline = serde_json::Value;

/// Remote ledger holding the token contract.
///
/// One instance is built at startup and shared by every request.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read-only view call. No fee, no side effects.
    async fn read_view(&self, view: &str, arg: Micheline) -> Result<Micheline, LedgerError>;

    /// Build, sign and broadcast an entrypoint call.
    ///
    /// Returns as soon as the node accepts the operation, before inclusion.
    async fn submit_call(&self, entrypoint: &str, arg: Micheline) -> Result<OperationHandle, LedgerError>;

    /// Inclusion and confirmation count of a broadcast operation.
    async fn operation_status(&self, handle: &OperationHandle) -> Result<InclusionStatus, LedgerError>;

    async fn describe(&self) -> Result<LedgerInfo, LedgerError>;

    /// Drop per-operation bookkeeping once nobody is waiting on `handle`,
    /// whether it resolved or the wait timed out. A later `operation_status`
    /// for the same handle must still answer correctly.
    fn release(&self, _handle: &OperationHandle) {}
}

pub type SharedLedger = Arc<dyn LedgerClient>;
