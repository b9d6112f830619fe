//! BankingMap Token Gateway
//!
//! REST facade over the BMT reward token contract on Tezos.
//!
//! ## Architecture
//!
//! - **Ledger**: `LedgerClient` trait with a Tezos RPC backend and an
//!   in-process sandbox
//! - **Tracker**: polls broadcast operations until they reach the configured depth
//! - **Coordinator**: one mutation at a time per wallet, wallets in parallel
//! - **Server**: Axum handlers under `/tezos`

pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod routes;
pub mod tracker;
pub mod types;

// ============================================================================
// PUBLIC API
// ============================================================================

pub use config::{ConfigError, Environment, GatewayConfig, LedgerBackend};
pub use coordinator::{AmountPolicy, CoordinatorConfig, FixedAmountPolicy, WalletMutationCoordinator};
pub use error::{ApiError, LedgerError, MutationError};
pub use ledger::{LedgerClient, SandboxLedger, SharedLedger, TezosRpcClient, TezosSigner, TokenContract};
pub use routes::{build_router, AppState};
pub use tracker::{OperationTracker, TrackerConfig};
pub use types::{
    Amount, BalanceSnapshot, InclusionStatus, LedgerInfo, MutationKind, MutationRequest, OperationHandle,
    TransactionId, WalletAddress,
};
