// ============================================================================
// BOOTSTRAP - Builds the process-wide ledger and coordinator
// ============================================================================

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, GatewayConfig, LedgerBackend};
use crate::coordinator::WalletMutationCoordinator;
use crate::error::LedgerError;
use crate::ledger::sandbox::{DEFAULT_BLOCK_INTERVAL, SANDBOX_CONTRACT};
use crate::ledger::{SandboxLedger, SharedLedger, TezosRpcClient, TezosSigner};
use crate::tracker::OperationTracker;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Connect the configured ledger backend and import the signing key.
pub async fn connect_ledger(config: &GatewayConfig) -> Result<SharedLedger, BootstrapError> {
    match config.backend {
        LedgerBackend::Sandbox => {
            let contract = config
                .node
                .as_ref()
                .map(|node| node.contract.clone())
                .unwrap_or_else(|| SANDBOX_CONTRACT.to_string());
            info!("🧪 Using in-process sandbox ledger ({})", contract);
            Ok(Arc::new(SandboxLedger::new(DEFAULT_BLOCK_INTERVAL).with_contract(contract)))
        }
        LedgerBackend::Rpc => {
            let credentials = config.load_credentials()?;
            let signer = TezosSigner::from_credentials(&credentials)?;
            info!("🔐 Signer {} imported", signer.public_key_hash());

            let client = TezosRpcClient::connect(config.rpc_config()?, signer).await?;

            if let Some(code) = credentials.activation_code() {
                match client.activate_account(code).await {
                    Ok(op) => info!("🎟️  Faucet account activated in {}", op),
                    Err(e) => warn!("Faucet activation skipped: {}", e),
                }
            }
            Ok(Arc::new(client))
        }
    }
}

/// Wire ledger, tracker and coordinator together.
pub fn build_coordinator(config: &GatewayConfig, ledger: SharedLedger) -> Arc<WalletMutationCoordinator> {
    let tracker = OperationTracker::new(ledger.clone(), config.tracker_config());
    Arc::new(WalletMutationCoordinator::new(
        ledger,
        tracker,
        Arc::new(config.amount_policy()),
        config.coordinator_config(),
    ))
}
