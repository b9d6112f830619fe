// ============================================================================
// GATEWAY TYPES - Wallets, amounts, operations, snapshots
// ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MutationError;

/// Account prefixes the contract accepts as wallet addresses.
const ADDRESS_PREFIXES: [&str; 5] = ["tz1", "tz2", "tz3", "tz4", "KT1"];

/// Length of a base58check-encoded Tezos address.
pub const ADDRESS_LENGTH: usize = 36;

// ============================================================================
// WALLET ADDRESS
// ============================================================================

/// On-chain account identifier. Also the key mutations are serialized on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Shape check only. Checksum errors come back from the node as rejections.
    pub fn parse(raw: &str) -> Result<Self, MutationError> {
        if raw.is_empty() {
            return Err(MutationError::Validation("walletAddress is required".to_string()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(MutationError::Validation(format!(
                "walletAddress '{}' contains whitespace",
                raw.trim()
            )));
        }
        if !ADDRESS_PREFIXES.iter().any(|prefix| raw.starts_with(prefix)) {
            return Err(MutationError::Validation(format!(
                "walletAddress '{}' is not a tz1/tz2/tz3/tz4/KT1 address",
                raw
            )));
        }
        if raw.len() != ADDRESS_LENGTH {
            return Err(MutationError::Validation(format!(
                "walletAddress '{}' must be {} characters, got {}",
                raw,
                ADDRESS_LENGTH,
                raw.len()
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// AMOUNT
// ============================================================================

/// Positive token quantity in the smallest denomination (BMT has 0 decimals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub fn new(raw: i64) -> Result<Self, MutationError> {
        if raw <= 0 {
            return Err(MutationError::Validation(format!(
                "amount must be greater than 0, got {}",
                raw
            )));
        }
        Ok(Self(raw as u64))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = MutationError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MUTATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Credit,
    Debit,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Credit => "credit",
            MutationKind::Debit => "debit",
        }
    }
}

/// A single credit/debit request. Consumed once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub wallet: WalletAddress,
    pub amount: Amount,
    pub kind: MutationKind,
    pub idempotency_key: Option<String>,
}

impl MutationRequest {
    pub fn new(wallet: WalletAddress, amount: Amount, kind: MutationKind) -> Self {
        Self { wallet, amount, kind, idempotency_key: None }
    }

    /// Blank keys are treated as absent.
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Two requests are the same mutation if everything but the key matches.
    pub fn same_mutation(&self, other: &MutationRequest) -> bool {
        self.wallet == other.wallet && self.amount == other.amount && self.kind == other.kind
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// An operation the node accepted for broadcast but that is not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHandle {
    pub operation_id: String,
    pub submitted_at: DateTime<Utc>,
    /// Head level at broadcast time; inclusion can only happen above it.
    pub submitted_level: i64,
}

/// Hash of a confirmed operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an operation stands on chain, as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionStatus {
    Pending,
    /// `confirmations` counts the inclusion block itself.
    Included { level: i64, confirmations: u32 },
    /// Included but not applied (e.g. the contract failed during execution).
    Failed { reason: String },
    /// Fell out of the operation TTL window without being included.
    Expired,
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Balance read straight from the contract. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub wallet_address: WalletAddress,
    pub amount: u64,
    pub as_of: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn now(wallet_address: WalletAddress, amount: u64) -> Self {
        Self { wallet_address, amount, as_of: Utc::now() }
    }
}

/// Diagnostic summary of the ledger connection, served by `GET /tezos/test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInfo {
    pub backend: String,
    pub network: String,
    pub contract: String,
    pub signer: String,
    pub head_level: i64,
}
