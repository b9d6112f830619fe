//! Typed access to the Banking Map Token contract.
//!
//! The contract exposes two TZIP-4 views (`getTotalSupply`, `getBalance`) and
//! two admin entrypoints (`performReward`, `spendTokens`). Entrypoint
//! parameters are the record `(amount, companyAddress)` laid out as
//! `Pair amount address`.

use serde_json::json;

use super::{LedgerClient, Micheline, SharedLedger};
use crate::error::LedgerError;
use crate::types::{Amount, OperationHandle, WalletAddress};

pub const VIEW_TOTAL_SUPPLY: &str = "getTotalSupply";
pub const VIEW_BALANCE: &str = "getBalance";
pub const ENTRYPOINT_PERFORM_REWARD: &str = "performReward";
pub const ENTRYPOINT_SPEND_TOKENS: &str = "spendTokens";

#[derive(Clone)]
pub struct TokenContract {
    ledger: SharedLedger,
}

impl TokenContract {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &dyn LedgerClient {
        self.ledger.as_ref()
    }

    pub async fn total_supply(&self) -> Result<u64, LedgerError> {
        let value = self.ledger.read_view(VIEW_TOTAL_SUPPLY, unit()).await?;
        decode_nat(&value)
    }

    pub async fn balance_of(&self, wallet: &WalletAddress) -> Result<u64, LedgerError> {
        let value = self.ledger.read_view(VIEW_BALANCE, address_arg(wallet.as_str())).await?;
        decode_nat(&value)
    }

    /// Mint `amount` to `wallet`.
    pub async fn perform_reward(
        &self,
        wallet: &WalletAddress,
        amount: Amount,
    ) -> Result<OperationHandle, LedgerError> {
        self.ledger
            .submit_call(ENTRYPOINT_PERFORM_REWARD, mutation_arg(amount.get(), wallet.as_str()))
            .await
    }

    /// Burn `amount` from `wallet`.
    pub async fn spend_tokens(
        &self,
        wallet: &WalletAddress,
        amount: Amount,
    ) -> Result<OperationHandle, LedgerError> {
        self.ledger
            .submit_call(ENTRYPOINT_SPEND_TOKENS, mutation_arg(amount.get(), wallet.as_str()))
            .await
    }
}

// ============================================================================
// MICHELINE
// ============================================================================

pub fn unit() -> Micheline {
    json!({ "prim": "Unit" })
}

pub fn address_arg(address: &str) -> Micheline {
    json!({ "string": address })
}

pub fn mutation_arg(amount: u64, address: &str) -> Micheline {
    json!({
        "prim": "Pair",
        "args": [ { "int": amount.to_string() }, { "string": address } ]
    })
}

/// Inverse of [`mutation_arg`].
pub fn decode_mutation_arg(value: &Micheline) -> Option<(u64, String)> {
    if value.get("prim")?.as_str()? != "Pair" {
        return None;
    }
    let args = value.get("args")?.as_array()?;
    let [amount, address] = args.as_slice() else {
        return None;
    };
    let amount = amount.get("int")?.as_str()?.parse().ok()?;
    let address = address.get("string")?.as_str()?.to_string();
    Some((amount, address))
}

pub fn decode_address_arg(value: &Micheline) -> Option<&str> {
    value.get("string")?.as_str()
}

/// Decode a `nat` view result (`{"int": "123"}`).
pub fn decode_nat(value: &Micheline) -> Result<u64, LedgerError> {
    value
        .get("int")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| LedgerError::Rejected(format!("view returned a non-nat value: {}", value)))
}
