// ============================================================================
// TEZOS RPC CLIENT - Views, signed contract calls, inclusion tracking
// ============================================================================
//
// Submission pipeline (one call at a time per signer, only for this window):
//
//   head header ──► counter ──► [reveal?] + transaction
//        │
//        ▼
//   run_operation (simulate) ──► limits + fee ──► forge ──► sign ──► inject
//
// Inclusion is found by scanning `operation_hashes/3` (manager pass) of every
// block above the submission level. Scan progress is kept per operation so
// repeated polls only look at new blocks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::signer::{zero_signature, TezosSigner};
use super::{LedgerClient, Micheline};
use crate::error::LedgerError;
use crate::types::{InclusionStatus, LedgerInfo, OperationHandle};

/// Blocks after which an unincluded operation can no longer land.
pub const MAX_OPERATION_TTL: i64 = 120;

/// Validation pass holding manager operations.
const MANAGER_PASS: usize = 3;

const HARD_GAS_LIMIT_PER_OPERATION: u64 = 1_040_000;
const HARD_STORAGE_LIMIT_PER_OPERATION: u64 = 60_000;
const GAS_MARGIN: u64 = 100;
const STORAGE_MARGIN: u64 = 20;

// Minimal fee: 100 mutez + 100 nanotez per gas unit + 1 mutez per byte.
const MINIMAL_FEE_MUTEZ: u64 = 100;
const MINIMAL_NANOTEZ_PER_GAS: u64 = 100;
const MINIMAL_MUTEZ_PER_BYTE: u64 = 1;
const FEE_MARGIN_MUTEZ: u64 = 100;
const SIGNATURE_SIZE: u64 = 64;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub endpoint: String,
    pub contract: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct BlockHeader {
    hash: String,
    level: i64,
}

#[derive(Debug, Clone, Default)]
struct ScanProgress {
    scanned_to: i64,
    included: Option<(i64, usize)>,
    receipt: Option<Result<(), String>>,
}

/// Forget scans nobody has polled for MAX_OPERATION_TTL levels. A later
/// status query rescans from the handle's submission level.
fn evict_stale_scans(scans: &DashMap<String, ScanProgress>, head_level: i64) {
    scans.retain(|_, progress| progress.scanned_to + MAX_OPERATION_TTL >= head_level);
}

/// Locally tracked manager counter, so back-to-back injections do not reuse
/// a counter the node has not yet seen in a block.
#[derive(Debug, Default)]
struct CounterState {
    last_used: Option<u64>,
}

impl CounterState {
    fn next(&self, chain_counter: u64) -> u64 {
        let from_chain = chain_counter + 1;
        match self.last_used {
            Some(last) if last >= from_chain => last + 1,
            _ => from_chain,
        }
    }
}

pub struct TezosRpcClient {
    http: reqwest::Client,
    endpoint: String,
    contract: String,
    chain_id: String,
    signer: TezosSigner,
    injection: Mutex<CounterState>,
    scans: DashMap<String, ScanProgress>,
}

impl TezosRpcClient {
    /// Connect to the node and fetch the chain id.
    pub async fn connect(config: RpcConfig, signer: TezosSigner) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LedgerError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let mut client = Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            contract: config.contract,
            chain_id: String::new(),
            signer,
            injection: Mutex::new(CounterState::default()),
            scans: DashMap::new(),
        };
        client.chain_id = client.get_json("/chains/main/chain_id").await?;
        info!(
            "🔗 Connected to Tezos node {} (chain {}, signer {})",
            client.endpoint,
            client.chain_id,
            client.signer.public_key_hash()
        );
        Ok(client)
    }

    pub fn signer(&self) -> &TezosSigner {
        &self.signer
    }

    // ------------------------------------------------------------------
    // HTTP helpers
    // ------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let response = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LedgerError> {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    // ------------------------------------------------------------------
    // Chain state
    // ------------------------------------------------------------------

    async fn head(&self) -> Result<BlockHeader, LedgerError> {
        self.get_json("/chains/main/blocks/head/header").await
    }

    async fn chain_counter(&self) -> Result<u64, LedgerError> {
        let path = format!(
            "/chains/main/blocks/head/context/contracts/{}/counter",
            self.signer.public_key_hash()
        );
        let raw: String = self.get_json(&path).await?;
        raw.parse()
            .map_err(|_| LedgerError::Rejected(format!("node returned a bad counter '{}'", raw)))
    }

    async fn is_revealed(&self) -> Result<bool, LedgerError> {
        let path = format!(
            "/chains/main/blocks/head/context/contracts/{}/manager_key",
            self.signer.public_key_hash()
        );
        let key: Option<String> = self.get_json(&path).await?;
        Ok(key.is_some())
    }

    // ------------------------------------------------------------------
    // Operation building
    // ------------------------------------------------------------------

    fn reveal_content(&self, counter: u64) -> Value {
        json!({
            "kind": "reveal",
            "source": self.signer.public_key_hash(),
            "fee": "0",
            "counter": counter.to_string(),
            "gas_limit": HARD_GAS_LIMIT_PER_OPERATION.to_string(),
            "storage_limit": "0",
            "public_key": self.signer.public_key(),
        })
    }

    fn transaction_content(&self, counter: u64, entrypoint: &str, arg: Micheline) -> Value {
        json!({
            "kind": "transaction",
            "source": self.signer.public_key_hash(),
            "fee": "0",
            "counter": counter.to_string(),
            "gas_limit": HARD_GAS_LIMIT_PER_OPERATION.to_string(),
            "storage_limit": HARD_STORAGE_LIMIT_PER_OPERATION.to_string(),
            "amount": "0",
            "destination": self.contract,
            "parameters": { "entrypoint": entrypoint, "value": arg },
        })
    }

    async fn simulate(&self, branch: &str, contents: &[Value]) -> Result<Vec<Value>, LedgerError> {
        let body = json!({
            "operation": { "branch": branch, "contents": contents, "signature": zero_signature() },
            "chain_id": self.chain_id,
        });
        let result: Value = self
            .post_json("/chains/main/blocks/head/helpers/scripts/run_operation", &body)
            .await?;
        let simulated = result
            .get("contents")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected("simulation returned no contents".to_string()))?;

        // A failed call backtracks the reveal before it, so collect errors from
        // every content rather than reporting the first non-applied one.
        let results = simulated.iter().map(|content| &content["metadata"]["operation_result"]);
        if results.clone().any(|result| result["status"] != "applied") {
            let errors: Vec<Value> = results
                .filter_map(|result| result["errors"].as_array())
                .flatten()
                .cloned()
                .collect();
            return Err(LedgerError::Rejected(describe_node_errors(&Value::Array(errors))));
        }
        Ok(simulated)
    }

    async fn forge(&self, branch: &str, contents: &[Value]) -> Result<String, LedgerError> {
        let body = json!({ "branch": branch, "contents": contents });
        self.post_json("/chains/main/blocks/head/helpers/forge/operations", &body).await
    }

    /// Forge, sign and inject. Returns the operation hash.
    async fn sign_and_inject(&self, branch: &str, contents: &[Value]) -> Result<String, LedgerError> {
        let forged = self.forge(branch, contents).await?;
        let signature = self.signer.sign_operation(&forged)?;
        let signed = format!("{}{}", forged, hex::encode(signature.bytes));
        self.post_json("/injection/operation?chain=main", &signed).await
    }

    /// Activate a faucet account. Only meaningful on test networks.
    pub async fn activate_account(&self, activation_code: &str) -> Result<String, LedgerError> {
        let head = self.head().await?;
        let contents = [json!({
            "kind": "activate_account",
            "pkh": self.signer.public_key_hash(),
            "secret": activation_code,
        })];
        let hash = self.sign_and_inject(&head.hash, &contents).await?;
        info!("🪪 Activation submitted for {} ({})", self.signer.public_key_hash(), hash);
        Ok(hash)
    }

    // ------------------------------------------------------------------
    // Inclusion
    // ------------------------------------------------------------------

    async fn scan_for(
        &self,
        operation_id: &str,
        mut progress: ScanProgress,
        head: i64,
    ) -> Result<ScanProgress, LedgerError> {
        while progress.included.is_none() && progress.scanned_to < head {
            let level = progress.scanned_to + 1;
            let path = format!("/chains/main/blocks/{}/operation_hashes/{}", level, MANAGER_PASS);
            let hashes: Vec<String> = self.get_json(&path).await?;
            if let Some(index) = hashes.iter().position(|h| h == operation_id) {
                progress.included = Some((level, index));
            }
            progress.scanned_to = level;
        }

        if progress.receipt.is_none() {
            if let Some((level, index)) = progress.included {
                let path = format!("/chains/main/blocks/{}/operations/{}/{}", level, MANAGER_PASS, index);
                let receipt: Value = self.get_json(&path).await?;
                progress.receipt = Some(receipt_outcome(&receipt));
            }
        }
        Ok(progress)
    }
}

#[async_trait]
impl LedgerClient for TezosRpcClient {
    async fn read_view(&self, view: &str, arg: Micheline) -> Result<Micheline, LedgerError> {
        let body = json!({
            "contract": self.contract,
            "entrypoint": view,
            "input": arg,
            "chain_id": self.chain_id,
            "unparsing_mode": "Readable",
        });
        let result: Value = self
            .post_json("/chains/main/blocks/head/helpers/scripts/run_view", &body)
            .await?;
        result
            .get("data")
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("view {} returned no data", view)))
    }

    async fn submit_call(&self, entrypoint: &str, arg: Micheline) -> Result<OperationHandle, LedgerError> {
        let mut counters = self.injection.lock().await;

        let head = self.head().await?;
        evict_stale_scans(&self.scans, head.level);
        let mut counter = counters.next(self.chain_counter().await?);
        let mut contents = Vec::with_capacity(2);
        if !self.is_revealed().await? {
            debug!("Revealing {} before first call", self.signer.public_key_hash());
            contents.push(self.reveal_content(counter));
            counter += 1;
        }
        contents.push(self.transaction_content(counter, entrypoint, arg));

        let simulated = self.simulate(&head.hash, &contents).await?;
        apply_limits(&mut contents, &simulated);
        let size = self.forge(&head.hash, &contents).await?.len() as u64 / 2 + SIGNATURE_SIZE;
        apply_fees(&mut contents, size);

        let operation_id = self.sign_and_inject(&head.hash, &contents).await?;
        counters.last_used = Some(counter);
        info!("📤 Injected {} ({}) at level {}", entrypoint, operation_id, head.level);

        Ok(OperationHandle { operation_id, submitted_at: Utc::now(), submitted_level: head.level })
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<InclusionStatus, LedgerError> {
        let head = self.head().await?;
        let progress = self
            .scans
            .get(&handle.operation_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ScanProgress { scanned_to: handle.submitted_level, ..Default::default() });

        let progress = self.scan_for(&handle.operation_id, progress, head.level).await?;
        self.scans.insert(handle.operation_id.clone(), progress.clone());

        Ok(match (progress.included, progress.receipt) {
            (Some(_), Some(Err(reason))) => InclusionStatus::Failed { reason },
            (Some((level, _)), _) => InclusionStatus::Included {
                level,
                confirmations: (head.level - level + 1).max(0) as u32,
            },
            (None, _) if head.level > handle.submitted_level + MAX_OPERATION_TTL => InclusionStatus::Expired,
            (None, _) => InclusionStatus::Pending,
        })
    }

    async fn describe(&self) -> Result<LedgerInfo, LedgerError> {
        let head = self.head().await?;
        Ok(LedgerInfo {
            backend: "tezos-rpc".to_string(),
            network: self.chain_id.clone(),
            contract: self.contract.clone(),
            signer: self.signer.public_key_hash().to_string(),
            head_level: head.level,
        })
    }

    fn release(&self, handle: &OperationHandle) {
        self.scans.remove(&handle.operation_id);
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn transport_error(e: reqwest::Error) -> LedgerError {
    LedgerError::Connection(e.to_string())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| LedgerError::Connection(format!("unreadable node response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .map(|errors| describe_node_errors(&errors))
        .unwrap_or_else(|_| body.trim().to_string());

    if matches!(status.as_u16(), 502 | 503 | 504) {
        warn!("Tezos node unavailable ({}): {}", status, message);
        Err(LedgerError::Connection(format!("node returned {}: {}", status, message)))
    } else {
        Err(LedgerError::Rejected(message))
    }
}

/// Summarize a node error list. Contract failures surface their FAILWITH
/// string (e.g. `BMT_InsufficientBalance`), everything else its error id.
pub fn describe_node_errors(errors: &Value) -> String {
    let Some(list) = errors.as_array() else {
        return "operation failed".to_string();
    };
    let mut parts: Vec<String> = Vec::new();
    for error in list {
        if let Some(reason) = error["with"]["string"].as_str() {
            parts.push(reason.to_string());
        } else if let Some(id) = error["id"].as_str() {
            parts.push(id.to_string());
        }
    }
    parts.dedup();
    if parts.is_empty() {
        "operation failed".to_string()
    } else {
        parts.join(", ")
    }
}

/// `Ok` when every content of an included operation was applied.
fn receipt_outcome(receipt: &Value) -> Result<(), String> {
    let contents = receipt["contents"].as_array().cloned().unwrap_or_default();
    for content in contents {
        let result = &content["metadata"]["operation_result"];
        if result["status"] != "applied" {
            let status = result["status"].as_str().unwrap_or("unknown");
            return Err(format!("{}: {}", status, describe_node_errors(&result["errors"])));
        }
    }
    Ok(())
}

fn numeric_field(value: &Value, field: &str) -> u64 {
    value[field].as_str().and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Replace the simulation limits with consumed gas/storage plus margins.
fn apply_limits(contents: &mut [Value], simulated: &[Value]) {
    for (content, result) in contents.iter_mut().zip(simulated) {
        let operation_result = &result["metadata"]["operation_result"];
        let gas = numeric_field(operation_result, "consumed_milligas").div_ceil(1000) + GAS_MARGIN;
        content["gas_limit"] = json!(gas.min(HARD_GAS_LIMIT_PER_OPERATION).to_string());
        if content["kind"] == "transaction" {
            let storage = numeric_field(operation_result, "paid_storage_size_diff") + STORAGE_MARGIN;
            content["storage_limit"] = json!(storage.min(HARD_STORAGE_LIMIT_PER_OPERATION).to_string());
        }
    }
}

/// Minimal-fee formula. The byte cost of the whole operation is charged to
/// the first content.
fn apply_fees(contents: &mut [Value], operation_size: u64) {
    for (i, content) in contents.iter_mut().enumerate() {
        let gas = numeric_field(content, "gas_limit");
        let mut fee = MINIMAL_FEE_MUTEZ + (gas * MINIMAL_NANOTEZ_PER_GAS).div_ceil(1000) + FEE_MARGIN_MUTEZ;
        if i == 0 {
            fee += operation_size * MINIMAL_MUTEZ_PER_BYTE;
        }
        content["fee"] = json!(fee.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_scans_are_evicted() {
        let scans = DashMap::new();
        scans.insert("ooStale".to_string(), ScanProgress { scanned_to: 100, ..Default::default() });
        scans.insert("ooFresh".to_string(), ScanProgress { scanned_to: 180, ..Default::default() });

        evict_stale_scans(&scans, 100 + MAX_OPERATION_TTL);
        assert_eq!(scans.len(), 2);

        evict_stale_scans(&scans, 101 + MAX_OPERATION_TTL);
        assert!(!scans.contains_key("ooStale"));
        assert!(scans.contains_key("ooFresh"));
    }

    #[test]
    fn test_counter_never_reuses_local_value() {
        let mut state = CounterState::default();
        assert_eq!(state.next(41), 42);
        state.last_used = Some(42);
        assert_eq!(state.next(41), 43);
        assert_eq!(state.next(50), 51);
    }

    #[test]
    fn test_contract_failwith_is_surfaced() {
        let errors = json!([
            { "kind": "temporary", "id": "proto.018-Proxford.michelson_v1.runtime_error" },
            { "kind": "temporary", "id": "proto.018-Proxford.michelson_v1.script_rejected",
              "with": { "string": "BMT_InsufficientBalance" } }
        ]);
        assert_eq!(
            describe_node_errors(&errors),
            "proto.018-Proxford.michelson_v1.runtime_error, BMT_InsufficientBalance"
        );
        assert_eq!(describe_node_errors(&Value::Null), "operation failed");
    }

    #[test]
    fn test_receipt_outcome() {
        let applied = json!({ "contents": [ { "metadata": { "operation_result": { "status": "applied" } } } ] });
        assert!(receipt_outcome(&applied).is_ok());

        let failed = json!({ "contents": [ { "metadata": { "operation_result": {
            "status": "failed",
            "errors": [ { "id": "x", "with": { "string": "BMT_NotAdmin" } } ]
        } } } ] });
        assert_eq!(receipt_outcome(&failed), Err("failed: BMT_NotAdmin".to_string()));
    }

    #[test]
    fn test_limits_and_fees_from_simulation() {
        let mut contents = vec![json!({
            "kind": "transaction", "fee": "0",
            "gas_limit": HARD_GAS_LIMIT_PER_OPERATION.to_string(),
            "storage_limit": HARD_STORAGE_LIMIT_PER_OPERATION.to_string(),
        })];
        let simulated = vec![json!({ "metadata": { "operation_result": {
            "status": "applied", "consumed_milligas": "2500500", "paid_storage_size_diff": "67"
        } } })];

        apply_limits(&mut contents, &simulated);
        assert_eq!(contents[0]["gas_limit"], "2601");
        assert_eq!(contents[0]["storage_limit"], "87");

        apply_fees(&mut contents, 200);
        // 100 + ceil(2601 * 0.1) + 100 + 200
        assert_eq!(contents[0]["fee"], "661");
    }
}
