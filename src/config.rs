//! Gateway configuration.
//!
//! Read from the process environment, optionally seeded from
//! `.env.<APP_ENV>` (development, test, production). Missing optional
//! variables fall back to the defaults below; malformed values abort startup.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::coordinator::{CoordinatorConfig, FixedAmountPolicy, DEFAULT_IDEMPOTENCY_CAPACITY};
use crate::ledger::rpc::RpcConfig;
use crate::ledger::WalletCredentials;
use crate::tracker::{
    TrackerConfig, DEFAULT_CONFIRMATION_DEPTH, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
use crate::types::Amount;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_REWARD_AMOUNT: i64 = 2300;
pub const DEFAULT_SPEND_AMOUNT: i64 = 200;
pub const DEFAULT_STATIC_DIR: &str = "public";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },

    #[error("Wallet credentials error: {0}")]
    Credentials(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    /// Tezos node over HTTP RPC.
    Rpc,
    /// In-process simulated contract.
    Sandbox,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc" => Ok(LedgerBackend::Rpc),
            "sandbox" => Ok(LedgerBackend::Sandbox),
            other => Err(format!("expected 'rpc' or 'sandbox', got '{}'", other)),
        }
    }
}

/// Node endpoint and contract, required for the RPC backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub tezos_server: String,
    pub contract: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub backend: LedgerBackend,
    pub node: Option<NodeConfig>,
    pub wallet_file: PathBuf,
    pub confirmation_depth: u32,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub reward_amount: Amount,
    pub spend_amount: Amount,
    pub debit_precheck: bool,
    pub idempotency_capacity: NonZeroUsize,
    pub static_dir: PathBuf,
}

impl GatewayConfig {
    /// Load `.env.<APP_ENV>` into the process environment if it exists.
    pub fn load_dotenv() {
        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let file = format!(".env.{}", environment);
        match dotenv::from_filename(&file) {
            Ok(path) => debug!("Loaded {}", path.display()),
            Err(_) => debug!("No {} file, using process environment", file),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment: Environment = parse_or(&get, "APP_ENV", Environment::Development)?;
        let ip: IpAddr = parse_or(&get, "BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?;
        let port: u16 = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let backend: LedgerBackend = parse_or(&get, "LEDGER_BACKEND", LedgerBackend::Rpc)?;

        let node = match backend {
            LedgerBackend::Rpc => Some(NodeConfig {
                tezos_server: get("TEZOS_SERVER").ok_or(ConfigError::Missing("TEZOS_SERVER"))?,
                contract: get("BANKINGMAP_CONTRACT").ok_or(ConfigError::Missing("BANKINGMAP_CONTRACT"))?,
            }),
            LedgerBackend::Sandbox => None,
        };

        let wallet_file = get("BANKINGMAP_WALLET_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("contracts/bankingmapWallet_{}.json", environment)));

        let confirmation_depth: u32 = parse_or(&get, "CONFIRMATION_DEPTH", DEFAULT_CONFIRMATION_DEPTH)?;
        if confirmation_depth == 0 {
            return Err(invalid("CONFIRMATION_DEPTH", "0", "must be at least 1"));
        }
        let timeout_secs: u64 =
            parse_or(&get, "CONFIRMATION_TIMEOUT_SECS", DEFAULT_CONFIRMATION_TIMEOUT.as_secs())?;
        let poll_ms: u64 = parse_or(&get, "CONFIRMATION_POLL_MS", DEFAULT_POLL_INTERVAL.as_millis() as u64)?;

        let reward_amount = parse_amount(&get, "REWARD_AMOUNT", DEFAULT_REWARD_AMOUNT)?;
        let spend_amount = parse_amount(&get, "SPEND_AMOUNT", DEFAULT_SPEND_AMOUNT)?;
        let debit_precheck: bool = parse_or(&get, "DEBIT_BALANCE_PRECHECK", true)?;

        let capacity: usize = parse_or(&get, "IDEMPOTENCY_CACHE_SIZE", DEFAULT_IDEMPOTENCY_CAPACITY)?;
        let idempotency_capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| invalid("IDEMPOTENCY_CACHE_SIZE", "0", "must be at least 1"))?;

        let static_dir = PathBuf::from(get("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()));

        Ok(Self {
            environment,
            bind_addr: SocketAddr::new(ip, port),
            backend,
            node,
            wallet_file,
            confirmation_depth,
            confirmation_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            reward_amount,
            spend_amount,
            debit_precheck,
            idempotency_capacity,
            static_dir,
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig { poll_interval: self.poll_interval, timeout: self.confirmation_timeout }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            confirmation_depth: self.confirmation_depth,
            debit_precheck: self.debit_precheck,
            idempotency_capacity: self.idempotency_capacity,
        }
    }

    pub fn amount_policy(&self) -> FixedAmountPolicy {
        FixedAmountPolicy { reward: self.reward_amount, spend: self.spend_amount }
    }

    pub fn rpc_config(&self) -> Result<RpcConfig, ConfigError> {
        let node = self.node.as_ref().ok_or(ConfigError::Missing("TEZOS_SERVER"))?;
        Ok(RpcConfig {
            endpoint: node.tezos_server.clone(),
            contract: node.contract.clone(),
            request_timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    /// Read and check the signing credentials for this environment.
    pub fn load_credentials(&self) -> Result<WalletCredentials, ConfigError> {
        load_credentials(&self.wallet_file, self.environment)
    }
}

/// Faucet accounts are test-network only and refused in production.
pub fn load_credentials(path: &Path, environment: Environment) -> Result<WalletCredentials, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Credentials(format!("cannot read {}: {}", path.display(), e)))?;
    let credentials: WalletCredentials = serde_json::from_str(&raw).map_err(|_| {
        ConfigError::Credentials(format!(
            "{} is neither a faucet account nor a {{\"privateKey\"}} file",
            path.display()
        ))
    })?;

    if environment == Environment::Production && credentials.is_faucet() {
        return Err(ConfigError::Credentials(
            "faucet accounts are not allowed in production; provide a privateKey".to_string(),
        ));
    }
    info!("🔑 Loaded {} credentials from {}", if credentials.is_faucet() { "faucet" } else { "private key" }, path.display());
    Ok(credentials)
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { var, value: value.to_string(), reason: reason.into() }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
    }
}

fn parse_amount<G>(get: &G, var: &'static str, default: i64) -> Result<Amount, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let raw: i64 = parse_or(get, var, default)?;
    Amount::new(raw).map_err(|e| invalid(var, &raw.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_sandbox_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[("LEDGER_BACKEND", "sandbox")])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.backend, LedgerBackend::Sandbox);
        assert!(config.node.is_none());
        assert_eq!(config.confirmation_depth, 1);
        assert_eq!(config.reward_amount.get(), 2300);
        assert_eq!(config.spend_amount.get(), 200);
        assert!(config.debit_precheck);
        assert_eq!(config.wallet_file, PathBuf::from("contracts/bankingmapWallet_development.json"));
    }

    #[test]
    fn test_rpc_requires_node_settings() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TEZOS_SERVER")));

        let err = GatewayConfig::from_lookup(lookup(&[("TEZOS_SERVER", "https://rpc.example")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BANKINGMAP_CONTRACT")));

        let config = GatewayConfig::from_lookup(lookup(&[
            ("TEZOS_SERVER", "https://rpc.example"),
            ("BANKINGMAP_CONTRACT", "KT1BRudFZEXLYANgmZTka1xCDN5nWTMWY7SZ"),
            ("APP_ENV", "production"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.rpc_config().unwrap().endpoint, "https://rpc.example");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.wallet_file, PathBuf::from("contracts/bankingmapWallet_production.json"));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let cases = [
            ("PORT", "eighty"),
            ("APP_ENV", "staging"),
            ("CONFIRMATION_DEPTH", "0"),
            ("REWARD_AMOUNT", "-1"),
            ("DEBIT_BALANCE_PRECHECK", "maybe"),
            ("IDEMPOTENCY_CACHE_SIZE", "0"),
        ];
        for (var, value) in cases {
            let result = GatewayConfig::from_lookup(lookup(&[("LEDGER_BACKEND", "sandbox"), (var, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { var: v, .. }) if v == var),
                "{}={} should be invalid",
                var,
                value
            );
        }
    }

    #[test]
    fn test_production_refuses_faucet_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"email":"a@b.c","password":"pw","mnemonic":["abandon"],"activation_code":"x"}}"#
        )
        .unwrap();

        assert!(load_credentials(file.path(), Environment::Test).unwrap().is_faucet());
        assert!(matches!(
            load_credentials(file.path(), Environment::Production),
            Err(ConfigError::Credentials(_))
        ));
    }

    #[test]
    fn test_missing_or_garbage_credentials() {
        let missing = load_credentials(Path::new("/nonexistent/wallet.json"), Environment::Development);
        assert!(matches!(missing, Err(ConfigError::Credentials(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hello":"world"}}"#).unwrap();
        assert!(matches!(
            load_credentials(file.path(), Environment::Development),
            Err(ConfigError::Credentials(_))
        ));
    }
}
