// ============================================================================
// SIGNER - Process-wide Tezos signing credential
// ============================================================================
//
// Two import paths, matching how the BankingMap wallets are provisioned:
//
// 1. FAUCET (development/test): BIP-39 mnemonic + email/password passphrase.
//    The first 32 bytes of the BIP-39 seed are the Ed25519 secret. The account
//    may still need an `activate_account` operation (see rpc.rs).
// 2. PRIVATE KEY (production): base58check `edsk...`, either the 32-byte seed
//    or the 64-byte expanded form.

use std::fmt;

use bip39::Mnemonic;
use ed25519_dalek::{Signer, SigningKey};
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::crypto::{self, prefix, GENERIC_OPERATION_WATERMARK};
use crate::error::LedgerError;

// ============================================================================
// CREDENTIAL FILES
// ============================================================================

/// Faucet account file as handed out by the Tezos test faucets.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FaucetAccount {
    #[serde(default)]
    pub pkh: Option<String>,
    pub email: String,
    pub password: String,
    pub mnemonic: Vec<String>,
    #[serde(default, alias = "secret")]
    pub activation_code: Option<String>,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyAccount {
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

/// Contents of `bankingmapWallet_<env>.json`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum WalletCredentials {
    Faucet(FaucetAccount),
    PrivateKey(PrivateKeyAccount),
}

impl WalletCredentials {
    pub fn is_faucet(&self) -> bool {
        matches!(self, WalletCredentials::Faucet(_))
    }

    pub fn activation_code(&self) -> Option<&str> {
        match self {
            WalletCredentials::Faucet(account) => account.activation_code.as_deref(),
            WalletCredentials::PrivateKey(_) => None,
        }
    }
}

// ============================================================================
// SIGNER
// ============================================================================

/// Signature over a forged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSignature {
    pub bytes: [u8; 64],
    /// `edsig...` encoding.
    pub encoded: String,
}

pub struct TezosSigner {
    key: SigningKey,
    public_key: String,
    public_key_hash: String,
}

impl TezosSigner {
    pub fn from_credentials(credentials: &WalletCredentials) -> Result<Self, LedgerError> {
        match credentials {
            WalletCredentials::Faucet(account) => Self::from_faucet(account),
            WalletCredentials::PrivateKey(account) => Self::from_secret_key(&account.private_key),
        }
    }

    pub fn from_seed(mut seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        let public = key.verifying_key().to_bytes();
        Self {
            public_key: crypto::b58check_encode(prefix::EDPK, &public),
            public_key_hash: crypto::b58check_encode(prefix::TZ1, &crypto::blake2b_160(&public)),
            key,
        }
    }

    /// Import an `edsk...` key.
    pub fn from_secret_key(encoded: &str) -> Result<Self, LedgerError> {
        let encoded = encoded.trim();
        let mut raw = crypto::b58check_decode(prefix::EDSK_SEED, encoded)
            .filter(|bytes| bytes.len() == 32)
            .or_else(|| {
                crypto::b58check_decode(prefix::EDSK_EXPANDED, encoded)
                    .filter(|bytes| bytes.len() == 64)
            })
            .ok_or_else(|| LedgerError::Signing("privateKey is not a valid edsk key".to_string()))?;

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&raw[..32]);
        raw.zeroize();
        Ok(Self::from_seed(seed))
    }

    /// Derive the faucet key from its mnemonic and email/password passphrase.
    pub fn from_faucet(account: &FaucetAccount) -> Result<Self, LedgerError> {
        let phrase = account.mnemonic.join(" ");
        let mnemonic = Mnemonic::parse_normalized(&phrase)
            .map_err(|e| LedgerError::Signing(format!("invalid faucet mnemonic: {}", e)))?;

        let mut passphrase = format!("{}{}", account.email, account.password);
        let mut bip39_seed = mnemonic.to_seed_normalized(&passphrase);
        passphrase.zeroize();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bip39_seed[..32]);
        bip39_seed.zeroize();

        let signer = Self::from_seed(seed);
        if let Some(expected) = account.pkh.as_deref() {
            if expected != signer.public_key_hash {
                return Err(LedgerError::Signing(format!(
                    "faucet key derives to {} but the wallet file names {}",
                    signer.public_key_hash, expected
                )));
            }
        }
        Ok(signer)
    }

    /// `tz1...` address of the signer.
    pub fn public_key_hash(&self) -> &str {
        &self.public_key_hash
    }

    /// `edpk...` public key, needed for the reveal operation.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign hex-encoded forged operation bytes.
    pub fn sign_operation(&self, forged_hex: &str) -> Result<OperationSignature, LedgerError> {
        let forged = hex::decode(forged_hex)
            .map_err(|e| LedgerError::Signing(format!("forged operation is not hex: {}", e)))?;

        let mut message = Vec::with_capacity(forged.len() + 1);
        message.push(GENERIC_OPERATION_WATERMARK);
        message.extend_from_slice(&forged);
        let digest = crypto::blake2b_256(&message);

        let bytes = self.key.sign(&digest).to_bytes();
        Ok(OperationSignature {
            bytes,
            encoded: crypto::b58check_encode(prefix::EDSIG, &bytes),
        })
    }
}

impl fmt::Debug for TezosSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TezosSigner")
            .field("public_key_hash", &self.public_key_hash)
            .finish_non_exhaustive()
    }
}

/// Placeholder signature for simulation (`run_operation` ignores it).
pub fn zero_signature() -> String {
    crypto::b58check_encode(prefix::EDSIG, &[0u8; 64])
}
