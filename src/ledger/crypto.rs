//! Base58check encoding with Tezos prefixes, and blake2b digests.

use blake2::digest::consts::{U20, U32};
use blake2::{Blake2b, Digest};

pub mod prefix {
    pub const TZ1: &[u8] = &[6, 161, 159];
    pub const EDPK: &[u8] = &[13, 15, 37, 217];
    /// 32-byte Ed25519 seed.
    pub const EDSK_SEED: &[u8] = &[13, 15, 58, 7];
    /// 64-byte seed || public key form.
    pub const EDSK_EXPANDED: &[u8] = &[43, 246, 78, 18];
    pub const EDSIG: &[u8] = &[9, 245, 205, 134, 18];
    pub const OPERATION: &[u8] = &[5, 116];
}

/// Signing watermark for manager and anonymous operations.
pub const GENERIC_OPERATION_WATERMARK: u8 = 0x03;

pub fn b58check_encode(prefix: &[u8], payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(prefix.len() + payload.len());
    bytes.extend_from_slice(prefix);
    bytes.extend_from_slice(payload);
    bs58::encode(bytes).with_check().into_string()
}

/// Decode and strip `prefix`. `None` on bad checksum or a different prefix.
pub fn b58check_decode(prefix: &[u8], encoded: &str) -> Option<Vec<u8>> {
    let bytes = bs58::decode(encoded).with_check(None).into_vec().ok()?;
    bytes.strip_prefix(prefix).map(<[u8]>::to_vec)
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn blake2b_160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Blake2b::<U20>::new();
    hasher.update(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_encodings_have_tezos_shapes() {
        let tz1 = b58check_encode(prefix::TZ1, &[7u8; 20]);
        assert!(tz1.starts_with("tz1"));
        assert_eq!(tz1.len(), 36);

        let edpk = b58check_encode(prefix::EDPK, &[7u8; 32]);
        assert!(edpk.starts_with("edpk"));
        assert_eq!(edpk.len(), 54);

        let edsk = b58check_encode(prefix::EDSK_SEED, &[7u8; 32]);
        assert!(edsk.starts_with("edsk"));
        assert_eq!(edsk.len(), 54);

        let edsig = b58check_encode(prefix::EDSIG, &[7u8; 64]);
        assert!(edsig.starts_with("edsig"));
        assert_eq!(edsig.len(), 99);
    }

    #[test]
    fn test_decode_checks_prefix() {
        let encoded = b58check_encode(prefix::EDSK_SEED, &[1u8; 32]);
        assert_eq!(b58check_decode(prefix::EDSK_SEED, &encoded), Some(vec![1u8; 32]));
        assert_eq!(b58check_decode(prefix::EDPK, &encoded), None);
        assert_eq!(b58check_decode(prefix::EDSK_SEED, "not-base58!"), None);
    }

    #[test]
    fn test_digest_lengths() {
        assert_ne!(blake2b_256(b"bmt"), blake2b_256(b"bmt!"));
        assert_eq!(blake2b_160(b"bmt").len(), 20);
    }
}
