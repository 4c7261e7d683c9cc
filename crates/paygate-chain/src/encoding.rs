//! Canonical authorization payload encoding and signing.
//!
//! The gateway and reward-token contracts rebuild the exact byte string the
//! server signed, so the encoding rule below is part of the on-chain
//! protocol. Each argument is classified, in order:
//!
//! 1. a string shaped like an address (`0x` + 40 hex digits) -> `address`
//! 2. an integer -> `uint256`
//! 3. any other string starting with `0x` -> raw `bytes`
//! 4. anything else -> `string`
//!
//! The classified values are packed (`abi.encodePacked`), hashed with
//! keccak-256, and the 32-byte digest is signed as an EIP-191 personal
//! message.

use std::fmt;
use std::str::FromStr;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, Signature, keccak256};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;

use paygate_types::constants::HEX_PREFIX;
use paygate_types::{PaygateError, Result, U256};

/// One argument of a signed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignValue {
    Text(String),
    Integer(U256),
}

impl From<&str> for SignValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SignValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<U256> for SignValue {
    fn from(value: U256) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for SignValue {
    fn from(value: u64) -> Self {
        Self::Integer(U256::from(value))
    }
}

fn has_address_shape(value: &str) -> bool {
    value
        .strip_prefix(HEX_PREFIX)
        .is_some_and(|h| h.len() == 40 && h.bytes().all(|b| b.is_ascii_hexdigit()))
}

impl SignValue {
    /// The ABI value this argument is encoded as.
    pub fn classify(&self) -> Result<DynSolValue> {
        match self {
            Self::Text(s) if has_address_shape(s) => Address::from_str(s)
                .map(DynSolValue::Address)
                .map_err(|e| PaygateError::InvalidAddress(format!("{s}: {e}"))),
            Self::Integer(v) => Ok(DynSolValue::Uint(*v, 256)),
            Self::Text(s) if s.starts_with(HEX_PREFIX) => hex::decode(&s[HEX_PREFIX.len()..])
                .map(DynSolValue::Bytes)
                .map_err(|e| PaygateError::Signing(format!("bad hex argument {s}: {e}"))),
            Self::Text(s) => Ok(DynSolValue::String(s.clone())),
        }
    }
}

/// Packed encoding of the classified arguments.
pub fn encode_packed(values: &[SignValue]) -> Result<Vec<u8>> {
    let tokens = values
        .iter()
        .map(SignValue::classify)
        .collect::<Result<Vec<_>>>()?;
    Ok(DynSolValue::Tuple(tokens).abi_encode_packed())
}

/// keccak-256 of [`encode_packed`]: the digest the contracts recompute.
pub fn signing_hash(values: &[SignValue]) -> Result<B256> {
    Ok(keccak256(encode_packed(values)?))
}

/// Strict address check: `0x` + 40 hex digits, and if the digits are mixed
/// case they must carry a valid EIP-55 checksum.
#[must_use]
pub fn is_address(value: &str) -> bool {
    if !has_address_shape(value) {
        return false;
    }
    let digits = &value[HEX_PREFIX.len()..];
    let all_lower = !digits.bytes().any(|b| b.is_ascii_uppercase());
    let all_upper = !digits.bytes().any(|b| b.is_ascii_lowercase());
    all_lower || all_upper || Address::parse_checksummed(value, None).is_ok()
}

/// Validate and return the EIP-55 checksummed form of an address.
pub fn canonical_address(value: &str) -> Result<String> {
    if !is_address(value) {
        return Err(PaygateError::InvalidAddress(value.to_string()));
    }
    Address::from_str(value)
        .map(|a| a.to_checksum(None))
        .map_err(|e| PaygateError::InvalidAddress(format!("{value}: {e}")))
}

/// Check that `signature` is `address`'s EIP-191 signature over `nonce`.
///
/// Malformed input of any kind yields `false`.
#[must_use]
pub fn verify_sign(nonce: &str, signature: &str, address: &str) -> bool {
    let Ok(expected) = Address::from_str(address) else {
        return false;
    };
    let raw = signature.strip_prefix(HEX_PREFIX).unwrap_or(signature);
    let Ok(bytes) = hex::decode(raw) else {
        return false;
    };
    let Ok(sig) = Signature::try_from(bytes.as_slice()) else {
        return false;
    };
    sig.recover_address_from_msg(nonce.as_bytes())
        .is_ok_and(|recovered| recovered == expected)
}

/// The server's authorization key.
#[derive(Clone)]
pub struct AuthoritySigner {
    signer: PrivateKeySigner,
}

impl AuthoritySigner {
    /// Load a key from a hex string, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = key.trim();
        let key = key.strip_prefix(HEX_PREFIX).unwrap_or(key);
        key.parse::<PrivateKeySigner>()
            .map(|signer| Self { signer })
            .map_err(|e| PaygateError::Signing(format!("invalid private key: {e}")))
    }

    /// Load a key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let key = std::env::var(var).map_err(|_| {
            PaygateError::Configuration(format!("signer key variable {var} is not set"))
        })?;
        Self::from_hex(&key)
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign the canonical encoding of `values`; returns `0x`-prefixed r||s||v.
    pub async fn sign(&self, values: &[SignValue]) -> Result<String> {
        let digest = signing_hash(values)?;
        let signature = self
            .signer
            .sign_message(digest.as_slice())
            .await
            .map_err(|e| PaygateError::Signing(e.to_string()))?;
        Ok(format!("{HEX_PREFIX}{}", hex::encode(signature.as_bytes())))
    }
}

impl fmt::Debug for AuthoritySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthoritySigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) const TEST_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::SignerSync;

    const ADDR: &str = "0x00000000000000000000000000000000000000aa";

    #[test]
    fn classification_order() {
        assert!(matches!(
            SignValue::from(ADDR).classify().unwrap(),
            DynSolValue::Address(_)
        ));
        assert!(matches!(
            SignValue::from(7u64).classify().unwrap(),
            DynSolValue::Uint(v, 256) if v == U256::from(7u64)
        ));
        assert!(matches!(
            SignValue::from("0xdeadbeef").classify().unwrap(),
            DynSolValue::Bytes(ref b) if b == &[0xde, 0xad, 0xbe, 0xef]
        ));
        // Numeric strings stay strings; only integers become uint256.
        assert!(matches!(
            SignValue::from("42").classify().unwrap(),
            DynSolValue::String(ref s) if s == "42"
        ));
        assert!(SignValue::from("0xabc").classify().is_err());
    }

    #[test]
    fn packed_layout() {
        let encoded = encode_packed(&[
            SignValue::from(ADDR),
            SignValue::from("gem"),
            SignValue::from(1u64),
        ])
        .unwrap();
        // 20-byte address, raw string bytes, 32-byte word.
        assert_eq!(encoded.len(), 20 + 3 + 32);
        assert_eq!(encoded[19], 0xaa);
        assert_eq!(&encoded[20..23], b"gem");
        assert_eq!(encoded[54], 1);
    }

    #[test]
    fn address_validation() {
        assert!(is_address(ADDR));
        assert!(is_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(is_address("0x52908400098527886E0F7030069857D2E4169EE7".to_lowercase().as_str()));
        assert!(is_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(!is_address("0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(!is_address("0x1234"));
        assert!(!is_address("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed00"));
        assert_eq!(
            canonical_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert!(canonical_address("nope").is_err());
    }

    #[tokio::test]
    async fn signature_recovers_to_signer() {
        let signer = AuthoritySigner::from_hex(TEST_KEY).unwrap();
        let values = [SignValue::from(ADDR), SignValue::from(U256::from(5u64))];
        let sig = signer.sign(&values).await.unwrap();
        assert_eq!(sig.len(), 2 + 130);

        let raw = hex::decode(&sig[2..]).unwrap();
        let parsed = Signature::try_from(raw.as_slice()).unwrap();
        let digest = signing_hash(&values).unwrap();
        assert_eq!(
            parsed.recover_address_from_msg(digest.as_slice()).unwrap(),
            signer.address()
        );
    }

    #[test]
    fn verify_sign_accepts_only_the_signer() {
        let key: PrivateKeySigner = TEST_KEY[2..].parse().unwrap();
        let sig = key.sign_message_sync(b"login-nonce-123").unwrap();
        let sig_hex = format!("0x{}", hex::encode(sig.as_bytes()));
        let me = key.address().to_string();

        assert!(verify_sign("login-nonce-123", &sig_hex, &me));
        assert!(!verify_sign("other-nonce", &sig_hex, &me));
        assert!(!verify_sign("login-nonce-123", &sig_hex, ADDR));
        assert!(!verify_sign("login-nonce-123", "0xzz", &me));
        assert!(!verify_sign("login-nonce-123", "0x1234", &me));
        assert!(!verify_sign("login-nonce-123", &sig_hex, "not-an-address"));
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(AuthoritySigner::from_hex("0x1234").is_err());
        assert!(AuthoritySigner::from_env("PAYGATE_TEST_UNSET_VARIABLE").is_err());
    }
}
