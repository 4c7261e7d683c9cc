//! Payment request model.
//!
//! A [`PaymentRequest`] is created when the authority issues a signed
//! authorization and is never deleted: it doubles as the audit record of the
//! purchase. At most one non-terminal request may exist per [`PaymentKey`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ChainId, PaymentId, ProductId, RequestStatus, TransactionId, U256, UserId};

/// Uniqueness key of a non-terminal payment: `(user, tag, context hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentKey {
    pub user_id: UserId,
    /// Feature-defined grouping (e.g. `"shop"`, `"crafting"`).
    pub tag: String,
    /// Hex SHA-256 of the canonical JSON of the request context.
    pub context_hash: String,
}

impl PaymentKey {
    #[must_use]
    pub fn new(user_id: UserId, tag: impl Into<String>, context: &serde_json::Value) -> Self {
        Self {
            user_id,
            tag: tag.into(),
            context_hash: context_hash(context),
        }
    }
}

/// Hash of a request context over its canonical JSON form.
#[must_use]
pub fn context_hash(context: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(context, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(b"paygate:context:v1:");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Object keys are emitted sorted, independent of `serde_json/preserve_order`.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// What a game feature asks the authority for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub tag: String,
    /// Feature-specific data handed back to the fulfillment action.
    pub context: serde_json::Value,
    /// The paying wallet.
    pub address: String,
    pub chain: ChainId,
}

impl PaymentOrder {
    #[must_use]
    pub fn key(&self) -> PaymentKey {
        PaymentKey::new(self.user_id, self.tag.clone(), &self.context)
    }
}

/// A persisted payment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: PaymentId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub tag: String,
    pub context: serde_json::Value,
    pub context_hash: String,
    /// Paying wallet address (canonical form).
    pub address: String,
    /// Price in the chain's native fixed-point unit.
    pub price: U256,
    /// Anti-replay nonce read from the gateway contract.
    pub nonce: U256,
    /// UNIX seconds after which the contract refuses the authorization.
    pub deadline: u64,
    pub chain: ChainId,
    /// Authorization signature; empty until signing completes.
    pub signature: String,
    pub transaction_id: Option<TransactionId>,
    pub block_number: Option<u64>,
    pub status: RequestStatus,
    /// Set exactly once, after the fulfillment action ran.
    pub claimed: bool,
    /// Held by the worker running the fulfillment action.
    #[serde(default)]
    pub fulfillment_lease: Option<FulfillmentLease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    /// The uniqueness key this request occupies while non-terminal.
    #[must_use]
    pub fn key(&self) -> PaymentKey {
        PaymentKey {
            user_id: self.user_id,
            tag: self.tag.clone(),
            context_hash: self.context_hash.clone(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Settled on-chain but the fulfillment action has not completed.
    #[must_use]
    pub fn awaits_fulfillment(&self) -> bool {
        self.status == RequestStatus::Success && !self.claimed
    }

    /// The payload returned to the client for on-chain submission.
    #[must_use]
    pub fn authorization(&self) -> PaymentAuthorization {
        PaymentAuthorization {
            signature: self.signature.clone(),
            product_id: self.product_id.clone(),
            price: self.price,
            nonce: self.nonce,
            deadline: self.deadline,
            payment_id: self.id,
        }
    }
}

/// Exclusive right to run one payment's fulfillment action.
///
/// Workers sharing a store race for it with a conditional write; an expired
/// lease (the holder crashed mid-action) may be taken over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl FulfillmentLease {
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Signed payload the client submits to the gateway contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub signature: String,
    pub product_id: ProductId,
    pub price: U256,
    pub nonce: U256,
    pub deadline: u64,
    pub payment_id: PaymentId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_hash_ignores_key_order() {
        let a = json!({"recipe": 7, "slot": 2});
        let b = json!({"slot": 2, "recipe": 7});
        assert_eq!(context_hash(&a), context_hash(&b));
        assert_ne!(context_hash(&a), context_hash(&json!({"recipe": 8, "slot": 2})));
    }

    #[test]
    fn key_distinguishes_tags() {
        let user = UserId::new();
        let ctx = json!({});
        assert_ne!(
            PaymentKey::new(user, "shop", &ctx),
            PaymentKey::new(user, "crafting", &ctx)
        );
        assert_eq!(
            PaymentKey::new(user, "shop", &ctx),
            PaymentKey::new(user, "shop", &ctx)
        );
    }

    #[test]
    fn lease_expires() {
        let now = Utc::now();
        let lease = FulfillmentLease {
            owner: "worker-a".into(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(lease.is_live(now));
        assert!(!lease.is_live(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn authorization_uses_camel_case() {
        let auth = PaymentAuthorization {
            signature: "0x01".into(),
            product_id: ProductId::new("gem_pack"),
            price: U256::from(5u64),
            nonce: U256::ZERO,
            deadline: 1_700_000_000,
            payment_id: PaymentId::new(),
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert!(json.get("productId").is_some());
        assert!(json.get("paymentId").is_some());
    }
}
