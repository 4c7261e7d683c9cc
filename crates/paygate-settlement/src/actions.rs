//! Product → fulfillment lookup.
//!
//! Feature modules register one async action per product at startup. The
//! registry itself holds no per-payment state: running an action twice for
//! the same product is legal, and exactly-once delivery per payment is the
//! authority's job (the `claimed` flag).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use paygate_types::constants::PAYMENT_SUCCESS_EVENT;
use paygate_types::{
    ChainId, PaygateError, PaymentId, PaymentRequest, ProductId, Result, U256, UserId,
};

/// Everything a fulfillment action learns about the purchase it settles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub chain: ChainId,
    /// Context the feature supplied when it requested the payment.
    pub context: Value,
    /// Reward credit reported by the ledger event. Absent when a stored
    /// settlement is replayed after a failed fulfillment.
    pub reward_credit: Option<U256>,
}

impl Fulfillment {
    #[must_use]
    pub fn new(request: &PaymentRequest, reward_credit: Option<U256>) -> Self {
        Self {
            payment_id: request.id,
            user_id: request.user_id,
            product_id: request.product_id.clone(),
            chain: request.chain.clone(),
            context: request.context.clone(),
            reward_credit,
        }
    }
}

type ActionFn = Arc<dyn Fn(Fulfillment) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<ProductId, ActionFn>,
    events: HashMap<ProductId, String>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fulfillment for `product`, replacing any earlier one.
    pub fn register_action<F, Fut>(&mut self, product: ProductId, action: F) -> &mut Self
    where
        F: Fn(Fulfillment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let action: ActionFn = Arc::new(move |fulfillment| Box::pin(action(fulfillment)));
        self.actions.insert(product, action);
        self
    }

    /// Client notification sent once `product` is fulfilled.
    pub fn map_product_to_event(
        &mut self,
        product: ProductId,
        event: impl Into<String>,
    ) -> &mut Self {
        self.events.insert(product, event.into());
        self
    }

    #[must_use]
    pub fn contains(&self, product: &ProductId) -> bool {
        self.actions.contains_key(product)
    }

    /// Notification event for `product`, `paymentSuccess` when none is mapped.
    #[must_use]
    pub fn notification_event(&self, product: &ProductId) -> &str {
        self.events
            .get(product)
            .map_or(PAYMENT_SUCCESS_EVENT, String::as_str)
    }

    /// Run the action registered for `product`.
    ///
    /// # Errors
    /// `UnknownProduct` if nothing is registered; `FulfillmentFailed` wrapping
    /// whatever the action returned.
    pub async fn execute_action(
        &self,
        product: &ProductId,
        fulfillment: Fulfillment,
    ) -> Result<Value> {
        let action = self
            .actions
            .get(product)
            .cloned()
            .ok_or_else(|| PaygateError::UnknownProduct(product.clone()))?;
        action(fulfillment)
            .await
            .map_err(|e| PaygateError::FulfillmentFailed {
                product: product.clone(),
                reason: e.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("products", &self.actions.keys().collect::<Vec<_>>())
            .field("events", &self.events)
            .finish()
    }
}
