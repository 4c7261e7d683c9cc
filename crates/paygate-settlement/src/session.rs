//! Session notifications.
//!
//! The authority and the withdrawal ledger never talk to sockets. They call a
//! [`Notifier`]; the default one is [`SessionRegistry`], which fans a
//! notification out to every live listener the transport registered for
//! the user. Delivery is best-effort: a user with no open session simply
//! misses the push and sees the result on their next query.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use paygate_types::UserId;

/// Default per-listener queue depth.
const DEFAULT_LISTENER_CAPACITY: usize = 32;

/// A push to one user's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub payload: Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: UserId, event: &str, payload: Value);
}

/// Live session listeners keyed by user.
pub struct SessionRegistry {
    listeners: RwLock<HashMap<UserId, Vec<mpsc::Sender<Notification>>>>,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LISTENER_CAPACITY)
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a listener for `user_id`. Dropping the receiver unsubscribes.
    pub async fn subscribe(&self, user_id: UserId) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.listeners
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(tx);
        debug!(user_id = %user_id, "session listener registered");
        rx
    }

    /// Live listeners for `user_id`.
    pub async fn listener_count(&self, user_id: UserId) -> usize {
        self.listeners
            .read()
            .await
            .get(&user_id)
            .map_or(0, |l| l.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Push to every listener of `user_id`, pruning closed ones. Returns the
    /// number of listeners reached.
    pub async fn deliver(&self, user_id: UserId, notification: &Notification) -> usize {
        let mut listeners = self.listeners.write().await;
        let Some(senders) = listeners.get_mut(&user_id) else {
            trace!(user_id = %user_id, event = %notification.event, "no session listener");
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            match tx.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(
                        user_id = %user_id,
                        event = %notification.event,
                        "listener queue full, dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        if senders.is_empty() {
            listeners.remove(&user_id);
        }
        delivered
    }
}

#[async_trait]
impl Notifier for SessionRegistry {
    async fn notify_user(&self, user_id: UserId, event: &str, payload: Value) {
        let notification = Notification {
            event: event.to_string(),
            payload,
        };
        let delivered = self.deliver(user_id, &notification).await;
        debug!(user_id = %user_id, event, delivered, "user notified");
    }
}
