//! Worker bus.
//!
//! [`WorkerBus`] provides one bounded inbox per worker address, with TTL
//! enforcement and address-scoped delivery: a worker can only read from
//! the [`WorkerInbox`] handle it received on registration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use declutter_types::bus::{BusError, Envelope};

/// Default inbox capacity per worker.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Receiving half of a worker's inbox.
pub struct WorkerInbox {
    address: String,
    rx: mpsc::Receiver<Envelope>,
}

impl WorkerInbox {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Receive the next live envelope, skipping expired ones.
    ///
    /// Returns `None` once the address is unregistered or the bus dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        while let Some(env) = self.rx.recv().await {
            if env.is_expired() {
                warn!(
                    msg_id = %env.id,
                    from = %env.from,
                    to = %env.to,
                    session_id = %env.message.session_id(),
                    "dropping expired bus message"
                );
                continue;
            }
            return Some(env);
        }
        None
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        while let Ok(env) = self.rx.try_recv() {
            if env.is_expired() {
                warn!(
                    msg_id = %env.id,
                    from = %env.from,
                    to = %env.to,
                    "dropping expired bus message"
                );
                continue;
            }
            return Some(env);
        }
        None
    }
}

/// Message bus connecting the coordinator and the stage workers.
///
/// Cheap to clone; all clones share the same registry. Sends use
/// `try_send`, so a full inbox is reported as backpressure instead of
/// blocking the sender.
#[derive(Clone)]
pub struct WorkerBus {
    inboxes: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
    inbox_capacity: usize,
}

impl WorkerBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inboxes: Arc::new(Mutex::new(HashMap::new())),
            inbox_capacity: capacity.max(1),
        }
    }

    /// Register `address` and return its inbox. Re-registering replaces
    /// the previous inbox; anything queued there is lost.
    pub async fn register(&self, address: &str) -> WorkerInbox {
        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        self.inboxes.lock().await.insert(address.to_string(), tx);
        debug!(address = %address, "worker registered on bus");
        WorkerInbox {
            address: address.to_string(),
            rx,
        }
    }

    pub async fn unregister(&self, address: &str) {
        if self.inboxes.lock().await.remove(address).is_some() {
            debug!(address = %address, "worker unregistered from bus");
        }
    }

    /// Deliver `env` to the inbox named by `env.to`.
    ///
    /// # Errors
    ///
    /// [`BusError::MessageExpired`] if the envelope is already stale,
    /// [`BusError::AddressNotFound`] if nobody is registered at `env.to`,
    /// [`BusError::InboxFull`] on backpressure.
    pub async fn send(&self, env: Envelope) -> Result<(), BusError> {
        if env.is_expired() {
            warn!(
                msg_id = %env.id,
                from = %env.from,
                to = %env.to,
                "dropping expired message before delivery"
            );
            return Err(BusError::MessageExpired { ttl: env.ttl });
        }

        let inboxes = self.inboxes.lock().await;
        let tx = inboxes
            .get(&env.to)
            .ok_or_else(|| BusError::AddressNotFound(env.to.clone()))?;

        tx.try_send(env).map_err(|e| match e {
            mpsc::error::TrySendError::Full(env) => BusError::InboxFull(env.to),
            mpsc::error::TrySendError::Closed(env) => BusError::AddressNotFound(env.to),
        })
    }

    pub async fn is_registered(&self, address: &str) -> bool {
        self.inboxes.lock().await.contains_key(address)
    }

    pub async fn registered(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inboxes.lock().await.keys().cloned().collect();
        out.sort();
        out
    }
}

impl Default for WorkerBus {
    fn default() -> Self {
        Self::new()
    }
}
