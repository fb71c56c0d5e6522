//! Registry of push-notification subscribers.
//!
//! Subscribers are keyed by endpoint URL. Re-registering an endpoint
//! replaces the stored keys in place; there is no removal path.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::Subscriber;

/// In-memory subscriber list, shared process-wide.
#[derive(Debug, Default)]
pub struct SubscriberStore {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl SubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, or replace the one with the same endpoint.
    pub fn upsert(&self, subscriber: Subscriber) -> Result<()> {
        if subscriber.endpoint.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "subscription endpoint is required".to_string(),
            ));
        }

        let mut subscribers = self.subscribers.write();
        match subscribers
            .iter()
            .position(|s| s.endpoint == subscriber.endpoint)
        {
            Some(idx) => {
                debug!("Replacing push subscription for {}", subscriber.endpoint);
                subscribers[idx] = subscriber;
            }
            None => {
                info!("Registered push subscription for {}", subscriber.endpoint);
                subscribers.push(subscriber);
            }
        }
        Ok(())
    }

    /// Snapshot of all subscribers.
    pub fn list(&self) -> Vec<Subscriber> {
        self.subscribers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}
