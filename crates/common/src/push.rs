//! Push delivery abstraction.
//!
//! The broker only needs to hand an opaque payload to a subscriber; the
//! transport (web push, a test recorder, ...) lives behind this trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Subscriber;

/// Delivers one notification payload to one subscriber.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Send `payload` to `subscriber`. A failure only concerns this subscriber.
    async fn send_notification(&self, subscriber: &Subscriber, payload: &[u8]) -> Result<()>;
}
