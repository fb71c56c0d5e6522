//! Docuchat Common Library
//!
//! Shared types, the subscriber registry and the push-approval broker.

pub mod broker;
pub mod error;
pub mod push;
pub mod subscribers;
pub mod types;

// Re-export commonly used types
pub use broker::{AuthBroker, BrokerConfig};
pub use error::{Error, Result};
pub use push::PushSender;
pub use subscribers::SubscriberStore;
pub use types::*;

/// Docuchat version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
