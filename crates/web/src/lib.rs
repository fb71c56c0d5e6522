//! Docuchat Web Server
//!
//! HTTP surface for chatting with documents: uploads, scraping, the chat
//! proxy, and push-notification approval of access requests.

pub mod access;
pub mod approval;
pub mod chat;
pub mod config;
pub mod documents;
pub mod error;
pub mod push;
pub mod scrape;
pub mod server;

pub use config::WebServerConfig;
pub use error::ApiError;
pub use push::WebPushSender;
pub use server::{AppState, WebServer};
