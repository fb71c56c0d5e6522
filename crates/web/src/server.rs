//! Web server implementation

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use docuchat_common::{AuthBroker, PushSender, SubscriberStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::WebServerConfig;
use crate::push::WebPushSender;
use crate::{access, approval, chat, documents, scrape};

/// Multipart framing on top of the raw upload limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state of all handlers
pub struct AppState {
    pub cfg: WebServerConfig,
    pub broker: Arc<AuthBroker>,
    pub subscribers: Arc<SubscriberStore>,
    /// Outbound HTTP (scraping, chat upstream)
    pub http: reqwest::Client,
}

/// Web server
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

pub async fn serve(addr: SocketAddr, cfg: WebServerConfig) -> anyhow::Result<()> {
    let server = WebServer::new(cfg)?;
    server.serve(addr).await
}

impl WebServer {
    /// Create a web server delivering notifications through web push.
    /// Must be called inside a tokio runtime (the request sweeper is spawned here).
    pub fn new(cfg: WebServerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let sender = Arc::new(WebPushSender::new(http.clone(), &cfg.push));
        Self::with_parts(cfg, http, sender)
    }

    /// Create a web server with a custom push transport.
    pub fn with_push_sender(
        cfg: WebServerConfig,
        sender: Arc<dyn PushSender>,
    ) -> anyhow::Result<Self> {
        Self::with_parts(cfg, reqwest::Client::new(), sender)
    }

    fn with_parts(
        cfg: WebServerConfig,
        http: reqwest::Client,
        sender: Arc<dyn PushSender>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;

        let subscribers = Arc::new(SubscriberStore::new());
        let broker = Arc::new(AuthBroker::new(
            cfg.broker.to_broker_config(),
            subscribers.clone(),
            sender,
            cfg.push.notification.clone(),
        ));
        broker.spawn_sweeper();

        Ok(Self {
            state: Arc::new(AppState {
                cfg,
                broker,
                subscribers,
                http,
            }),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Create router
    pub fn router(&self) -> Router {
        let upload_limit = self.state.cfg.documents.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

        // Gated by the access password when one is configured
        let protected_routes = Router::new()
            // Push approval
            .route("/api/push/auth", post(approval::auth_handler))
            .route(
                "/api/push/subscription",
                get(approval::subscription_count_handler).post(approval::subscribe_handler),
            )
            .route("/api/push/vapid-public-key", get(approval::vapid_public_key_handler))

            // Content sources
            .route(
                "/api/process-document",
                post(documents::process_document_handler)
                    .layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/api/scrape", post(scrape::scrape_handler))

            // Conversation
            .route("/api/chat", post(chat::chat_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                access::require_password,
            ));

        // Public routes (no password required)
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/auth/password", post(access::password_handler))
            .merge(protected_routes)
            .fallback(not_found_handler)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Docuchat web server starting on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "docuchat-web",
        "version": docuchat_common::VERSION
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}
