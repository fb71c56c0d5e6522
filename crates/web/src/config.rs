//! Web server configuration

use docuchat_common::{BrokerConfig, NotificationTemplate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    /// Listen address, e.g. 127.0.0.1:8080
    pub listen: String,

    /// Static password required on /api/* when set.
    pub access_password: Option<String>,

    /// Approval broker timings
    pub broker: BrokerSettings,

    /// Web push configuration
    pub push: PushConfig,

    /// Hosted language model
    pub chat: ChatConfig,

    /// Document upload limits
    pub documents: DocumentConfig,

    /// URL scraping
    pub scrape: ScrapeConfig,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            access_password: None,
            broker: BrokerSettings::default(),
            push: PushConfig::default(),
            chat: ChatConfig::default(),
            documents: DocumentConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

/// Approval broker timings, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub request_timeout_secs: u64,
    pub expiry_window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            expiry_window_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}

impl BrokerSettings {
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            expiry_window: Duration::from_secs(self.expiry_window_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Web push (VAPID) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Application server public key handed to browsers (base64url)
    pub vapid_public_key: Option<String>,
    /// Private signing key (base64url, raw P-256 scalar)
    pub vapid_private_key: Option<String>,
    /// VAPID `sub` claim (mailto: or https: URL)
    pub vapid_subject: String,
    /// Push message TTL in seconds
    pub ttl_secs: u32,
    pub notification: NotificationTemplate,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_subject: "mailto:admin@localhost".to_string(),
            ttl_secs: 60,
            notification: NotificationTemplate::default(),
        }
    }
}

/// Chat completion upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub max_upload_bytes: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
        }
    }
}

impl WebServerConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DOCUCHAT_WEB_ADDR") {
            self.listen = v;
        }
        if let Some(v) = get("DOCUCHAT_ACCESS_PASSWORD") {
            self.access_password = Some(v);
        }
        if let Some(v) = get("VAPID_PUBLIC_KEY") {
            self.push.vapid_public_key = Some(v);
        }
        if let Some(v) = get("VAPID_PRIVATE_KEY") {
            self.push.vapid_private_key = Some(v);
        }
        if let Some(v) = get("VAPID_SUBJECT") {
            self.push.vapid_subject = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.chat.api_key = Some(v);
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let b = &self.broker;
        if b.request_timeout_secs == 0 || b.expiry_window_secs == 0 || b.sweep_interval_secs == 0 {
            anyhow::bail!("broker timings must be non-zero");
        }
        if self.documents.max_upload_bytes == 0 {
            anyhow::bail!("documents.max_upload_bytes must be non-zero");
        }
        if self.access_password.as_deref().is_some_and(|p| p.is_empty()) {
            anyhow::bail!("access_password must not be empty when set");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
