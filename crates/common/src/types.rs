//! Core types for Docuchat

use serde::{Deserialize, Serialize};

/// Identifier of a pending approval request, e.g. `auth_1718000000000_k3j9x0q2a`.
pub type AuthRequestId = String;

/// Encryption material of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberKeys {
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

/// A push-notification delivery endpoint, as produced by the browser's
/// `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Push service endpoint URL. Identifies the subscriber.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    pub keys: SubscriberKeys,
}

/// Terminal result of an approval request as seen by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Approved,
    Denied,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl AuthOutcome {
    pub fn is_approved(self) -> bool {
        matches!(self, AuthOutcome::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthOutcome::Approved => "approved",
            AuthOutcome::Denied => "denied",
            AuthOutcome::TimedOut => "timeout",
        }
    }
}

impl std::fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visible text and icons of the approval notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_icon")]
    pub badge: String,
}

fn default_title() -> String {
    "Document Assistant Authentication".to_string()
}

fn default_body() -> String {
    "Please approve access to chat with your documents".to_string()
}

fn default_icon() -> String {
    "/blog.png".to_string()
}

impl Default for NotificationTemplate {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            icon: default_icon(),
            badge: default_icon(),
        }
    }
}

/// JSON body delivered to the service worker for an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "requestId")]
    pub request_id: AuthRequestId,
    #[serde(rename = "type")]
    pub kind: String,
}

impl NotificationPayload {
    pub fn auth_request(template: &NotificationTemplate, request_id: &str) -> Self {
        Self {
            title: template.title.clone(),
            body: template.body.clone(),
            icon: template.icon.clone(),
            badge: template.badge.clone(),
            data: NotificationData {
                request_id: request_id.to_string(),
                kind: "auth_request".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_parses_browser_json() {
        let json = r#"{
            "endpoint": "https://push.example.com/send/abc",
            "expirationTime": null,
            "keys": { "p256dh": "BNcR", "auth": "tBHI" }
        }"#;
        let sub: Subscriber = serde_json::from_str(json).unwrap();
        assert_eq!(sub.endpoint, "https://push.example.com/send/abc");
        assert_eq!(sub.expiration_time, None);
        assert_eq!(sub.keys.auth, "tBHI");
    }

    #[test]
    fn test_payload_shape() {
        let payload =
            NotificationPayload::auth_request(&NotificationTemplate::default(), "auth_1_x");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["data"]["requestId"], "auth_1_x");
        assert_eq!(value["data"]["type"], "auth_request");
        assert_eq!(value["icon"], "/blog.png");
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(serde_json::to_value(AuthOutcome::TimedOut).unwrap(), "timeout");
        assert_eq!(AuthOutcome::Denied.to_string(), "denied");
        assert!(AuthOutcome::Approved.is_approved());
    }
}
