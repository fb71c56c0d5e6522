//! Web push delivery.
//!
//! Encrypts payloads (RFC 8291) and signs VAPID JWTs (RFC 8292) with the
//! `web-push` crate, then sends the HTTP request through a shared
//! `reqwest::Client` so connections are pooled across subscribers.

use async_trait::async_trait;
use docuchat_common::{Error, PushSender, Result, Subscriber};
use tracing::{debug, error};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::config::PushConfig;

/// Sends approval notifications to browser push services.
pub struct WebPushSender {
    client: reqwest::Client,
    vapid_private_key: Option<String>,
    subject: String,
    ttl: u32,
}

impl WebPushSender {
    pub fn new(client: reqwest::Client, cfg: &PushConfig) -> Self {
        if cfg.vapid_private_key.is_none() || cfg.vapid_public_key.is_none() {
            error!("VAPID keys not configured; push notifications will fail");
        }
        Self {
            client,
            vapid_private_key: cfg.vapid_private_key.clone(),
            subject: cfg.vapid_subject.clone(),
            ttl: cfg.ttl_secs,
        }
    }

    fn build_message(&self, subscriber: &Subscriber, payload: &[u8]) -> Result<WebPushMessage> {
        let private_key = self
            .vapid_private_key
            .as_deref()
            .ok_or_else(|| Error::PushDelivery("VAPID keys not configured".to_string()))?;

        let sub_info = SubscriptionInfo::new(
            &subscriber.endpoint,
            &subscriber.keys.p256dh,
            &subscriber.keys.auth,
        );

        let mut sig_builder = VapidSignatureBuilder::from_base64(private_key, &sub_info)
            .map_err(|e| Error::PushDelivery(format!("invalid VAPID key: {}", e)))?;
        sig_builder.add_claim("sub", self.subject.as_str());
        let signature = sig_builder
            .build()
            .map_err(|e| Error::PushDelivery(format!("failed to sign VAPID JWT: {}", e)))?;

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(self.ttl);

        builder
            .build()
            .map_err(|e| Error::PushDelivery(format!("failed to build push message: {}", e)))
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send_notification(&self, subscriber: &Subscriber, payload: &[u8]) -> Result<()> {
        let message = self.build_message(subscriber, payload)?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(urgency) = message.urgency {
            request = request.header("Urgency", urgency.to_string());
        }
        if let Some(topic) = message.topic {
            request = request.header("Topic", topic);
        }
        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");
            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }
            request = request.body(push_payload.content);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::PushDelivery(format!("push request failed: {}", e)))?;
        let status = response.status();

        if status.is_success() {
            debug!("Push delivered to {} ({})", subscriber.endpoint, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            404 | 410 => Err(Error::PushDelivery(format!(
                "subscription no longer valid (HTTP {})",
                status.as_u16()
            ))),
            code => Err(Error::PushDelivery(format!("HTTP {}: {}", code, body))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docuchat_common::SubscriberKeys;

    fn subscriber() -> Subscriber {
        Subscriber {
            endpoint: "https://push.example.invalid/send/abc".to_string(),
            expiration_time: None,
            keys: SubscriberKeys {
                p256dh: "BLc4xRzKlKORKWlbdgFaBrrPK3ydWAHo4M0gs0i1oEKgPpWC5cW8OCzVrOQRv-1npXRWk8udnW3oYhIO4475rds".to_string(),
                auth: "5I2Bu2oKdyy9CwL8QVF0NQ".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_missing_vapid_key_fails_delivery() {
        let sender = WebPushSender::new(reqwest::Client::new(), &PushConfig::default());
        let err = sender
            .send_notification(&subscriber(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PushDelivery(msg) if msg.contains("VAPID")));
    }

    #[test]
    fn test_invalid_vapid_key_rejected() {
        let cfg = PushConfig {
            vapid_private_key: Some("not a key".to_string()),
            ..Default::default()
        };
        let sender = WebPushSender::new(reqwest::Client::new(), &cfg);
        assert!(matches!(
            sender.build_message(&subscriber(), b"{}"),
            Err(Error::PushDelivery(_))
        ));
    }
}
