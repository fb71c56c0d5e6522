//! Push-notification approval broker.
//!
//! A requester registers a pending request, every subscriber is notified,
//! and the requester waits until a human approves or denies the request or
//! the timeout elapses. Three paths can end a pending request: an explicit
//! response, the requester's own deadline, and the periodic sweep. All of
//! them settle by removing the entry from the registry under the registry
//! lock; whichever removes it owns the one-shot continuation, every later
//! path finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::push::PushSender;
use crate::subscribers::SubscriberStore;
use crate::types::{AuthOutcome, AuthRequestId, NotificationPayload, NotificationTemplate};

const REQUEST_ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Broker timings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long `initiate` waits for a decision.
    pub request_timeout: Duration,
    /// Age after which the sweep expires a pending request.
    pub expiry_window: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            expiry_window: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// How a pending request was settled by someone other than its requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Approved,
    Denied,
    Expired,
}

impl From<Settlement> for AuthOutcome {
    fn from(s: Settlement) -> Self {
        match s {
            Settlement::Approved => AuthOutcome::Approved,
            Settlement::Denied => AuthOutcome::Denied,
            Settlement::Expired => AuthOutcome::TimedOut,
        }
    }
}

struct PendingAuthRequest {
    created_at: Instant,
    settle: oneshot::Sender<Settlement>,
}

/// Removes the registry entry if the waiting requester goes away early
/// (e.g. the HTTP client disconnected and the handler future was dropped).
struct Registration<'a> {
    broker: &'a AuthBroker,
    id: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.broker.take(self.id);
    }
}

/// Correlates approval requests with asynchronous responses.
pub struct AuthBroker {
    config: BrokerConfig,
    pending: Mutex<HashMap<AuthRequestId, PendingAuthRequest>>,
    subscribers: Arc<SubscriberStore>,
    sender: Arc<dyn PushSender>,
    notification: NotificationTemplate,
}

impl AuthBroker {
    pub fn new(
        config: BrokerConfig,
        subscribers: Arc<SubscriberStore>,
        sender: Arc<dyn PushSender>,
        notification: NotificationTemplate,
    ) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
            subscribers,
            sender,
            notification,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn subscribers(&self) -> &Arc<SubscriberStore> {
        &self.subscribers
    }

    /// Number of requests currently waiting for a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Ask every subscriber for approval and wait for the first decision.
    ///
    /// A decision that arrives while notifications are still being delivered
    /// is acted on immediately; outstanding deliveries are abandoned.
    pub async fn initiate(&self) -> AuthOutcome {
        let created_at = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        let id = self.register(created_at, tx);
        let _registration = Registration { broker: self, id: &id };

        let deadline = created_at + self.config.request_timeout;
        let fan_out = self.fan_out(&id);
        tokio::pin!(fan_out);
        let mut fanned_out = false;

        let decision = loop {
            tokio::select! {
                biased;
                settled = &mut rx => break Some(settled),
                _ = &mut fan_out, if !fanned_out => fanned_out = true,
                _ = tokio::time::sleep_until(deadline) => break None,
            }
        };

        let outcome = match decision {
            Some(Ok(settlement)) => settlement.into(),
            // Continuation dropped without a decision.
            Some(Err(_)) => AuthOutcome::TimedOut,
            None => self.settle_at_deadline(&id, rx).await,
        };

        info!("Auth request {} finished: {}", id, outcome);
        outcome
    }

    /// The requester's deadline passed. If the entry is still registered it
    /// times out; otherwise another path removed it first and its decision,
    /// already in flight on `rx`, wins.
    async fn settle_at_deadline(&self, id: &str, rx: oneshot::Receiver<Settlement>) -> AuthOutcome {
        if self.take(id).is_some() {
            return AuthOutcome::TimedOut;
        }
        match rx.await {
            Ok(settlement) => settlement.into(),
            Err(_) => AuthOutcome::TimedOut,
        }
    }

    /// Deliver a human decision for a pending request.
    pub fn respond(&self, request_id: &str, approved: bool) -> Result<()> {
        let entry = self
            .take(request_id)
            .ok_or_else(|| Error::unknown_auth_request(request_id))?;

        let settlement = if approved {
            Settlement::Approved
        } else {
            Settlement::Denied
        };
        debug!("Auth request {} settled by response: {:?}", request_id, settlement);

        // The requester may already be gone; the entry is removed either way.
        let _ = entry.settle.send(settlement);
        Ok(())
    }

    /// Expire every pending request older than the expiry window.
    /// Returns how many were expired.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(AuthRequestId, PendingAuthRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<AuthRequestId> = pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.created_at) > self.config.expiry_window)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let count = expired.len();
        for (id, entry) in expired {
            debug!(
                "Sweeping auth request {} (age {:?})",
                id,
                now.duration_since(entry.created_at)
            );
            let _ = entry.settle.send(Settlement::Expired);
        }
        count
    }

    /// Run `sweep` every `sweep_interval` for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let period = broker.config.sweep_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Auth request sweeper started (every {:?})", period);
            loop {
                ticker.tick().await;
                let expired = broker.sweep();
                if expired > 0 {
                    info!("Expired {} stale auth request(s)", expired);
                }
            }
        })
    }

    fn register(&self, created_at: Instant, settle: oneshot::Sender<Settlement>) -> AuthRequestId {
        let mut pending = self.pending.lock();
        let mut id = generate_request_id();
        while pending.contains_key(&id) {
            id = generate_request_id();
        }
        pending.insert(id.clone(), PendingAuthRequest { created_at, settle });
        debug!("Registered auth request {} ({} pending)", id, pending.len());
        id
    }

    /// Atomic pending -> settled transition: only one caller gets `Some`.
    fn take(&self, id: &str) -> Option<PendingAuthRequest> {
        self.pending.lock().remove(id)
    }

    async fn fan_out(&self, id: &str) {
        let subscribers = self.subscribers.list();
        if subscribers.is_empty() {
            debug!("No push subscribers registered for auth request {}", id);
            return;
        }

        let notification = NotificationPayload::auth_request(&self.notification, id);
        let payload = match serde_json::to_vec(&notification) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to encode notification for {}: {}", id, e);
                return;
            }
        };

        let deliveries = subscribers.iter().map(|subscriber| {
            let payload = &payload;
            async move {
                if let Err(e) = self.sender.send_notification(subscriber, payload).await {
                    warn!("Push to {} failed: {}", subscriber.endpoint, e);
                }
            }
        });
        futures::future::join_all(deliveries).await;
        debug!("Notified {} subscriber(s) for auth request {}", subscribers.len(), id);
    }
}

/// `auth_<unix millis>_<9 base-36 chars>`
pub fn generate_request_id() -> AuthRequestId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..REQUEST_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("auth_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Subscriber, SubscriberKeys};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    /// Records deliveries and forwards each request id it sees.
    struct RecordingSender {
        failing: HashSet<String>,
        delivered: Mutex<Vec<String>>,
        ids: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send_notification(&self, subscriber: &Subscriber, payload: &[u8]) -> Result<()> {
            if self.failing.contains(&subscriber.endpoint) {
                return Err(Error::PushDelivery("410 Gone".into()));
            }
            let payload: NotificationPayload = serde_json::from_slice(payload)?;
            self.delivered.lock().push(subscriber.endpoint.clone());
            let _ = self.ids.send(payload.data.request_id);
            Ok(())
        }
    }

    fn subscriber(endpoint: &str) -> Subscriber {
        Subscriber {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: SubscriberKeys {
                p256dh: "p".into(),
                auth: "a".into(),
            },
        }
    }

    fn test_broker(
        config: BrokerConfig,
        endpoints: &[&str],
        failing: &[&str],
    ) -> (Arc<AuthBroker>, Arc<RecordingSender>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Arc::new(RecordingSender {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            delivered: Mutex::new(Vec::new()),
            ids: tx,
        });
        let store = Arc::new(SubscriberStore::new());
        for e in endpoints {
            store.upsert(subscriber(e)).unwrap();
        }
        let broker = Arc::new(AuthBroker::new(
            config,
            store,
            sender.clone(),
            NotificationTemplate::default(),
        ));
        (broker, sender, rx)
    }

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "auth");
        assert!(parts[1].parse::<i64>().unwrap() > 1_700_000_000_000);
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));

        let many: HashSet<String> = (0..1000).map(|_| generate_request_id()).collect();
        assert_eq!(many.len(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_subscribers_times_out() {
        let (broker, _sender, _ids) = test_broker(BrokerConfig::default(), &[], &[]);

        let started = Instant::now();
        let outcome = broker.initiate().await;

        assert_eq!(outcome, AuthOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approve_before_timeout() {
        let (broker, sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a", "https://push/b"], &[]);

        let started = Instant::now();
        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });

        let first = ids.recv().await.unwrap();
        let second = ids.recv().await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("auth_"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        broker.respond(&first, true).unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::Approved);
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(sender.delivered.lock().len(), 2);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();
        broker.respond(&id, false).unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::Denied);
    }

    #[tokio::test]
    async fn test_respond_unknown_id() {
        let (broker, _sender, _ids) = test_broker(BrokerConfig::default(), &[], &[]);
        let err = broker.respond("auth_0_nothere00", true).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_response_not_found() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        broker.respond(&id, true).unwrap();
        let err = broker.respond(&id, false).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(waiting.await.unwrap(), AuthOutcome::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_after_timeout_not_found() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::TimedOut);
        assert!(broker.respond(&id, true).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_when_timer_does_not_fire() {
        let config = BrokerConfig {
            request_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let (broker, _sender, mut ids) = test_broker(config, &["https://push/a"], &[]);
        let sweeper = broker.spawn_sweeper();

        let started = Instant::now();
        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed > Duration::from_secs(30));
        assert!(elapsed <= Duration::from_secs(36));
        assert_eq!(broker.pending_count(), 0);
        assert!(broker.respond(&id, true).is_err());

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_requests() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(broker.sweep(), 0);
        assert_eq!(broker.pending_count(), 1);

        broker.respond(&id, true).unwrap();
        assert_eq!(waiting.await.unwrap(), AuthOutcome::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_does_not_stop_fan_out() {
        let (broker, sender, mut ids) = test_broker(
            BrokerConfig::default(),
            &["https://push/broken", "https://push/ok"],
            &["https://push/broken"],
        );

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();
        broker.respond(&id, true).unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::Approved);
        assert_eq!(*sender.delivered.lock(), vec!["https://push/ok".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_requester_clears_registry() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();
        assert_eq!(broker.pending_count(), 1);

        waiting.abort();
        let _ = waiting.await;
        assert_eq!(broker.pending_count(), 0);
        assert!(broker.respond(&id, true).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_settle_independently() {
        let (broker, _sender, mut ids) =
            test_broker(BrokerConfig::default(), &["https://push/a"], &[]);

        let first = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let first_id = ids.recv().await.unwrap();

        let second = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let second_id = ids.recv().await.unwrap();

        assert_ne!(first_id, second_id);
        assert_eq!(broker.pending_count(), 2);

        broker.respond(&second_id, false).unwrap();
        assert_eq!(broker.pending_count(), 1);
        broker.respond(&first_id, true).unwrap();
        assert_eq!(broker.pending_count(), 0);

        assert_eq!(first.await.unwrap(), AuthOutcome::Approved);
        assert_eq!(second.await.unwrap(), AuthOutcome::Denied);
    }

    /// Hands out the request id, then stalls like an unresponsive push service.
    struct StallingSender {
        stall: Duration,
        ids: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PushSender for StallingSender {
        async fn send_notification(&self, _subscriber: &Subscriber, payload: &[u8]) -> Result<()> {
            let payload: NotificationPayload = serde_json::from_slice(payload)?;
            let _ = self.ids.send(payload.data.request_id);
            tokio::time::sleep(self.stall).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_not_held_up_by_slow_delivery() {
        let (tx, mut ids) = mpsc::unbounded_channel();
        let store = Arc::new(SubscriberStore::new());
        store.upsert(subscriber("https://push/slow")).unwrap();
        let broker = Arc::new(AuthBroker::new(
            BrokerConfig::default(),
            store,
            Arc::new(StallingSender {
                stall: Duration::from_secs(45),
                ids: tx,
            }),
            NotificationTemplate::default(),
        ));

        let started = Instant::now();
        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        broker.respond(&id, true).unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::Approved);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_delivery_still_times_out() {
        let (tx, mut ids) = mpsc::unbounded_channel();
        let store = Arc::new(SubscriberStore::new());
        store.upsert(subscriber("https://push/slow")).unwrap();
        let broker = Arc::new(AuthBroker::new(
            BrokerConfig::default(),
            store,
            Arc::new(StallingSender {
                stall: Duration::from_secs(45),
                ids: tx,
            }),
            NotificationTemplate::default(),
        ));

        let started = Instant::now();
        let waiting = tokio::spawn({
            let broker = broker.clone();
            async move { broker.initiate().await }
        });
        let id = ids.recv().await.unwrap();

        assert_eq!(waiting.await.unwrap(), AuthOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(45));
        assert!(broker.respond(&id, true).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_to_decision_in_flight() {
        let (broker, _sender, _ids) = test_broker(BrokerConfig::default(), &[], &[]);
        let (tx, rx) = oneshot::channel();
        let id = broker.register(Instant::now(), tx);

        // A responder has removed the entry but not yet delivered its decision.
        let entry = broker.take(&id).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = entry.settle.send(Settlement::Approved);
        });

        assert_eq!(broker.settle_at_deadline(&id, rx).await, AuthOutcome::Approved);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_times_out_registered_request() {
        let (broker, _sender, _ids) = test_broker(BrokerConfig::default(), &[], &[]);
        let (tx, rx) = oneshot::channel();
        let id = broker.register(Instant::now(), tx);

        assert_eq!(broker.settle_at_deadline(&id, rx).await, AuthOutcome::TimedOut);
        assert_eq!(broker.pending_count(), 0);
    }
}
