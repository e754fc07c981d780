//! Bounded event bus with worker pool and retry

use crate::subscriptions::{DeliveryMethod, Subscription, SubscriptionFilter, SubscriptionTransport};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::utils::linear_backoff_ms;
use wtm_common::{Error, EventType, NetworkEvent, RealtimeConfig, Result};

/// Hard publish timeout; publication never blocks longer than this
const PUBLISH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
const RETRY_TICK_SECS: u64 = 60;

/// Per-type event processing hook
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &NetworkEvent) -> Result<()>;
}

/// Updater counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct RealtimeStats {
    pub published: u64,
    pub processed: u64,
    pub failed_updates: u64,
    pub retried: u64,
    pub dropped_after_retries: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub throttled_deliveries: u64,
    pub active_subscriptions: usize,
    pub pending_failed: usize,
    pub avg_processing_latency_ms: f64,
}

struct FailedRecord {
    event: NetworkEvent,
    retries: u32,
    next_retry: DateTime<Utc>,
}

/// Realtime updater component
pub struct RealtimeUpdater {
    config: RealtimeConfig,
    tx: mpsc::Sender<NetworkEvent>,
    rx: Arc<Mutex<mpsc::Receiver<NetworkEvent>>>,
    handlers: Arc<RwLock<HashMap<EventType, Arc<dyn EventHandler>>>>,
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
    transports: Arc<RwLock<HashMap<DeliveryMethod, Arc<dyn SubscriptionTransport>>>>,
    failed: Arc<Mutex<VecDeque<FailedRecord>>>,
    batch: Arc<Mutex<Vec<NetworkEvent>>>,
    published: AtomicU64,
    processed: AtomicU64,
    failed_updates: AtomicU64,
    retried: AtomicU64,
    dropped_after_retries: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    throttled_deliveries: AtomicU64,
    latency_total_ms: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RealtimeUpdater {
    pub fn new(config: RealtimeConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(RealtimeUpdater {
            config,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            transports: Arc::new(RwLock::new(HashMap::new())),
            failed: Arc::new(Mutex::new(VecDeque::new())),
            batch: Arc::new(Mutex::new(Vec::new())),
            published: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed_updates: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dropped_after_retries: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            throttled_deliveries: AtomicU64::new(0),
            latency_total_ms: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Register the processing hook for an event type
    pub async fn register_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.insert(event_type, handler);
    }

    /// Register a delivery transport
    pub async fn register_transport(&self, transport: Arc<dyn SubscriptionTransport>) {
        self.transports.write().await.insert(transport.method(), transport);
    }

    /// Launch the worker pool, retry processor and batcher
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("realtime updater already running".to_string()));
        }
        info!(workers = self.config.worker_pool_size, "Starting realtime updater");

        for worker_id in 0..self.config.worker_pool_size {
            let updater = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    let event = {
                        let mut rx = updater.rx.lock().await;
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            event = rx.recv() => event,
                        }
                    };
                    let Some(event) = event else { return };
                    updater.process_event(event, worker_id).await;
                }
            }));
        }

        {
            let updater = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(RETRY_TICK_SECS));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => {
                            updater.run_retry_pass_once().await;
                            updater.deactivate_idle_subscriptions().await;
                        }
                    }
                }
            }));
        }

        if self.config.enable_batching {
            let updater = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    interval(std::time::Duration::from_millis(updater.config.batch_timeout_ms));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => updater.flush_batch_once().await,
                    }
                }
            }));
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("realtime updater not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Realtime updater stopped");
        Ok(())
    }

    /// Publish one event to the bus
    ///
    /// Stamps id and timestamp when absent. Fails with
    /// `ResourceExhausted` after the one-second send timeout rather
    /// than blocking indefinitely.
    pub async fn publish_update(&self, mut event: NetworkEvent) -> Result<()> {
        event.ensure_stamped();

        if self.config.enable_batching {
            let mut batch = self.batch.lock().await;
            if batch.len() >= self.config.channel_buffer_size {
                return Err(Error::ResourceExhausted("batch buffer full".to_string()));
            }
            batch.push(event);
            self.published.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.tx.send_timeout(event, PUBLISH_TIMEOUT).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(Error::ResourceExhausted(
                "event channel full after send timeout".to_string(),
            )),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(Error::Realtime("event channel closed".to_string()))
            }
        }
    }

    /// Flush the accumulated batch to the workers as a group
    pub async fn flush_batch_once(&self) {
        let drained: Vec<NetworkEvent> = {
            let mut batch = self.batch.lock().await;
            let take = batch.len().min(self.config.batch_size);
            batch.drain(..take).collect()
        };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "Flushing event batch");
        for event in drained {
            // Batched processing is not atomic; a full channel fails
            // events individually.
            if self.tx.send_timeout(event, PUBLISH_TIMEOUT).await.is_err() {
                self.failed_updates.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Handle one event and fan it out to subscribers
    async fn process_event(&self, event: NetworkEvent, worker_id: usize) {
        let started = std::time::Instant::now();

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&event.event_type).cloned()
        };
        if let Some(handler) = handler {
            if let Err(e) = handler.handle(&event).await {
                self.failed_updates.fetch_add(1, Ordering::Relaxed);
                warn!(worker = worker_id, "Event handler failed: {}", e);
                self.record_failure(event).await;
                return;
            }
        }

        self.fanout(&event).await;

        self.processed.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Deliver an event to every matching subscription in parallel
    async fn fanout(&self, event: &NetworkEvent) {
        let now = Utc::now();
        let candidates: Vec<Subscription> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .filter(|s| s.matches(event))
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return;
        }

        let mut deliveries = Vec::new();
        for subscription in candidates {
            if subscription.throttled(now) {
                self.throttled_deliveries.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let transport = {
                let transports = self.transports.read().await;
                transports.get(&subscription.method).cloned()
            };
            let shaped = subscription.shape_event(event);
            deliveries.push(async move {
                let outcome = match &transport {
                    Some(transport) => transport.deliver(&subscription, &shaped).await,
                    None => Err(Error::Transport(format!(
                        "no transport for {:?}",
                        subscription.method
                    ))),
                };
                (subscription.id, outcome)
            });
        }

        for (subscription_id, outcome) in join_all(deliveries).await {
            let mut subscriptions = self.subscriptions.write().await;
            let Some(subscription) = subscriptions.get_mut(&subscription_id) else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    subscription.delivered_count += 1;
                    subscription.last_delivery = Some(now);
                    self.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    subscription.failure_count += 1;
                    self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(subscription = %subscription_id, "Delivery failed: {}", e);
                }
            }
        }
    }

    async fn record_failure(&self, event: NetworkEvent) {
        let mut failed = self.failed.lock().await;
        if failed.len() >= self.config.channel_buffer_size {
            failed.pop_front();
            self.dropped_after_retries.fetch_add(1, Ordering::Relaxed);
        }
        let next_retry = Utc::now()
            + Duration::milliseconds(linear_backoff_ms(self.config.retry_backoff_ms, 0) as i64);
        failed.push_back(FailedRecord {
            event,
            retries: 0,
            next_retry,
        });
    }

    /// Re-enqueue failed events whose backoff has elapsed
    pub async fn run_retry_pass_once(&self) {
        let now = Utc::now();
        let due: Vec<FailedRecord> = {
            let mut failed = self.failed.lock().await;
            let mut due = Vec::new();
            let mut keep = VecDeque::new();
            while let Some(record) = failed.pop_front() {
                if record.next_retry <= now {
                    due.push(record);
                } else {
                    keep.push_back(record);
                }
            }
            *failed = keep;
            due
        };

        for mut record in due {
            if record.retries >= self.config.max_retries {
                self.dropped_after_retries.fetch_add(1, Ordering::Relaxed);
                warn!(event = %record.event.id, "Event dropped after max retries");
                continue;
            }
            record.retries += 1;
            self.retried.fetch_add(1, Ordering::Relaxed);
            match self.tx.try_send(record.event.clone()) {
                Ok(()) => {}
                Err(_) => {
                    record.next_retry = now
                        + Duration::milliseconds(
                            linear_backoff_ms(self.config.retry_backoff_ms, record.retries) as i64,
                        );
                    self.failed.lock().await.push_back(record);
                }
            }
        }
    }

    /// Register a subscription, up to the configured cap
    pub async fn subscribe(
        &self,
        client_id: &str,
        filter: SubscriptionFilter,
        method: DeliveryMethod,
        endpoint: &str,
    ) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.len() >= self.config.max_subscriptions {
            return Err(Error::ResourceExhausted(format!(
                "subscription cap of {} reached",
                self.config.max_subscriptions
            )));
        }
        let subscription = Subscription::new(client_id, filter, method, endpoint);
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        info!(subscription = %subscription.id, client = client_id, "Subscription created");
        Ok(subscription)
    }

    /// Deactivate and remove a subscription
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))
    }

    /// Deactivate subscriptions idle past the timeout
    pub async fn deactivate_idle_subscriptions(&self) {
        let cutoff = Utc::now() - Duration::seconds(self.config.subscription_timeout_secs as i64);
        let mut subscriptions = self.subscriptions.write().await;
        for subscription in subscriptions.values_mut() {
            if !subscription.active {
                continue;
            }
            let reference = subscription.last_delivery.unwrap_or(subscription.created_at);
            if reference < cutoff {
                subscription.active = false;
                debug!(subscription = %subscription.id, "Subscription idle, deactivated");
            }
        }
    }

    /// Deep copy of one subscription
    pub async fn subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(subscription_id).cloned()
    }

    pub async fn stats(&self) -> RealtimeStats {
        let processed = self.processed.load(Ordering::Relaxed);
        let latency_total = self.latency_total_ms.load(Ordering::Relaxed);
        RealtimeStats {
            published: self.published.load(Ordering::Relaxed),
            processed,
            failed_updates: self.failed_updates.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped_after_retries: self.dropped_after_retries.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            throttled_deliveries: self.throttled_deliveries.load(Ordering::Relaxed),
            active_subscriptions: self
                .subscriptions
                .read()
                .await
                .values()
                .filter(|s| s.active)
                .count(),
            pending_failed: self.failed.lock().await.len(),
            avg_processing_latency_ms: if processed > 0 {
                latency_total as f64 / processed as f64
            } else {
                0.0
            },
        }
    }
}
