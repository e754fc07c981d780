//! Realtime event bus
//!
//! Bounded multi-producer/multi-consumer bus with a worker pool,
//! per-type handlers, failed-event retry with backoff, optional
//! batching, and throttled subscriber fanout.

pub mod subscriptions;
pub mod updater;

pub use subscriptions::{
    DeliveryMethod, Subscription, SubscriptionFilter, SubscriptionTransport, WebhookDelivery,
};
pub use updater::{EventHandler, RealtimeStats, RealtimeUpdater};
