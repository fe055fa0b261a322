//! Publish/subscribe fabric for cross-role and administrative notifications.
//!
//! Each subscriber owns a bounded mpsc queue. Publishing never waits on a
//! subscriber: when its queue is full, events go to a bounded per-subscriber
//! overflow queue that a single background task drains in order. A full
//! overflow queue drops its oldest event. Subscriptions drop events whose id
//! they already delivered.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::channel::ChannelName;
use super::event::{BusEvent, OutboundEvent};
use crate::config::BusConfig;
use crate::dedup::DedupWindow;
use crate::error::NotificationError;

/// How many delivered event ids a subscription remembers for deduplication.
const DEDUP_WINDOW: usize = 1024;

/// Anything events can be published to.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish an event. Returns how many subscribers it was handed to.
    async fn publish(
        &self,
        channel: &ChannelName,
        event: OutboundEvent,
    ) -> Result<usize, NotificationError>;
}

#[derive(Default)]
struct Overflow {
    queue: VecDeque<BusEvent>,
    draining: bool,
}

enum Offer {
    Delivered,
    Spilled,
    Closed,
}

/// One subscriber's delivery path.
struct Subscriber {
    tx: mpsc::Sender<BusEvent>,
    overflow: Arc<Mutex<Overflow>>,
}

impl Subscriber {
    fn new(tx: mpsc::Sender<BusEvent>) -> Self {
        Self {
            tx,
            overflow: Arc::new(Mutex::new(Overflow::default())),
        }
    }

    /// Hand `event` over without waiting. While a drain is in progress every
    /// event queues behind it, so delivery order is kept.
    fn offer(&self, event: BusEvent, channel: &str, capacity: usize) -> Offer {
        let mut overflow = lock(&self.overflow);
        let event = if overflow.draining {
            event
        } else {
            match self.tx.try_send(event) {
                Ok(()) => return Offer::Delivered,
                Err(mpsc::error::TrySendError::Closed(_)) => return Offer::Closed,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    overflow.draining = true;
                    tokio::spawn(drain(
                        self.tx.clone(),
                        Arc::clone(&self.overflow),
                        channel.to_string(),
                    ));
                    warn!(channel, "Subscriber buffer full, spilling to overflow queue");
                    event
                }
            }
        };

        if overflow.queue.len() >= capacity {
            overflow.queue.pop_front();
            warn!(channel, capacity, "Subscriber overflow full, dropped oldest event");
        }
        overflow.queue.push_back(event);
        Offer::Spilled
    }

    fn pending_overflow(&self) -> usize {
        lock(&self.overflow).queue.len()
    }

    fn clear_overflow(&self) {
        lock(&self.overflow).queue.clear();
    }
}

fn lock(overflow: &Mutex<Overflow>) -> MutexGuard<'_, Overflow> {
    overflow.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move overflowed events into the subscriber's queue as it makes room.
/// Ends once the overflow is empty or the subscriber is gone.
async fn drain(tx: mpsc::Sender<BusEvent>, overflow: Arc<Mutex<Overflow>>, channel: String) {
    loop {
        let next = {
            let mut state = lock(&overflow);
            match state.queue.pop_front() {
                Some(event) => event,
                None => {
                    state.draining = false;
                    return;
                }
            }
        };
        if tx.send(next).await.is_err() {
            let mut state = lock(&overflow);
            state.queue.clear();
            state.draining = false;
            debug!(channel = %channel, "Subscriber went away before overflow was drained");
            return;
        }
    }
}

/// In-process notification bus.
pub struct NotificationBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
    closed: AtomicBool,
}

impl NotificationBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: config.subscriber_buffer.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to a channel.
    pub async fn subscribe(&self, channel: &ChannelName) -> Subscription {
        let key = channel.to_string();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(Subscriber::new(tx));
        debug!(channel = %key, "Subscriber added");
        Subscription::new(key, rx)
    }

    /// Subscribe with a handler that runs on its own task for every
    /// (deduplicated) event. The task ends when the bus closes.
    pub async fn subscribe_with<F, Fut>(&self, channel: &ChannelName, handler: F) -> JoinHandle<()>
    where
        F: Fn(BusEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(channel).await;
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event).await;
            }
        })
    }

    /// Publish an event to every live subscriber of `channel`.
    ///
    /// Publishing to a channel without subscribers is not an error.
    pub async fn publish_event(
        &self,
        channel: &ChannelName,
        event: OutboundEvent,
    ) -> Result<usize, NotificationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotificationError::Closed);
        }

        let key = channel.to_string();
        let bus_event = BusEvent::new(key.clone(), event);
        let mut delivered = 0;
        let mut saw_closed = false;

        {
            let subscribers = self.subscribers.read().await;
            if let Some(subscribers) = subscribers.get(&key) {
                for subscriber in subscribers {
                    match subscriber.offer(bus_event.clone(), &key, self.buffer) {
                        Offer::Delivered | Offer::Spilled => delivered += 1,
                        Offer::Closed => saw_closed = true,
                    }
                }
            }
        }

        if saw_closed {
            self.prune(&key).await;
        }

        debug!(
            channel = %key,
            event = bus_event.event.name(),
            id = %bus_event.id,
            delivered,
            "Published event"
        );
        Ok(delivered)
    }

    /// Live direct channels whose name starts with `prefix`.
    pub async fn channels_with_prefix(&self, prefix: &str) -> Vec<ChannelName> {
        let subscribers = self.subscribers.read().await;
        let mut channels: Vec<ChannelName> = subscribers
            .iter()
            .filter(|(name, subscribers)| {
                name.starts_with(prefix) && subscribers.iter().any(|s| !s.tx.is_closed())
            })
            .filter_map(|(name, _)| ChannelName::parse(name))
            .filter(|channel| matches!(channel, ChannelName::Direct { .. }))
            .collect();
        channels.sort_by_key(|c| c.to_string());
        channels
    }

    /// Number of live subscribers on a channel.
    pub async fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.subscribers
            .read()
            .await
            .get(&channel.to_string())
            .map(|subscribers| subscribers.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Events waiting in overflow queues on a channel, across subscribers.
    pub async fn pending_overflow(&self, channel: &ChannelName) -> usize {
        self.subscribers
            .read()
            .await
            .get(&channel.to_string())
            .map(|subscribers| subscribers.iter().map(Subscriber::pending_overflow).sum())
            .unwrap_or(0)
    }

    /// Close the bus. Later publishes fail, overflowed events are discarded
    /// and every subscription ends.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .values()
            .flatten()
            .for_each(Subscriber::clear_overflow);
        subscribers.clear();
        debug!("Notification bus closed");
    }

    async fn prune(&self, key: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|s| !s.tx.is_closed());
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

#[async_trait]
impl Publisher for NotificationBus {
    async fn publish(
        &self,
        channel: &ChannelName,
        event: OutboundEvent,
    ) -> Result<usize, NotificationError> {
        self.publish_event(channel, event).await
    }
}

/// A single subscriber's view of a channel.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<BusEvent>,
    seen: DedupWindow,
}

impl Subscription {
    fn new(channel: String, rx: mpsc::Receiver<BusEvent>) -> Self {
        Self {
            channel,
            rx,
            seen: DedupWindow::new(DEDUP_WINDOW),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event not delivered before. `None` once the bus closes.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            let event = self.rx.recv().await?;
            if self.seen.insert(&event.id) {
                return Some(event);
            }
            debug!(channel = %self.channel, id = %event.id, "Dropped duplicate delivery");
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            let event = self.rx.try_recv().ok()?;
            if self.seen.insert(&event.id) {
                return Some(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::model::{AlertCategory, Message, MessageKind, RoleType, Severity, SystemAlert};

    fn alert_event() -> OutboundEvent {
        OutboundEvent::SystemAlert {
            alert: SystemAlert::new(AlertCategory::Compliance, Severity::Medium, "t", "d"),
        }
    }

    #[tokio::test]
    async fn fan_out_to_every_subscriber() {
        let bus = NotificationBus::default();
        let mut a = bus.subscribe(&ChannelName::AdminBroadcast).await;
        let mut b = bus.subscribe(&ChannelName::AdminBroadcast).await;
        let mut other = bus.subscribe(&ChannelName::EmergencyResponders).await;

        let delivered = bus
            .publish_event(&ChannelName::AdminBroadcast, alert_event())
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.recv().await.unwrap().event.name(), "system-alert");
        assert_eq!(b.recv().await.unwrap().event.name(), "system-alert");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = NotificationBus::default();
        let delivered = bus
            .publish_event(&ChannelName::direct(RoleType::Clinician, "nobody"), alert_event())
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_dropped() {
        let bus = NotificationBus::default();
        let mut sub = bus.subscribe(&ChannelName::EmergencyResponders).await;
        let msg = Message::new(RoleType::Patient, "p", "help", MessageKind::Alert);

        for _ in 0..2 {
            bus.publish_event(
                &ChannelName::EmergencyResponders,
                OutboundEvent::EmergencyAlert { message: msg.clone() },
            )
            .await
            .unwrap();
        }

        assert!(sub.recv().await.is_some());
        assert!(sub.try_recv().is_none());
    }

    fn numbered_alert(n: usize) -> OutboundEvent {
        OutboundEvent::SystemAlert {
            alert: SystemAlert::new(AlertCategory::Fraud, Severity::Low, format!("alert {n}"), "d"),
        }
    }

    fn alert_title(event: &BusEvent) -> String {
        match &event.event {
            OutboundEvent::SystemAlert { alert } => alert.title.clone(),
            other => panic!("expected system alert, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publisher() {
        let bus = NotificationBus::new(&BusConfig { subscriber_buffer: 2 });
        let mut sub = bus.subscribe(&ChannelName::AdminBroadcast).await;

        // Nobody is reading; publishes past the buffer go to the overflow queue.
        let publishing = async {
            for _ in 0..5 {
                bus.publish_event(&ChannelName::AdminBroadcast, alert_event())
                    .await
                    .unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(1), publishing)
            .await
            .expect("publisher stalled on a slow subscriber");

        let mut received = 0;
        while received < 4 {
            tokio::time::timeout(Duration::from_secs(1), sub.recv())
                .await
                .unwrap()
                .unwrap();
            received += 1;
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_overflow_stays_bounded() {
        let bus = NotificationBus::new(&BusConfig { subscriber_buffer: 1 });
        let mut sub = bus.subscribe(&ChannelName::AdminBroadcast).await;

        for n in 0..10_000 {
            let delivered = bus
                .publish_event(&ChannelName::AdminBroadcast, numbered_alert(n))
                .await
                .unwrap();
            assert_eq!(delivered, 1);
        }

        assert!(bus.pending_overflow(&ChannelName::AdminBroadcast).await <= 1);
        // At most the one drain task is alive.
        assert!(tokio::runtime::Handle::current().metrics().num_alive_tasks() <= 1);

        let mut titles = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
            titles.push(alert_title(&event));
        }
        // Buffered, possibly one in flight, then the newest overflowed event.
        assert!(titles.len() <= 3, "received {titles:?}");
        assert_eq!(titles.first().map(String::as_str), Some("alert 0"));
        assert_eq!(titles.last().map(String::as_str), Some("alert 9999"));
    }

    #[tokio::test]
    async fn overflow_preserves_order() {
        let bus = NotificationBus::new(&BusConfig { subscriber_buffer: 4 });
        let mut sub = bus.subscribe(&ChannelName::AdminBroadcast).await;

        for n in 0..8 {
            bus.publish_event(&ChannelName::AdminBroadcast, numbered_alert(n))
                .await
                .unwrap();
        }

        for n in 0..8 {
            let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(alert_title(&event), format!("alert {n}"));
        }
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish_and_ends_subscriptions() {
        let bus = NotificationBus::default();
        let mut sub = bus.subscribe(&ChannelName::AdminBroadcast).await;
        bus.close().await;

        assert_eq!(
            bus.publish_event(&ChannelName::AdminBroadcast, alert_event()).await,
            Err(NotificationError::Closed)
        );
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = NotificationBus::default();
        let sub = bus.subscribe(&ChannelName::AdminBroadcast).await;
        assert_eq!(bus.subscriber_count(&ChannelName::AdminBroadcast).await, 1);
        drop(sub);

        let delivered = bus
            .publish_event(&ChannelName::AdminBroadcast, alert_event())
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count(&ChannelName::AdminBroadcast).await, 0);
    }

    #[tokio::test]
    async fn channels_with_prefix_lists_live_admin_channels() {
        let bus = NotificationBus::default();
        let _a = bus.subscribe(&ChannelName::direct(RoleType::Admin, "1")).await;
        let _b = bus.subscribe(&ChannelName::direct(RoleType::Admin, "2")).await;
        let _c = bus.subscribe(&ChannelName::direct(RoleType::Clinician, "3")).await;
        let _d = bus.subscribe(&ChannelName::AdminBroadcast).await;

        let channels = bus
            .channels_with_prefix(&ChannelName::role_prefix(RoleType::Admin))
            .await;
        assert_eq!(
            channels,
            vec![
                ChannelName::direct(RoleType::Admin, "1"),
                ChannelName::direct(RoleType::Admin, "2"),
            ]
        );
    }

    #[tokio::test]
    async fn handler_subscription_runs_per_event() {
        let bus = NotificationBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _handle = bus
            .subscribe_with(&ChannelName::AdminBroadcast, move |_event| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        bus.publish_event(&ChannelName::AdminBroadcast, alert_event())
            .await
            .unwrap();
        bus.publish_event(&ChannelName::AdminBroadcast, alert_event())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while count.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
