//! Internal publish/subscribe event bus.
//!
//! ```text
//! publish() ──try_send──▶ [bounded queue] ──▶ consumer task ──▶ subscriber channels
//! ```
//!
//! Publishing never blocks: a full queue is reported as
//! [`BusError::QueueFull`]. One background task drains the queue and fans
//! events out to every subscription whose filter matches. The task exits
//! when the bus's cancellation token fires, after draining what is queued.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{Event, EventCategory, EventPriority, EventType};
use crate::config::EventBusConfig;
use crate::error::{BusError, BusResult};

// ============================================================================
// Filters
// ============================================================================

/// Subscription filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: HashSet<EventType>,
    pub categories: HashSet<EventCategory>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub investigation_id: Option<String>,
    /// Events must carry at least one of these tags
    pub tags: BTreeSet<String>,
    pub min_priority: Option<EventPriority>,
}

impl EventFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the given event types.
    pub fn for_types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: types.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.categories.insert(category);
        self
    }

    pub fn with_investigation(mut self, investigation_id: impl Into<String>) -> Self {
        self.investigation_id = Some(investigation_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&event.event_type.category())
        {
            return false;
        }
        if let Some(source) = &self.source {
            if &event.source != source {
                return false;
            }
        }
        if let Some(target) = &self.target {
            if event.target.as_ref() != Some(target) {
                return false;
            }
        }
        if let Some(investigation_id) = &self.investigation_id {
            if event.investigation_id.as_ref() != Some(investigation_id) {
                return false;
            }
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&event.tags) {
            return false;
        }
        if let Some(min) = self.min_priority {
            if event.priority < min {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Bus
// ============================================================================

struct Subscription {
    id: String,
    filter: EventFilter,
    sender: mpsc::Sender<Event>,
}

/// Bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    /// Deliveries skipped because a subscriber's channel was full
    pub dropped: u64,
    /// Publishes rejected because the main queue was full
    pub rejected: u64,
    pub subscribers: usize,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Publish/subscribe bus with a single background consumer.
pub struct EventBus {
    config: EventBusConfig,
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    sequence: AtomicU64,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a stopped bus. Events published before [`start`](Self::start)
    /// are queued.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        Self {
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            sequence: AtomicU64::new(0),
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Subscribe with a filter. Returns the subscription id and the channel
    /// events are delivered on.
    pub fn subscribe(&self, filter: EventFilter) -> (String, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(self.config.queue_size.max(1));
        let id = format!("sub_{}", Uuid::new_v4());
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id: id.clone(),
                filter,
                sender,
            });
        debug!(subscription_id = %id, "Subscriber added");
        (id, receiver)
    }

    /// Remove a subscription. Returns `false` if unknown.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        subs.len() != before
    }

    /// Queue an event for delivery; returns its sequence number.
    pub fn publish(&self, mut event: Event) -> BusResult<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        event.sequence_number = sequence;
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                Ok(sequence)
            }
            Err(TrySendError::Full(event)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = %event.event_type,
                    capacity = self.config.queue_size,
                    "Event bus queue full"
                );
                Err(BusError::QueueFull {
                    capacity: self.config.queue_size,
                })
            }
            Err(TrySendError::Closed(_)) => Err(BusError::NotRunning),
        }
    }

    /// Spawn the consumer task. Calling it twice is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let Some(mut receiver) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("Event bus already started");
            return;
        };

        let subscriptions = Arc::clone(&self.subscriptions);
        let counters = Arc::clone(&self.counters);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_event = receiver.recv() => match maybe_event {
                        Some(event) => dispatch(&subscriptions, &counters, event),
                        None => break,
                    },
                }
            }
            // Flush whatever was queued before shutdown.
            receiver.close();
            while let Ok(event) = receiver.try_recv() {
                dispatch(&subscriptions, &counters, event);
            }
            debug!("Event bus consumer exited");
        });

        self.running.store(true, Ordering::SeqCst);
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(queue_size = self.config.queue_size, "Event bus started");
    }

    /// Cancel the consumer and wait for it to drain.
    ///
    /// Publishing after stop returns [`BusError::NotRunning`].
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event bus consumer ended abnormally");
            }
        }
        // Never started: drop the queue so publishers see NotRunning.
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.running.store(false, Ordering::SeqCst);
        info!("Event bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            subscribers: self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

fn dispatch(subscriptions: &RwLock<Vec<Subscription>>, counters: &Counters, event: Event) {
    let mut closed = Vec::new();
    {
        let subs = subscriptions.read().unwrap_or_else(PoisonError::into_inner);
        for sub in subs.iter().filter(|s| s.filter.matches(&event)) {
            match sub.sender.try_send(event.clone()) {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription_id = %sub.id,
                        event_type = %event.event_type,
                        "Subscriber channel full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(sub.id.clone()),
            }
        }
    }
    if !closed.is_empty() {
        subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !closed.contains(&s.id));
        debug!(removed = closed.len(), "Removed closed subscriptions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bus(queue_size: usize) -> EventBus {
        EventBus::new(EventBusConfig {
            queue_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_filter_matching() {
        let event = Event::new(EventType::AgentCompleted, "device_agent")
            .with_investigation("inv-1")
            .with_tag("device")
            .with_priority(EventPriority::High);

        assert!(EventFilter::all().matches(&event));
        assert!(EventFilter::for_types([EventType::AgentCompleted]).matches(&event));
        assert!(!EventFilter::for_types([EventType::AgentFailed]).matches(&event));
        assert!(EventFilter::all().with_category(EventCategory::Agent).matches(&event));
        assert!(!EventFilter::all().with_investigation("inv-2").matches(&event));
        assert!(EventFilter::all().with_tag("device").matches(&event));
        assert!(!EventFilter::all().with_tag("network").matches(&event));
        assert!(!EventFilter::all().with_target("risk_agent").matches(&event));
        assert!(!EventFilter::all()
            .with_min_priority(EventPriority::Critical)
            .matches(&event));
    }

    #[test]
    fn test_publish_rejects_when_queue_full() {
        let bus = bus(2);
        assert_eq!(bus.publish(Event::new(EventType::HealthCheck, "test")).unwrap(), 1);
        assert_eq!(bus.publish(Event::new(EventType::HealthCheck, "test")).unwrap(), 2);
        let err = bus
            .publish(Event::new(EventType::HealthCheck, "test"))
            .unwrap_err();
        assert!(matches!(err, BusError::QueueFull { capacity: 2 }));
        assert_eq!(bus.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_filtered_delivery_in_sequence_order() {
        let bus = bus(16);
        let (_, mut lifecycle) = bus.subscribe(EventFilter::all().with_category(EventCategory::Lifecycle));
        let (_, mut errors) = bus.subscribe(EventFilter::for_types([EventType::ErrorOccurred]));
        bus.start();

        bus.publish(Event::new(EventType::InvestigationCreated, "test")).unwrap();
        bus.publish(Event::new(EventType::ErrorOccurred, "test")).unwrap();
        bus.publish(Event::new(EventType::StateChanged, "test")).unwrap();
        bus.stop().await;

        let first = lifecycle.recv().await.unwrap();
        let second = lifecycle.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::InvestigationCreated);
        assert_eq!(second.event_type, EventType::StateChanged);
        assert!(first.sequence_number < second.sequence_number);

        assert_eq!(errors.recv().await.unwrap().event_type, EventType::ErrorOccurred);
        assert_eq!(bus.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_publish_after_stop_is_not_running() {
        let bus = bus(4);
        bus.start();
        bus.stop().await;
        assert!(!bus.is_running());
        let err = bus
            .publish(Event::new(EventType::HealthCheck, "test"))
            .unwrap_err();
        assert!(matches!(err, BusError::NotRunning));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_closed_receivers() {
        let bus = bus(4);
        let (id, _rx) = bus.subscribe(EventFilter::all());
        let (_, dropped_rx) = bus.subscribe(EventFilter::all());
        drop(dropped_rx);
        assert_eq!(bus.stats().subscribers, 2);

        bus.start();
        bus.publish(Event::new(EventType::HealthCheck, "test")).unwrap();
        bus.stop().await;
        assert_eq!(bus.stats().subscribers, 1);

        assert!(bus.unsubscribe(&id));
        assert!(!bus.unsubscribe(&id));
    }
}
