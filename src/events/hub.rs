//! Agent-to-agent message hub.
//!
//! Agents register a [`MessageHandler`] under their id. Messages are queued on
//! a bounded channel and delivered by a background task; each delivery runs
//! through the shared [`ErrorHandler`] under the category `agent:<id>`, so a
//! misbehaving agent is short-circuited instead of stalling the hub.
//!
//! Requests are matched to responses by `correlation_id`. Messages whose TTL
//! has elapsed when they reach the front of the queue are dropped, never
//! retried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bus::EventBus;
use super::types::{Event, EventPriority, EventType};
use crate::config::EventBusConfig;
use crate::error::{BusError, BusResult};
use crate::resilience::{CallOutcome, ErrorHandler};

/// Kind of hub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Broadcast,
    Handoff,
    /// Response produced when the recipient failed or was short-circuited
    Error,
}

/// A message between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: String,
    pub message_type: MessageType,
    pub sender: String,
    /// `None` delivers to every registered agent except the sender
    pub recipient: Option<String>,
    pub investigation_id: Option<String>,
    pub correlation_id: Option<String>,
    pub priority: EventPriority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl AgentMessage {
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        recipient: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4()),
            message_type,
            sender: sender.into(),
            recipient,
            investigation_id: None,
            correlation_id: None,
            priority: EventPriority::Normal,
            payload,
            created_at: Utc::now(),
            ttl_secs: 300,
        }
    }

    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Request, sender, Some(recipient.into()), payload)
    }

    pub fn notification(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Notification, sender, Some(recipient.into()), payload)
    }

    pub fn broadcast(sender: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Broadcast, sender, None, payload)
    }

    pub fn with_investigation(mut self, investigation_id: impl Into<String>) -> Self {
        self.investigation_id = Some(investigation_id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the response to this message.
    pub fn reply(&self, message_type: MessageType, payload: serde_json::Value) -> Self {
        let sender = self.recipient.clone().unwrap_or_default();
        let mut response = Self::new(message_type, sender, Some(self.sender.clone()), payload);
        response.correlation_id = Some(self.message_id.clone());
        response.investigation_id = self.investigation_id.clone();
        response.ttl_secs = self.ttl_secs;
        response
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > ChronoDuration::seconds(self.ttl_secs as i64)
    }
}

/// Receives messages addressed to an agent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message. For requests, `Ok(Some(value))` becomes the
    /// response payload.
    async fn handle(&self, message: AgentMessage) -> Result<Option<serde_json::Value>, String>;
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub sent: u64,
    pub delivered: u64,
    pub expired: u64,
    pub failed: u64,
    pub undeliverable: u64,
    pub pending_requests: usize,
    pub registered_agents: usize,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
    undeliverable: AtomicU64,
}

struct Shared {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<AgentMessage>>>,
    error_handler: Arc<ErrorHandler>,
    bus: Option<Arc<EventBus>>,
    counters: Counters,
}

impl Shared {
    fn handler(&self, agent_id: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(event) {
                debug!(error = %e, "Hub event not published");
            }
        }
    }

    fn resolve(&self, response: AgentMessage) -> bool {
        let Some(correlation_id) = response.correlation_id.clone() else {
            return false;
        };
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&correlation_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// Routes messages between registered agents.
pub struct AgentCommunicationHub {
    config: EventBusConfig,
    sender: mpsc::Sender<AgentMessage>,
    receiver: Mutex<Option<mpsc::Receiver<AgentMessage>>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentCommunicationHub {
    pub fn new(config: EventBusConfig, error_handler: Arc<ErrorHandler>) -> Self {
        Self::build(config, error_handler, None)
    }

    /// Hub that reports deliveries and expirations on `bus`.
    pub fn with_event_bus(
        config: EventBusConfig,
        error_handler: Arc<ErrorHandler>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::build(config, error_handler, Some(bus))
    }

    fn build(
        config: EventBusConfig,
        error_handler: Arc<ErrorHandler>,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.hub_queue_size.max(1));
        Self {
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                error_handler,
                bus,
                counters: Counters::default(),
            }),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Register (or replace) an agent's handler.
    pub fn register_agent(&self, agent_id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let agent_id = agent_id.into();
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.clone(), handler);
        info!(agent_id = %agent_id, "Agent registered");
        self.shared
            .emit(Event::new(EventType::AgentRegistered, "hub").with_target(agent_id));
    }

    /// Remove an agent. Returns `false` if unknown.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_id)
            .is_some();
        if removed {
            self.shared
                .emit(Event::new(EventType::AgentUnregistered, "hub").with_target(agent_id));
        }
        removed
    }

    /// Registered agent ids, sorted.
    pub fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Queue a message. Never blocks.
    pub fn send(&self, message: AgentMessage) -> BusResult<()> {
        if let Some(recipient) = &message.recipient {
            if self.shared.handler(recipient).is_none() {
                return Err(BusError::AgentNotRegistered {
                    agent_id: recipient.clone(),
                });
            }
        }
        match self.sender.try_send(message) {
            Ok(()) => {
                self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(BusError::QueueFull {
                capacity: self.config.hub_queue_size,
            }),
            Err(TrySendError::Closed(_)) => Err(BusError::NotRunning),
        }
    }

    /// Send a request and wait for the correlated response.
    pub async fn request(&self, message: AgentMessage, timeout: Duration) -> BusResult<AgentMessage> {
        let message_id = message.message_id.clone();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id.clone(), tx);

        if let Err(e) = self.send(message) {
            self.forget(&message_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BusError::NotRunning),
            Err(_) => {
                self.forget(&message_id);
                Err(BusError::RequestTimeout {
                    message_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Spawn the delivery task. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut receiver) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = receiver.recv() => match maybe {
                        Some(message) => {
                            tokio::spawn(deliver(Arc::clone(&shared), message));
                        }
                        None => break,
                    },
                }
            }
            receiver.close();
            debug!("Hub consumer exited");
        });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(queue_size = self.config.hub_queue_size, "Communication hub started");
    }

    /// Cancel the delivery task and fail outstanding requests.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Hub consumer ended abnormally");
            }
        }
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Communication hub stopped");
    }

    pub fn stats(&self) -> HubStats {
        let c = &self.shared.counters;
        HubStats {
            sent: c.sent.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            undeliverable: c.undeliverable.load(Ordering::Relaxed),
            pending_requests: self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            registered_agents: self
                .shared
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    fn forget(&self, message_id: &str) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_id);
    }
}

async fn deliver(shared: Arc<Shared>, message: AgentMessage) {
    if message.is_expired_at(Utc::now()) {
        shared.counters.expired.fetch_add(1, Ordering::Relaxed);
        warn!(
            message_id = %message.message_id,
            sender = %message.sender,
            ttl_secs = message.ttl_secs,
            "Message expired before delivery"
        );
        shared.emit(
            Event::new(EventType::MessageExpired, "hub")
                .with_data(json!({"message_id": message.message_id})),
        );
        return;
    }

    if matches!(message.message_type, MessageType::Response | MessageType::Error)
        && shared.resolve(message.clone())
    {
        shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let recipients: Vec<String> = match &message.recipient {
        Some(id) => vec![id.clone()],
        None => shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|id| **id != message.sender)
            .cloned()
            .collect(),
    };

    for recipient in recipients {
        let Some(handler) = shared.handler(&recipient) else {
            shared.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            warn!(recipient = %recipient, "No handler for recipient");
            continue;
        };

        let mut addressed = message.clone();
        addressed.recipient = Some(recipient.clone());
        let category = format!("agent:{}", recipient);
        let outcome = shared
            .error_handler
            .call(&category, handler.handle(addressed.clone()))
            .await;

        let response = match outcome {
            CallOutcome::Completed(payload) => {
                shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
                addressed.reply(MessageType::Response, payload.unwrap_or(serde_json::Value::Null))
            }
            CallOutcome::Failed { error, .. } => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                addressed.reply(MessageType::Error, json!({ "error": error }))
            }
            CallOutcome::ShortCircuited(fallback) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                addressed.reply(
                    MessageType::Error,
                    json!({ "error": fallback.message, "fallback": true }),
                )
            }
        };

        if message.message_type == MessageType::Request {
            shared.resolve(response);
        }
    }

    shared.emit(
        Event::new(EventType::MessageDelivered, "hub")
            .with_data(json!({"message_id": message.message_id})),
    );
}
