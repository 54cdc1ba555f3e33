//! Internal event bus and agent communication hub.

mod bus;
mod hub;
mod types;

pub use bus::{BusStats, EventBus, EventFilter};
pub use hub::{AgentCommunicationHub, AgentMessage, HubStats, MessageHandler, MessageType};
pub use types::{Event, EventCategory, EventPriority, EventType};
