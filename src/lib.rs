//! # Hybrid Investigation
//!
//! Core services for multi-agent fraud investigations: feature-flagged graph
//! selection with sticky rollback, an entity graph, cross-entity correlation,
//! an investigation lifecycle state machine and an asynchronous event bus.
//!
//! ## Architecture
//!
//! ```text
//! CLI → AppState ─┬─ MigrationManager (flags, health, rollback, A/B, selector)
//!                 ├─ EntityManager → CrossEntityAnalyzer
//!                 ├─ InvestigationStateManager
//!                 ├─ EventBus ← AgentCommunicationHub
//!                 ├─ RagOrchestrator
//!                 └─ SQLite (audit trail)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hybrid_investigation::{AppState, Config};
//! use hybrid_investigation::entity::EntityType;
//! use hybrid_investigation::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let app = AppState::new(config, Arc::new(storage))?;
//!     app.start();
//!     let start = app.start_investigation("inv-42", EntityType::User, "alice").await?;
//!     println!("{:?}", start.selection.graph_type());
//!     app.shutdown().await;
//!     Ok(())
//! }
//! ```

mod macros;

/// Cross-entity correlation, timelines and pattern detection.
pub mod analysis;
/// Application context and CLI.
pub mod app;
/// Configuration management.
pub mod config;
/// Agent investigation domains.
pub mod domain;
/// Entity graph and entity lifecycle.
pub mod entity;
/// Error types and result aliases for the application.
pub mod error;
/// Event bus and agent communication hub.
pub mod events;
/// Investigation lifecycle state machine.
pub mod investigation;
/// Feature flags, health monitoring, rollback and graph selection.
pub mod migration;
/// Knowledge base retrieval for agent context.
pub mod rag;
/// Circuit breakers and error classification.
pub mod resilience;
/// SQLite audit trail.
pub mod storage;

pub use app::{AppState, SharedState};
pub use config::Config;
pub use error::{AppError, AppResult};
