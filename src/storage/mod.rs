//! Audit persistence for graph selections and state transitions.
//!
//! In-memory services stay the source of truth; storage keeps an append-only
//! trail that survives process restarts and backs the CLI `history` command.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::investigation::StateTransition;
use crate::migration::SelectionRecord;

/// Append-only audit store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Persist one successful graph selection.
    async fn record_selection(&self, record: &SelectionRecord) -> StorageResult<()>;
    /// Selections for an investigation, oldest first.
    async fn get_selections(&self, investigation_id: &str) -> StorageResult<Vec<SelectionRecord>>;
    /// Persist one committed state transition.
    async fn record_transition(&self, transition: &StateTransition) -> StorageResult<()>;
    /// Transitions for an investigation, oldest first.
    async fn get_transitions(&self, investigation_id: &str) -> StorageResult<Vec<StateTransition>>;
}
