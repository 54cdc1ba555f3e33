use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::AuditStorage;
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::investigation::{InvestigationState, StateTransition};
use crate::migration::{GraphType, SelectionReason, SelectionRecord};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed audit store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `config.path`
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());
        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        Self::connect(options, config.max_connections).await
    }

    /// Private in-memory database. Single connection so every query sees it.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");
        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditStorage for SqliteStorage {
    async fn record_selection(&self, record: &SelectionRecord) -> StorageResult<()> {
        let flags = serde_json::to_string(&record.feature_flags).map_err(|e| StorageError::Query {
            message: format!("Failed to encode flag snapshot: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO graph_selections (investigation_id, graph_type, selection_reason, entity_type,
                rollback_active, fallback_occurred, fallback_count, feature_flags, selected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.investigation_id)
        .bind(record.graph_type.as_str())
        .bind(record.selection_reason.as_str())
        .bind(&record.entity_type)
        .bind(record.rollback_active)
        .bind(record.fallback_occurred)
        .bind(record.fallback_count as i64)
        .bind(&flags)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_selections(&self, investigation_id: &str) -> StorageResult<Vec<SelectionRecord>> {
        let rows: Vec<SelectionRow> = sqlx::query_as(
            r#"
            SELECT investigation_id, graph_type, selection_reason, entity_type, rollback_active,
                fallback_occurred, fallback_count, feature_flags, selected_at
            FROM graph_selections
            WHERE investigation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(investigation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SelectionRecord::try_from).collect()
    }

    async fn record_transition(&self, transition: &StateTransition) -> StorageResult<()> {
        let errors =
            serde_json::to_string(&transition.validation_errors).map_err(|e| StorageError::Query {
                message: format!("Failed to encode validation errors: {}", e),
            })?;

        sqlx::query(
            r#"
            INSERT INTO state_transitions (transition_id, investigation_id, from_state, to_state,
                triggered_by, reason, validation_passed, validation_errors, duration_seconds,
                forced, transitioned_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transition.transition_id)
        .bind(&transition.investigation_id)
        .bind(transition.from_state.as_str())
        .bind(transition.to_state.as_str())
        .bind(&transition.triggered_by)
        .bind(&transition.reason)
        .bind(transition.validation_passed)
        .bind(&errors)
        .bind(transition.duration_seconds)
        .bind(transition.forced)
        .bind(transition.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_transitions(&self, investigation_id: &str) -> StorageResult<Vec<StateTransition>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            r#"
            SELECT transition_id, investigation_id, from_state, to_state, triggered_by, reason,
                validation_passed, validation_errors, duration_seconds, forced, transitioned_at
            FROM state_transitions
            WHERE investigation_id = ?
            ORDER BY transitioned_at ASC, rowid ASC
            "#,
        )
        .bind(investigation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StateTransition::try_from).collect()
    }
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct SelectionRow {
    investigation_id: String,
    graph_type: String,
    selection_reason: String,
    entity_type: Option<String>,
    rollback_active: bool,
    fallback_occurred: bool,
    fallback_count: i64,
    feature_flags: String,
    selected_at: String,
}

impl TryFrom<SelectionRow> for SelectionRecord {
    type Error = StorageError;

    fn try_from(row: SelectionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            graph_type: parse_column::<GraphType>("graph_type", &row.graph_type)?,
            selection_reason: parse_column::<SelectionReason>("selection_reason", &row.selection_reason)?,
            investigation_id: row.investigation_id,
            entity_type: row.entity_type,
            timestamp: parse_timestamp(&row.selected_at),
            feature_flags: serde_json::from_str(&row.feature_flags).unwrap_or_default(),
            rollback_active: row.rollback_active,
            fallback_occurred: row.fallback_occurred,
            fallback_count: row.fallback_count.max(0) as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    transition_id: String,
    investigation_id: String,
    from_state: String,
    to_state: String,
    triggered_by: String,
    reason: Option<String>,
    validation_passed: bool,
    validation_errors: String,
    duration_seconds: f64,
    forced: bool,
    transitioned_at: String,
}

impl TryFrom<TransitionRow> for StateTransition {
    type Error = StorageError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            from_state: parse_column::<InvestigationState>("from_state", &row.from_state)?,
            to_state: parse_column::<InvestigationState>("to_state", &row.to_state)?,
            transition_id: row.transition_id,
            investigation_id: row.investigation_id,
            triggered_by: row.triggered_by,
            reason: row.reason,
            timestamp: parse_timestamp(&row.transitioned_at),
            validation_passed: row.validation_passed,
            validation_errors: serde_json::from_str(&row.validation_errors).unwrap_or_default(),
            duration_seconds: row.duration_seconds,
            forced: row.forced,
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(column: &str, value: &str) -> StorageResult<T> {
    value.parse().map_err(|e| StorageError::Query {
        message: format!("Bad {} value: {}", column, e),
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
