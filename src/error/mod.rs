use thiserror::Error;

use crate::investigation::InvestigationState;
use crate::migration::GraphType;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Feature flag error: {0}")]
    Flag(#[from] FlagError),

    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Knowledge error: {0}")]
    Rag(#[from] RagError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Feature flag registry errors
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("Unknown feature flag: {flag_name}")]
    UnknownFlag { flag_name: String },

    #[error("Invalid rollout percentage for {flag_name}: {value} (expected 0-100)")]
    InvalidPercentage { flag_name: String, value: i64 },
}

/// Errors raised while constructing an investigation graph
#[derive(Debug, Clone, Error)]
pub enum GraphBuildError {
    #[error("No builder registered for {graph_type} graph")]
    BuilderUnavailable { graph_type: GraphType },

    #[error("Failed to build {graph_type} graph: {message}")]
    Construction {
        graph_type: GraphType,
        message: String,
    },
}

/// Entity graph errors
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Entity not found: {entity_id}")]
    NotFound { entity_id: String },

    #[error("Invalid relationship: {message}")]
    InvalidRelationship { message: String },

    #[error("Invalid score for {entity_id}: risk {risk_score}, confidence {confidence}")]
    InvalidScore {
        entity_id: String,
        risk_score: f64,
        confidence: f64,
    },
}

/// Investigation lifecycle errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Investigation not found: {investigation_id}")]
    InvestigationNotFound { investigation_id: String },

    #[error("Investigation already exists: {investigation_id}")]
    AlreadyExists { investigation_id: String },

    #[error("Invalid transition for {investigation_id}: {from} -> {to}")]
    InvalidTransition {
        investigation_id: String,
        from: InvestigationState,
        to: InvestigationState,
    },

    #[error("Transition validation failed for {investigation_id}: {}", errors.join("; "))]
    ValidationFailed {
        investigation_id: String,
        errors: Vec<String>,
    },

    #[error("State of {investigation_id} changed during validation: expected {expected}, found {actual}")]
    ConcurrentTransition {
        investigation_id: String,
        expected: InvestigationState,
        actual: InvestigationState,
    },
}

/// Cross-entity analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid analysis input: {message}")]
    InvalidInput { message: String },
}

/// Event bus and communication hub errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Event bus is not running")]
    NotRunning,

    #[error("Agent not registered: {agent_id}")]
    AgentNotRegistered { agent_id: String },

    #[error("No response to {message_id} within {timeout_ms}ms")]
    RequestTimeout { message_id: String, timeout_ms: u64 },
}

/// Knowledge base / retrieval errors
#[derive(Debug, Error)]
pub enum RagError {
    #[error("Document has no content: {document_id}")]
    EmptyDocument { document_id: String },

    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for entity operations
pub type EntityResult<T> = Result<T, EntityError>;

/// Result type alias for state machine operations
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for event bus operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_flag_error_display() {
        let err = FlagError::InvalidPercentage {
            flag_name: "hybrid_graph_v1".to_string(),
            value: 150,
        };
        assert_eq!(
            err.to_string(),
            "Invalid rollout percentage for hybrid_graph_v1: 150 (expected 0-100)"
        );

        let err = FlagError::UnknownFlag {
            flag_name: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown feature flag: nope");
    }

    #[test]
    fn test_graph_build_error_display() {
        let err = GraphBuildError::Construction {
            graph_type: GraphType::Hybrid,
            message: "agent missing".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to build hybrid graph: agent missing");

        let err = GraphBuildError::BuilderUnavailable {
            graph_type: GraphType::Orchestrator,
        };
        assert_eq!(err.to_string(), "No builder registered for orchestrator graph");
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::InvalidTransition {
            investigation_id: "inv-1".to_string(),
            from: InvestigationState::Created,
            to: InvestigationState::Completed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for inv-1: created -> completed"
        );

        let err = StateError::ValidationFailed {
            investigation_id: "inv-1".to_string(),
            errors: vec!["missing entity_id".to_string(), "missing entity_type".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Transition validation failed for inv-1: missing entity_id; missing entity_type"
        );
    }

    #[test]
    fn test_bus_error_display() {
        let err = BusError::QueueFull { capacity: 8 };
        assert_eq!(err.to_string(), "Queue full (capacity 8)");

        let err = BusError::AgentNotRegistered {
            agent_id: "device_agent".to_string(),
        };
        assert_eq!(err.to_string(), "Agent not registered: device_agent");
    }

    #[test]
    fn test_conversions_to_app_error() {
        let app_err: AppError = EntityError::NotFound {
            entity_id: "e-1".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Entity(_)));

        let app_err: AppError = StateError::InvestigationNotFound {
            investigation_id: "inv-9".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::State(_)));

        let app_err: AppError = BusError::NotRunning.into();
        assert!(matches!(app_err, AppError::Bus(_)));
        assert!(app_err.to_string().contains("not running"));
    }
}
