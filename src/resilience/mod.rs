//! Failure isolation for agent calls and internal subsystems.

mod circuit_breaker;
mod error_handler;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
pub use error_handler::{
    CallOutcome, ErrorDisposition, ErrorHandler, ErrorRecord, FallbackResponse,
};
