//! Investigation lifecycle state machine.

mod manager;
mod state;
mod validators;

pub use manager::{InvestigationRecord, InvestigationStateManager, StateStatistics};
pub use state::{InvestigationContext, InvestigationState, StateTransition};
pub use validators::{
    FnValidator, RequiredFieldsValidator, StateTimeoutValidator, StateValidator,
    TransitionContext, ValidatorScope,
};
