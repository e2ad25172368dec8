pub mod engine;
pub mod guards;
pub mod states;

pub use engine::{BookingFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{
    BookingEvent, BookingStep, DraftField, FieldIssue, FlowAction, FlowContext, TransitionOutcome,
};
