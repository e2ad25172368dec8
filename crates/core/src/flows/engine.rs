use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    BookingEvent, BookingStep, FieldIssue, FlowAction, FlowContext, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_step(&self) -> BookingStep;
    fn transition(
        &self,
        current: BookingStep,
        event: BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Contact → Details → Confirmation → PaymentRedirect, with Back between the
/// first three steps.
#[derive(Clone, Debug, Default)]
pub struct BookingFlow;

impl FlowDefinition for BookingFlow {
    fn initial_step(&self) -> BookingStep {
        BookingStep::Contact
    }

    fn transition(
        &self,
        current: BookingStep,
        event: BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_booking(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_step(&self) -> BookingStep {
        self.flow.initial_step()
    }

    pub fn apply(
        &self,
        current: BookingStep,
        event: BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: BookingStep,
        event: BookingEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before leaving {step:?}: {}", field_list(.issues))]
    MissingRequiredFields { step: BookingStep, issues: Vec<FieldIssue> },
    #[error("invalid transition from {step:?} using event {event:?}")]
    InvalidTransition { step: BookingStep, event: BookingEvent },
}

impl FlowTransitionError {
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            Self::MissingRequiredFields { issues, .. } => issues,
            Self::InvalidTransition { .. } => &[],
        }
    }
}

fn field_list(issues: &[FieldIssue]) -> String {
    issues.iter().map(|issue| issue.field.as_str()).collect::<Vec<_>>().join(", ")
}

fn transition_booking(
    current: BookingStep,
    event: BookingEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use BookingEvent::{Advance, Back, RedirectIssued};
    use BookingStep::{Confirmation, Contact, Details, PaymentRedirect};
    use FlowAction::{CollectServiceDetails, RedirectToPaymentSetup, ReviewQuote};

    let guarded = |to: BookingStep, actions: Vec<FlowAction>| {
        if context.issues.is_empty() {
            Ok((to, actions))
        } else {
            Err(FlowTransitionError::MissingRequiredFields {
                step: current,
                issues: context.issues.clone(),
            })
        }
    };

    let (to, actions) = match (current, event) {
        (Contact, Advance) => guarded(Details, vec![CollectServiceDetails])?,
        (Details, Advance) => guarded(Confirmation, vec![ReviewQuote])?,
        (Confirmation, RedirectIssued) => guarded(PaymentRedirect, vec![RedirectToPaymentSetup])?,
        (Details, Back) => (Contact, Vec::new()),
        (Confirmation, Back) => (Details, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { step: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
