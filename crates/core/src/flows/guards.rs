//! Step guards for the booking form.
//!
//! A guard lists what is missing before the draft may leave a step. An empty
//! list means the step can advance. Email and phone format problems at the
//! contact step are advisory and never block.

use crate::domain::booking::BookingDraft;
use crate::flows::states::{BookingStep, DraftField, FieldIssue, FlowContext};

pub const MIN_PHONE_DIGITS: usize = 10;

pub fn missing_fields(step: BookingStep, draft: &BookingDraft) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    match step {
        BookingStep::Contact => {
            require_text(&mut issues, DraftField::Name, &draft.contact.name, "Please enter your name");
            require_text(
                &mut issues,
                DraftField::Email,
                &draft.contact.email,
                "Please enter your email",
            );
            require_text(
                &mut issues,
                DraftField::Phone,
                &draft.contact.phone,
                "Please enter your phone number",
            );
        }
        BookingStep::Details => {
            require_text(&mut issues, DraftField::Address, &draft.address, "Please enter your address");
            if draft.lot_size.is_none() {
                issues.push(FieldIssue::new(DraftField::LotSize, "Please choose your lot size"));
            }
            if draft.frequency.is_none() {
                issues.push(FieldIssue::new(DraftField::Frequency, "Please choose a service"));
            }
            if draft.lot_size.is_some() && draft.frequency.is_some() && draft.quote.is_none() {
                issues.push(FieldIssue::new(DraftField::Quote, "We could not price this selection"));
            }
        }
        BookingStep::Confirmation => {
            if draft.quote.is_none() {
                issues.push(FieldIssue::new(DraftField::Quote, "A price is required before payment"));
            }
            if draft.phone_digits() < MIN_PHONE_DIGITS {
                issues.push(FieldIssue::new(
                    DraftField::Phone,
                    format!("Phone number must have at least {MIN_PHONE_DIGITS} digits"),
                ));
            }
        }
        BookingStep::PaymentRedirect => {}
    }

    issues
}

pub fn can_advance(step: BookingStep, draft: &BookingDraft) -> bool {
    missing_fields(step, draft).is_empty()
}

pub fn context_for(step: BookingStep, draft: &BookingDraft) -> FlowContext {
    FlowContext { issues: missing_fields(step, draft) }
}

/// Non-blocking format warnings for contact details.
pub fn advisories(draft: &BookingDraft) -> Vec<FieldIssue> {
    let mut notes = Vec::new();

    let email = draft.contact.email.trim();
    if !email.is_empty() && !looks_like_email(email) {
        notes.push(FieldIssue::new(DraftField::Email, "This email address looks incomplete"));
    }

    let digits = draft.phone_digits();
    if !draft.contact.phone.trim().is_empty() && digits < MIN_PHONE_DIGITS {
        notes.push(FieldIssue::new(
            DraftField::Phone,
            format!("Phone numbers usually have {MIN_PHONE_DIGITS} digits"),
        ));
    }

    notes
}

fn require_text(issues: &mut Vec<FieldIssue>, field: DraftField, value: &str, message: &str) {
    if value.trim().is_empty() {
        issues.push(FieldIssue::new(field, message));
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}
