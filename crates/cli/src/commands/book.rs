use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use lawnpeak_client::{HttpBookingApi, PlacesAddressLookup};
use lawnpeak_core::audit::TracingAuditSink;
use lawnpeak_core::booking::{
    AddressCandidate, AddressSearch, AddressSelection, FileSnapshotStore, ReferralOutcome,
    SetupResolution,
};
use lawnpeak_core::config::AppConfig;
use lawnpeak_core::{
    BookingCoordinator, BookingError, BookingSession, LotSizeTier, ReturnUrls, ServiceFrequency,
    SetupReturn,
};
use serde::Deserialize;
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult};

/// Booking form contents as prepared outside the interactive form.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftFile {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub lot_size: LotSizeTier,
    pub service_type: ServiceFrequency,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

pub fn load_draft(path: &Path) -> anyhow::Result<DraftFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read draft file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("draft file `{}` is not a valid booking draft", path.display()))
}

pub fn run(path: &Path) -> CommandResult {
    let config = match load_config("book") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let draft = match load_draft(path) {
        Ok(draft) => draft,
        Err(error) => return CommandResult::failure("book", "draft_input", format!("{error:#}"), 2),
    };
    let runtime = match runtime("book") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let api = match HttpBookingApi::from_config(&config.api) {
        Ok(api) => Arc::new(api),
        Err(error) => return CommandResult::failure("book", "client_init", error.to_string(), 3),
    };
    let lookup = address_lookup(&config);

    let coordinator = BookingCoordinator::new(
        Arc::new(FileSnapshotStore::new(config.booking.snapshot_dir.clone())),
        api.clone(),
        api.clone(),
        ReturnUrls::from_base(&config.booking.return_url),
    );
    let mut session = BookingSession::from_config(&config, Arc::new(TracingAuditSink));

    let result = runtime.block_on(async {
        let mut notes = Vec::new();

        session.set_name(draft.name.as_str());
        session.set_email(draft.email.as_str());
        session.set_phone(draft.phone.as_str());
        session.set_address(draft.address.as_str());
        if let Some(start_date) = draft.start_date {
            session.set_start_date(start_date);
        }
        session.select_lot_size(draft.lot_size);
        session.select_frequency(draft.service_type);

        if let Some(lookup) = lookup.as_ref() {
            match session.search_address(lookup, &draft.address).await {
                AddressSearch::Candidates(candidates) => {
                    match matching_candidate(&draft.address, &candidates) {
                        Some(candidate) => {
                            if let AddressSelection::Fallback { warning, .. } =
                                session.choose_address(lookup, candidate).await
                            {
                                notes.push(warning);
                            }
                        }
                        None => notes.extend(unmatched_suggestions(&candidates)),
                    }
                }
                AddressSearch::ManualEntry { warning } => notes.push(warning),
                AddressSearch::Busy => {}
            }
        }

        if let Some(code) = draft.referral_code.as_deref() {
            if let Some(note) = describe_referral(session.apply_referral(api.as_ref(), code).await) {
                notes.push(note);
            }
        }
        notes.extend(session.advisories().into_iter().map(|issue| issue.message));

        session.advance()?;
        session.advance()?;
        let redirect = session.submit(&coordinator).await?;

        for error in coordinator.flush_telemetry().await {
            tracing::warn!(
                event_name = "booking.telemetry_failed",
                booking_id = %session.draft().id.0,
                error = %error,
                "quote persistence did not complete"
            );
        }
        Ok::<_, BookingError>((redirect, notes))
    });

    match result {
        Ok((redirect, notes)) => {
            let quote = session.quote();
            let data = json!({
                "booking_id": session.draft().id.0,
                "redirect_url": redirect.0,
                "price": quote.map(|quote| quote.final_price.minor()),
                "notes": notes,
            });
            CommandResult::success_with_data(
                "book",
                format!("continue to payment setup at {}", redirect.0),
                Some(data),
            )
        }
        Err(error) => CommandResult::failure(
            "book",
            error.error_class(),
            format!("{} ({error})", error.user_message()),
            4,
        ),
    }
}

pub fn resume(query: &str) -> CommandResult {
    let Some(setup) = SetupReturn::from_query(query) else {
        return CommandResult::failure(
            "resume",
            "invalid_query",
            "expected `setup=success` or `setup=canceled` in the return url",
            2,
        );
    };
    let config = match load_config("resume") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let store = FileSnapshotStore::new(config.booking.snapshot_dir.clone());
    let mut session = BookingSession::from_config(&config, Arc::new(TracingAuditSink));

    match session.handle_setup_return(&store, setup) {
        Ok(SetupResolution::Completed) => {
            CommandResult::success("resume", "payment method saved; booking complete")
        }
        Ok(SetupResolution::Restored) => {
            let draft = session.draft();
            let data = json!({
                "booking_id": draft.id.0,
                "step": format!("{:?}", draft.current_step),
                "price": draft.quote.as_ref().map(|quote| quote.final_price.minor()),
            });
            CommandResult::success_with_data(
                "resume",
                "payment setup was canceled; booking restored at confirmation",
                Some(data),
            )
        }
        Ok(SetupResolution::NothingToRestore) => {
            CommandResult::success("resume", "no saved booking to restore")
        }
        Err(error) => CommandResult::failure(
            "resume",
            error.error_class(),
            format!("{} ({error})", error.user_message()),
            4,
        ),
    }
}

fn address_lookup(config: &AppConfig) -> Option<PlacesAddressLookup> {
    if !config.address_lookup_ready() {
        return None;
    }
    let timeout = Duration::from_secs(config.api.timeout_secs);
    match PlacesAddressLookup::from_config(&config.address_lookup, timeout) {
        Ok(lookup) => Some(lookup),
        Err(error) => {
            tracing::warn!(
                event_name = "booking.address_lookup_disabled",
                error = %error,
                "address lookup could not be initialised; using the address as typed"
            );
            None
        }
    }
}

/// Only a suggestion that is the typed address itself counts as selected.
fn matching_candidate<'a>(
    typed: &str,
    candidates: &'a [AddressCandidate],
) -> Option<&'a AddressCandidate> {
    let typed = typed.trim();
    candidates.iter().find(|candidate| candidate.description.trim().eq_ignore_ascii_case(typed))
}

fn unmatched_suggestions(candidates: &[AddressCandidate]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let descriptions: Vec<&str> =
        candidates.iter().map(|candidate| candidate.description.as_str()).collect();
    Some(format!(
        "address kept as typed; the lookup suggested: {}",
        descriptions.join("; ")
    ))
}

fn describe_referral(outcome: ReferralOutcome) -> Option<String> {
    match outcome {
        ReferralOutcome::Applied { discount } => Some(format!("referral discount applied: {discount}")),
        ReferralOutcome::Rejected { message } | ReferralOutcome::Unavailable { message } => {
            Some(message)
        }
        ReferralOutcome::Disabled => Some("referral codes are not enabled".to_string()),
        ReferralOutcome::Locked => {
            Some("booking already submitted; referral not applied".to_string())
        }
        ReferralOutcome::AlreadyApplied | ReferralOutcome::Cleared | ReferralOutcome::Busy => None,
    }
}
