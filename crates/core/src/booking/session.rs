//! One customer's pass through the booking form.
//!
//! The session owns the draft exclusively. Every input change that affects the
//! price recomputes the quote from the pricing table, so the quote shown on
//! the confirmation step is always derived from the current selections.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::booking::coordinator::{BookingCoordinator, RedirectUrl};
use crate::booking::in_flight::InFlight;
use crate::booking::ports::{AddressCandidate, AddressLookup, ReferralValidator};
use crate::booking::snapshot::{SnapshotError, SnapshotStore};
use crate::booking::wire::{normalize_referral_code, ReferralValidationRequest};
use crate::config::AppConfig;
use crate::domain::booking::{BookingDraft, BookingSnapshot, ReferralApplication};
use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
use crate::domain::quote::{Price, Quote};
use crate::errors::{BookingError, CollaboratorError};
use crate::flows::guards;
use crate::flows::{
    BookingEvent, BookingFlow, BookingStep, FieldIssue, FlowEngine, TransitionOutcome,
};
use crate::pricing::PricingTable;

const ACTOR: &str = "booking-session";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferralOutcome {
    Applied { discount: DiscountRate },
    AlreadyApplied,
    Cleared,
    Rejected { message: String },
    Unavailable { message: String },
    Busy,
    Disabled,
    /// The booking already left for payment setup.
    Locked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressSearch {
    Candidates(Vec<AddressCandidate>),
    /// Lookup is down; the user types the full address instead.
    ManualEntry { warning: String },
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressSelection {
    Canonical(String),
    Fallback { address: String, warning: String },
    Locked,
}

/// Query parameter the payment processor appends when it sends the user back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupReturn {
    Success,
    Canceled,
}

impl SetupReturn {
    /// Reads `setup=success|canceled` from a query string or full URL.
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.split_once('?').map_or(query, |(_, rest)| rest);
        query.split('&').find_map(|pair| match pair.split_once('=') {
            Some(("setup", "success")) => Some(Self::Success),
            Some(("setup", "canceled" | "cancelled")) => Some(Self::Canceled),
            _ => None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupResolution {
    /// Payment method saved; the stored snapshot is gone and the form is fresh.
    Completed,
    /// Setup was abandoned; the draft is back at confirmation.
    Restored,
    NothingToRestore,
}

pub struct BookingSession {
    draft: BookingDraft,
    pricing: PricingTable,
    engine: FlowEngine<BookingFlow>,
    audit: Arc<dyn AuditSink>,
    referrals_enabled: bool,
    referral_check: InFlight,
    address_lookup: InFlight,
    correlation_id: String,
}

impl BookingSession {
    pub fn new(pricing: PricingTable, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            draft: BookingDraft::starting_tomorrow(),
            pricing,
            engine: FlowEngine::default(),
            audit,
            referrals_enabled: false,
            referral_check: InFlight::default(),
            address_lookup: InFlight::default(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn from_config(config: &AppConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(PricingTable::from_config(&config.pricing), audit)
            .with_referrals(config.referral.enabled)
    }

    pub fn with_referrals(mut self, enabled: bool) -> Self {
        self.referrals_enabled = enabled;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Replaces the draft wholesale, e.g. with one prepared outside the form.
    pub fn with_draft(mut self, draft: BookingDraft) -> Self {
        self.draft = draft;
        self.recompute_quote();
        self
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn step(&self) -> BookingStep {
        self.draft.current_step
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.draft.quote.as_ref()
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn referrals_enabled(&self) -> bool {
        self.referrals_enabled
    }

    pub fn referral_flag(&self) -> InFlight {
        self.referral_check.clone()
    }

    pub fn address_flag(&self) -> InFlight {
        self.address_lookup.clone()
    }

    /// Struck-through one-time price for the selected lot size.
    pub fn original_price(&self) -> Option<Price> {
        self.draft.lot_size.and_then(|tier| self.pricing.original_price(tier).ok())
    }

    pub fn savings(&self) -> Option<Price> {
        self.quote().map(|quote| self.pricing.savings(quote))
    }

    pub fn missing_fields(&self) -> Vec<FieldIssue> {
        guards::missing_fields(self.step(), &self.draft)
    }

    pub fn advisories(&self) -> Vec<FieldIssue> {
        guards::advisories(&self.draft)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if self.locked("set_name") {
            return;
        }
        self.draft.contact.name = name.into();
    }

    /// A referral is tied to the referee's email, so changing to a different
    /// address drops it.
    pub fn set_email(&mut self, email: impl Into<String>) {
        if self.locked("set_email") {
            return;
        }
        let email = email.into();
        let stale = self
            .draft
            .referral
            .as_ref()
            .is_some_and(|referral| !referral.referee_email.eq_ignore_ascii_case(email.trim()));
        self.draft.contact.email = email;
        if stale {
            self.clear_referral();
        }
    }

    pub fn set_phone(&mut self, phone: impl Into<String>) {
        if self.locked("set_phone") {
            return;
        }
        self.draft.contact.phone = phone.into();
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        if self.locked("set_address") {
            return;
        }
        self.draft.address = address.into();
    }

    pub fn set_start_date(&mut self, date: NaiveDate) {
        if self.locked("set_start_date") {
            return;
        }
        self.draft.start_date = date;
    }

    /// Returns the quote for the current selections. Once the booking has
    /// been handed to payment setup the selection is ignored.
    pub fn select_lot_size(&mut self, lot_size: LotSizeTier) -> Option<&Quote> {
        if !self.locked("select_lot_size") {
            self.draft.lot_size = Some(lot_size);
            self.recompute_quote();
        }
        self.draft.quote.as_ref()
    }

    pub fn select_frequency(&mut self, frequency: ServiceFrequency) -> Option<&Quote> {
        if !self.locked("select_frequency") {
            self.draft.frequency = Some(frequency);
            self.recompute_quote();
        }
        self.draft.quote.as_ref()
    }

    pub async fn search_address(&mut self, lookup: &dyn AddressLookup, input: &str) -> AddressSearch {
        let input = input.trim();
        if input.is_empty() {
            return AddressSearch::Candidates(Vec::new());
        }
        let Some(_guard) = self.address_lookup.try_begin() else {
            return AddressSearch::Busy;
        };

        match lookup.suggest(input).await {
            Ok(candidates) => AddressSearch::Candidates(candidates),
            Err(error) => {
                tracing::warn!(
                    event_name = "booking.address_lookup_unavailable",
                    correlation_id = %self.correlation_id,
                    error = %error,
                    "address suggestions unavailable; falling back to manual entry"
                );
                AddressSearch::ManualEntry {
                    warning: "Address suggestions are unavailable. Please type your full address."
                        .to_owned(),
                }
            }
        }
    }

    pub async fn choose_address(
        &mut self,
        lookup: &dyn AddressLookup,
        candidate: &AddressCandidate,
    ) -> AddressSelection {
        if self.locked("choose_address") {
            return AddressSelection::Locked;
        }
        let resolved = match self.address_lookup.try_begin() {
            Some(_guard) => lookup.resolve(candidate).await,
            None => Err(CollaboratorError::Unavailable {
                collaborator: crate::errors::Collaborator::AddressLookup,
                message: "another lookup is in progress".to_owned(),
            }),
        };

        match resolved {
            Ok(address) if !address.trim().is_empty() => {
                self.draft.address = address.clone();
                AddressSelection::Canonical(address)
            }
            Ok(_) | Err(_) => {
                let address = candidate.description.clone();
                self.draft.address = address.clone();
                AddressSelection::Fallback {
                    address,
                    warning: "We could not verify this address. Please check it before continuing."
                        .to_owned(),
                }
            }
        }
    }

    pub async fn apply_referral(
        &mut self,
        validator: &dyn ReferralValidator,
        code: &str,
    ) -> ReferralOutcome {
        if !self.referrals_enabled {
            return ReferralOutcome::Disabled;
        }
        if self.locked("apply_referral") {
            return ReferralOutcome::Locked;
        }

        let code = normalize_referral_code(code);
        if code.is_empty() {
            self.clear_referral();
            return ReferralOutcome::Cleared;
        }

        let email = self.draft.contact.email.trim().to_owned();
        if self.draft.referral.as_ref().is_some_and(|referral| referral.matches(&code, &email)) {
            return ReferralOutcome::AlreadyApplied;
        }

        let Some(_guard) = self.referral_check.try_begin() else {
            return ReferralOutcome::Busy;
        };

        let request = ReferralValidationRequest::new(&code, &email);
        let outcome = match validator.validate(&request).await {
            Ok(discount) => {
                self.draft.referral =
                    Some(ReferralApplication { code: code.clone(), referee_email: email, discount });
                ReferralOutcome::Applied { discount }
            }
            Err(CollaboratorError::Rejected { message, .. }) => {
                self.draft.referral = None;
                ReferralOutcome::Rejected { message }
            }
            Err(error) => {
                self.draft.referral = None;
                tracing::warn!(
                    event_name = "booking.referral_unavailable",
                    correlation_id = %self.correlation_id,
                    error = %error,
                    "referral validation unavailable; continuing without discount"
                );
                ReferralOutcome::Unavailable {
                    message: "We could not check this referral code right now.".to_owned(),
                }
            }
        };
        self.recompute_quote();

        let (audit_outcome, event_type) = match &outcome {
            ReferralOutcome::Applied { .. } => (AuditOutcome::Success, "referral.applied"),
            ReferralOutcome::Rejected { .. } => (AuditOutcome::Rejected, "referral.rejected"),
            _ => (AuditOutcome::Failed, "referral.unavailable"),
        };
        self.audit.emit(
            AuditEvent::from_context(
                &self.audit_context(),
                event_type,
                AuditCategory::Referral,
                audit_outcome,
            )
            .with_metadata("code", code),
        );

        outcome
    }

    pub fn clear_referral(&mut self) {
        if self.locked("clear_referral") {
            return;
        }
        if self.draft.referral.take().is_some() {
            self.recompute_quote();
        }
    }

    pub fn advance(&mut self) -> Result<TransitionOutcome, BookingError> {
        self.transition(BookingEvent::Advance)
    }

    pub fn back(&mut self) -> Result<TransitionOutcome, BookingError> {
        self.transition(BookingEvent::Back)
    }

    /// Hands the confirmed draft to the coordinator and, once a redirect URL
    /// is issued, moves to the terminal payment-redirect step. On failure the
    /// draft stays at confirmation for a retry.
    pub async fn submit(
        &mut self,
        coordinator: &BookingCoordinator,
    ) -> Result<RedirectUrl, BookingError> {
        let step = self.step();
        let context = guards::context_for(step, &self.draft);
        self.engine.apply(step, BookingEvent::RedirectIssued, &context)?;

        match coordinator.submit_booking(&self.draft).await {
            Ok(url) => {
                self.transition(BookingEvent::RedirectIssued)?;
                self.audit.emit(
                    AuditEvent::from_context(
                        &self.audit_context(),
                        "payment.setup_started",
                        AuditCategory::Payment,
                        AuditOutcome::Success,
                    )
                    .with_metadata("redirect", url.0.clone()),
                );
                Ok(url)
            }
            Err(error) => {
                self.audit.emit(
                    AuditEvent::from_context(
                        &self.audit_context(),
                        "payment.setup_failed",
                        AuditCategory::Payment,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    pub fn reset(&mut self) {
        self.draft = BookingDraft::starting_tomorrow();
    }

    /// Restores the draft saved before the last payment-setup redirect.
    /// Returns `false` when nothing was stored.
    pub fn resume(&mut self, store: &dyn SnapshotStore) -> Result<bool, BookingError> {
        let Some(snapshot) = self.load_readable(store)? else {
            return Ok(false);
        };

        self.draft = snapshot.draft;
        if self.draft.current_step.is_terminal() {
            self.draft.current_step = BookingStep::Confirmation;
        }
        self.recompute_quote();
        tracing::info!(
            event_name = "booking.resumed",
            correlation_id = %self.correlation_id,
            booking_id = %self.draft.id.0,
            saved_at = %snapshot.saved_at,
            "booking restored from snapshot"
        );
        Ok(true)
    }

    pub fn handle_setup_return(
        &mut self,
        store: &dyn SnapshotStore,
        setup: SetupReturn,
    ) -> Result<SetupResolution, BookingError> {
        match setup {
            SetupReturn::Success => {
                let booking_id = self.load_readable(store)?.map(|snapshot| snapshot.draft.id);
                store.clear()?;
                self.audit.emit(
                    AuditEvent::new(
                        booking_id,
                        self.correlation_id.clone(),
                        "payment.setup_completed",
                        AuditCategory::Payment,
                        ACTOR,
                        AuditOutcome::Success,
                    ),
                );
                self.reset();
                Ok(SetupResolution::Completed)
            }
            SetupReturn::Canceled => {
                if self.resume(store)? {
                    self.draft.current_step = BookingStep::Confirmation;
                    Ok(SetupResolution::Restored)
                } else {
                    Ok(SetupResolution::NothingToRestore)
                }
            }
        }
    }

    /// Loads the stored snapshot. One that no longer decodes is discarded
    /// and treated as absent.
    fn load_readable(
        &self,
        store: &dyn SnapshotStore,
    ) -> Result<Option<BookingSnapshot>, BookingError> {
        match store.load() {
            Ok(snapshot) => Ok(snapshot),
            Err(SnapshotError::Decode(message)) => {
                tracing::warn!(
                    event_name = "booking.snapshot_unreadable",
                    correlation_id = %self.correlation_id,
                    error = %message,
                    "discarding unreadable booking snapshot"
                );
                store.clear()?;
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn locked(&self, action: &'static str) -> bool {
        let locked = self.step().is_terminal();
        if locked {
            tracing::debug!(
                event_name = "booking.change_ignored",
                correlation_id = %self.correlation_id,
                booking_id = %self.draft.id.0,
                action,
                "booking already handed to payment setup"
            );
        }
        locked
    }

    fn transition(&mut self, event: BookingEvent) -> Result<TransitionOutcome, BookingError> {
        let step = self.step();
        let context = guards::context_for(step, &self.draft);
        let outcome = self.engine.apply_with_audit(
            step,
            event,
            &context,
            self.audit.as_ref(),
            &self.audit_context(),
        )?;
        self.draft.current_step = outcome.to;
        Ok(outcome)
    }

    fn recompute_quote(&mut self) {
        self.draft.quote = match (self.draft.lot_size, self.draft.frequency) {
            (Some(_), Some(_)) => self
                .pricing
                .quote(self.draft.lot_size, self.draft.frequency, self.draft.referral_discount())
                .ok(),
            _ => None,
        };
    }

    fn audit_context(&self) -> AuditContext {
        AuditContext::new(Some(self.draft.id.clone()), self.correlation_id.clone(), ACTOR)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::{
        AddressSearch, AddressSelection, BookingSession, ReferralOutcome, SetupResolution,
        SetupReturn,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::booking::coordinator::fakes::{RecordingQuotes, ScriptedPayments};
    use crate::booking::coordinator::{BookingCoordinator, ReturnUrls};
    use crate::booking::ports::{AddressCandidate, AddressLookup, ReferralValidator};
    use crate::booking::snapshot::{InMemorySnapshotStore, SnapshotStore};
    use crate::booking::wire::ReferralValidationRequest;
    use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
    use crate::domain::quote::Price;
    use crate::errors::{BookingError, Collaborator, CollaboratorError, PaymentSetupError};
    use crate::flows::{BookingStep, DraftField};
    use crate::pricing::PricingTable;

    struct FixedReferrals {
        result: Result<DiscountRate, CollaboratorError>,
        calls: AtomicUsize,
        requests: Mutex<Vec<ReferralValidationRequest>>,
    }

    impl FixedReferrals {
        fn new(result: Result<DiscountRate, CollaboratorError>) -> Self {
            Self { result, calls: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ReferralValidator for FixedReferrals {
        async fn validate(
            &self,
            request: &ReferralValidationRequest,
        ) -> Result<DiscountRate, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("lock").push(request.clone());
            self.result.clone()
        }
    }

    struct StaticLookup {
        online: bool,
    }

    #[async_trait]
    impl AddressLookup for StaticLookup {
        async fn suggest(&self, input: &str) -> Result<Vec<AddressCandidate>, CollaboratorError> {
            if !self.online {
                return Err(CollaboratorError::Unavailable {
                    collaborator: Collaborator::AddressLookup,
                    message: "script failed to load".to_owned(),
                });
            }
            Ok(vec![AddressCandidate {
                description: format!("{input}, Springfield, IL, USA"),
                place_id: "place-1".to_owned(),
            }])
        }

        async fn resolve(&self, candidate: &AddressCandidate) -> Result<String, CollaboratorError> {
            if !self.online {
                return Err(CollaboratorError::Unavailable {
                    collaborator: Collaborator::AddressLookup,
                    message: "script failed to load".to_owned(),
                });
            }
            Ok(format!("{} 62701", candidate.description))
        }
    }

    fn ten_percent() -> DiscountRate {
        DiscountRate::new(Decimal::new(1, 1)).expect("10%")
    }

    fn new_session() -> (BookingSession, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let session = BookingSession::new(PricingTable::canonical(), Arc::new(sink.clone()))
            .with_referrals(true)
            .with_correlation_id("req-session");
        (session, sink)
    }

    fn fill_to_confirmation(session: &mut BookingSession) {
        session.set_name("Pat Doe");
        session.set_email("pat@example.com");
        session.set_phone("555-123-4567");
        session.advance().expect("contact -> details");
        session.set_address("12 Elm St, Springfield, IL");
        session.select_lot_size(LotSizeTier::Medium);
        session.select_frequency(ServiceFrequency::Weekly);
        session.advance().expect("details -> confirmation");
    }

    #[test]
    fn empty_name_keeps_session_on_contact_step() {
        let (mut session, sink) = new_session();
        session.set_email("a@b.com");
        session.set_phone("5551234567");

        let error = session.advance().expect_err("name is required");
        assert!(matches!(error, BookingError::Validation(_)));
        assert_eq!(session.step(), BookingStep::Contact);
        assert_eq!(session.missing_fields()[0].field, DraftField::Name);
        assert_eq!(sink.event_types(), vec!["flow.transition_rejected".to_owned()]);
    }

    #[test]
    fn selections_recompute_quote_and_savings() {
        let (mut session, _) = new_session();
        assert!(session.select_lot_size(LotSizeTier::Small).is_none());
        let quote = session.select_frequency(ServiceFrequency::Weekly).cloned().expect("quote");

        assert_eq!(quote.final_price, Price::from_major(50));
        assert_eq!(session.original_price(), Some(Price::from_major(60)));
        assert_eq!(session.savings(), Some(Price::from_major(10)));
    }

    #[test]
    fn back_and_forward_reproduces_identical_quote() {
        let (mut session, _) = new_session();
        fill_to_confirmation(&mut session);
        let before = session.quote().cloned();

        session.back().expect("confirmation -> details");
        assert_eq!(session.step(), BookingStep::Details);
        assert_eq!(session.draft().contact.name, "Pat Doe");
        session.advance().expect("details -> confirmation");

        assert_eq!(session.quote().cloned(), before);
    }

    #[tokio::test]
    async fn referral_is_idempotent_per_code_and_email() {
        let (mut session, sink) = new_session();
        session.set_email("pat@example.com");
        session.select_lot_size(LotSizeTier::Medium);
        session.select_frequency(ServiceFrequency::Weekly);
        let validator = FixedReferrals::new(Ok(ten_percent()));

        let first = session.apply_referral(&validator, "lawn2024").await;
        let second = session.apply_referral(&validator, "LAWN2024").await;

        assert_eq!(first, ReferralOutcome::Applied { discount: ten_percent() });
        assert_eq!(second, ReferralOutcome::AlreadyApplied);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(validator.requests.lock().expect("lock")[0].code, "LAWN2024");
        assert_eq!(session.quote().map(|quote| quote.final_price), Some(Price::from_major(50)));
        assert!(sink.event_types().contains(&"referral.applied".to_owned()));
    }

    #[tokio::test]
    async fn rejected_or_unavailable_referral_leaves_price_undiscounted() {
        let (mut session, _) = new_session();
        session.select_lot_size(LotSizeTier::Xlarge);
        session.select_frequency(ServiceFrequency::OneTime);

        let rejected = FixedReferrals::new(Err(CollaboratorError::Rejected {
            collaborator: Collaborator::ReferralValidation,
            status: Some(400),
            message: "Invalid referral code".to_owned(),
        }));
        let outcome = session.apply_referral(&rejected, "NOPE").await;
        assert_eq!(outcome, ReferralOutcome::Rejected { message: "Invalid referral code".to_owned() });

        let offline = FixedReferrals::new(Err(CollaboratorError::Unavailable {
            collaborator: Collaborator::ReferralValidation,
            message: "timeout".to_owned(),
        }));
        let outcome = session.apply_referral(&offline, "LAWN2024").await;
        assert!(matches!(outcome, ReferralOutcome::Unavailable { .. }));

        assert!(session.draft().referral.is_none());
        assert_eq!(session.quote().map(|quote| quote.final_price), Some(Price::from_major(80)));
    }

    #[tokio::test]
    async fn changing_email_drops_referral_and_disabled_flag_skips_call() {
        let (mut session, _) = new_session();
        session.set_email("pat@example.com");
        session.select_lot_size(LotSizeTier::Medium);
        session.select_frequency(ServiceFrequency::Weekly);
        let validator = FixedReferrals::new(Ok(ten_percent()));
        session.apply_referral(&validator, "LAWN2024").await;

        session.set_email("PAT@example.com");
        assert!(session.draft().referral.is_some());
        session.set_email("sam@example.com");
        assert!(session.draft().referral.is_none());
        assert_eq!(session.quote().map(|quote| quote.final_price), Some(Price::from_major(55)));

        let mut disabled = BookingSession::new(
            PricingTable::canonical(),
            Arc::new(InMemoryAuditSink::default()),
        );
        assert_eq!(disabled.apply_referral(&validator, "LAWN2024").await, ReferralOutcome::Disabled);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn address_lookup_outage_degrades_to_manual_entry() {
        let (mut session, _) = new_session();
        let online = StaticLookup { online: true };
        let offline = StaticLookup { online: false };

        let AddressSearch::Candidates(candidates) =
            session.search_address(&online, "12 Elm St").await
        else {
            panic!("expected candidates");
        };
        let selection = session.choose_address(&online, &candidates[0]).await;
        assert_eq!(
            selection,
            AddressSelection::Canonical("12 Elm St, Springfield, IL, USA 62701".to_owned())
        );

        assert!(matches!(
            session.search_address(&offline, "12 Elm St").await,
            AddressSearch::ManualEntry { .. }
        ));
        let selection = session.choose_address(&offline, &candidates[0]).await;
        assert!(matches!(selection, AddressSelection::Fallback { .. }));
        assert_eq!(session.draft().address, "12 Elm St, Springfield, IL, USA");
        assert!(!session.address_flag().is_active());
    }

    #[test]
    fn setup_return_is_parsed_from_query_or_url() {
        assert_eq!(SetupReturn::from_query("setup=success"), Some(SetupReturn::Success));
        assert_eq!(
            SetupReturn::from_query("https://lawnpeak.example/book?x=1&setup=canceled"),
            Some(SetupReturn::Canceled)
        );
        assert_eq!(SetupReturn::from_query("?setup=maybe"), None);
    }

    #[tokio::test]
    async fn submit_redirects_then_cancel_restores_confirmation() {
        let (mut session, sink) = new_session();
        fill_to_confirmation(&mut session);
        let store = InMemorySnapshotStore::default();
        let coordinator = BookingCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(RecordingQuotes::default()),
            Arc::new(ScriptedPayments::redirect("https://pay.example/setup/7")),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );

        let url = session.submit(&coordinator).await.expect("redirect");
        assert_eq!(url.0, "https://pay.example/setup/7");
        assert_eq!(session.step(), BookingStep::PaymentRedirect);
        assert!(sink.event_types().contains(&"payment.setup_started".to_owned()));
        let submitted = session.draft().clone();

        let (mut returning, _) = new_session();
        let resolution =
            returning.handle_setup_return(&store, SetupReturn::Canceled).expect("restore");
        assert_eq!(resolution, SetupResolution::Restored);
        assert_eq!(returning.step(), BookingStep::Confirmation);
        assert_eq!(returning.draft().contact, submitted.contact);
        assert_eq!(returning.quote(), submitted.quote.as_ref());

        let resolution =
            returning.handle_setup_return(&store, SetupReturn::Success).expect("complete");
        assert_eq!(resolution, SetupResolution::Completed);
        assert!(store.load().expect("load").is_none());
        assert_eq!(returning.step(), BookingStep::Contact);
        assert!(returning.draft().contact.name.is_empty());
    }

    #[tokio::test]
    async fn failed_submit_stays_on_confirmation() {
        let (mut session, _) = new_session();
        fill_to_confirmation(&mut session);
        let coordinator = BookingCoordinator::new(
            Arc::new(InMemorySnapshotStore::default()),
            Arc::new(RecordingQuotes::default()),
            Arc::new(ScriptedPayments::with(Err(PaymentSetupError::Transport(
                "connection reset".to_owned(),
            )))),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );

        let error = session.submit(&coordinator).await.expect_err("must fail");
        assert!(matches!(error, BookingError::PaymentSetup(PaymentSetupError::Transport(_))));
        assert_eq!(session.step(), BookingStep::Confirmation);
    }

    #[tokio::test]
    async fn submit_before_confirmation_is_rejected_without_side_effects() {
        let (mut session, _) = new_session();
        let store = InMemorySnapshotStore::default();
        let coordinator = BookingCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(RecordingQuotes::default()),
            Arc::new(ScriptedPayments::redirect("https://pay.example/setup/8")),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );

        assert!(session.submit(&coordinator).await.is_err());
        assert!(store.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn redirected_booking_ignores_further_edits() {
        let (mut session, _) = new_session();
        fill_to_confirmation(&mut session);
        let coordinator = BookingCoordinator::new(
            Arc::new(InMemorySnapshotStore::default()),
            Arc::new(RecordingQuotes::default()),
            Arc::new(ScriptedPayments::redirect("https://pay.example/setup/9")),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );
        session.submit(&coordinator).await.expect("redirect");
        let submitted = session.draft().clone();

        session.set_name("");
        session.set_email("sam@example.com");
        session.set_address("99 Oak Ave");
        let quote = session.select_lot_size(LotSizeTier::Xlarge).cloned();
        assert_eq!(quote.as_ref(), submitted.quote.as_ref());
        session.select_frequency(ServiceFrequency::OneTime);

        let validator = FixedReferrals::new(Ok(ten_percent()));
        assert_eq!(session.apply_referral(&validator, "LAWN2024").await, ReferralOutcome::Locked);
        let candidate = AddressCandidate {
            description: "99 Oak Ave, Springfield, IL, USA".to_owned(),
            place_id: "place-2".to_owned(),
        };
        let selection = session.choose_address(&StaticLookup { online: true }, &candidate).await;
        assert_eq!(selection, AddressSelection::Locked);

        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.step(), BookingStep::PaymentRedirect);
        assert_eq!(session.draft(), &submitted);
    }

    #[tokio::test]
    async fn referral_check_in_progress_reports_busy_without_calling_validator() {
        let (mut session, _) = new_session();
        session.set_email("pat@example.com");
        let validator = FixedReferrals::new(Ok(ten_percent()));

        let held = session.referral_flag().try_begin().expect("claim referral flag");
        assert_eq!(session.apply_referral(&validator, "LAWN2024").await, ReferralOutcome::Busy);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert!(session.draft().referral.is_none());

        drop(held);
        assert_eq!(
            session.apply_referral(&validator, "LAWN2024").await,
            ReferralOutcome::Applied { discount: ten_percent() }
        );
    }

    #[tokio::test]
    async fn address_search_in_progress_reports_busy() {
        let (mut session, _) = new_session();
        let lookup = StaticLookup { online: true };

        let held = session.address_flag().try_begin().expect("claim address flag");
        assert_eq!(session.search_address(&lookup, "12 Elm St").await, AddressSearch::Busy);

        drop(held);
        assert!(matches!(
            session.search_address(&lookup, "12 Elm St").await,
            AddressSearch::Candidates(candidates) if candidates.len() == 1
        ));
    }

    #[test]
    fn unreadable_snapshot_does_not_block_completion() {
        let (mut session, sink) = new_session();
        let store = InMemorySnapshotStore::default();
        store.put_raw("{not json");

        let resolution =
            session.handle_setup_return(&store, SetupReturn::Success).expect("complete");

        assert_eq!(resolution, SetupResolution::Completed);
        assert!(store.raw().is_none());
        assert!(sink.event_types().contains(&"payment.setup_completed".to_owned()));
    }

    #[test]
    fn unreadable_snapshot_on_cancel_is_discarded() {
        let (mut session, _) = new_session();
        let store = InMemorySnapshotStore::default();
        store.put_raw("{not json");

        let resolution =
            session.handle_setup_return(&store, SetupReturn::Canceled).expect("cancel");

        assert_eq!(resolution, SetupResolution::NothingToRestore);
        assert!(store.raw().is_none());
        assert_eq!(session.step(), BookingStep::Contact);
    }
}
