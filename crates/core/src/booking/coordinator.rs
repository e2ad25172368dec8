use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::booking::in_flight::InFlight;
use crate::booking::ports::{PaymentSetupGateway, QuotePersistence};
use crate::booking::snapshot::SnapshotStore;
use crate::booking::wire::{QuoteSubmission, SetupIntentRequest};
use crate::domain::booking::{BookingDraft, BookingId, BookingSnapshot};
use crate::domain::quote::Quote;
use crate::errors::{BookingError, PaymentSetupError, TelemetryError};
use crate::flows::guards;
use crate::flows::{BookingStep, FlowTransitionError};

/// Payment-processor page the user is sent to next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectUrl(pub String);

impl fmt::Display for RedirectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the payment processor sends the user back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnUrls {
    pub success: String,
    pub cancel: String,
}

impl ReturnUrls {
    /// Builds both URLs from the booking page address, dropping any query it
    /// already carries.
    pub fn from_base(base: &str) -> Self {
        let base = base.split_once('?').map_or(base, |(path, _)| path);
        Self { success: format!("{base}?setup=success"), cancel: format!("{base}?setup=canceled") }
    }
}

/// Runs the side effects of submitting a booking, in order: local snapshot,
/// background quote persistence, then payment setup.
///
/// A quote is posted once per booking id and price. Retrying the same booking
/// after a payment-setup failure only repeats the payment call; a failed post
/// is forgotten so the next retry sends it again.
pub struct BookingCoordinator {
    snapshots: Arc<dyn SnapshotStore>,
    quotes: Arc<dyn QuotePersistence>,
    payments: Arc<dyn PaymentSetupGateway>,
    return_urls: ReturnUrls,
    submission: InFlight,
    telemetry: Mutex<Vec<JoinHandle<Result<(), TelemetryError>>>>,
    persisted: Arc<Mutex<Option<(BookingId, Quote)>>>,
}

impl BookingCoordinator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        quotes: Arc<dyn QuotePersistence>,
        payments: Arc<dyn PaymentSetupGateway>,
        return_urls: ReturnUrls,
    ) -> Self {
        Self {
            snapshots,
            quotes,
            payments,
            return_urls,
            submission: InFlight::default(),
            telemetry: Mutex::new(Vec::new()),
            persisted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn snapshots(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.snapshots)
    }

    pub fn return_urls(&self) -> &ReturnUrls {
        &self.return_urls
    }

    /// Shared handle to the submission flag, for rendering a busy state.
    pub fn submission_flag(&self) -> InFlight {
        self.submission.clone()
    }

    /// Must be called from within a tokio runtime.
    pub async fn submit_booking(&self, draft: &BookingDraft) -> Result<RedirectUrl, BookingError> {
        let Some(_guard) = self.submission.try_begin() else {
            return Err(BookingError::AlreadyInFlight { action: "booking submission" });
        };

        let issues = guards::missing_fields(BookingStep::Confirmation, draft);
        if !issues.is_empty() {
            return Err(FlowTransitionError::MissingRequiredFields {
                step: BookingStep::Confirmation,
                issues,
            }
            .into());
        }
        let Some(quote) = draft.quote.as_ref() else {
            return Err(FlowTransitionError::MissingRequiredFields {
                step: BookingStep::Confirmation,
                issues: Vec::new(),
            }
            .into());
        };

        self.snapshots.save(&BookingSnapshot::capture(draft))?;
        tracing::info!(
            event_name = "booking.snapshot_saved",
            booking_id = %draft.id.0,
            "booking snapshot saved before payment setup"
        );

        if self.claim_quote_persistence(&draft.id, quote) {
            self.spawn_quote_persistence(
                QuoteSubmission::from_draft(draft, quote),
                (draft.id.clone(), quote.clone()),
            );
        } else {
            tracing::debug!(
                event_name = "booking.quote_already_persisted",
                booking_id = %draft.id.0,
                "quote unchanged since last submission"
            );
        }

        let request = SetupIntentRequest::from_draft(
            draft,
            quote,
            self.return_urls.success.clone(),
            self.return_urls.cancel.clone(),
        );
        let response = match self.payments.create_setup_intent(&request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    event_name = "booking.payment_setup_failed",
                    booking_id = %draft.id.0,
                    error = %error,
                    "payment setup failed"
                );
                return Err(error.into());
            }
        };

        let Some(url) = response.redirect_url() else {
            tracing::warn!(
                event_name = "booking.payment_setup_failed",
                booking_id = %draft.id.0,
                "payment setup response had no redirect url"
            );
            return Err(PaymentSetupError::MissingRedirectUrl.into());
        };

        tracing::info!(
            event_name = "booking.payment_setup_started",
            booking_id = %draft.id.0,
            price = quote.final_price.minor(),
            "payment setup redirect issued"
        );
        Ok(RedirectUrl(url.to_owned()))
    }

    /// Waits for every background quote-persistence task started so far.
    pub async fn flush_telemetry(&self) -> Vec<TelemetryError> {
        let handles: Vec<_> = match self.telemetry.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => failures.push(error),
                Err(join_error) => failures.push(TelemetryError::TaskAborted(join_error.to_string())),
            }
        }
        failures
    }

    pub fn pending_telemetry(&self) -> usize {
        match self.telemetry.lock() {
            Ok(handles) => handles.iter().filter(|handle| !handle.is_finished()).count(),
            Err(poisoned) => {
                poisoned.into_inner().iter().filter(|handle| !handle.is_finished()).count()
            }
        }
    }

    /// Records `(booking_id, quote)` as sent. Returns `false` when that exact
    /// pair was already sent.
    fn claim_quote_persistence(&self, booking_id: &BookingId, quote: &Quote) -> bool {
        let mut persisted = self.persisted.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if persisted
            .as_ref()
            .is_some_and(|(id, sent)| id == booking_id && sent == quote)
        {
            return false;
        }
        *persisted = Some((booking_id.clone(), quote.clone()));
        true
    }

    fn spawn_quote_persistence(&self, submission: QuoteSubmission, key: (BookingId, Quote)) {
        let quotes = Arc::clone(&self.quotes);
        let persisted = Arc::clone(&self.persisted);
        let handle = tokio::spawn(async move {
            let result = quotes.submit_quote(&submission).await;
            let booking_id = &key.0 .0;
            match result {
                Ok(()) => {
                    tracing::debug!(
                        event_name = "booking.quote_persisted",
                        booking_id = %booking_id,
                        "quote submission recorded"
                    );
                    Ok(())
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "booking.quote_persistence_failed",
                        booking_id = %booking_id,
                        error = %error,
                        "quote submission failed; continuing with payment setup"
                    );
                    let mut sent =
                        persisted.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if sent.as_ref() == Some(&key) {
                        *sent = None;
                    }
                    Err(TelemetryError::from(error))
                }
            }
        });

        match self.telemetry.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use super::fakes::{RecordingQuotes, ScriptedPayments};
    use super::{BookingCoordinator, RedirectUrl, ReturnUrls};
    use crate::booking::ports::PaymentSetupGateway;
    use crate::booking::snapshot::{InMemorySnapshotStore, SnapshotError, SnapshotStore};
    use crate::booking::wire::{SetupIntentRequest, SetupIntentResponse};
    use crate::domain::booking::{BookingDraft, BookingSnapshot};
    use crate::domain::catalog::{LotSizeTier, ServiceFrequency};
    use crate::errors::{BookingError, PaymentSetupError, TelemetryError};
    use crate::pricing::PricingTable;

    fn ready_draft() -> BookingDraft {
        let mut draft = BookingDraft::new(NaiveDate::from_ymd_opt(2026, 6, 1).expect("date"));
        draft.contact.name = "Pat Doe".to_owned();
        draft.contact.email = "pat@example.com".to_owned();
        draft.contact.phone = "(555) 123-4567".to_owned();
        draft.address = "12 Elm St, Springfield, IL".to_owned();
        draft.lot_size = Some(LotSizeTier::Medium);
        draft.frequency = Some(ServiceFrequency::BiWeekly);
        draft.quote = PricingTable::canonical().quote(draft.lot_size, draft.frequency, None).ok();
        draft
    }

    fn coordinator(
        store: &InMemorySnapshotStore,
        quotes: Arc<RecordingQuotes>,
        payments: Arc<ScriptedPayments>,
    ) -> BookingCoordinator {
        BookingCoordinator::new(
            Arc::new(store.clone()),
            quotes,
            payments,
            ReturnUrls::from_base("https://lawnpeak.example/book?ref=ad"),
        )
    }

    #[test]
    fn return_urls_drop_existing_query() {
        let urls = ReturnUrls::from_base("https://lawnpeak.example/book?utm=x");
        assert_eq!(urls.success, "https://lawnpeak.example/book?setup=success");
        assert_eq!(urls.cancel, "https://lawnpeak.example/book?setup=canceled");
    }

    #[tokio::test]
    async fn successful_submission_saves_snapshot_and_returns_redirect() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes::default());
        let payments = Arc::new(ScriptedPayments::redirect("https://pay.example/setup/1"));
        let coordinator = coordinator(&store, quotes.clone(), payments.clone());
        let draft = ready_draft();

        let url = coordinator.submit_booking(&draft).await.expect("redirect");
        assert_eq!(url, RedirectUrl("https://pay.example/setup/1".to_owned()));
        assert!(coordinator.flush_telemetry().await.is_empty());

        let saved = store.load().expect("load").expect("snapshot present");
        assert_eq!(saved.draft, draft);
        assert_eq!(quotes.submissions.lock().expect("lock").len(), 1);

        let requests = payments.requests.lock().expect("lock");
        assert_eq!(requests[0].price.minor(), 6_500);
        assert_eq!(requests[0].cancel_url, "https://lawnpeak.example/book?setup=canceled");
        assert!(!coordinator.submission_flag().is_active());
    }

    #[tokio::test]
    async fn server_error_is_a_payment_setup_failure_and_keeps_snapshot() {
        let store = InMemorySnapshotStore::default();
        let payments = Arc::new(ScriptedPayments::with(Err(PaymentSetupError::Rejected {
            status: 500,
            message: "Internal Server Error".to_owned(),
        })));
        let coordinator = coordinator(&store, Arc::new(RecordingQuotes::default()), payments);
        let draft = ready_draft();

        let error = coordinator.submit_booking(&draft).await.expect_err("must fail");
        assert!(matches!(
            error,
            BookingError::PaymentSetup(PaymentSetupError::Rejected { status: 500, .. })
        ));
        assert_eq!(store.load().expect("load").map(|snapshot| snapshot.draft), Some(draft));
        assert!(!coordinator.submission_flag().is_active());
    }

    #[tokio::test]
    async fn missing_redirect_url_is_distinct_from_rejection() {
        let store = InMemorySnapshotStore::default();
        let payments = Arc::new(ScriptedPayments::with(Ok(SetupIntentResponse::default())));
        let coordinator = coordinator(&store, Arc::new(RecordingQuotes::default()), payments);

        let error = coordinator.submit_booking(&ready_draft()).await.expect_err("must fail");
        assert_eq!(error, BookingError::PaymentSetup(PaymentSetupError::MissingRedirectUrl));
    }

    #[tokio::test]
    async fn quote_persistence_failure_never_blocks_payment_setup() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes { fail: true, ..RecordingQuotes::default() });
        let payments = Arc::new(ScriptedPayments::redirect("https://pay.example/setup/2"));
        let coordinator = coordinator(&store, quotes, payments);

        coordinator.submit_booking(&ready_draft()).await.expect("redirect despite telemetry");
        let failures = coordinator.flush_telemetry().await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], TelemetryError::QuotePersistence(_)));
        assert_eq!(coordinator.pending_telemetry(), 0);
    }

    struct ReadOnlyStore;

    impl SnapshotStore for ReadOnlyStore {
        fn save(&self, _: &BookingSnapshot) -> Result<(), SnapshotError> {
            Err(SnapshotError::Io { path: "quoteFormData".to_owned(), message: "quota".to_owned() })
        }

        fn load(&self) -> Result<Option<BookingSnapshot>, SnapshotError> {
            Ok(None)
        }

        fn clear(&self) -> Result<(), SnapshotError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn snapshot_failure_stops_before_any_network_call() {
        let quotes = Arc::new(RecordingQuotes::default());
        let payments = Arc::new(ScriptedPayments::redirect("https://pay.example/setup/4"));
        let coordinator = BookingCoordinator::new(
            Arc::new(ReadOnlyStore),
            quotes.clone(),
            payments.clone(),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );

        let error = coordinator.submit_booking(&ready_draft()).await.expect_err("must fail");
        assert!(matches!(error, BookingError::Snapshot(_)));
        assert!(coordinator.flush_telemetry().await.is_empty());
        assert!(quotes.submissions.lock().expect("lock").is_empty());
        assert!(payments.requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn incomplete_draft_is_rejected_before_any_side_effect() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes::default());
        let payments = Arc::new(ScriptedPayments::redirect("https://pay.example/setup/3"));
        let coordinator = coordinator(&store, quotes.clone(), payments.clone());
        let mut draft = ready_draft();
        draft.contact.phone = "555".to_owned();

        let error = coordinator.submit_booking(&draft).await.expect_err("must fail");
        assert!(matches!(error, BookingError::Validation(_)));
        assert!(store.load().expect("load").is_none());
        assert!(quotes.submissions.lock().expect("lock").is_empty());
        assert!(payments.requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn retrying_the_same_booking_posts_the_quote_once() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes::default());
        let payments = Arc::new(ScriptedPayments::with(Err(PaymentSetupError::Rejected {
            status: 500,
            message: "Internal Server Error".to_owned(),
        })));
        let coordinator = coordinator(&store, quotes.clone(), payments.clone());
        let mut draft = ready_draft();

        for _ in 0..3 {
            assert!(coordinator.submit_booking(&draft).await.is_err());
            assert!(coordinator.flush_telemetry().await.is_empty());
        }
        assert_eq!(quotes.submissions.lock().expect("lock").len(), 1);
        assert_eq!(payments.requests.lock().expect("lock").len(), 3);

        draft.frequency = Some(ServiceFrequency::Weekly);
        draft.quote = PricingTable::canonical().quote(draft.lot_size, draft.frequency, None).ok();
        assert!(coordinator.submit_booking(&draft).await.is_err());
        coordinator.flush_telemetry().await;

        let submissions = quotes.submissions.lock().expect("lock");
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[1].service_type, ServiceFrequency::Weekly);
    }

    #[tokio::test]
    async fn failed_quote_post_is_sent_again_on_retry() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes { fail: true, ..RecordingQuotes::default() });
        let payments = Arc::new(ScriptedPayments::with(Err(PaymentSetupError::Transport(
            "connection reset".to_owned(),
        ))));
        let coordinator = coordinator(&store, quotes.clone(), payments);
        let draft = ready_draft();

        for _ in 0..2 {
            assert!(coordinator.submit_booking(&draft).await.is_err());
            assert_eq!(coordinator.flush_telemetry().await.len(), 1);
        }
        assert_eq!(quotes.submissions.lock().expect("lock").len(), 2);
    }

    #[derive(Default)]
    struct BlockingPayments {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PaymentSetupGateway for BlockingPayments {
        async fn create_setup_intent(
            &self,
            _: &SetupIntentRequest,
        ) -> Result<SetupIntentResponse, PaymentSetupError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(SetupIntentResponse {
                setup_intent_url: Some("https://pay.example/setup/5".to_owned()),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn second_submission_while_first_is_pending_is_refused() {
        let store = InMemorySnapshotStore::default();
        let quotes = Arc::new(RecordingQuotes::default());
        let payments = Arc::new(BlockingPayments::default());
        let coordinator = BookingCoordinator::new(
            Arc::new(store.clone()),
            quotes.clone(),
            payments.clone(),
            ReturnUrls::from_base("https://lawnpeak.example/book"),
        );
        let flag = coordinator.submission_flag();
        let draft = ready_draft();

        let first = coordinator.submit_booking(&draft);
        let second = async {
            payments.entered.notified().await;
            assert!(flag.is_active());
            let refused = coordinator.submit_booking(&draft).await;
            payments.release.notify_one();
            refused
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, Ok(RedirectUrl("https://pay.example/setup/5".to_owned())));
        assert_eq!(second, Err(BookingError::AlreadyInFlight { action: "booking submission" }));
        assert!(!flag.is_active());
        assert!(coordinator.flush_telemetry().await.is_empty());
        assert_eq!(quotes.submissions.lock().expect("lock").len(), 1);
    }
}
