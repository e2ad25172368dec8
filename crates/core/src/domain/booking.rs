use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
use crate::domain::quote::Quote;
use crate::flows::states::BookingStep;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(format!("BK-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Referral discount confirmed by the referral service for one referee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralApplication {
    pub code: String,
    pub referee_email: String,
    pub discount: DiscountRate,
}

impl ReferralApplication {
    pub fn matches(&self, code: &str, referee_email: &str) -> bool {
        self.code == code && self.referee_email.eq_ignore_ascii_case(referee_email)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub id: BookingId,
    pub contact: ContactInfo,
    pub address: String,
    pub lot_size: Option<LotSizeTier>,
    pub frequency: Option<ServiceFrequency>,
    pub referral: Option<ReferralApplication>,
    pub quote: Option<Quote>,
    pub start_date: NaiveDate,
    pub current_step: BookingStep,
}

impl BookingDraft {
    pub fn new(start_date: NaiveDate) -> Self {
        Self {
            id: BookingId::generate(),
            contact: ContactInfo::default(),
            address: String::new(),
            lot_size: None,
            frequency: None,
            referral: None,
            quote: None,
            start_date,
            current_step: BookingStep::Contact,
        }
    }

    /// Draft starting tomorrow, the earliest date the booking form offers.
    pub fn starting_tomorrow() -> Self {
        let today = Utc::now().date_naive();
        Self::new(today.checked_add_days(Days::new(1)).unwrap_or(today))
    }

    pub fn phone_digits(&self) -> usize {
        self.contact.phone.chars().filter(char::is_ascii_digit).count()
    }

    pub fn referral_discount(&self) -> Option<DiscountRate> {
        self.referral.as_ref().map(|referral| referral.discount)
    }
}

/// Serialized copy of a draft kept in client-local storage so a booking can be
/// resumed after the payment-setup redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub draft: BookingDraft,
    pub saved_at: DateTime<Utc>,
}

impl BookingSnapshot {
    pub fn capture(draft: &BookingDraft) -> Self {
        Self { draft: draft.clone(), saved_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{BookingDraft, ReferralApplication};
    use crate::domain::catalog::DiscountRate;
    use crate::flows::states::BookingStep;

    #[test]
    fn new_draft_starts_empty_at_contact_step() {
        let date = NaiveDate::from_ymd_opt(2026, 5, 4).expect("valid date");
        let draft = BookingDraft::new(date);

        assert_eq!(draft.current_step, BookingStep::Contact);
        assert!(draft.contact.name.is_empty());
        assert!(draft.quote.is_none());
        assert_eq!(draft.start_date, date);
        assert!(draft.id.0.starts_with("BK-"));
    }

    #[test]
    fn phone_digits_ignores_formatting() {
        let mut draft = BookingDraft::starting_tomorrow();
        draft.contact.phone = "(555) 123-4567".to_string();
        assert_eq!(draft.phone_digits(), 10);
    }

    #[test]
    fn referral_identity_compares_email_case_insensitively() {
        let referral = ReferralApplication {
            code: "LAWN2024".to_string(),
            referee_email: "Pat@Example.com".to_string(),
            discount: DiscountRate::from_basis_points(1000).expect("10%"),
        };

        assert!(referral.matches("LAWN2024", "pat@example.com"));
        assert!(!referral.matches("LAWN2025", "pat@example.com"));
    }
}
