//! License status derivation.
//!
//! Every rule that decides a license status lives here:
//!
//! ```text
//! read:     Active && expires_at <= now            -> Expired
//! create:   explicit status, else funded_status(invoice), then expiry check
//! cascade:  Expired stays Expired; otherwise Paid -> Active, other -> Inactive,
//!           then expiry check
//! ```
//!
//! The expiry check always runs last, so an assignment can never leave an
//! `Active` license that is already past its expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use licensedesk_core::LicenseId;
use licensedesk_invoicing::InvoiceStatus;

use crate::license::LicenseStatus;

/// Why a license changed status (recorded in the activity log).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Corrected while serving a single-license read.
    ExpiredOnRead,
    /// Corrected by the bulk sweep run before listing licenses.
    ExpirySweep,
    LicenseUpdated,
    InvoiceCreated,
    InvoiceStatusChanged,
    InvoiceDeleted,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::ExpiredOnRead => "expired_on_read",
            TransitionReason::ExpirySweep => "expiry_sweep",
            TransitionReason::LicenseUpdated => "license_updated",
            TransitionReason::InvoiceCreated => "invoice_created",
            TransitionReason::InvoiceStatusChanged => "invoice_status_changed",
            TransitionReason::InvoiceDeleted => "invoice_deleted",
        }
    }
}

/// A status change decided by this module, to be persisted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub license_id: LicenseId,
    pub from: LicenseStatus,
    pub to: LicenseStatus,
    pub reason: TransitionReason,
}

/// `expires_at` is set and not after `now`.
pub fn is_past_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

/// The status a license must be observed with at `now`.
pub fn observed_status(
    status: LicenseStatus,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> LicenseStatus {
    if status == LicenseStatus::Active && is_past_expiry(expires_at, now) {
        LicenseStatus::Expired
    } else {
        status
    }
}

/// Status implied by the funding invoice (no invoice means inactive).
pub fn funded_status(funding: Option<InvoiceStatus>) -> LicenseStatus {
    match funding {
        Some(status) => cascade_target(status),
        None => LicenseStatus::Inactive,
    }
}

/// Status an invoice status pushes onto the licenses it funds.
pub fn cascade_target(invoice_status: InvoiceStatus) -> LicenseStatus {
    if invoice_status.is_paid() {
        LicenseStatus::Active
    } else {
        LicenseStatus::Inactive
    }
}

/// Status of a freshly created license.
pub fn initial_status(
    explicit: Option<LicenseStatus>,
    funding: Option<InvoiceStatus>,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> LicenseStatus {
    let assigned = explicit.unwrap_or_else(|| funded_status(funding));
    observed_status(assigned, expires_at, now)
}

/// Status a cascade moves a license to, or `None` if it must stay as is.
///
/// A license that is (or must be observed as) `Expired` is never moved by a
/// cascade; an `Active` license past expiry is corrected to `Expired` instead.
pub fn cascade_status(
    current: LicenseStatus,
    target: LicenseStatus,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<LicenseStatus> {
    let next = match observed_status(current, expires_at, now) {
        LicenseStatus::Expired => LicenseStatus::Expired,
        _ => observed_status(target, expires_at, now),
    };
    (next != current).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn status_strategy() -> impl Strategy<Value = LicenseStatus> {
        prop_oneof![
            Just(LicenseStatus::Inactive),
            Just(LicenseStatus::Active),
            Just(LicenseStatus::Expired),
        ]
    }

    fn invoice_status_strategy() -> impl Strategy<Value = InvoiceStatus> {
        prop_oneof![Just(InvoiceStatus::Unpaid), Just(InvoiceStatus::Paid)]
    }

    /// Expiry offsets in minutes relative to `now` (None = non-expiring).
    fn expiry_strategy() -> impl Strategy<Value = Option<i64>> {
        prop::option::of(-10_000i64..10_000i64)
    }

    fn at(now: DateTime<Utc>, offset: Option<i64>) -> Option<DateTime<Utc>> {
        offset.map(|m| now + Duration::minutes(m))
    }

    #[test]
    fn non_expiring_active_license_stays_active() {
        let now = Utc::now();
        assert_eq!(observed_status(LicenseStatus::Active, None, now), LicenseStatus::Active);
    }

    #[test]
    fn inactive_license_past_expiry_is_not_rewritten_on_read() {
        let now = Utc::now();
        let yesterday = Some(now - Duration::days(1));
        assert_eq!(
            observed_status(LicenseStatus::Inactive, yesterday, now),
            LicenseStatus::Inactive
        );
    }

    #[test]
    fn unpaid_cascade_cannot_rescue_a_lapsed_active_license() {
        let now = Utc::now();
        let yesterday = Some(now - Duration::days(1));
        assert_eq!(
            cascade_status(LicenseStatus::Active, LicenseStatus::Inactive, yesterday, now),
            Some(LicenseStatus::Expired)
        );
    }

    #[test]
    fn paid_cascade_onto_lapsed_inactive_license_lands_on_expired() {
        let now = Utc::now();
        let yesterday = Some(now - Duration::days(1));
        assert_eq!(
            cascade_status(LicenseStatus::Inactive, LicenseStatus::Active, yesterday, now),
            Some(LicenseStatus::Expired)
        );
    }

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(TransitionReason::ExpirySweep.as_str(), "expiry_sweep");
        assert_eq!(
            TransitionReason::InvoiceStatusChanged.as_str(),
            "invoice_status_changed"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: an Active license whose expiry is not after `now` is
        /// always observed as Expired; everything else is observed unchanged.
        #[test]
        fn observed_status_enforces_monotonic_expiry(
            status in status_strategy(),
            offset in expiry_strategy(),
        ) {
            let now = Utc::now();
            let expires_at = at(now, offset);
            let observed = observed_status(status, expires_at, now);

            if status == LicenseStatus::Active && offset.is_some_and(|m| m <= 0) {
                prop_assert_eq!(observed, LicenseStatus::Expired);
            } else {
                prop_assert_eq!(observed, status);
            }
            // Observing twice changes nothing.
            prop_assert_eq!(observed_status(observed, expires_at, now), observed);
        }

        /// Property: no cascade ever moves a license out of Expired.
        #[test]
        fn cascade_never_leaves_expired(
            invoice_status in invoice_status_strategy(),
            offset in expiry_strategy(),
        ) {
            let now = Utc::now();
            let next = cascade_status(
                LicenseStatus::Expired,
                cascade_target(invoice_status),
                at(now, offset),
                now,
            );
            prop_assert_eq!(next, None);
        }

        /// Property: for non-expired licenses that are not past expiry, Paid
        /// yields Active and any other invoice status yields Inactive.
        #[test]
        fn cascade_follows_invoice_status(
            current in prop_oneof![Just(LicenseStatus::Inactive), Just(LicenseStatus::Active)],
            invoice_status in invoice_status_strategy(),
            future_offset in prop::option::of(1i64..10_000i64),
        ) {
            let now = Utc::now();
            let expected = if invoice_status.is_paid() {
                LicenseStatus::Active
            } else {
                LicenseStatus::Inactive
            };
            let next = cascade_status(current, cascade_target(invoice_status), at(now, future_offset), now)
                .unwrap_or(current);
            prop_assert_eq!(next, expected);
        }

        /// Property: a license never ends up Active past its expiry, whatever
        /// the creation inputs.
        #[test]
        fn initial_status_is_never_active_past_expiry(
            explicit in prop::option::of(status_strategy()),
            funding in prop::option::of(invoice_status_strategy()),
            offset in expiry_strategy(),
        ) {
            let now = Utc::now();
            let expires_at = at(now, offset);
            let status = initial_status(explicit, funding, expires_at, now);
            prop_assert!(!(status == LicenseStatus::Active && is_past_expiry(expires_at, now)));
            if explicit.is_none() && !funding.is_some_and(|f| f.is_paid()) {
                prop_assert_eq!(status, LicenseStatus::Inactive);
            }
        }
    }
}
