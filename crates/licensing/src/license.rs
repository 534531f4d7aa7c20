use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use licensedesk_core::{
    DomainError, DomainResult, Entity, InvoiceId, LicenseId, PlanId, ProductId, UserId,
};
use licensedesk_invoicing::InvoiceStatus;

use crate::lifecycle::{self, StatusTransition, TransitionReason};

/// License activation status.
///
/// `Expired` is terminal for invoice-driven changes; only an explicit operator
/// update can move a license out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseStatus {
    Inactive,
    Active,
    Expired,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Inactive => "Inactive",
            LicenseStatus::Active => "Active",
            LicenseStatus::Expired => "Expired",
        }
    }
}

impl core::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inactive" => Ok(LicenseStatus::Inactive),
            "active" => Ok(LicenseStatus::Active),
            "expired" => Ok(LicenseStatus::Expired),
            _ => Err(DomainError::validation(format!(
                "unknown license status '{s}' (expected Inactive, Active or Expired)"
            ))),
        }
    }
}

/// Human-presentable license credential, unique across all licenses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    const MAX_LEN: usize = 128;

    /// Generate a random key formatted as five dash-separated groups of five
    /// uppercase hex characters.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        let groups: Vec<&str> = (0..5).map(|i| &hex[i * 5..i * 5 + 5]).collect();
        Self(groups.join("-"))
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(DomainError::validation("license key must not be empty"));
        }
        if key.len() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "license key must be at most {} characters",
                Self::MAX_LEN
            )));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("license key must not contain whitespace"));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A credential entitling a product/plan combination.
///
/// # Invariants
/// - An `Active` license whose `expires_at` has passed is observed as `Expired`
///   (corrected lazily by [`License::observe`]).
/// - `invoice_id` references at most one funding invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: LicenseId,
    pub key: LicenseKey,
    pub product_id: ProductId,
    pub plan_id: PlanId,
    pub user_id: Option<UserId>,
    pub status: LicenseStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub invoice_id: Option<InvoiceId>,
    pub max_devices: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for License {
    type Id = LicenseId;
    const KIND: &'static str = "license";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating a license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLicense {
    /// Generated when absent.
    pub key: Option<LicenseKey>,
    pub product_id: ProductId,
    pub plan_id: PlanId,
    pub user_id: Option<UserId>,
    /// Derived from the funding invoice when absent.
    pub status: Option<LicenseStatus>,
    pub expires_at: Option<DateTime<Utc>>,
    pub invoice_id: Option<InvoiceId>,
    pub max_devices: Option<u32>,
}

/// Partial update of a license. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseChanges {
    pub product_id: Option<ProductId>,
    pub plan_id: Option<PlanId>,
    pub user_id: Option<Option<UserId>>,
    pub status: Option<LicenseStatus>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub invoice_id: Option<Option<InvoiceId>>,
    pub max_devices: Option<Option<u32>>,
}

impl LicenseChanges {
    /// The new invoice reference, when this update moves the license to a
    /// different funding invoice.
    pub fn invoice_change(&self, current: Option<InvoiceId>) -> Option<Option<InvoiceId>> {
        self.invoice_id.filter(|next| *next != current)
    }
}

fn validate_max_devices(max_devices: Option<u32>) -> DomainResult<()> {
    if max_devices == Some(0) {
        return Err(DomainError::validation("max_devices must be positive when set"));
    }
    Ok(())
}

impl License {
    /// Build a new license.
    ///
    /// `funding` is the status of the invoice referenced by `new.invoice_id`,
    /// looked up by the caller. A reference without a funding status means the
    /// invoice does not exist.
    pub fn create(
        id: LicenseId,
        new: NewLicense,
        funding: Option<InvoiceStatus>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.invoice_id.is_some() && funding.is_none() {
            return Err(DomainError::not_found("invoice"));
        }
        validate_max_devices(new.max_devices)?;

        let status = lifecycle::initial_status(new.status, funding, new.expires_at, now);

        Ok(Self {
            id,
            key: new.key.unwrap_or_else(LicenseKey::generate),
            product_id: new.product_id,
            plan_id: new.plan_id,
            user_id: new.user_id,
            status,
            expires_at: new.expires_at,
            invoice_id: new.invoice_id,
            max_devices: new.max_devices,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        lifecycle::is_past_expiry(self.expires_at, now)
    }

    /// Read-path correction: an `Active` license past its expiry becomes
    /// `Expired`. Returns the transition to persist, if any.
    pub fn observe(&mut self, now: DateTime<Utc>, reason: TransitionReason) -> Option<StatusTransition> {
        let next = lifecycle::observed_status(self.status, self.expires_at, now);
        self.transition_to(next, reason, now)
    }

    /// Invoice-driven cascade. `Expired` licenses are never changed.
    pub fn cascade(
        &mut self,
        invoice_status: InvoiceStatus,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        let next = lifecycle::cascade_status(
            self.status,
            lifecycle::cascade_target(invoice_status),
            self.expires_at,
            now,
        )?;
        self.transition_to(next, reason, now)
    }

    /// Apply an operator update.
    ///
    /// `funding` is the status of the invoice the license is being moved to
    /// (only consulted when `changes` re-points `invoice_id` and carries no
    /// explicit status).
    pub fn apply_changes(
        &mut self,
        changes: LicenseChanges,
        funding: Option<InvoiceStatus>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<StatusTransition>> {
        if let Some(max_devices) = changes.max_devices {
            validate_max_devices(max_devices)?;
        }
        let invoice_change = changes.invoice_change(self.invoice_id);
        if let Some(Some(_)) = invoice_change {
            if funding.is_none() {
                return Err(DomainError::not_found("invoice"));
            }
        }

        if let Some(product_id) = changes.product_id {
            self.product_id = product_id;
        }
        if let Some(plan_id) = changes.plan_id {
            self.plan_id = plan_id;
        }
        if let Some(user_id) = changes.user_id {
            self.user_id = user_id;
        }
        if let Some(expires_at) = changes.expires_at {
            self.expires_at = expires_at;
        }
        if let Some(max_devices) = changes.max_devices {
            self.max_devices = max_devices;
        }
        if let Some(invoice_id) = changes.invoice_id {
            self.invoice_id = invoice_id;
        }

        let assigned = match (changes.status, invoice_change) {
            (Some(explicit), _) => explicit,
            (None, Some(_)) if self.status != LicenseStatus::Expired => {
                lifecycle::funded_status(funding)
            }
            (None, _) => self.status,
        };
        let next = lifecycle::observed_status(assigned, self.expires_at, now);

        self.updated_at = now;
        Ok(self.transition_to(next, TransitionReason::LicenseUpdated, now))
    }

    fn transition_to(
        &mut self,
        next: LicenseStatus,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        if next == self.status {
            return None;
        }
        let transition = StatusTransition {
            license_id: self.id,
            from: self.status,
            to: next,
            reason,
        };
        self.status = next;
        self.updated_at = now;
        Some(transition)
    }
}
