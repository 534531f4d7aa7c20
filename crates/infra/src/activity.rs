//! Activity log: an append-only audit trail of lifecycle writes.
//!
//! Entries are written in the same store transaction as the change they
//! describe, so a rolled-back operation leaves no trace.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use licensedesk_core::{ActivityId, DomainError, InvoiceId, LicenseId};
use licensedesk_licensing::StatusTransition;

/// Who triggered a write. `None` for system-initiated work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(Option<Uuid>);

impl Actor {
    pub fn system() -> Self {
        Self(None)
    }

    pub fn principal(id: Uuid) -> Self {
        Self(Some(id))
    }

    pub fn id(&self) -> Option<Uuid> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    License,
    Invoice,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::License => "license",
            SubjectKind::Invoice => "invoice",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "license" => Ok(SubjectKind::License),
            "invoice" => Ok(SubjectKind::Invoice),
            other => Err(DomainError::validation(format!(
                "unknown subject kind '{other}' (expected license or invoice)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityAction {
    #[serde(rename = "license.created")]
    LicenseCreated,
    #[serde(rename = "license.updated")]
    LicenseUpdated,
    #[serde(rename = "license.deleted")]
    LicenseDeleted,
    #[serde(rename = "license.status_changed")]
    LicenseStatusChanged,
    #[serde(rename = "invoice.created")]
    InvoiceCreated,
    #[serde(rename = "invoice.updated")]
    InvoiceUpdated,
    #[serde(rename = "invoice.deleted")]
    InvoiceDeleted,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::LicenseCreated => "license.created",
            ActivityAction::LicenseUpdated => "license.updated",
            ActivityAction::LicenseDeleted => "license.deleted",
            ActivityAction::LicenseStatusChanged => "license.status_changed",
            ActivityAction::InvoiceCreated => "invoice.created",
            ActivityAction::InvoiceUpdated => "invoice.updated",
            ActivityAction::InvoiceDeleted => "invoice.deleted",
        }
    }

    pub fn subject_kind(&self) -> SubjectKind {
        match self {
            ActivityAction::InvoiceCreated
            | ActivityAction::InvoiceUpdated
            | ActivityAction::InvoiceDeleted => SubjectKind::Invoice,
            _ => SubjectKind::License,
        }
    }
}

impl FromStr for ActivityAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "license.created" => ActivityAction::LicenseCreated,
            "license.updated" => ActivityAction::LicenseUpdated,
            "license.deleted" => ActivityAction::LicenseDeleted,
            "license.status_changed" => ActivityAction::LicenseStatusChanged,
            "invoice.created" => ActivityAction::InvoiceCreated,
            "invoice.updated" => ActivityAction::InvoiceUpdated,
            "invoice.deleted" => ActivityAction::InvoiceDeleted,
            other => {
                return Err(DomainError::validation(format!("unknown activity action '{other}'")));
            }
        };
        Ok(action)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: ActivityId,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_kind: SubjectKind,
    pub subject_id: Uuid,
    pub action: ActivityAction,
    pub detail: JsonValue,
}

impl ActivityEntry {
    pub fn new(
        actor: Actor,
        action: ActivityAction,
        subject_id: Uuid,
        detail: JsonValue,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::new(),
            occurred_at: at,
            actor_id: actor.id(),
            subject_kind: action.subject_kind(),
            subject_id,
            action,
            detail,
        }
    }

    pub fn license(
        actor: Actor,
        action: ActivityAction,
        license_id: LicenseId,
        detail: JsonValue,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(actor, action, *license_id.as_uuid(), detail, at)
    }

    pub fn invoice(
        actor: Actor,
        action: ActivityAction,
        invoice_id: InvoiceId,
        detail: JsonValue,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(actor, action, *invoice_id.as_uuid(), detail, at)
    }

    pub fn status_changed(actor: Actor, transition: &StatusTransition, at: DateTime<Utc>) -> Self {
        Self::license(
            actor,
            ActivityAction::LicenseStatusChanged,
            transition.license_id,
            json!({
                "from": transition.from.as_str(),
                "to": transition.to.as_str(),
                "reason": transition.reason.as_str(),
            }),
            at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licensedesk_licensing::{LicenseStatus, TransitionReason};

    #[test]
    fn status_change_entry_carries_reason() {
        let license_id = LicenseId::new();
        let t = StatusTransition {
            license_id,
            from: LicenseStatus::Active,
            to: LicenseStatus::Expired,
            reason: TransitionReason::ExpirySweep,
        };
        let at = Utc::now();
        let entry = ActivityEntry::status_changed(Actor::system(), &t, at);

        assert_eq!(entry.subject_kind, SubjectKind::License);
        assert_eq!(entry.subject_id, *license_id.as_uuid());
        assert_eq!(entry.actor_id, None);
        assert_eq!(entry.detail["reason"], "expiry_sweep");
        assert_eq!(entry.detail["to"], "Expired");
    }

    #[test]
    fn action_strings_parse_back() {
        for action in [
            ActivityAction::LicenseCreated,
            ActivityAction::LicenseStatusChanged,
            ActivityAction::InvoiceDeleted,
        ] {
            assert_eq!(action.as_str().parse::<ActivityAction>().unwrap(), action);
        }
        assert!("license.renamed".parse::<ActivityAction>().is_err());
        assert_eq!(ActivityAction::InvoiceUpdated.subject_kind(), SubjectKind::Invoice);
    }
}
