//! License/invoice lifecycle orchestration.
//!
//! `LifecycleManager` is the only writer of license status. Each public method
//! is one store transaction: status decisions come from
//! `licensedesk_licensing`, persistence from the injected [`Store`], and every
//! change is mirrored into the activity log before commit.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument};

use licensedesk_core::{Clock, DomainError, Entity, InvoiceId, LicenseId};
use licensedesk_invoicing::{Invoice, InvoiceChanges, InvoiceStatus, NewInvoice};
use licensedesk_licensing::{
    License, LicenseChanges, LicenseKey, LicenseStatus, NewLicense, StatusTransition,
    TransitionReason,
};

use crate::activity::{ActivityAction, ActivityEntry, Actor};
use crate::store::{
    ActivityFilter, ActivityPage, InvoiceFilter, LicenseFilter, Pagination, Store, StoreError,
    StoreTx,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Persistence(other),
        }
    }
}

/// An invoice together with the ids of the licenses it funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceWithLicenses {
    pub invoice: Invoice,
    pub license_ids: Vec<LicenseId>,
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ---------------------------------------------------------------------
    // Licenses
    // ---------------------------------------------------------------------

    #[instrument(skip(self, new), fields(invoice_id = ?new.invoice_id), err)]
    pub async fn create_license(&self, actor: Actor, new: NewLicense) -> ServiceResult<License> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        if let Some(key) = &new.key {
            if tx.license_by_key(key).await?.is_some() {
                return Err(ServiceError::Conflict(format!("license key '{key}' already exists")));
            }
        }
        let funding = match new.invoice_id {
            Some(invoice_id) => tx.invoice_by_id(invoice_id).await?.map(|i| i.status),
            None => None,
        };
        let requested = new.status;
        let license = License::create(LicenseId::new(), new, funding, now)?;

        tx.insert_license(&license).await?;
        tx.append_activity(&ActivityEntry::license(
            actor,
            ActivityAction::LicenseCreated,
            license.id,
            json!({
                "key": license.key.as_str(),
                "status": license.status.as_str(),
                "requested_status": requested.map(|s| s.as_str()),
                "invoice_id": license.invoice_id,
                "expires_at": license.expires_at,
            }),
            now,
        ))
        .await?;

        tx.commit().await?;
        info!(license_id = %license.id, status = %license.status, "license created");
        Ok(license)
    }

    /// Fetch one license, expiring it first if its deadline has passed.
    #[instrument(skip(self), err)]
    pub async fn get_license(&self, actor: Actor, id: LicenseId) -> ServiceResult<License> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut license = tx
            .license_by_id(id)
            .await?
            .ok_or_else(|| not_found::<License>())?;
        observe_and_persist(tx.as_mut(), actor, &mut license, now).await?;
        tx.commit().await?;
        Ok(license)
    }

    #[instrument(skip(self), err)]
    pub async fn get_license_by_key(&self, actor: Actor, key: &str) -> ServiceResult<License> {
        let key = LicenseKey::parse(key)?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut license = tx
            .license_by_key(&key)
            .await?
            .ok_or_else(|| not_found::<License>())?;
        observe_and_persist(tx.as_mut(), actor, &mut license, now).await?;
        tx.commit().await?;
        Ok(license)
    }

    /// List licenses after sweeping every due `Active` license to `Expired`.
    #[instrument(skip(self), err)]
    pub async fn list_licenses(
        &self,
        actor: Actor,
        filter: LicenseFilter,
        pagination: Pagination,
    ) -> ServiceResult<Vec<License>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let expired = tx.expire_due_licenses(now).await?;
        for license_id in &expired {
            let transition = StatusTransition {
                license_id: *license_id,
                from: LicenseStatus::Active,
                to: LicenseStatus::Expired,
                reason: TransitionReason::ExpirySweep,
            };
            record_transition(tx.as_mut(), actor, &transition, now).await?;
        }

        let licenses = tx.list_licenses(&filter, pagination).await?;
        tx.commit().await?;
        Ok(licenses)
    }

    #[instrument(skip(self, changes), err)]
    pub async fn update_license(
        &self,
        actor: Actor,
        id: LicenseId,
        changes: LicenseChanges,
    ) -> ServiceResult<License> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut license = tx
            .license_by_id(id)
            .await?
            .ok_or_else(|| not_found::<License>())?;

        // Settle expiry before deciding anything else, so a lapsed license
        // is treated as Expired by the re-pointing rule below.
        if let Some(t) = license.observe(now, TransitionReason::ExpiredOnRead) {
            record_transition(tx.as_mut(), actor, &t, now).await?;
        }

        let funding = match changes.invoice_change(license.invoice_id) {
            Some(Some(invoice_id)) => tx.invoice_by_id(invoice_id).await?.map(|i| i.status),
            _ => None,
        };
        let previous_invoice = license.invoice_id;
        let transition = license.apply_changes(changes, funding, now)?;

        tx.update_license(&license).await?;
        tx.append_activity(&ActivityEntry::license(
            actor,
            ActivityAction::LicenseUpdated,
            license.id,
            json!({
                "status": license.status.as_str(),
                "invoice_id": license.invoice_id,
                "previous_invoice_id": previous_invoice,
                "expires_at": license.expires_at,
            }),
            now,
        ))
        .await?;
        if let Some(t) = &transition {
            record_transition(tx.as_mut(), actor, t, now).await?;
        }

        tx.commit().await?;
        Ok(license)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_license(&self, actor: Actor, id: LicenseId) -> ServiceResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let license = tx
            .license_by_id(id)
            .await?
            .ok_or_else(|| not_found::<License>())?;

        tx.delete_license(id).await?;
        tx.append_activity(&ActivityEntry::license(
            actor,
            ActivityAction::LicenseDeleted,
            id,
            json!({ "key": license.key.as_str(), "status": license.status.as_str() }),
            now,
        ))
        .await?;
        tx.commit().await?;
        info!(license_id = %id, "license deleted");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Invoices
    // ---------------------------------------------------------------------

    /// Create an invoice and attach `license_ids` to it. Attached licenses
    /// take the status the invoice funds (`Expired` ones stay `Expired`).
    #[instrument(skip(self, new, license_ids), fields(attached = license_ids.len()), err)]
    pub async fn create_invoice(
        &self,
        actor: Actor,
        new: NewInvoice,
        license_ids: Vec<LicenseId>,
    ) -> ServiceResult<InvoiceWithLicenses> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let invoice = Invoice::create(InvoiceId::new(), new, now)?;
        if tx.invoice_by_number(&invoice.invoice_number).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "invoice number '{}' already exists",
                invoice.invoice_number
            )));
        }
        tx.insert_invoice(&invoice).await?;

        let mut attached: Vec<LicenseId> = Vec::with_capacity(license_ids.len());
        for license_id in license_ids {
            if attached.contains(&license_id) {
                continue;
            }
            let mut license = tx
                .license_by_id(license_id)
                .await?
                .ok_or_else(|| not_found::<License>())?;
            license.invoice_id = Some(invoice.id);
            license.updated_at = now;

            // Same derivation as re-pointing a license through an update.
            let transition = license.cascade(invoice.status, TransitionReason::InvoiceCreated, now);
            tx.update_license(&license).await?;
            if let Some(t) = &transition {
                record_transition(tx.as_mut(), actor, t, now).await?;
            }
            attached.push(license_id);
        }

        tx.append_activity(&ActivityEntry::invoice(
            actor,
            ActivityAction::InvoiceCreated,
            invoice.id,
            json!({
                "invoice_number": invoice.invoice_number,
                "status": invoice.status.as_str(),
                "total_amount": invoice.total_amount(),
                "license_ids": attached,
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            status = %invoice.status,
            licenses = attached.len(),
            "invoice created"
        );
        Ok(InvoiceWithLicenses {
            invoice,
            license_ids: attached,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn get_invoice(&self, id: InvoiceId) -> ServiceResult<InvoiceWithLicenses> {
        let mut tx = self.store.begin().await?;
        let invoice = tx
            .invoice_by_id(id)
            .await?
            .ok_or_else(|| not_found::<Invoice>())?;
        let license_ids = tx
            .licenses_by_invoice(id)
            .await?
            .into_iter()
            .map(|l| l.id)
            .collect();
        tx.commit().await?;
        Ok(InvoiceWithLicenses {
            invoice,
            license_ids,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn list_invoices(
        &self,
        filter: InvoiceFilter,
        pagination: Pagination,
    ) -> ServiceResult<Vec<Invoice>> {
        let mut tx = self.store.begin().await?;
        let invoices = tx.list_invoices(&filter, pagination).await?;
        tx.commit().await?;
        Ok(invoices)
    }

    /// Update an invoice; a status change cascades onto every license it
    /// funds (`Expired` licenses excepted).
    #[instrument(skip(self, changes), err)]
    pub async fn update_invoice(
        &self,
        actor: Actor,
        id: InvoiceId,
        changes: InvoiceChanges,
    ) -> ServiceResult<InvoiceWithLicenses> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut invoice = tx
            .invoice_by_id(id)
            .await?
            .ok_or_else(|| not_found::<Invoice>())?;

        let update = invoice.apply_changes(changes, now)?;
        if let Some(other) = tx.invoice_by_number(&invoice.invoice_number).await? {
            if other.id != invoice.id {
                return Err(ServiceError::Conflict(format!(
                    "invoice number '{}' already exists",
                    invoice.invoice_number
                )));
            }
        }
        tx.update_invoice(&invoice, update.line_items_replaced).await?;

        let licenses = tx.licenses_by_invoice(id).await?;
        let status_changed = update.status_changed(invoice.status);
        let mut cascaded = 0usize;
        if status_changed {
            for mut license in licenses.iter().cloned() {
                if let Some(t) =
                    license.cascade(invoice.status, TransitionReason::InvoiceStatusChanged, now)
                {
                    tx.update_license(&license).await?;
                    record_transition(tx.as_mut(), actor, &t, now).await?;
                    cascaded += 1;
                }
            }
        }

        tx.append_activity(&ActivityEntry::invoice(
            actor,
            ActivityAction::InvoiceUpdated,
            invoice.id,
            json!({
                "previous_status": update.previous_status.as_str(),
                "status": invoice.status.as_str(),
                "line_items_replaced": update.line_items_replaced,
                "licenses_changed": cascaded,
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        if status_changed {
            info!(
                invoice_id = %invoice.id,
                from = %update.previous_status,
                to = %invoice.status,
                licenses_changed = cascaded,
                "invoice status changed"
            );
        }

        let license_ids = licenses.into_iter().map(|l| l.id).collect();
        Ok(InvoiceWithLicenses {
            invoice,
            license_ids,
        })
    }

    /// Delete an invoice: its licenses are detached and reset to `Inactive`
    /// (`Expired` stays), then line items and the invoice are removed.
    #[instrument(skip(self), err)]
    pub async fn delete_invoice(&self, actor: Actor, id: InvoiceId) -> ServiceResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let invoice = tx
            .invoice_by_id(id)
            .await?
            .ok_or_else(|| not_found::<Invoice>())?;

        let licenses = tx.licenses_by_invoice(id).await?;
        let mut detached = Vec::with_capacity(licenses.len());
        for mut license in licenses {
            let transition =
                license.cascade(InvoiceStatus::Unpaid, TransitionReason::InvoiceDeleted, now);
            license.invoice_id = None;
            license.updated_at = now;
            tx.update_license(&license).await?;
            if let Some(t) = &transition {
                record_transition(tx.as_mut(), actor, t, now).await?;
            }
            detached.push(license.id);
        }

        if !tx.delete_invoice(id).await? {
            return Err(not_found::<Invoice>());
        }
        tx.append_activity(&ActivityEntry::invoice(
            actor,
            ActivityAction::InvoiceDeleted,
            id,
            json!({
                "invoice_number": invoice.invoice_number,
                "detached_license_ids": detached,
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        info!(invoice_id = %id, licenses = detached.len(), "invoice deleted");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Activity
    // ---------------------------------------------------------------------

    #[instrument(skip(self), err)]
    pub async fn list_activity(
        &self,
        filter: ActivityFilter,
        pagination: Pagination,
    ) -> ServiceResult<ActivityPage> {
        let mut tx = self.store.begin().await?;
        let page = tx.list_activity(&filter, pagination).await?;
        tx.commit().await?;
        Ok(page)
    }
}

fn not_found<E: Entity>() -> ServiceError {
    ServiceError::NotFound(E::KIND.to_string())
}

/// Apply the read-path expiry correction and persist it.
async fn observe_and_persist(
    tx: &mut dyn StoreTx,
    actor: Actor,
    license: &mut License,
    now: chrono::DateTime<chrono::Utc>,
) -> ServiceResult<()> {
    if let Some(t) = license.observe(now, TransitionReason::ExpiredOnRead) {
        tx.update_license(license).await?;
        record_transition(tx, actor, &t, now).await?;
    }
    Ok(())
}

async fn record_transition(
    tx: &mut dyn StoreTx,
    actor: Actor,
    transition: &StatusTransition,
    now: chrono::DateTime<chrono::Utc>,
) -> ServiceResult<()> {
    tx.append_activity(&ActivityEntry::status_changed(actor, transition, now))
        .await?;
    info!(
        license_id = %transition.license_id,
        from = %transition.from,
        to = %transition.to,
        reason = transition.reason.as_str(),
        "license status changed"
    );
    Ok(())
}
