use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use licensedesk_core::{InvoiceId, LicenseId};
use licensedesk_invoicing::Invoice;
use licensedesk_licensing::{License, LicenseKey, LicenseStatus};

use super::query::{ActivityFilter, ActivityPage, InvoiceFilter, LicenseFilter, Pagination};
use super::{Store, StoreError, StoreResult, StoreTx};
use crate::activity::ActivityEntry;

#[derive(Debug, Clone, Default)]
struct State {
    licenses: HashMap<LicenseId, License>,
    invoices: HashMap<InvoiceId, Invoice>,
    activity: Vec<ActivityEntry>,
}

/// In-memory store.
///
/// Intended for tests/dev. Transactions are serialized behind an async mutex
/// and work on a copy of the state that replaces the original on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    /// Remaining successful writes before an injected failure.
    write_budget: Arc<StdMutex<Option<usize>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `writes` writes succeed, then fail the one after with
    /// [`StoreError::Unavailable`]. The fault fires once.
    pub fn fail_after_writes(&self, writes: usize) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some(writes);
        }
    }

    /// Committed license, bypassing the lifecycle (test inspection).
    pub async fn stored_license(&self, id: LicenseId) -> Option<License> {
        self.state.lock().await.licenses.get(&id).cloned()
    }

    /// Committed invoice, bypassing the lifecycle (test inspection).
    pub async fn stored_invoice(&self, id: InvoiceId) -> Option<Invoice> {
        self.state.lock().await.invoices.get(&id).cloned()
    }

    pub async fn activity_len(&self) -> usize {
        self.state.lock().await.activity.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            write_budget: self.write_budget.clone(),
        }))
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    write_budget: Arc<StdMutex<Option<usize>>>,
}

impl InMemoryTx {
    fn charge_write(&self, operation: &str) -> StoreResult<()> {
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        match *budget {
            Some(0) => {
                *budget = None;
                Err(StoreError::Unavailable(format!("injected failure in {operation}")))
            }
            Some(remaining) => {
                *budget = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn ensure_unique_key(&self, license: &License) -> StoreResult<()> {
        let taken = self
            .working
            .licenses
            .values()
            .any(|l| l.id != license.id && l.key == license.key);
        if taken {
            return Err(StoreError::Conflict(format!(
                "license key '{}' already exists",
                license.key
            )));
        }
        Ok(())
    }

    fn ensure_unique_number(&self, invoice: &Invoice) -> StoreResult<()> {
        let taken = self
            .working
            .invoices
            .values()
            .any(|i| i.id != invoice.id && i.invoice_number == invoice.invoice_number);
        if taken {
            return Err(StoreError::Conflict(format!(
                "invoice number '{}' already exists",
                invoice.invoice_number
            )));
        }
        Ok(())
    }

    fn sorted_licenses(&self) -> Vec<&License> {
        let mut licenses: Vec<&License> = self.working.licenses.values().collect();
        licenses.sort_by_key(|l| (l.created_at, l.id));
        licenses
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn license_by_id(&mut self, id: LicenseId) -> StoreResult<Option<License>> {
        Ok(self.working.licenses.get(&id).cloned())
    }

    async fn license_by_key(&mut self, key: &LicenseKey) -> StoreResult<Option<License>> {
        Ok(self
            .working
            .licenses
            .values()
            .find(|l| &l.key == key)
            .cloned())
    }

    async fn list_licenses(
        &mut self,
        filter: &LicenseFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<License>> {
        let matching = self.sorted_licenses().into_iter().filter(|l| {
            filter.status.is_none_or(|s| s == l.status)
                && filter.invoice_id.is_none_or(|id| Some(id) == l.invoice_id)
                && filter.user_id.is_none_or(|id| Some(id) == l.user_id)
        });
        Ok(pagination.slice(matching.cloned()))
    }

    async fn licenses_by_invoice(&mut self, invoice_id: InvoiceId) -> StoreResult<Vec<License>> {
        Ok(self
            .sorted_licenses()
            .into_iter()
            .filter(|l| l.invoice_id == Some(invoice_id))
            .cloned()
            .collect())
    }

    async fn expire_due_licenses(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LicenseId>> {
        let due: Vec<LicenseId> = self
            .sorted_licenses()
            .into_iter()
            .filter(|l| l.status == LicenseStatus::Active && l.is_past_expiry(now))
            .map(|l| l.id)
            .collect();
        if due.is_empty() {
            return Ok(due);
        }
        self.charge_write("expire_due_licenses")?;
        for id in &due {
            if let Some(license) = self.working.licenses.get_mut(id) {
                license.status = LicenseStatus::Expired;
                license.updated_at = now;
            }
        }
        Ok(due)
    }

    async fn insert_license(&mut self, license: &License) -> StoreResult<()> {
        self.charge_write("insert_license")?;
        if self.working.licenses.contains_key(&license.id) {
            return Err(StoreError::Conflict(format!("license {} already exists", license.id)));
        }
        self.ensure_unique_key(license)?;
        self.working.licenses.insert(license.id, license.clone());
        Ok(())
    }

    async fn update_license(&mut self, license: &License) -> StoreResult<()> {
        self.charge_write("update_license")?;
        self.ensure_unique_key(license)?;
        match self.working.licenses.get_mut(&license.id) {
            Some(slot) => {
                *slot = license.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!(
                "update of missing license {}",
                license.id
            ))),
        }
    }

    async fn delete_license(&mut self, id: LicenseId) -> StoreResult<bool> {
        self.charge_write("delete_license")?;
        Ok(self.working.licenses.remove(&id).is_some())
    }

    async fn invoice_by_id(&mut self, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        Ok(self.working.invoices.get(&id).cloned())
    }

    async fn invoice_by_number(&mut self, invoice_number: &str) -> StoreResult<Option<Invoice>> {
        Ok(self
            .working
            .invoices
            .values()
            .find(|i| i.invoice_number == invoice_number)
            .cloned())
    }

    async fn list_invoices(
        &mut self,
        filter: &InvoiceFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<Invoice>> {
        let mut invoices: Vec<&Invoice> = self
            .working
            .invoices
            .values()
            .filter(|i| {
                filter.status.is_none_or(|s| s == i.status)
                    && filter.company_id.is_none_or(|c| c == i.company_id)
            })
            .collect();
        invoices.sort_by_key(|i| (i.created_at, i.id));
        Ok(pagination.slice(invoices.into_iter().cloned()))
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        self.charge_write("insert_invoice")?;
        if self.working.invoices.contains_key(&invoice.id) {
            return Err(StoreError::Conflict(format!("invoice {} already exists", invoice.id)));
        }
        self.ensure_unique_number(invoice)?;
        self.working.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_invoice(
        &mut self,
        invoice: &Invoice,
        replace_line_items: bool,
    ) -> StoreResult<()> {
        self.charge_write("update_invoice")?;
        self.ensure_unique_number(invoice)?;
        let slot = self.working.invoices.get_mut(&invoice.id).ok_or_else(|| {
            StoreError::Database(format!("update of missing invoice {}", invoice.id))
        })?;
        let line_items = if replace_line_items {
            invoice.line_items.clone()
        } else {
            std::mem::take(&mut slot.line_items)
        };
        *slot = Invoice {
            line_items,
            ..invoice.clone()
        };
        Ok(())
    }

    async fn delete_invoice(&mut self, id: InvoiceId) -> StoreResult<bool> {
        self.charge_write("delete_invoice")?;
        Ok(self.working.invoices.remove(&id).is_some())
    }

    async fn append_activity(&mut self, entry: &ActivityEntry) -> StoreResult<()> {
        self.charge_write("append_activity")?;
        self.working.activity.push(entry.clone());
        Ok(())
    }

    async fn list_activity(
        &mut self,
        filter: &ActivityFilter,
        pagination: Pagination,
    ) -> StoreResult<ActivityPage> {
        // Appended in commit order; newest first is the reverse.
        let matching: Vec<&ActivityEntry> = self
            .working
            .activity
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .collect();
        let total = matching.len() as u64;
        let entries = pagination.slice(matching.into_iter().cloned());
        Ok(ActivityPage::new(entries, total, pagination))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licensedesk_core::{PlanId, ProductId};
    use licensedesk_licensing::NewLicense;

    fn license(status: LicenseStatus, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> License {
        let new = NewLicense {
            key: None,
            product_id: ProductId::new(),
            plan_id: PlanId::new(),
            user_id: None,
            status: Some(status),
            expires_at,
            invoice_id: None,
            max_devices: None,
        };
        License::create(LicenseId::new(), new, None, now).unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let l = license(LicenseStatus::Inactive, None, now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_license(&l).await.unwrap();
        drop(tx);
        assert!(store.stored_license(l.id).await.is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_license(&l).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.stored_license(l.id).await, Some(l));
    }

    #[tokio::test]
    async fn duplicate_key_is_a_conflict() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let a = license(LicenseStatus::Inactive, None, now);
        let mut b = license(LicenseStatus::Inactive, None, now);
        b.key = a.key.clone();

        let mut tx = store.begin().await.unwrap();
        tx.insert_license(&a).await.unwrap();
        let err = tx.insert_license(&b).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn sweep_expires_only_active_past_expiry() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let yesterday = Some(now - chrono::Duration::days(1));
        let lapsed = license(LicenseStatus::Active, None, now);
        let lapsed = License {
            expires_at: yesterday,
            ..lapsed
        };
        let inactive = License {
            expires_at: yesterday,
            ..license(LicenseStatus::Inactive, None, now)
        };
        let open_ended = license(LicenseStatus::Active, None, now);

        let mut tx = store.begin().await.unwrap();
        for l in [&lapsed, &inactive, &open_ended] {
            tx.insert_license(l).await.unwrap();
        }
        let expired = tx.expire_due_licenses(now).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(expired, vec![lapsed.id]);
        let stored = store.stored_license(lapsed.id).await.unwrap();
        assert_eq!(stored.status, LicenseStatus::Expired);
        assert_eq!(
            store.stored_license(inactive.id).await.unwrap().status,
            LicenseStatus::Inactive
        );
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.fail_after_writes(1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_license(&license(LicenseStatus::Inactive, None, now))
            .await
            .unwrap();
        let err = tx
            .insert_license(&license(LicenseStatus::Inactive, None, now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        tx.insert_license(&license(LicenseStatus::Inactive, None, now))
            .await
            .unwrap();
    }
}
