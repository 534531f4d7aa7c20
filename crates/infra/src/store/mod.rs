//! Transactional persistence boundary for licenses, invoices and activity.
//!
//! Every lifecycle operation runs inside one [`StoreTx`]: reads, cascaded
//! writes and activity entries either all commit or none do. Dropping a
//! transaction without calling [`StoreTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use licensedesk_core::{InvoiceId, LicenseId};
use licensedesk_invoicing::Invoice;
use licensedesk_licensing::{License, LicenseKey};

use crate::activity::ActivityEntry;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{ActivityFilter, ActivityPage, InvoiceFilter, LicenseFilter, Pagination};

/// Storage-level failure.
///
/// `Conflict` is the only variant a caller is expected to act on; every other
/// variant aborts the enclosing operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness violation (license key, invoice number).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend unreachable, pool closed, or an injected fault.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Process-wide store handle; hands out transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// Unit of work over the store.
///
/// Lookups that precede a write (`license_by_id`, `licenses_by_invoice`,
/// `invoice_by_id`) lock the returned rows until the transaction ends.
#[async_trait]
pub trait StoreTx: Send {
    // Licenses

    async fn license_by_id(&mut self, id: LicenseId) -> StoreResult<Option<License>>;

    async fn license_by_key(&mut self, key: &LicenseKey) -> StoreResult<Option<License>>;

    async fn list_licenses(
        &mut self,
        filter: &LicenseFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<License>>;

    async fn licenses_by_invoice(&mut self, invoice_id: InvoiceId) -> StoreResult<Vec<License>>;

    /// Move every `Active` license with `expires_at <= now` to `Expired`.
    /// Returns the ids that changed.
    async fn expire_due_licenses(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LicenseId>>;

    async fn insert_license(&mut self, license: &License) -> StoreResult<()>;

    async fn update_license(&mut self, license: &License) -> StoreResult<()>;

    /// Returns `false` when no such license exists.
    async fn delete_license(&mut self, id: LicenseId) -> StoreResult<bool>;

    // Invoices

    async fn invoice_by_id(&mut self, id: InvoiceId) -> StoreResult<Option<Invoice>>;

    async fn invoice_by_number(&mut self, invoice_number: &str) -> StoreResult<Option<Invoice>>;

    async fn list_invoices(
        &mut self,
        filter: &InvoiceFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<Invoice>>;

    /// Insert the invoice together with its line items.
    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()>;

    /// Update invoice fields; rewrites line items when `replace_line_items`.
    async fn update_invoice(&mut self, invoice: &Invoice, replace_line_items: bool)
    -> StoreResult<()>;

    /// Delete line items, then the invoice. Returns `false` when absent.
    async fn delete_invoice(&mut self, id: InvoiceId) -> StoreResult<bool>;

    // Activity

    async fn append_activity(&mut self, entry: &ActivityEntry) -> StoreResult<()>;

    async fn list_activity(
        &mut self,
        filter: &ActivityFilter,
        pagination: Pagination,
    ) -> StoreResult<ActivityPage>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
