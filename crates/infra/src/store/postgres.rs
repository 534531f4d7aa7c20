//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|-----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | ColumnDecode / ColumnNotFound | N/A | `Corrupt` |
//! | Other | N/A | `Database` |
//!
//! ## Locking
//!
//! Lookups that feed a write take `FOR UPDATE` row locks, so two cascades over
//! the same licenses serialize instead of interleaving.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use licensedesk_core::{BankId, CompanyId, InvoiceId, LicenseId, LineItemId, PlanId, ProductId, UserId};
use licensedesk_invoicing::{Invoice, LineItem};
use licensedesk_licensing::{License, LicenseKey};

use super::query::{ActivityFilter, ActivityPage, InvoiceFilter, LicenseFilter, Pagination};
use super::{Store, StoreError, StoreResult, StoreTx};
use crate::activity::ActivityEntry;

const LICENSE_COLUMNS: &str = "id, license_key, product_id, plan_id, user_id, status, \
     expires_at, invoice_id, max_devices, created_at, updated_at";

const INVOICE_COLUMNS: &str =
    "id, invoice_number, company_id, bank_id, payment_method, status, created_at, updated_at";

/// Postgres-backed store.
///
/// Uses a SQLx connection pool; each [`StoreTx`] wraps one database
/// transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations from `crates/infra/migrations`.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    async fn fetch_licenses(&mut self, sql: &str, bind: Uuid) -> StoreResult<Vec<License>> {
        let rows = sqlx::query(sql)
            .bind(bind)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_licenses", e))?;
        rows.iter().map(license_from_row).collect()
    }

    async fn line_items_for(&mut self, invoice_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<LineItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, position, plan_id, description, quantity, unit_price, total
            FROM invoice_line_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position ASC
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("line_items_for", e))?;

        let mut grouped: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for row in &rows {
            let row = LineItemRow::from_row(row).map_err(|e| map_sqlx_error("line_items_for", e))?;
            grouped.entry(row.invoice_id).or_default().push(row.try_into()?);
        }
        Ok(grouped)
    }

    async fn invoices_with_lines(&mut self, rows: Vec<PgRow>) -> StoreResult<Vec<Invoice>> {
        let rows = rows
            .iter()
            .map(InvoiceRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("invoices_with_lines", e))?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut lines = self.line_items_for(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let line_items = lines.remove(&row.id).unwrap_or_default();
                row.into_invoice(line_items)
            })
            .collect()
    }

    async fn insert_line_items(&mut self, invoice: &Invoice) -> StoreResult<()> {
        for (position, item) in invoice.line_items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (
                    id, invoice_id, position, plan_id, description, quantity, unit_price, total
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(invoice.id.as_uuid())
            .bind(position as i32)
            .bind(item.plan_id.as_uuid())
            .bind(&item.description)
            .bind(i64::from(item.quantity))
            .bind(to_db_amount("unit_price", item.unit_price)?)
            .bind(to_db_amount("total", item.total)?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_line_items", e))?;
        }
        Ok(())
    }

    async fn delete_line_items(&mut self, invoice_id: InvoiceId) -> StoreResult<()> {
        sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_line_items", e))?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PostgresTx {
    #[instrument(skip(self), fields(license_id = %id), err)]
    async fn license_by_id(&mut self, id: LicenseId) -> StoreResult<Option<License>> {
        let sql = format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE id = $1 FOR UPDATE");
        Ok(self.fetch_licenses(&sql, *id.as_uuid()).await?.pop())
    }

    #[instrument(skip(self, key), err)]
    async fn license_by_key(&mut self, key: &LicenseKey) -> StoreResult<Option<License>> {
        let sql = format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE license_key = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("license_by_key", e))?;
        row.as_ref().map(license_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_licenses(
        &mut self,
        filter: &LicenseFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<License>> {
        let sql = format!(
            r#"
            SELECT {LICENSE_COLUMNS}
            FROM licenses
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR invoice_id = $2)
              AND ($3::uuid IS NULL OR user_id = $3)
            ORDER BY created_at ASC, id ASC
            LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.invoice_id.map(Uuid::from))
            .bind(filter.user_id.map(Uuid::from))
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_licenses", e))?;
        rows.iter().map(license_from_row).collect()
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id), err)]
    async fn licenses_by_invoice(&mut self, invoice_id: InvoiceId) -> StoreResult<Vec<License>> {
        let sql = format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE invoice_id = $1 \
             ORDER BY created_at ASC, id ASC FOR UPDATE"
        );
        self.fetch_licenses(&sql, *invoice_id.as_uuid()).await
    }

    #[instrument(skip(self), fields(expired = tracing::field::Empty), err)]
    async fn expire_due_licenses(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<LicenseId>> {
        let rows = sqlx::query(
            r#"
            UPDATE licenses
            SET status = 'Expired', updated_at = $1
            WHERE status = 'Active' AND expires_at IS NOT NULL AND expires_at <= $1
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("expire_due_licenses", e))?;

        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(LicenseId::from_uuid))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("expire_due_licenses", e))?;
        ids.sort();
        tracing::Span::current().record("expired", ids.len());
        Ok(ids)
    }

    #[instrument(skip(self, license), fields(license_id = %license.id), err)]
    async fn insert_license(&mut self, license: &License) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO licenses (
                id, license_key, product_id, plan_id, user_id, status,
                expires_at, invoice_id, max_devices, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(license.id.as_uuid())
        .bind(license.key.as_str())
        .bind(license.product_id.as_uuid())
        .bind(license.plan_id.as_uuid())
        .bind(license.user_id.map(Uuid::from))
        .bind(license.status.as_str())
        .bind(license.expires_at)
        .bind(license.invoice_id.map(Uuid::from))
        .bind(to_db_devices(license.max_devices)?)
        .bind(license.created_at)
        .bind(license.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_license", e))?;
        Ok(())
    }

    #[instrument(skip(self, license), fields(license_id = %license.id), err)]
    async fn update_license(&mut self, license: &License) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE licenses
            SET license_key = $2, product_id = $3, plan_id = $4, user_id = $5, status = $6,
                expires_at = $7, invoice_id = $8, max_devices = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(license.id.as_uuid())
        .bind(license.key.as_str())
        .bind(license.product_id.as_uuid())
        .bind(license.plan_id.as_uuid())
        .bind(license.user_id.map(Uuid::from))
        .bind(license.status.as_str())
        .bind(license.expires_at)
        .bind(license.invoice_id.map(Uuid::from))
        .bind(to_db_devices(license.max_devices)?)
        .bind(license.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_license", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("update of missing license {}", license.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(license_id = %id), err)]
    async fn delete_license(&mut self, id: LicenseId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM licenses WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_license", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn invoice_by_id(&mut self, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("invoice_by_id", e))?;
        Ok(self.invoices_with_lines(rows).await?.pop())
    }

    #[instrument(skip(self), err)]
    async fn invoice_by_number(&mut self, invoice_number: &str) -> StoreResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = $1");
        let rows = sqlx::query(&sql)
            .bind(invoice_number)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("invoice_by_number", e))?;
        Ok(self.invoices_with_lines(rows).await?.pop())
    }

    #[instrument(skip(self), err)]
    async fn list_invoices(
        &mut self,
        filter: &InvoiceFilter,
        pagination: Pagination,
    ) -> StoreResult<Vec<Invoice>> {
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR company_id = $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.company_id.map(Uuid::from))
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;
        self.invoices_with_lines(rows).await
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id), err)]
    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, company_id, bank_id, payment_method, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(&invoice.invoice_number)
        .bind(invoice.company_id.as_uuid())
        .bind(invoice.bank_id.map(Uuid::from))
        .bind(invoice.payment_method.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;

        self.insert_line_items(invoice).await
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id), err)]
    async fn update_invoice(
        &mut self,
        invoice: &Invoice,
        replace_line_items: bool,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET invoice_number = $2, company_id = $3, bank_id = $4, payment_method = $5,
                status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(&invoice.invoice_number)
        .bind(invoice.company_id.as_uuid())
        .bind(invoice.bank_id.map(Uuid::from))
        .bind(invoice.payment_method.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("update of missing invoice {}", invoice.id)));
        }
        if replace_line_items {
            self.delete_line_items(invoice.id).await?;
            self.insert_line_items(invoice).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn delete_invoice(&mut self, id: InvoiceId) -> StoreResult<bool> {
        self.delete_line_items(id).await?;
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invoice", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, entry), fields(action = entry.action.as_str()), err)]
    async fn append_activity(&mut self, entry: &ActivityEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (
                id, occurred_at, actor_id, subject_kind, subject_id, action, detail
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.occurred_at)
        .bind(entry.actor_id)
        .bind(entry.subject_kind.as_str())
        .bind(entry.subject_id)
        .bind(entry.action.as_str())
        .bind(&entry.detail)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_activity", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_activity(
        &mut self,
        filter: &ActivityFilter,
        pagination: Pagination,
    ) -> StoreResult<ActivityPage> {
        let kind = filter.subject_kind.map(|k| k.as_str());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM activity_log
            WHERE ($1::text IS NULL OR subject_kind = $1)
              AND ($2::uuid IS NULL OR subject_id = $2)
            "#,
        )
        .bind(kind)
        .bind(filter.subject_id)
        .fetch_one(&mut *self.tx)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(|e| map_sqlx_error("count_activity", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, actor_id, subject_kind, subject_id, action, detail
            FROM activity_log
            WHERE ($1::text IS NULL OR subject_kind = $1)
              AND ($2::uuid IS NULL OR subject_id = $2)
            ORDER BY occurred_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(kind)
        .bind(filter.subject_id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_activity", e))?;

        let entries = rows
            .iter()
            .map(|row| {
                ActivityRow::from_row(row)
                    .map_err(|e| map_sqlx_error("list_activity", e))
                    .and_then(ActivityEntry::try_from)
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ActivityPage::new(entries, total.max(0) as u64, pagination))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_)) => {
            StoreError::Corrupt(format!("{operation}: {e}"))
        }
        e => StoreError::Database(format!("sqlx error in {operation}: {e}")),
    }
}

fn to_db_amount(field: &str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{field} {value} out of range")))
}

fn to_db_devices(value: Option<u32>) -> StoreResult<Option<i32>> {
    value
        .map(|v| i32::try_from(v).map_err(|_| StoreError::Database(format!("max_devices {v} out of range"))))
        .transpose()
}

fn corrupt(what: &str, detail: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {detail}"))
}

fn license_from_row(row: &PgRow) -> StoreResult<License> {
    LicenseRow::from_row(row)
        .map_err(|e| map_sqlx_error("license_from_row", e))?
        .try_into()
}

#[derive(Debug)]
struct LicenseRow {
    id: Uuid,
    license_key: String,
    product_id: Uuid,
    plan_id: Uuid,
    user_id: Option<Uuid>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    invoice_id: Option<Uuid>,
    max_devices: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LicenseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LicenseRow {
            id: row.try_get("id")?,
            license_key: row.try_get("license_key")?,
            product_id: row.try_get("product_id")?,
            plan_id: row.try_get("plan_id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            expires_at: row.try_get("expires_at")?,
            invoice_id: row.try_get("invoice_id")?,
            max_devices: row.try_get("max_devices")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<LicenseRow> for License {
    type Error = StoreError;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        Ok(License {
            id: LicenseId::from_uuid(row.id),
            key: LicenseKey::parse(&row.license_key).map_err(|e| corrupt("license_key", e))?,
            product_id: ProductId::from_uuid(row.product_id),
            plan_id: PlanId::from_uuid(row.plan_id),
            user_id: row.user_id.map(UserId::from_uuid),
            status: row.status.parse().map_err(|e| corrupt("license status", e))?,
            expires_at: row.expires_at,
            invoice_id: row.invoice_id.map(InvoiceId::from_uuid),
            max_devices: row
                .max_devices
                .map(u32::try_from)
                .transpose()
                .map_err(|e| corrupt("max_devices", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    company_id: Uuid,
    bank_id: Option<Uuid>,
    payment_method: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            invoice_number: row.try_get("invoice_number")?,
            company_id: row.try_get("company_id")?,
            bank_id: row.try_get("bank_id")?,
            payment_method: row.try_get("payment_method")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl InvoiceRow {
    fn into_invoice(self, line_items: Vec<LineItem>) -> StoreResult<Invoice> {
        Ok(Invoice {
            id: InvoiceId::from_uuid(self.id),
            invoice_number: self.invoice_number,
            company_id: CompanyId::from_uuid(self.company_id),
            bank_id: self.bank_id.map(BankId::from_uuid),
            payment_method: self
                .payment_method
                .parse()
                .map_err(|e| corrupt("payment_method", e))?,
            status: self.status.parse().map_err(|e| corrupt("invoice status", e))?,
            line_items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug)]
struct LineItemRow {
    id: Uuid,
    invoice_id: Uuid,
    plan_id: Uuid,
    description: String,
    quantity: i64,
    unit_price: i64,
    total: i64,
}

impl<'r> FromRow<'r, PgRow> for LineItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            plan_id: row.try_get("plan_id")?,
            description: row.try_get("description")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            total: row.try_get("total")?,
        })
    }
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = StoreError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        Ok(LineItem {
            id: LineItemId::from_uuid(row.id),
            plan_id: PlanId::from_uuid(row.plan_id),
            description: row.description,
            quantity: u32::try_from(row.quantity).map_err(|e| corrupt("quantity", e))?,
            unit_price: u64::try_from(row.unit_price).map_err(|e| corrupt("unit_price", e))?,
            total: u64::try_from(row.total).map_err(|e| corrupt("total", e))?,
        })
    }
}

#[derive(Debug)]
struct ActivityRow {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    actor_id: Option<Uuid>,
    subject_kind: String,
    subject_id: Uuid,
    action: String,
    detail: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for ActivityRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ActivityRow {
            id: row.try_get("id")?,
            occurred_at: row.try_get("occurred_at")?,
            actor_id: row.try_get("actor_id")?,
            subject_kind: row.try_get("subject_kind")?,
            subject_id: row.try_get("subject_id")?,
            action: row.try_get("action")?,
            detail: row.try_get("detail")?,
        })
    }
}

impl TryFrom<ActivityRow> for ActivityEntry {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(ActivityEntry {
            id: row.id.into(),
            occurred_at: row.occurred_at,
            actor_id: row.actor_id,
            subject_kind: row.subject_kind.parse().map_err(|e| corrupt("subject_kind", e))?,
            subject_id: row.subject_id,
            action: row.action.parse().map_err(|e| corrupt("action", e))?,
            detail: row.detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_beyond_bigint_are_rejected() {
        assert_eq!(to_db_amount("total", 2999).unwrap(), 2999);
        assert!(to_db_amount("total", u64::MAX).is_err());
        assert_eq!(to_db_devices(None).unwrap(), None);
        assert!(to_db_devices(Some(u32::MAX)).is_err());
    }

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }

    #[test]
    fn license_row_with_unknown_status_is_corrupt() {
        let now = Utc::now();
        let row = LicenseRow {
            id: Uuid::now_v7(),
            license_key: "ABCDE-12345".to_string(),
            product_id: Uuid::now_v7(),
            plan_id: Uuid::now_v7(),
            user_id: None,
            status: "Suspended".to_string(),
            expires_at: None,
            invoice_id: None,
            max_devices: Some(3),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(License::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
