use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Value as JsonValue, json};

use licensedesk_core::{BankId, CompanyId, DomainError, DomainResult, InvoiceId, LicenseId, PlanId, ProductId, UserId};
use licensedesk_infra::{
    ActivityEntry, ActivityFilter, ActivityPage, InvoiceFilter, InvoiceWithLicenses, LicenseFilter,
    Pagination, SubjectKind,
};
use licensedesk_invoicing::{
    Invoice, InvoiceChanges, InvoiceStatus, LineItem, LineItemDraft, NewInvoice, PaymentMethod,
};
use licensedesk_licensing::{License, LicenseChanges, LicenseKey, LicenseStatus, NewLicense};

/// Distinguish an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH bodies.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn parse_opt<T>(raw: Option<&str>) -> DomainResult<Option<T>>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.map(str::parse).transpose()
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    pub key: Option<String>,
    pub product_id: ProductId,
    pub plan_id: PlanId,
    pub user_id: Option<UserId>,
    pub status: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub invoice_id: Option<InvoiceId>,
    pub max_devices: Option<u32>,
}

impl CreateLicenseRequest {
    pub fn into_new_license(self) -> DomainResult<NewLicense> {
        Ok(NewLicense {
            key: self.key.as_deref().map(LicenseKey::parse).transpose()?,
            product_id: self.product_id,
            plan_id: self.plan_id,
            user_id: self.user_id,
            status: parse_opt(self.status.as_deref())?,
            expires_at: self.expires_at,
            invoice_id: self.invoice_id,
            max_devices: self.max_devices,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLicenseRequest {
    pub product_id: Option<ProductId>,
    pub plan_id: Option<PlanId>,
    #[serde(default, deserialize_with = "double_option")]
    pub user_id: Option<Option<UserId>>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub invoice_id: Option<Option<InvoiceId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_devices: Option<Option<u32>>,
}

impl UpdateLicenseRequest {
    pub fn into_changes(self) -> DomainResult<LicenseChanges> {
        Ok(LicenseChanges {
            product_id: self.product_id,
            plan_id: self.plan_id,
            user_id: self.user_id,
            status: parse_opt(self.status.as_deref())?,
            expires_at: self.expires_at,
            invoice_id: self.invoice_id,
            max_devices: self.max_devices,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LineItemRequest {
    pub plan_id: PlanId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: u64,
    pub total: Option<u64>,
}

impl From<LineItemRequest> for LineItemDraft {
    fn from(req: LineItemRequest) -> Self {
        LineItemDraft {
            plan_id: req.plan_id,
            description: req.description,
            quantity: req.quantity,
            unit_price: req.unit_price,
            total: req.total,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub invoice_number: String,
    pub company_id: CompanyId,
    pub bank_id: Option<BankId>,
    pub payment_method: String,
    pub status: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItemRequest>,
    /// Licenses to attach to the new invoice.
    #[serde(default)]
    pub license_ids: Vec<LicenseId>,
}

impl CreateInvoiceRequest {
    pub fn into_parts(self) -> DomainResult<(NewInvoice, Vec<LicenseId>)> {
        let new = NewInvoice {
            invoice_number: self.invoice_number,
            company_id: self.company_id,
            bank_id: self.bank_id,
            payment_method: self.payment_method.parse::<PaymentMethod>()?,
            status: parse_opt(self.status.as_deref())?,
            line_items: self.line_items.into_iter().map(Into::into).collect(),
        };
        Ok((new, self.license_ids))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    pub invoice_number: Option<String>,
    pub company_id: Option<CompanyId>,
    #[serde(default, deserialize_with = "double_option")]
    pub bank_id: Option<Option<BankId>>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
    /// When present, replaces the invoice's line items wholesale.
    pub line_items: Option<Vec<LineItemRequest>>,
}

impl UpdateInvoiceRequest {
    pub fn into_changes(self) -> DomainResult<InvoiceChanges> {
        Ok(InvoiceChanges {
            invoice_number: self.invoice_number,
            company_id: self.company_id,
            bank_id: self.bank_id,
            payment_method: parse_opt(self.payment_method.as_deref())?,
            status: parse_opt(self.status.as_deref())?,
            line_items: self
                .line_items
                .map(|items| items.into_iter().map(Into::into).collect()),
        })
    }
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LicenseListQuery {
    pub status: Option<String>,
    pub invoice_id: Option<InvoiceId>,
    pub user_id: Option<UserId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl LicenseListQuery {
    pub fn into_parts(self) -> DomainResult<(LicenseFilter, Pagination)> {
        let filter = LicenseFilter {
            status: parse_opt::<LicenseStatus>(self.status.as_deref())?,
            invoice_id: self.invoice_id,
            user_id: self.user_id,
        };
        Ok((filter, Pagination::new(self.limit, self.offset)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
    pub company_id: Option<CompanyId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl InvoiceListQuery {
    pub fn into_parts(self) -> DomainResult<(InvoiceFilter, Pagination)> {
        let filter = InvoiceFilter {
            status: parse_opt::<InvoiceStatus>(self.status.as_deref())?,
            company_id: self.company_id,
        };
        Ok((filter, Pagination::new(self.limit, self.offset)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub subject_kind: Option<String>,
    pub subject_id: Option<uuid::Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ActivityQuery {
    pub fn into_parts(self) -> DomainResult<(ActivityFilter, Pagination)> {
        let filter = ActivityFilter {
            subject_kind: parse_opt::<SubjectKind>(self.subject_kind.as_deref())?,
            subject_id: self.subject_id,
        };
        Ok((filter, Pagination::new(self.limit, self.offset)))
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn license_to_json(license: &License) -> JsonValue {
    json!({
        "id": license.id.to_string(),
        "key": license.key.as_str(),
        "product_id": license.product_id.to_string(),
        "plan_id": license.plan_id.to_string(),
        "user_id": license.user_id.map(|id| id.to_string()),
        "status": license.status.as_str(),
        "expires_at": license.expires_at.map(|t| t.to_rfc3339()),
        "invoice_id": license.invoice_id.map(|id| id.to_string()),
        "max_devices": license.max_devices,
        "created_at": license.created_at.to_rfc3339(),
        "updated_at": license.updated_at.to_rfc3339(),
    })
}

fn line_item_to_json(item: &LineItem) -> JsonValue {
    json!({
        "id": item.id.to_string(),
        "plan_id": item.plan_id.to_string(),
        "description": item.description,
        "quantity": item.quantity,
        "unit_price": item.unit_price,
        "total": item.total,
    })
}

pub fn invoice_to_json(invoice: &Invoice) -> JsonValue {
    json!({
        "id": invoice.id.to_string(),
        "invoice_number": invoice.invoice_number,
        "company_id": invoice.company_id.to_string(),
        "bank_id": invoice.bank_id.map(|id| id.to_string()),
        "payment_method": invoice.payment_method.as_str(),
        "status": invoice.status.as_str(),
        "line_items": invoice.line_items.iter().map(line_item_to_json).collect::<Vec<_>>(),
        "total_amount": invoice.total_amount(),
        "created_at": invoice.created_at.to_rfc3339(),
        "updated_at": invoice.updated_at.to_rfc3339(),
    })
}

pub fn invoice_with_licenses_to_json(found: &InvoiceWithLicenses) -> JsonValue {
    let mut body = invoice_to_json(&found.invoice);
    body["license_ids"] = json!(found
        .license_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>());
    body
}

fn activity_to_json(entry: &ActivityEntry) -> JsonValue {
    json!({
        "id": entry.id.to_string(),
        "occurred_at": entry.occurred_at.to_rfc3339(),
        "actor_id": entry.actor_id.map(|id| id.to_string()),
        "subject_kind": entry.subject_kind.as_str(),
        "subject_id": entry.subject_id.to_string(),
        "action": entry.action.as_str(),
        "detail": entry.detail,
    })
}

pub fn activity_page_to_json(page: &ActivityPage) -> JsonValue {
    json!({
        "items": page.entries.iter().map(activity_to_json).collect::<Vec<_>>(),
        "total": page.total,
        "limit": page.pagination.limit,
        "offset": page.pagination.offset,
        "has_more": page.has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let absent: UpdateLicenseRequest = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(absent.invoice_id, None);

        let cleared: UpdateLicenseRequest =
            serde_json::from_str(r#"{"invoice_id": null, "max_devices": null}"#).unwrap();
        assert_eq!(cleared.invoice_id, Some(None));
        assert_eq!(cleared.max_devices, Some(None));

        let id = InvoiceId::new();
        let set: UpdateLicenseRequest =
            serde_json::from_str(&format!(r#"{{"invoice_id": "{id}"}}"#)).unwrap();
        assert_eq!(set.invoice_id, Some(Some(id)));
    }

    #[test]
    fn status_strings_map_to_domain_values() {
        let req: UpdateLicenseRequest = serde_json::from_str(r#"{"status": "active"}"#).unwrap();
        let changes = req.into_changes().unwrap();
        assert_eq!(changes.status, Some(LicenseStatus::Active));

        let req: UpdateLicenseRequest = serde_json::from_str(r#"{"status": "revoked"}"#).unwrap();
        assert!(req.into_changes().is_err());
    }

    #[test]
    fn create_invoice_defaults_to_no_attached_licenses() {
        let body = json!({
            "invoice_number": "INV-1",
            "company_id": CompanyId::new(),
            "payment_method": "card",
            "line_items": [{
                "plan_id": PlanId::new(),
                "description": "Basic",
                "quantity": 1,
                "unit_price": 2999,
                "total": 2999
            }]
        });
        let req: CreateInvoiceRequest = serde_json::from_value(body).unwrap();
        let (new, license_ids) = req.into_parts().unwrap();
        assert!(license_ids.is_empty());
        assert_eq!(new.payment_method, PaymentMethod::Card);
        assert_eq!(new.status, None);
        assert_eq!(new.line_items[0].total, Some(2999));
    }
}
