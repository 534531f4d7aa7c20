use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use licensedesk_core::{
    BankId, CompanyId, DomainError, DomainResult, Entity, InvoiceId, LineItemId, PlanId,
};

/// Invoice payment status.
///
/// Drives license activation: a license funded by a `Paid` invoice is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "Unpaid",
            InvoiceStatus::Paid => "Paid",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, InvoiceStatus::Paid)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unpaid" => Ok(InvoiceStatus::Unpaid),
            "paid" => Ok(InvoiceStatus::Paid),
            _ => Err(DomainError::validation(format!(
                "unknown invoice status '{s}' (expected Unpaid or Paid)"
            ))),
        }
    }
}

/// How the invoice is (or will be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Card,
    Cash,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "card" => Ok(PaymentMethod::Card),
            "cash" => Ok(PaymentMethod::Cash),
            "cheque" => Ok(PaymentMethod::Cheque),
            "other" => Ok(PaymentMethod::Other),
            _ => Err(DomainError::validation(format!("unknown payment method '{s}'"))),
        }
    }
}

/// Invoice line, owned by exactly one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub plan_id: PlanId,
    pub description: String,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    /// `quantity * unit_price`, in smallest currency unit.
    pub total: u64,
}

/// Line item as submitted by a caller (total optional, computed if absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItemDraft {
    pub plan_id: PlanId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: u64,
    pub total: Option<u64>,
}

impl LineItemDraft {
    /// Validate the draft and assign it an identity.
    pub fn into_line_item(self, id: LineItemId) -> DomainResult<LineItem> {
        let description = self.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("line item description must not be empty"));
        }
        if self.quantity == 0 {
            return Err(DomainError::validation("line item quantity must be positive"));
        }

        let computed = u64::from(self.quantity)
            .checked_mul(self.unit_price)
            .ok_or_else(|| DomainError::invariant("line item amount overflow"))?;

        if let Some(total) = self.total {
            if total != computed {
                return Err(DomainError::validation(format!(
                    "line item total {total} does not equal quantity * unit_price ({computed})"
                )));
            }
        }

        Ok(LineItem {
            id,
            plan_id: self.plan_id,
            description: description.to_string(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            total: computed,
        })
    }
}

fn build_line_items(drafts: Vec<LineItemDraft>) -> DomainResult<Vec<LineItem>> {
    let items = drafts
        .into_iter()
        .map(|d| d.into_line_item(LineItemId::new()))
        .collect::<DomainResult<Vec<_>>>()?;

    items
        .iter()
        .try_fold(0u64, |acc, item| acc.checked_add(item.total))
        .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;

    Ok(items)
}

fn normalize_invoice_number(raw: &str) -> DomainResult<String> {
    let number = raw.trim();
    if number.is_empty() {
        return Err(DomainError::validation("invoice_number must not be empty"));
    }
    Ok(number.to_string())
}

/// Billing record for one or more plans.
///
/// # Invariants
/// - `invoice_number` is non-empty (uniqueness is enforced by the store).
/// - At least one line item; each line's `total == quantity * unit_price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub company_id: CompanyId,
    pub bank_id: Option<BankId>,
    pub payment_method: PaymentMethod,
    pub status: InvoiceStatus,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Invoice {
    type Id = InvoiceId;
    const KIND: &'static str = "invoice";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub company_id: CompanyId,
    pub bank_id: Option<BankId>,
    pub payment_method: PaymentMethod,
    /// Defaults to `Unpaid`.
    pub status: Option<InvoiceStatus>,
    pub line_items: Vec<LineItemDraft>,
}

/// Partial update of an invoice. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceChanges {
    pub invoice_number: Option<String>,
    pub company_id: Option<CompanyId>,
    /// `Some(None)` clears the bank reference.
    pub bank_id: Option<Option<BankId>>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<InvoiceStatus>,
    /// Replaces the whole line item set when present.
    pub line_items: Option<Vec<LineItemDraft>>,
}

/// Outcome of applying `InvoiceChanges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceUpdate {
    pub previous_status: InvoiceStatus,
    pub line_items_replaced: bool,
}

impl InvoiceUpdate {
    pub fn status_changed(&self, current: InvoiceStatus) -> bool {
        self.previous_status != current
    }
}

impl Invoice {
    pub fn create(id: InvoiceId, new: NewInvoice, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            invoice_number: normalize_invoice_number(&new.invoice_number)?,
            company_id: new.company_id,
            bank_id: new.bank_id,
            payment_method: new.payment_method,
            status: new.status.unwrap_or(InvoiceStatus::Unpaid),
            line_items: build_line_items(new.line_items)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sum of line totals in smallest currency unit.
    pub fn total_amount(&self) -> u64 {
        self.line_items.iter().map(|l| l.total).sum()
    }

    pub fn is_paid(&self) -> bool {
        self.status.is_paid()
    }

    /// Apply a partial update. Validation happens before any field is touched.
    pub fn apply_changes(
        &mut self,
        changes: InvoiceChanges,
        now: DateTime<Utc>,
    ) -> DomainResult<InvoiceUpdate> {
        let invoice_number = changes
            .invoice_number
            .as_deref()
            .map(normalize_invoice_number)
            .transpose()?;
        let line_items = changes.line_items.map(build_line_items).transpose()?;

        let update = InvoiceUpdate {
            previous_status: self.status,
            line_items_replaced: line_items.is_some(),
        };

        if let Some(number) = invoice_number {
            self.invoice_number = number;
        }
        if let Some(company_id) = changes.company_id {
            self.company_id = company_id;
        }
        if let Some(bank_id) = changes.bank_id {
            self.bank_id = bank_id;
        }
        if let Some(method) = changes.payment_method {
            self.payment_method = method;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(items) = line_items {
            self.line_items = items;
        }
        self.updated_at = now;

        Ok(update)
    }
}
