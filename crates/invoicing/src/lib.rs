//! Invoicing domain module.
//!
//! Invoices, their owned line items and payment status, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod invoice;

pub use invoice::{
    Invoice, InvoiceChanges, InvoiceStatus, InvoiceUpdate, LineItem, LineItemDraft, NewInvoice,
    PaymentMethod,
};
