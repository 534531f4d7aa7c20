//! Licensing domain module.
//!
//! Licenses and the rules that keep their status consistent with time and
//! with the invoice that funds them. Pure logic: callers supply `now` and the
//! funding invoice status, and persist whatever this crate decides.

pub mod license;
pub mod lifecycle;

pub use license::{License, LicenseChanges, LicenseKey, LicenseStatus, NewLicense};
pub use lifecycle::{StatusTransition, TransitionReason};
