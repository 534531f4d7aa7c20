//! Listing filters and pagination shared by every store backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use licensedesk_core::{CompanyId, InvoiceId, UserId};
use licensedesk_invoicing::InvoiceStatus;
use licensedesk_licensing::LicenseStatus;

use crate::activity::{ActivityEntry, SubjectKind};

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Apply to an already ordered in-memory sequence.
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFilter {
    pub status: Option<LicenseStatus>,
    pub invoice_id: Option<InvoiceId>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub subject_kind: Option<SubjectKind>,
    pub subject_id: Option<Uuid>,
}

impl ActivityFilter {
    pub fn matches(&self, entry: &ActivityEntry) -> bool {
        self.subject_kind.is_none_or(|k| k == entry.subject_kind)
            && self.subject_id.is_none_or(|id| id == entry.subject_id)
    }
}

/// One page of activity, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub entries: Vec<ActivityEntry>,
    /// Entries matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl ActivityPage {
    pub fn new(entries: Vec<ActivityEntry>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (entries.len() as u64) < total;
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_capped() {
        assert_eq!(Pagination::new(Some(10_000), None).limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::default().limit, Pagination::DEFAULT_LIMIT);
    }

    #[test]
    fn slice_applies_offset_then_limit() {
        let page = Pagination::new(Some(2), Some(3));
        assert_eq!(page.slice(0..10), vec![3, 4]);
        assert!(Pagination::new(Some(5), Some(20)).slice(0..10).is_empty());
    }

    #[test]
    fn has_more_reflects_remaining_entries() {
        let page = ActivityPage::new(Vec::new(), 0, Pagination::default());
        assert!(!page.has_more);
        let page = ActivityPage::new(Vec::new(), 10, Pagination::new(Some(5), Some(0)));
        assert!(page.has_more);
    }
}
