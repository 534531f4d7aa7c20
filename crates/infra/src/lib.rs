//! Infrastructure layer: persistence backends, activity log and the
//! lifecycle service that ties them to the domain crates.

pub mod activity;
pub mod lifecycle;
pub mod store;


pub use activity::{ActivityAction, ActivityEntry, Actor, SubjectKind};
pub use lifecycle::{InvoiceWithLicenses, LifecycleManager, ServiceError, ServiceResult};
pub use store::{
    ActivityFilter, ActivityPage, InMemoryStore, InvoiceFilter, LicenseFilter, Pagination,
    PostgresStore, Store, StoreError, StoreResult, StoreTx,
};
