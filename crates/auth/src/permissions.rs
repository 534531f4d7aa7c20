use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier, `"<resource>.<action>"` (e.g. `"licenses.read"`).
///
/// The wildcard `"*"` grants everything and is only handed out by the admin
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    pub const LICENSES_READ: Permission = Permission(Cow::Borrowed("licenses.read"));
    pub const LICENSES_WRITE: Permission = Permission(Cow::Borrowed("licenses.write"));
    pub const INVOICES_READ: Permission = Permission(Cow::Borrowed("invoices.read"));
    pub const INVOICES_WRITE: Permission = Permission(Cow::Borrowed("invoices.write"));
    pub const ACTIVITY_READ: Permission = Permission(Cow::Borrowed("activity.read"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// `true` if holding `self` satisfies a check for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        self.is_wildcard() || self == required
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
