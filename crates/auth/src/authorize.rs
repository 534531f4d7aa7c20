use std::collections::HashMap;

use thiserror::Error;

use crate::{Permission, Principal, PrincipalId, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Role → permission table.
///
/// Roles not present in the table grant nothing, so an unknown or misspelled
/// role in a token is denied rather than silently allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    grants: HashMap<String, Vec<Permission>>,
}

impl RolePolicy {
    pub fn empty() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    /// Built-in policy:
    ///
    /// | role      | permissions                                        |
    /// |-----------|----------------------------------------------------|
    /// | `admin`   | `*`                                                |
    /// | `manager` | read + write on licenses and invoices, read activity |
    /// | `viewer`  | read on licenses, invoices and activity            |
    pub fn standard() -> Self {
        Self::empty()
            .with_role(Role::ADMIN, vec![Permission::WILDCARD])
            .with_role(
                Role::MANAGER,
                vec![
                    Permission::LICENSES_READ,
                    Permission::LICENSES_WRITE,
                    Permission::INVOICES_READ,
                    Permission::INVOICES_WRITE,
                    Permission::ACTIVITY_READ,
                ],
            )
            .with_role(
                Role::VIEWER,
                vec![
                    Permission::LICENSES_READ,
                    Permission::INVOICES_READ,
                    Permission::ACTIVITY_READ,
                ],
            )
    }

    pub fn with_role(mut self, role: Role, permissions: Vec<Permission>) -> Self {
        self.grants.insert(role.as_str().to_string(), permissions);
        self
    }

    pub fn permissions_for(&self, role: &Role) -> &[Permission] {
        self.grants
            .get(role.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolve the effective permissions of a token's roles.
    pub fn resolve(&self, principal_id: PrincipalId, roles: Vec<Role>) -> Principal {
        let mut permissions: Vec<Permission> = Vec::new();
        for role in &roles {
            for perm in self.permissions_for(role) {
                if !permissions.contains(perm) {
                    permissions.push(perm.clone());
                }
            }
        }
        Principal {
            principal_id,
            roles,
            permissions,
        }
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Authorize a principal for one permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.has_permission(required) {
        Ok(())
    } else {
        tracing::debug!(
            principal_id = %principal.principal_id,
            permission = %required,
            "authorization denied"
        );
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
