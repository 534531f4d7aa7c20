use licensedesk_auth::{Permission, Principal, PrincipalId, Role};
use licensedesk_infra::Actor;

/// Principal context for a request (authenticated identity, roles, and the
/// permissions those roles resolve to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.principal.permissions
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The actor recorded in the activity log for writes made by this request.
    pub fn actor(&self) -> Actor {
        Actor::principal(*self.principal.principal_id.as_uuid())
    }
}
