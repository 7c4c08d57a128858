use formgate_access::SessionIdentity;
use formgate_core::{OrganizationId, UserId};

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallerContext {
    identity: SessionIdentity,
}

impl CallerContext {
    pub fn new(identity: SessionIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> SessionIdentity {
        self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.identity.organization_id
    }
}
