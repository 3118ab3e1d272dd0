use labstock_auth::{PrincipalId, Role};
use labstock_core::ActorId;

/// Principal context for a request (authenticated identity + role).
///
/// Inserted by the auth middleware; every ledger write is attributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    role: Role,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, role: Role) -> Self {
        Self { principal_id, role }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn actor_id(&self) -> ActorId {
        self.principal_id.into()
    }
}
