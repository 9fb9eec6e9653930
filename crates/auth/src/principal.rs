use serde::{Deserialize, Serialize};

use kitchenline_core::PrincipalId;

use crate::{permissions_for_roles, JwtClaims, Permission, Role};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from transport: the API derives one from
/// validated claims, tests build them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    /// Build a principal whose permissions are resolved from its roles.
    pub fn with_roles(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            principal_id,
            roles,
            permissions,
        }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self::with_roles(claims.sub, claims.roles.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions;
    use chrono::{Duration, Utc};

    #[test]
    fn claims_resolve_to_subject_and_role_permissions() {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            roles: vec![Role::new("viewer"), Role::new("unknown")],
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        };

        let principal = Principal::from_claims(&claims);
        assert_eq!(principal.principal_id, claims.sub);
        assert_eq!(principal.roles, claims.roles);
        assert_eq!(principal.permissions, vec![permissions::JOBS_READ]);
    }
}
