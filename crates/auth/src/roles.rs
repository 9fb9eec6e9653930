use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::{self, Permission};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings in tokens; [`permissions_for_roles`] is the policy
/// that maps them to permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the effective permissions granted by a set of roles.
///
/// Unknown roles grant nothing.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        let granted: &[Permission] = match role.as_str() {
            "admin" => &[permissions::WILDCARD],
            "operator" => &[permissions::JOBS_READ, permissions::JOBS_MANAGE],
            "viewer" => &[permissions::JOBS_READ],
            _ => &[],
        };
        for p in granted {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
    }
    out
}
