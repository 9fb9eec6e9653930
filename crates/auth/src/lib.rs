//! `kitchenline-auth`: access-control boundary for job operations.
//!
//! Decoupled from HTTP and storage: the API layer turns a bearer token into a
//! [`Principal`] and the job service asks [`authorize`] before acting.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AuthzError};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use kitchenline_core::PrincipalId;
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::{permissions_for_roles, Role};
