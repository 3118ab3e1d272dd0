//! `labstock-auth` — authenticated principal boundary.
//!
//! Token issuance (login, signup, approvals) lives elsewhere; this crate only
//! turns a bearer token into a principal id + role. It is decoupled from HTTP
//! and storage.

pub mod claims;
pub mod principal;
pub mod roles;

pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use principal::{Principal, PrincipalId};
pub use roles::Role;
