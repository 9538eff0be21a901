//! `imobcrm-auth` — authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256Jwt, JwtValidator};
pub use password::{MIN_PASSWORD_LEN, PasswordError, hash_password, verify_password};
pub use permissions::{Permission, perms};
pub use principal::TenantMembership;
pub use roles::{Role, permissions_for_roles, role_permissions};
pub use user::{NewUser, User, UserStatus, normalize_email};
