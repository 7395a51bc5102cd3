//! Request middleware.
pub mod auth;

pub use auth::{IdentityClaims, MaybePrincipal, Principal, PrincipalDecoder, PrincipalLayer};
