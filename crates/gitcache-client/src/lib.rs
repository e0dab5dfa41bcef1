//! Client for the gitcache artifact registry: authenticated artifact
//! lookup/download/upload plus the local token lifecycle.

pub use crate::auth::{AuthError, AuthManager, AuthRecord, TokenType, USER_TOKEN_TTL_MS};
pub use crate::client::{
    ArtifactInfo, Organization, RegistryClient, RegistryClientBuilder, TokenValidation,
    DEFAULT_API_URL,
};
pub use crate::error::Error;

mod auth;
mod client;
mod error;

/// Environment variables the client honors.
pub mod env {
    /// Overrides the registry base URL.
    pub const GITCACHE_API_URL: &str = "GITCACHE_API_URL";
    /// Supplies a token directly; a `ci_` prefix switches CI mode.
    pub const GITCACHE_TOKEN: &str = "GITCACHE_TOKEN";
}
