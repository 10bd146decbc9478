//! Credential verification, token issuance and identity-store bootstrap.

pub mod bootstrap;
pub mod password;
pub mod role;
pub mod store;
pub mod token;

pub use bootstrap::{BootstrapError, BootstrapManager, MasterAccount};
pub use role::Role;
pub use store::{CredentialStore, Identity, StoreError};
pub use token::{Claims, SigningKey, TokenIssuer, TokenVerifier};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user and wrong password are deliberately the same variant.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential store unavailable")]
    StoreUnavailable(#[source] StoreError),
    #[error("missing configuration: {0}")]
    ConfigurationMissing(&'static str),
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(&'static str),
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err)
    }
}
