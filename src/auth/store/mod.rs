//! Credential store: the system of record for identities, password hashes
//! and role membership.
//!
//! Implementations must make `create_role` and `create_identity` atomic
//! create-if-absent operations so concurrent bootstrap runs never collide.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeSet, fmt, future::Future, time::Duration};
use thiserror::Error;
use tracing::warn;

use super::{password, role::Role};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("invalid identity id: {0}")]
    InvalidId(String),
    #[error("stored role is not recognised: {0}")]
    UnknownRole(String),
    #[error("password hashing failed: {0}")]
    Hash(#[from] argon2::password_hash::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A stored account.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub password_hash: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("has_password", &self.has_password())
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Case-insensitive lookup.
    async fn find_identity_by_username(&self, username: &str)
        -> Result<Option<Identity>, StoreError>;

    async fn find_identity_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError>;

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    async fn get_roles(&self, identity: &Identity) -> Result<BTreeSet<Role>, StoreError>;

    async fn role_exists(&self, role: Role) -> Result<bool, StoreError>;

    /// Returns `true` only when this call created the role.
    async fn create_role(&self, role: Role) -> Result<bool, StoreError>;

    /// Creates the identity, or returns the existing one with the same username.
    async fn create_identity(&self, username: &str) -> Result<Identity, StoreError>;

    async fn set_password(
        &self,
        identity: &Identity,
        password: &SecretString,
    ) -> Result<(), StoreError>;

    /// Adding a role the identity already holds is a no-op.
    async fn add_role_to_identity(&self, identity: &Identity, role: Role)
        -> Result<(), StoreError>;

    async fn is_in_role(&self, identity: &Identity, role: Role) -> Result<bool, StoreError> {
        Ok(self.get_roles(identity).await?.contains(&role))
    }

    /// Argon2 verification runs on the blocking pool.
    async fn verify_password(&self, identity: &Identity, password: &str) -> Result<bool, StoreError> {
        let Some(phc) = identity.password_hash.clone() else {
            return Ok(false);
        };
        let password = password.to_string();

        Ok(tokio::task::spawn_blocking(move || password::verify(&password, &phc)).await?)
    }
}

/// Hash on the blocking pool; shared by the store implementations.
pub(crate) async fn hash_password(password: &SecretString) -> Result<String, StoreError> {
    let password = password.expose_secret().to_string();

    Ok(tokio::task::spawn_blocking(move || password::hash(&password)).await??)
}

/// Wraps a store so that every call is bounded by `timeout`.
///
/// An elapsed call is reported as [`StoreError::Timeout`] and never retried.
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        if let Ok(result) = tokio::time::timeout(self.timeout, fut).await {
            result
        } else {
            warn!("credential store call {} timed out", op);
            Err(StoreError::Timeout(self.timeout))
        }
    }
}

#[async_trait]
impl<S: CredentialStore> CredentialStore for TimeoutStore<S> {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        self.bounded(
            "find_identity_by_username",
            self.inner.find_identity_by_username(username),
        )
        .await
    }

    async fn find_identity_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        self.bounded("find_identity_by_id", self.inner.find_identity_by_id(id))
            .await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.bounded("list_identities", self.inner.list_identities())
            .await
    }

    async fn get_roles(&self, identity: &Identity) -> Result<BTreeSet<Role>, StoreError> {
        self.bounded("get_roles", self.inner.get_roles(identity))
            .await
    }

    async fn role_exists(&self, role: Role) -> Result<bool, StoreError> {
        self.bounded("role_exists", self.inner.role_exists(role))
            .await
    }

    async fn create_role(&self, role: Role) -> Result<bool, StoreError> {
        self.bounded("create_role", self.inner.create_role(role))
            .await
    }

    async fn create_identity(&self, username: &str) -> Result<Identity, StoreError> {
        self.bounded("create_identity", self.inner.create_identity(username))
            .await
    }

    async fn set_password(
        &self,
        identity: &Identity,
        password: &SecretString,
    ) -> Result<(), StoreError> {
        self.bounded("set_password", self.inner.set_password(identity, password))
            .await
    }

    async fn add_role_to_identity(
        &self,
        identity: &Identity,
        role: Role,
    ) -> Result<(), StoreError> {
        self.bounded(
            "add_role_to_identity",
            self.inner.add_role_to_identity(identity, role),
        )
        .await
    }

    async fn is_in_role(&self, identity: &Identity, role: Role) -> Result<bool, StoreError> {
        self.bounded("is_in_role", self.inner.is_in_role(identity, role))
            .await
    }

    async fn verify_password(&self, identity: &Identity, password: &str) -> Result<bool, StoreError> {
        self.bounded(
            "verify_password",
            self.inner.verify_password(identity, password),
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{async_trait, BTreeSet, CredentialStore, Duration, Identity, Role, SecretString, StoreError};

    /// Fails every call the way an unreachable backend behind
    /// [`super::TimeoutStore`] would.
    pub(crate) struct Unavailable;

    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Timeout(Duration::from_secs(5)))
    }

    #[async_trait]
    impl CredentialStore for Unavailable {
        async fn find_identity_by_username(
            &self,
            _username: &str,
        ) -> Result<Option<Identity>, StoreError> {
            down()
        }

        async fn find_identity_by_id(&self, _id: &str) -> Result<Option<Identity>, StoreError> {
            down()
        }

        async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
            down()
        }

        async fn get_roles(&self, _identity: &Identity) -> Result<BTreeSet<Role>, StoreError> {
            down()
        }

        async fn role_exists(&self, _role: Role) -> Result<bool, StoreError> {
            down()
        }

        async fn create_role(&self, _role: Role) -> Result<bool, StoreError> {
            down()
        }

        async fn create_identity(&self, _username: &str) -> Result<Identity, StoreError> {
            down()
        }

        async fn set_password(
            &self,
            _identity: &Identity,
            _password: &SecretString,
        ) -> Result<(), StoreError> {
            down()
        }

        async fn add_role_to_identity(
            &self,
            _identity: &Identity,
            _role: Role,
        ) -> Result<(), StoreError> {
            down()
        }
    }
}
